use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use wa_utils::dates::{month_start, water_year_for_date};

/// Number of months in a complete water year.
pub const MONTHS_PER_WATER_YEAR: usize = 12;

/// The basin's accounting year, starting on the first day of `start_month`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaterYearCalendar {
    pub start_month: u32,
}

impl Default for WaterYearCalendar {
    fn default() -> Self {
        WaterYearCalendar { start_month: 1 }
    }
}

impl WaterYearCalendar {
    pub fn new(start_month: u32) -> Option<Self> {
        (1..=12)
            .contains(&start_month)
            .then_some(WaterYearCalendar { start_month })
    }

    pub fn water_year_of(&self, date: &NaiveDate) -> i32 {
        water_year_for_date(date, self.start_month)
    }

    /// Position of the month within its water year (0 for the start month).
    pub fn month_index(&self, date: &NaiveDate) -> usize {
        ((date.month() + 12 - self.start_month) % 12) as usize
    }

    /// Group month dates by water year, keeping only years with all twelve
    /// months present. Partial years at either end of the record are dropped.
    pub fn complete_years(&self, dates: &[NaiveDate]) -> BTreeMap<i32, Vec<NaiveDate>> {
        let mut years: BTreeMap<i32, Vec<NaiveDate>> = BTreeMap::new();
        for date in dates {
            let date = month_start(date);
            let months = years.entry(self.water_year_of(&date)).or_default();
            if !months.contains(&date) {
                months.push(date);
            }
        }
        years.retain(|year, months| {
            let complete = months.len() == MONTHS_PER_WATER_YEAR;
            if !complete {
                log::debug!(
                    "water year {} has {} of {} months, dropped",
                    year,
                    months.len(),
                    MONTHS_PER_WATER_YEAR
                );
            }
            complete
        });
        for months in years.values_mut() {
            months.sort();
        }
        years
    }
}
