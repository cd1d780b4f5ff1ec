//! Shared utility functions for the water accounting crates.

/// Month-granular date helpers
pub mod dates {
    use chrono::{Datelike, NaiveDate};

    /// Format a NaiveDate as "YYYY-MM-DD"
    pub fn format_date(date: &NaiveDate) -> String {
        date.format("%Y-%m-%d").to_string()
    }

    /// Format the month of a date as "YYYY_MM", the tag used in output file names
    pub fn format_month_tag(date: &NaiveDate) -> String {
        format!("{}_{:02}", date.year(), date.month())
    }

    /// Parse a date string in "YYYY-MM-DD", "YYYY-MM", "DD/MM/YYYY" or "YYYYMMDD" form
    pub fn parse_date(s: &str) -> anyhow::Result<NaiveDate> {
        let s = s.trim();
        for format in ["%Y-%m-%d", "%d/%m/%Y", "%Y%m%d"] {
            if let Ok(date) = NaiveDate::parse_from_str(s, format) {
                return Ok(date);
            }
        }
        if let Ok(date) = NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d") {
            return Ok(date);
        }
        anyhow::bail!("unrecognised date '{s}'")
    }

    /// Truncate a date to the first day of its month
    pub fn month_start(date: &NaiveDate) -> NaiveDate {
        date.with_day(1).unwrap_or(*date)
    }

    /// Shift a date by a signed number of months, landing on the first of the month
    pub fn add_months(date: &NaiveDate, months: i32) -> NaiveDate {
        let index = date.year() * 12 + date.month0() as i32 + months;
        let year = index.div_euclid(12);
        let month = index.rem_euclid(12) as u32 + 1;
        NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(*date)
    }

    /// Number of whole months from `start` to `end` (negative when `end` precedes `start`)
    pub fn months_between(start: &NaiveDate, end: &NaiveDate) -> i32 {
        (end.year() - start.year()) * 12 + end.month() as i32 - start.month() as i32
    }

    /// Number of days in the month containing `date`
    pub fn days_in_month(date: &NaiveDate) -> u32 {
        let first = month_start(date);
        let next = add_months(&first, 1);
        (next - first).num_days() as u32
    }

    /// Get the water year for a given date.
    ///
    /// A water year is labelled by the calendar year in which it starts, so with a
    /// start month of 10, Oct 2022 through Sep 2023 is water year 2022. With a start
    /// month of 1 the water year is the calendar year.
    pub fn water_year_for_date(date: &NaiveDate, start_month: u32) -> i32 {
        if date.month() >= start_month {
            date.year()
        } else {
            date.year() - 1
        }
    }

}

/// Unit conversions between depths, discharges and volumes
pub mod units {
    use chrono::NaiveDate;

    const SECONDS_PER_DAY: f64 = 86_400.0;
    const M3_PER_KM3: f64 = 1e9;

    /// Convert a depth in mm over an area in km² to a volume in km³
    pub fn mm_to_km3(depth_mm: f64, area_km2: f64) -> f64 {
        depth_mm * area_km2 * 1e-6
    }

    /// Convert a volume in km³ over an area in km² back to a depth in mm
    pub fn km3_to_mm(volume_km3: f64, area_km2: f64) -> f64 {
        if area_km2 > 0.0 {
            volume_km3 / area_km2 * 1e6
        } else {
            f64::NAN
        }
    }

    /// Convert a mean discharge in m³/s to the volume in km³ passed during the month of `date`
    pub fn m3s_to_km3_per_month(discharge: f64, date: &NaiveDate) -> f64 {
        let days = crate::dates::days_in_month(date) as f64;
        discharge * SECONDS_PER_DAY * days / M3_PER_KM3
    }

}
