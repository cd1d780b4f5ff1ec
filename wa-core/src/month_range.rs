use chrono::NaiveDate;
use std::mem::replace;
use wa_utils::dates::{add_months, month_start};

/// A month range iterator that yields the first day of each month from the
/// start month through the end month (inclusive).
#[derive(Clone, Eq, PartialEq, Copy, Debug)]
pub struct MonthRange(pub NaiveDate, pub NaiveDate);

impl MonthRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        MonthRange(month_start(&start), month_start(&end))
    }
}

impl Iterator for MonthRange {
    type Item = NaiveDate;
    fn next(&mut self) -> Option<Self::Item> {
        if self.0 <= self.1 {
            let next = add_months(&self.0, 1);
            Some(replace(&mut self.0, next))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::MonthRange;
    use chrono::NaiveDate;

    #[test]
    fn test_month_range_iteration() {
        let start = NaiveDate::from_ymd_opt(2021, 11, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2022, 2, 1).unwrap();
        let months: Vec<NaiveDate> = MonthRange(start, end).collect();
        assert_eq!(months.len(), 4);
        assert_eq!(months[0], start);
        assert_eq!(months[2], NaiveDate::from_ymd_opt(2022, 1, 1).unwrap());
        assert_eq!(months[3], end);
    }

    #[test]
    fn test_month_range_truncates_days() {
        let start = NaiveDate::from_ymd_opt(2022, 3, 15).unwrap();
        let end = NaiveDate::from_ymd_opt(2022, 3, 31).unwrap();
        let months: Vec<NaiveDate> = MonthRange::new(start, end).collect();
        assert_eq!(months, vec![NaiveDate::from_ymd_opt(2022, 3, 1).unwrap()]);
    }

    #[test]
    fn test_month_range_empty() {
        let start = NaiveDate::from_ymd_opt(2022, 4, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2022, 3, 1).unwrap();
        assert_eq!(MonthRange(start, end).count(), 0);
    }
}
