//! Temporal moving averages over monthly raster series.

use chrono::NaiveDate;
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use wa_core::{Category, CategoryMap, Result, WaError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AverageMethod {
    /// The month and the `length - 1` months before it.
    Tail,
    /// The month centred in an odd-length window.
    Central,
}

/// Dates averaged for `date`; fails when the series is too short around it.
pub fn window(
    dates: &[NaiveDate],
    date: NaiveDate,
    length: usize,
    method: AverageMethod,
) -> Result<&[NaiveDate]> {
    if length == 0 {
        return Err(WaError::Config("moving average length must be at least 1".into()));
    }
    let index = dates.binary_search(&date).map_err(|_| WaError::InsufficientHistory {
        date,
        needed: length,
        found: 0,
    })?;
    let short = |found: usize| WaError::InsufficientHistory {
        date,
        needed: length,
        found,
    };
    match method {
        AverageMethod::Tail => {
            if index + 1 < length {
                return Err(short(index + 1));
            }
            Ok(&dates[index + 1 - length..=index])
        }
        AverageMethod::Central => {
            if length % 2 == 0 {
                return Err(WaError::Config(format!(
                    "central moving average needs an odd length, got {length}"
                )));
            }
            let half = (length - 1) / 2;
            if index < half || index + half >= dates.len() {
                let found = index.min(half) + (dates.len() - 1 - index).min(half) + 1;
                return Err(short(found));
            }
            Ok(&dates[index - half..=index + half])
        }
    }
}

/// Pixel-wise mean of the window around `date`. NaN in any month propagates.
pub fn moving_average<F>(
    dates: &[NaiveDate],
    date: NaiveDate,
    length: usize,
    method: AverageMethod,
    mut load: F,
) -> Result<Array2<f64>>
where
    F: FnMut(NaiveDate) -> Result<Array2<f64>>,
{
    let months = window(dates, date, length, method)?;
    let mut sum: Option<Array2<f64>> = None;
    for month in months {
        let data = load(*month)?;
        sum = Some(match sum {
            Some(acc) => acc + &data,
            None => data,
        });
    }
    let sum = sum.ok_or(WaError::InsufficientHistory {
        date,
        needed: length,
        found: 0,
    })?;
    Ok(sum / months.len() as f64)
}

/// Moving average whose window length depends on the pixel's land-use category.
///
/// Pixels outside every category with a configured length are NaN. Each month
/// is loaded at most once.
pub fn masked_moving_average<F>(
    dates: &[NaiveDate],
    date: NaiveDate,
    lu: &Array2<f64>,
    lengths: &BTreeMap<Category, usize>,
    categories: &CategoryMap,
    method: AverageMethod,
    mut load: F,
) -> Result<Array2<f64>>
where
    F: FnMut(NaiveDate) -> Result<Array2<f64>>,
{
    let mut cache: BTreeMap<NaiveDate, Array2<f64>> = BTreeMap::new();
    let mut result = Array2::from_elem(lu.dim(), f64::NAN);
    let distinct: BTreeSet<usize> = lengths.values().copied().collect();
    for length in distinct {
        let average = moving_average(dates, date, length, method, |month| {
            if let Some(data) = cache.get(&month) {
                return Ok(data.clone());
            }
            let data = load(month)?;
            cache.insert(month, data.clone());
            Ok(data)
        })?;
        Zip::from(&mut result)
            .and(&average)
            .and(lu)
            .for_each(|out, avg, code| {
                let matches = categories
                    .category_of(*code)
                    .and_then(|c| lengths.get(&c))
                    .is_some_and(|l| *l == length);
                if matches {
                    *out = *avg;
                }
            });
    }
    Ok(result)
}
