//! Sub-monthly to monthly aggregation.
//!
//! Daily, 8-day and 16-day products (LAI, NDVI composites) are turned into
//! one raster per month. Between two consecutive observations the value is
//! taken as the mean of both ends, so every month receives the days of each
//! observation interval that fall inside it. The monthly raster is the
//! day-weighted sum divided by the length of the month.

use crate::error::{Result, WaError};
use crate::raster::{Grid, RasterAdapter};
use crate::series::AlignedSeries;
use chrono::NaiveDate;
use ndarray::Array2;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use wa_utils::dates::{add_months, days_in_month, format_month_tag, month_start};

/// Days of the interval `[start, end)` that fall inside the month starting at `month`.
pub fn overlap_days(start: NaiveDate, end: NaiveDate, month: NaiveDate) -> i64 {
    let next = add_months(&month, 1);
    let from = start.max(month);
    let to = end.min(next);
    (to - from).num_days().max(0)
}

fn open_aligned(rasters: &dyn RasterAdapter, path: &Path, reference: &Grid) -> Result<Grid> {
    let grid = rasters.open(path)?;
    if !grid.same_grid(reference) {
        return Err(WaError::Raster(format!(
            "{} is not on the grid of the first observation",
            path.display()
        )));
    }
    Ok(grid)
}

/// Aggregate dated observations into monthly rasters written as
/// `<output_dir>/<prefix>_YYYY_MM.tif`, one per month holding an observation.
///
/// `observations` need not be sorted. At least two are required.
pub fn xdaily_to_monthly(
    rasters: &dyn RasterAdapter,
    observations: &[(PathBuf, NaiveDate)],
    output_dir: &Path,
    prefix: &str,
) -> Result<AlignedSeries> {
    let mut sorted = observations.to_vec();
    sorted.sort_by(|a, b| a.1.cmp(&b.1));
    let (first_path, first_date) = match sorted.as_slice() {
        [] => return Ok(AlignedSeries::default()),
        [only] => {
            return Err(WaError::InsufficientHistory {
                date: only.1,
                needed: 2,
                found: 1,
            })
        }
        [first, ..] => (first.0.clone(), first.1),
    };
    log::debug!(
        "aggregating {} observations from {} into months",
        sorted.len(),
        first_date
    );
    let reference = rasters.open(&first_path)?;
    let months: BTreeSet<NaiveDate> = sorted.iter().map(|(_, d)| month_start(d)).collect();

    let mut written = Vec::with_capacity(months.len());
    for month in months {
        let mut total: Array2<f64> = Array2::zeros(reference.shape());
        for pair in sorted.windows(2) {
            let ((start_path, start), (end_path, end)) = (&pair[0], &pair[1]);
            let days = overlap_days(*start, *end, month);
            if days == 0 {
                continue;
            }
            let a = open_aligned(rasters, start_path, &reference)?;
            let b = open_aligned(rasters, end_path, &reference)?;
            total = total + (&a.data + &b.data) * (0.5 * days as f64);
        }
        let monthly = total / f64::from(days_in_month(&month));
        let path = output_dir.join(format!("{prefix}_{}.tif", format_month_tag(&month)));
        rasters.write(&path, &reference.with_data(monthly))?;
        written.push((path, month));
    }
    log::info!(
        "wrote {} monthly {} rasters to {}",
        written.len(),
        prefix,
        output_dir.display()
    );
    AlignedSeries::from_pairs(written)
}
