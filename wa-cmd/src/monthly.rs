//! `monthly`: aggregate a folder of daily, 8-day or 16-day rasters to months.

use anyhow::Context;
use std::path::Path;
use wa_core::aligner::{scan_days, DateStrategy};
use wa_core::temporal::xdaily_to_monthly;
use wa_core::{AlignedSeries, RasterAdapter};

/// Scan `folder` for dated rasters and write one raster per month to
/// `output_dir`, named `<prefix>_YYYY_MM.tif`. The prefix defaults to the
/// folder name.
pub fn run_monthly(
    rasters: &dyn RasterAdapter,
    folder: &Path,
    output_dir: &Path,
    prefix: Option<&str>,
    extension: &str,
    lenient: bool,
) -> anyhow::Result<AlignedSeries> {
    let strategy = DateStrategy::AutoDetect { strict: !lenient };
    let observations = scan_days(folder, &strategy, extension)
        .with_context(|| format!("scanning {}", folder.display()))?;
    let prefix = match prefix {
        Some(prefix) => prefix.to_string(),
        None => folder
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("monthly")
            .to_string(),
    };
    let series = xdaily_to_monthly(rasters, &observations, output_dir, &prefix)
        .with_context(|| format!("aggregating {} to months", folder.display()))?;
    for (file, date) in series.iter() {
        println!("{}\t{}", wa_utils::dates::format_date(&date), file.display());
    }
    Ok(series)
}
