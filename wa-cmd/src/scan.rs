//! `scan`: show which months a raster folder provides.

use anyhow::Context;
use std::path::Path;
use wa_core::aligner::{detect_positions, list_files, scan_series_with_extension, DateStrategy};
use wa_utils::dates::format_date;

pub fn run_scan(folder: &Path, extension: &str, lenient: bool) -> anyhow::Result<()> {
    let strategy = DateStrategy::AutoDetect { strict: !lenient };
    let series = scan_series_with_extension(folder, &strategy, extension)
        .with_context(|| format!("scanning {}", folder.display()))?;
    if let Some(first) = list_files(folder, extension)?.first() {
        let name = first.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if let Ok(positions) = detect_positions(name, !lenient) {
            log::info!("date positions {:?} detected from {}", positions, name);
        }
    }
    for (file, date) in series.iter() {
        println!("{}\t{}", format_date(&date), file.display());
    }
    let dates = series.dates();
    if let (Some(first), Some(last)) = (dates.first(), dates.last()) {
        let gaps = match wa_core::aligner::assert_monthly_contiguous(dates) {
            Ok(()) => "contiguous".to_string(),
            Err(e) => e.to_string(),
        };
        println!(
            "{} months from {} to {} ({})",
            dates.len(),
            format_date(first),
            format_date(last),
            gaps
        );
    }
    Ok(())
}
