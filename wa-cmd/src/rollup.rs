//! `rollup`: water-year sums of a folder of monthly account tables.

use anyhow::Context;
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use wa_core::account::yearly_rollups;
use wa_core::aligner::{scan_series_with_extension, DateStrategy};
use wa_core::{SheetTable, WaterYearCalendar};

/// Roll up the `<sheet>_YYYY_MM.csv` tables of `folder` into
/// `<output_dir>/<sheet>_yearly/<sheet>_<year>.csv`.
pub fn run_rollup(
    folder: &Path,
    sheet: &str,
    start_month: u32,
    output_dir: Option<PathBuf>,
) -> anyhow::Result<Vec<PathBuf>> {
    let calendar = WaterYearCalendar::new(start_month)
        .ok_or_else(|| anyhow::anyhow!("start month {start_month} is not a month"))?;
    let series = scan_series_with_extension(folder, &DateStrategy::default(), "csv")
        .with_context(|| format!("scanning {}", folder.display()))?;
    let prefix = format!("{sheet}_");
    let mut monthly: Vec<(NaiveDate, SheetTable)> = Vec::new();
    for (file, date) in series.iter() {
        let is_sheet = file
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(&prefix));
        if is_sheet {
            let table = SheetTable::read_csv(file)
                .with_context(|| format!("reading {}", file.display()))?;
            monthly.push((date, table));
        }
    }
    log::info!("{}: {} monthly tables in {}", sheet, monthly.len(), folder.display());

    let borrowed: Vec<(NaiveDate, &SheetTable)> = monthly.iter().map(|(d, t)| (*d, t)).collect();
    let out = output_dir
        .unwrap_or_else(|| folder.parent().unwrap_or(folder).to_path_buf())
        .join(format!("{sheet}_yearly"));
    let mut written = Vec::new();
    for (year, table) in yearly_rollups(&borrowed, &calendar)? {
        let path = out.join(format!("{sheet}_{year}.csv"));
        table.write_csv(&path)?;
        written.push(path);
    }
    log::info!("{}: wrote {} yearly tables to {}", sheet, written.len(), out.display());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use wa_core::AccountFile;

    #[test]
    fn test_rollup_drops_partial_water_years() {
        let root = std::env::temp_dir().join(format!("wa_rollup_{}", std::process::id()));
        let _ = fs::remove_dir_all(&root);
        let mut table = SheetTable::new();
        table.push("STORAGE", "CHANGE", "Surface storage", 0.5);
        // October 2009 through March 2011: one full October water year.
        let start = NaiveDate::from_ymd_opt(2009, 10, 1).unwrap();
        for i in 0..18 {
            let date = wa_utils::dates::add_months(&start, i);
            AccountFile::monthly("sheet1", date, table.clone())
                .write_into(&root)
                .unwrap();
        }
        let folder = root.join("sheet1_monthly");
        let written = run_rollup(&folder, "sheet1", 10, None).unwrap();
        assert_eq!(written, vec![root.join("sheet1_yearly").join("sheet1_2009.csv")]);
        let yearly = SheetTable::read_csv(&written[0]).unwrap();
        assert_eq!(yearly.value("STORAGE", "CHANGE", "Surface storage"), Some(6.0));
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_rollup_rejects_bad_start_month() {
        assert!(run_rollup(Path::new("/nonexistent"), "sheet1", 13, None).is_err());
    }
}
