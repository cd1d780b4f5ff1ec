//! Monthly time-series alignment.
//!
//! Turns a folder of per-month rasters into an [`AlignedSeries`] by reading
//! the year and month out of each file name, and provides the date
//! intersection and gap checks used to line series up against each other.
//!
//! Dates are located with Python-style slice offsets over the file name
//! (negative offsets count from the end), either fixed by configuration or
//! found by scanning the name for a `YYYYMM[DD]` or `YYYYDDD` digit window.
//! Day and day-of-year fields serve sub-monthly folders, see [`scan_days`].

use crate::error::{Result, WaError};
use crate::month_range::MonthRange;
use crate::series::AlignedSeries;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use wa_utils::dates::month_start;

/// Default raster file extension considered by [`scan_series`].
pub const DEFAULT_EXTENSION: &str = "tif";

/// Plausible years for auto-detected dates.
pub const YEAR_RANGE: std::ops::RangeInclusive<i32> = 1900..=2100;

/// Slice offsets of the date fields in a file name.
///
/// A day-of-year field replaces the month and day fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatePositions {
    pub year: (isize, isize),
    #[serde(default)]
    pub month: Option<(isize, isize)>,
    #[serde(default)]
    pub day: Option<(isize, isize)>,
    #[serde(default)]
    pub doy: Option<(isize, isize)>,
}

/// How the aligner finds the date inside a file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateStrategy {
    /// Offsets known in advance.
    Fixed(DatePositions),
    /// Scan the first file name for a date. With `strict`, more than one
    /// candidate is an error; otherwise the first candidate is used and the
    /// ambiguity is logged.
    AutoDetect { strict: bool },
}

impl Default for DateStrategy {
    fn default() -> Self {
        DateStrategy::AutoDetect { strict: true }
    }
}

fn resolve(len: usize, index: isize) -> usize {
    if index < 0 {
        len.saturating_sub(index.unsigned_abs())
    } else {
        (index as usize).min(len)
    }
}

/// Python-style `name[start:end]`; `None` when the slice is empty or splits a character.
pub fn slice_field(name: &str, (start, end): (isize, isize)) -> Option<&str> {
    let (start, end) = (resolve(name.len(), start), resolve(name.len(), end));
    if start >= end {
        return None;
    }
    name.get(start..end)
}

fn numeric_field<T: FromStr>(name: &str, range: (isize, isize)) -> Result<T> {
    slice_field(name, range)
        .filter(|s| s.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| WaError::DateParse(name.to_string()))
}

/// Extract the day a file name refers to. Missing month or day fields mean 1.
pub fn extract_day(name: &str, positions: &DatePositions) -> Result<NaiveDate> {
    let year: i32 = numeric_field(name, positions.year)?;
    let date = match positions.doy {
        Some(range) => NaiveDate::from_yo_opt(year, numeric_field(name, range)?),
        None => {
            let month = match positions.month {
                Some(range) => numeric_field(name, range)?,
                None => 1,
            };
            let day = match positions.day {
                Some(range) => numeric_field(name, range)?,
                None => 1,
            };
            NaiveDate::from_ymd_opt(year, month, day)
        }
    };
    date.ok_or_else(|| WaError::DateParse(name.to_string()))
}

/// Extract the month a file name refers to. A missing month field means January.
pub fn extract_date(name: &str, positions: &DatePositions) -> Result<NaiveDate> {
    extract_day(name, positions).map(|day| month_start(&day))
}

fn digits(bytes: &[u8], at: usize, width: usize) -> Option<u32> {
    let field = bytes.get(at..at + width)?;
    field.iter().all(u8::is_ascii_digit).then(|| {
        field
            .iter()
            .fold(0, |acc, b| acc * 10 + (b - b'0') as u32)
    })
}

fn digit_run(bytes: &[u8], at: usize) -> usize {
    bytes
        .get(at..)
        .map_or(0, |rest| rest.iter().take_while(|b| b.is_ascii_digit()).count())
}

fn is_separator(byte: Option<&u8>) -> bool {
    matches!(byte, Some(b'_' | b'.' | b'-'))
}

/// Every plausible date window in a file name, as from-end offsets.
///
/// A window starts at a digit that is not preceded by another digit and holds
/// a year within [`YEAR_RANGE`], optionally one of `_ . -`, then either three
/// digits of a day of year or a month 01-12 with an optional day of month.
pub fn date_candidates(name: &str) -> Vec<DatePositions> {
    let bytes = name.as_bytes();
    let len = bytes.len() as isize;
    let offsets = |at: usize, width: usize| (at as isize - len, (at + width) as isize - len);
    let mut found = Vec::new();
    for i in 0..bytes.len() {
        if i > 0 && bytes[i - 1].is_ascii_digit() {
            continue;
        }
        if i + 4 > bytes.len() {
            break;
        }
        let Some(year) = digits(bytes, i, 4).map(|y| y as i32) else {
            continue;
        };
        if !YEAR_RANGE.contains(&year) {
            continue;
        }
        let mut j = i + 4;
        if is_separator(bytes.get(j)) {
            j += 1;
        }
        let run = digit_run(bytes, j);
        if run == 3 {
            let doy = digits(bytes, j, 3).filter(|d| NaiveDate::from_yo_opt(year, *d).is_some());
            if doy.is_some() {
                found.push(DatePositions {
                    year: offsets(i, 4),
                    doy: Some(offsets(j, 3)),
                    ..DatePositions::default()
                });
            }
            continue;
        }
        let Some(month) = digits(bytes, j, 2).filter(|m| (1..=12).contains(m)) else {
            continue;
        };
        let day_at = if run >= 4 {
            Some(j + 2)
        } else if is_separator(bytes.get(j + 2)) && digit_run(bytes, j + 3) == 2 {
            Some(j + 3)
        } else {
            None
        };
        let day = day_at.filter(|k| {
            digits(bytes, *k, 2)
                .is_some_and(|d| NaiveDate::from_ymd_opt(year, month, d).is_some())
        });
        found.push(DatePositions {
            year: offsets(i, 4),
            month: Some(offsets(j, 2)),
            day: day.map(|k| offsets(k, 2)),
            doy: None,
        });
    }
    found
}

/// Locate the date encoding in a template file name.
pub fn detect_positions(name: &str, strict: bool) -> Result<DatePositions> {
    let candidates = date_candidates(name);
    match candidates.as_slice() {
        [] => Err(WaError::DateParse(name.to_string())),
        [only] => Ok(*only),
        [first, ..] => {
            let rendered: Vec<String> = candidates
                .iter()
                .filter_map(|c| extract_day(name, c).ok())
                .map(|d| d.to_string())
                .collect();
            if strict {
                Err(WaError::AmbiguousDate {
                    file: name.to_string(),
                    candidates: rendered,
                })
            } else {
                log::warn!(
                    "ambiguous date encoding in '{}' ({:?}), using the first",
                    name,
                    rendered
                );
                Ok(*first)
            }
        }
    }
}

/// Sorted list of the files in `folder` with the given extension.
pub fn list_files(folder: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(folder)? {
        let path = entry?.path();
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(extension));
        if path.is_file() && matches {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
}

/// Scan a folder of `.tif` rasters into a date-sorted series.
pub fn scan_series(folder: &Path, strategy: &DateStrategy) -> Result<AlignedSeries> {
    scan_series_with_extension(folder, strategy, DEFAULT_EXTENSION)
}

/// Scan a folder into a date-sorted series, considering only files with `extension`.
///
/// Files whose name does not yield a date are skipped; an error is returned
/// only when no file at all does.
pub fn scan_series_with_extension(
    folder: &Path,
    strategy: &DateStrategy,
    extension: &str,
) -> Result<AlignedSeries> {
    let pairs = scan_dated_files(folder, strategy, extension, extract_date)?;
    log::debug!("scanned {} months from {}", pairs.len(), folder.display());
    AlignedSeries::from_pairs(pairs)
}

/// Scan a folder of daily, 8-day or 16-day rasters into (file, day) pairs
/// sorted by day. Two files on the same day are an error.
pub fn scan_days(
    folder: &Path,
    strategy: &DateStrategy,
    extension: &str,
) -> Result<Vec<(PathBuf, NaiveDate)>> {
    let mut pairs = scan_dated_files(folder, strategy, extension, extract_day)?;
    pairs.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    if let Some(pair) = pairs.windows(2).find(|w| w[0].1 == w[1].1) {
        return Err(WaError::DuplicateMonth {
            date: pair[0].1,
            first: pair[0].0.clone(),
            second: pair[1].0.clone(),
        });
    }
    log::debug!("scanned {} days from {}", pairs.len(), folder.display());
    Ok(pairs)
}

fn scan_dated_files(
    folder: &Path,
    strategy: &DateStrategy,
    extension: &str,
    extract: fn(&str, &DatePositions) -> Result<NaiveDate>,
) -> Result<Vec<(PathBuf, NaiveDate)>> {
    let files = list_files(folder, extension)?;
    let positions = match strategy {
        DateStrategy::Fixed(positions) => *positions,
        DateStrategy::AutoDetect { strict } => {
            let template = files
                .iter()
                .map(|f| file_name(f))
                .find(|name| !date_candidates(name).is_empty())
                .ok_or_else(|| WaError::Parse {
                    folder: folder.to_path_buf(),
                })?;
            detect_positions(template, *strict)?
        }
    };

    let mut pairs = Vec::with_capacity(files.len());
    for file in files {
        match extract(file_name(&file), &positions) {
            Ok(date) => pairs.push((file, date)),
            Err(_) => log::debug!("skipping {}: no date at {:?}", file.display(), positions),
        }
    }
    if pairs.is_empty() {
        return Err(WaError::Parse {
            folder: folder.to_path_buf(),
        });
    }
    Ok(pairs)
}

/// Sorted intersection of several date lists.
///
/// An empty list of lists, or any empty list, gives an empty result.
pub fn common_dates(lists: &[&[NaiveDate]]) -> Vec<NaiveDate> {
    let Some((first, rest)) = lists.split_first() else {
        return Vec::new();
    };
    let mut common: BTreeSet<NaiveDate> = first.iter().copied().collect();
    for list in rest {
        let other: BTreeSet<NaiveDate> = list.iter().copied().collect();
        common = common.intersection(&other).copied().collect();
    }
    common.into_iter().collect()
}

/// Fail with the first missing month when walking from the first to the last date.
pub fn assert_monthly_contiguous(dates: &[NaiveDate]) -> Result<()> {
    let present: BTreeSet<NaiveDate> = dates.iter().copied().collect();
    let (Some(first), Some(last)) = (present.first(), present.last()) else {
        return Ok(());
    };
    match MonthRange(*first, *last).find(|d| !present.contains(d)) {
        Some(missing) => Err(WaError::Gap(missing)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn month(y: i32, m: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, 1).unwrap()
    }

    fn temp_folder(name: &str, files: &[&str]) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("wa_aligner_{}_{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        for f in files {
            fs::write(dir.join(f), b"").unwrap();
        }
        dir
    }

    #[test]
    fn test_slice_field_negative_offsets() {
        assert_eq!(slice_field("p_2009_01.tif", (-14, -7)), Some("2009_01"));
        assert_eq!(slice_field("p_2009_01.tif", (-11, -7)), Some("2009"));
        assert_eq!(slice_field("p_2009_01.tif", (2, 6)), Some("2009"));
        assert_eq!(slice_field("p_2009_01.tif", (6, 2)), None);
    }

    #[test]
    fn test_extract_date_suffix_and_prefix() {
        let suffix = DatePositions {
            year: (-11, -7),
            month: Some((-6, -4)),
            ..DatePositions::default()
        };
        assert_eq!(extract_date("ET_2009_03.tif", &suffix).unwrap(), month(2009, 3));
        let prefix = DatePositions {
            year: (0, 4),
            month: Some((4, 6)),
            ..DatePositions::default()
        };
        assert_eq!(extract_date("200911_P_CHIRPS.tif", &prefix).unwrap(), month(2009, 11));
        assert!(matches!(
            extract_date("ET_abcd_03.tif", &suffix),
            Err(WaError::DateParse(_))
        ));
    }

    #[test]
    fn test_detect_positions() {
        let positions =
            detect_positions("P_CHIRPS.v2.0_mm-month-1_monthly_2009.04.01.tif", true).unwrap();
        assert_eq!(
            extract_date("P_CHIRPS.v2.0_mm-month-1_monthly_2011.12.01.tif", &positions).unwrap(),
            month(2011, 12)
        );
        let compact = detect_positions("ETa_200907.tif", true).unwrap();
        assert_eq!(extract_date("ETa_201002.tif", &compact).unwrap(), month(2010, 2));
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_extract_day_of_month_and_year() {
        let daily = DatePositions {
            year: (-14, -10),
            month: Some((-9, -7)),
            day: Some((-6, -4)),
            doy: None,
        };
        assert_eq!(extract_day("P_2009_03_17.tif", &daily).unwrap(), day(2009, 3, 17));
        assert_eq!(extract_date("P_2009_03_17.tif", &daily).unwrap(), month(2009, 3));
        let doy = DatePositions {
            year: (-11, -7),
            doy: Some((-7, -4)),
            ..DatePositions::default()
        };
        assert_eq!(extract_day("LAI_2008060.tif", &doy).unwrap(), day(2008, 2, 29));
        assert_eq!(extract_date("LAI_2009060.tif", &doy).unwrap(), month(2009, 3));
        assert!(matches!(
            extract_day("LAI_2009366.tif", &doy),
            Err(WaError::DateParse(_))
        ));
    }

    #[test]
    fn test_detect_day_positions() {
        let compact = detect_positions("ET_20090417.tif", true).unwrap();
        assert!(compact.day.is_some());
        assert_eq!(extract_day("ET_20101231.tif", &compact).unwrap(), day(2010, 12, 31));
        let dotted = detect_positions("P_CHIRPS_2009.04.15.tif", true).unwrap();
        assert_eq!(extract_day("P_CHIRPS_2010.02.03.tif", &dotted).unwrap(), day(2010, 2, 3));
        let modis = detect_positions("MOD15_A2009033.tif", true).unwrap();
        assert_eq!(modis.month, None);
        assert_eq!(extract_day("MOD15_A2010041.tif", &modis).unwrap(), day(2010, 2, 10));
    }

    #[test]
    fn test_scan_days_sorts_and_rejects_duplicates() {
        let dir = temp_folder("days", &["lai_2009017.tif", "lai_2009001.tif", "lai_2009033.tif"]);
        let days = scan_days(&dir, &DateStrategy::default(), DEFAULT_EXTENSION).unwrap();
        let dates: Vec<NaiveDate> = days.iter().map(|(_, d)| *d).collect();
        assert_eq!(dates, vec![day(2009, 1, 1), day(2009, 1, 17), day(2009, 2, 2)]);
        // Two 8-day files fall in January, so the monthly scan refuses them.
        assert!(matches!(
            scan_series(&dir, &DateStrategy::default()),
            Err(WaError::DuplicateMonth { .. })
        ));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_detect_positions_ambiguous() {
        let name = "lai_2003_01_to_2012_12.tif";
        assert!(matches!(
            detect_positions(name, true),
            Err(WaError::AmbiguousDate { .. })
        ));
        let first = detect_positions(name, false).unwrap();
        assert_eq!(extract_date(name, &first).unwrap(), month(2003, 1));
    }

    #[test]
    fn test_scan_series_auto_detect() {
        let dir = temp_folder(
            "auto",
            &["p_2009_03.tif", "p_2009_01.tif", "p_2009_02.tif", "readme.txt"],
        );
        let series = scan_series(&dir, &DateStrategy::default()).unwrap();
        assert_eq!(series.dates(), &[month(2009, 1), month(2009, 2), month(2009, 3)]);
        assert!(series.files()[0].ends_with("p_2009_01.tif"));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_scan_series_no_match_is_parse_error() {
        let dir = temp_folder("nomatch", &["landuse.tif"]);
        assert!(matches!(
            scan_series(&dir, &DateStrategy::default()),
            Err(WaError::Parse { .. })
        ));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_common_dates_properties() {
        let a = [month(2020, 3), month(2020, 1), month(2020, 2), month(2020, 1)];
        let b = [month(2020, 2), month(2020, 3), month(2020, 4)];
        let c = [month(2020, 3), month(2020, 2)];
        assert_eq!(common_dates(&[&a]), vec![month(2020, 1), month(2020, 2), month(2020, 3)]);
        assert_eq!(common_dates(&[&a, &[]]), Vec::<NaiveDate>::new());
        assert_eq!(common_dates(&[]), Vec::<NaiveDate>::new());
        let abc = common_dates(&[&a, &b, &c]);
        assert_eq!(abc, common_dates(&[&c, &a, &b]));
        let ab = common_dates(&[&a, &b]);
        assert_eq!(abc, common_dates(&[&ab, &c]));
        assert_eq!(abc, vec![month(2020, 2), month(2020, 3)]);
    }

    #[test]
    fn test_assert_monthly_contiguous() {
        assert!(assert_monthly_contiguous(&[]).is_ok());
        let winter = [month(2020, 11), month(2020, 12), month(2021, 1)];
        assert!(assert_monthly_contiguous(&winter).is_ok());
        match assert_monthly_contiguous(&[month(2020, 11), month(2021, 1)]) {
            Err(WaError::Gap(missing)) => assert_eq!(missing, month(2020, 12)),
            other => panic!("expected gap, got {other:?}"),
        }
    }

    #[test]
    fn test_rescan_of_rewritten_folder_reproduces_dates() {
        let source = temp_folder("src", &["ET_2010_01.tif", "ET_2010_02.tif", "ET_2010_04.tif"]);
        let other = temp_folder(
            "other",
            &["P_201001.tif", "P_201002.tif", "P_201004.tif", "P_201005.tif"],
        );
        let et = scan_series(&source, &DateStrategy::default()).unwrap();
        let p = scan_series(&other, &DateStrategy::default()).unwrap();
        let dates = common_dates(&[et.dates(), p.dates()]);

        let names: Vec<String> = dates
            .iter()
            .map(|d| format!("et_{}.tif", wa_utils::dates::format_month_tag(d)))
            .collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let out = temp_folder("out", &refs);
        let rescanned = scan_series(&out, &DateStrategy::default()).unwrap();
        assert_eq!(rescanned.dates(), dates.as_slice());
        for dir in [source, other, out] {
            let _ = fs::remove_dir_all(&dir);
        }
    }
}
