//! Sheet 3: crop water consumption and the blue share of crop yield.

use crate::context::{SheetContext, SheetOutput};
use chrono::NaiveDate;
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use wa_core::aligner::common_dates;
use wa_core::basin::CropSeason;
use wa_core::raster::depth_to_volume;
use wa_core::{AccountFile, CompleteData, Result, SheetTable, VariableKey, WaError};
use wa_utils::dates::{month_start, parse_date};

pub const SHEET3: &str = "sheet3";

/// Shape parameters of [`split_yield`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct YieldSplit {
    pub a: f64,
    pub b: f64,
}

impl Default for YieldSplit {
    fn default() -> Self {
        YieldSplit { a: 0.5, b: 0.5 }
    }
}

/// Blue share of yield from the precipitation fraction and the blue ET fraction,
/// clipped to [0, 1].
pub fn split_yield(pfraction: f64, etbfraction: f64, a: f64, b: f64) -> f64 {
    let blue = ((etbfraction - 1.0) * a).powi(2);
    let green = ((pfraction - 1.0) * b).powi(2);
    (-(blue - green) + 0.5).clamp(0.0, 1.0)
}

/// One growing season of a crop, as months.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Season {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Season {
    pub fn contains(&self, date: &NaiveDate) -> bool {
        self.start <= *date && *date <= self.end
    }
}

/// Read a `start;end` season file, dates as `%d/%m/%Y` (or any accepted format).
pub fn read_seasons(path: &Path) -> Result<Vec<Season>> {
    let text = fs::read_to_string(path)?;
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());
    let mut seasons = Vec::new();
    for record in rdr.deserialize() {
        let (start, end): (String, String) = record?;
        let parse = |s: &str| {
            parse_date(s)
                .map(|d| month_start(&d))
                .map_err(|e| WaError::DateParse(format!("{}: {e}", path.display())))
        };
        let season = Season {
            start: parse(&start)?,
            end: parse(&end)?,
        };
        if season.end < season.start {
            return Err(WaError::Config(format!(
                "{}: season ends {} before it starts {}",
                path.display(),
                season.end,
                season.start
            )));
        }
        seasons.push(season);
    }
    Ok(seasons)
}

/// Season totals over the pixels of one crop, in km³.
#[derive(Debug, Clone, PartialEq)]
pub struct CropSeasonResult {
    pub season: Season,
    pub months: usize,
    pub area_km2: f64,
    pub p: f64,
    pub et_blue: f64,
    pub et_green: f64,
    /// Area-weighted mean of the per-pixel blue yield share.
    pub yield_blue_fraction: f64,
}

impl CropSeasonResult {
    fn table(&self, crop: &CropSeason) -> SheetTable {
        let mut table = SheetTable::new();
        let class = crop.category.as_str();
        let subclass = crop.subcategory.as_str();
        table.push(class, subclass, "Area", self.area_km2);
        table.push(class, subclass, "Precipitation", self.p);
        table.push(class, subclass, "ET blue", self.et_blue);
        table.push(class, subclass, "ET green", self.et_green);
        table.push(class, subclass, "Yield fraction blue", self.yield_blue_fraction);
        table.push(class, subclass, "Yield fraction green", 1.0 - self.yield_blue_fraction);
        table
    }
}

/// Accumulate one crop season from monthly P, ETblue and ETgreen depths (mm).
pub fn crop_season<F>(
    season: Season,
    months: &[NaiveDate],
    crop_pixels: &Array2<bool>,
    area: &Array2<f64>,
    split: YieldSplit,
    mut load: F,
) -> Result<CropSeasonResult>
where
    F: FnMut(NaiveDate) -> Result<[Array2<f64>; 3]>,
{
    let shape = crop_pixels.dim();
    let mut p = Array2::<f64>::zeros(shape);
    let mut etb = Array2::<f64>::zeros(shape);
    let mut etg = Array2::<f64>::zeros(shape);
    for month in months.iter().filter(|m| season.contains(m)) {
        let [mp, mb, mg] = load(*month)?;
        for (acc, add) in [(&mut p, mp), (&mut etb, mb), (&mut etg, mg)] {
            Zip::from(acc).and(&add).for_each(|a, v| {
                if !v.is_nan() {
                    *a += v;
                }
            });
        }
    }
    let count = months.iter().filter(|m| season.contains(m)).count();

    let p_max = p
        .iter()
        .zip(crop_pixels.iter())
        .filter(|(_, c)| **c)
        .map(|(v, _)| *v)
        .fold(0.0, f64::max);
    let mut weighted = 0.0;
    let mut area_km2 = 0.0;
    Zip::from(&p)
        .and(&etb)
        .and(&etg)
        .and(crop_pixels)
        .and(area)
        .for_each(|p, b, g, inside, a| {
            if !*inside {
                return;
            }
            let pfraction = if p_max > 0.0 { p / p_max } else { 0.0 };
            let et = b + g;
            let etbfraction = if et > 0.0 { b / et } else { 0.0 };
            weighted += split_yield(pfraction, etbfraction, split.a, split.b) * a;
            area_km2 += a;
        });

    let total = |depth: &Array2<f64>| {
        depth_to_volume(depth, area)
            .iter()
            .zip(crop_pixels.iter())
            .filter(|(_, c)| **c)
            .map(|(v, _)| *v)
            .sum::<f64>()
    };
    Ok(CropSeasonResult {
        season,
        months: count,
        area_km2,
        p: total(&p),
        et_blue: total(&etb),
        et_green: total(&etg),
        yield_blue_fraction: if area_km2 > 0.0 { weighted / area_km2 } else { 0.0 },
    })
}

/// Run Sheet 3 for every configured crop and growing season.
pub fn build(ctx: &SheetContext<'_>, data: CompleteData, split: YieldSplit) -> Result<SheetOutput> {
    if ctx.basin.crops.is_empty() {
        log::info!("{}: no crops configured, sheet 3 skipped", ctx.basin.name);
        return Ok(SheetOutput {
            data,
            accounts: Vec::new(),
        });
    }
    let keys = [VariableKey::P, VariableKey::Etb, VariableKey::Etg];
    let months = common_dates(&data.date_lists(&keys)?);
    let lu = ctx.land_use()?;
    let area = ctx.pixel_area()?;

    let mut accounts = Vec::new();
    for crop in &ctx.basin.crops {
        let pixels = lu.data.mapv(|code| code == f64::from(crop.lu_class));
        if !pixels.iter().any(|p| *p) {
            log::warn!(
                "{}: crop {} has no pixels of land-use class {}",
                ctx.basin.name,
                crop.crop,
                crop.lu_class
            );
        }
        for season in read_seasons(&crop.season_file)? {
            if !months.iter().any(|m| season.contains(m)) {
                log::warn!(
                    "{}: no data for {} season starting {}",
                    ctx.basin.name,
                    crop.crop,
                    season.start
                );
                continue;
            }
            let result = crop_season(season, &months, &pixels, &area, split, |month| {
                Ok([
                    ctx.open_month(&data, VariableKey::P, &month, &lu)?,
                    ctx.open_month(&data, VariableKey::Etb, &month, &lu)?,
                    ctx.open_month(&data, VariableKey::Etg, &month, &lu)?,
                ])
            })?;
            log::debug!(
                "{}: {} {} months, blue yield share {:.3}",
                ctx.basin.name,
                crop.crop,
                result.months,
                result.yield_blue_fraction
            );
            accounts.push(AccountFile::labelled(
                SHEET3,
                season.start,
                &crop.crop,
                result.table(crop),
            ));
        }
    }
    Ok(SheetOutput { data, accounts })
}
