//! Sheet 2: evapotranspiration.
//!
//! Splits ET into a green part (rain-fed, bounded by a Budyko curve on the
//! smoothed precipitation and reference ET) and a blue remainder when the
//! split is not given as input, reports ET components per land-use category
//! and derives the static non-utilizable outflow fraction map used by Sheet 1.

use crate::context::{DerivedSeries, SheetContext, SheetOutput};
use crate::moving_average::{moving_average, AverageMethod};
use chrono::NaiveDate;
use ndarray::{Array2, Zip};
use std::path::{Path, PathBuf};
use wa_core::aligner::common_dates;
use wa_core::{
    AccountFile, AlignedSeries, Category, CategoryMap, CategoryValues, CompleteData, Grid, Result,
    SheetTable, VariableKey,
};

pub const SHEET2: &str = "sheet2";

/// Longest window (months) of the tail averages of P and ETref.
pub const SMOOTHING_MONTHS: usize = 12;

/// Scaling of the Budyko curve bounding green ET.
pub const BUDYKO_SCALE: f64 = 1.1;

/// Fraction of precipitation available for green ET at aridity index `phi`.
pub fn budyko(phi: f64) -> f64 {
    BUDYKO_SCALE * (phi * (1.0 / phi).tanh() * (1.0 - (-phi).exp())).sqrt()
}

/// Green and blue ET from total ET and smoothed P and ETref, in that order.
pub fn split_et(
    et: &Array2<f64>,
    p_avg: &Array2<f64>,
    etref_avg: &Array2<f64>,
) -> (Array2<f64>, Array2<f64>) {
    let green = Zip::from(et).and(p_avg).and(etref_avg).map_collect(|et, p, etref| {
        if et.is_nan() {
            f64::NAN
        } else if !(*p > 0.0) {
            0.0
        } else {
            let phi = (etref / p).max(0.0);
            et.min(budyko(phi) * p).max(0.0)
        }
    });
    let blue = et - &green;
    (green, blue)
}

/// Rainfall interception (mm) from precipitation, leaf area index and rain days.
pub fn interception(p: &Array2<f64>, lai: &Array2<f64>, n: &Array2<f64>) -> Array2<f64> {
    Zip::from(p).and(lai).and(n).map_collect(|p, lai, n| {
        if p.is_nan() {
            return f64::NAN;
        }
        if !(*lai > 0.0) || !(*n > 0.0) || !(*p > 0.0) {
            return 0.0;
        }
        let cover = 1.0 - (-0.5 * lai).exp();
        lai * (1.0 - 1.0 / (1.0 + (p / n) * cover / lai)) * n
    })
}

/// Upper bound on the transpiring share of the ET left after interception.
pub const MAX_TRANSPIRATION_SHARE: f64 = 0.95;

/// Transpiring share from the vegetation dry matter relative to its per-pixel maximum.
pub fn ndm_share(ndm: &Array2<f64>, ndm_max: &Array2<f64>) -> Array2<f64> {
    Zip::from(ndm).and(ndm_max).map_collect(|ndm, max| {
        if *max > 0.0 && *ndm > 0.0 {
            (ndm / max).min(MAX_TRANSPIRATION_SHARE)
        } else {
            0.0
        }
    })
}

/// Transpiring share from canopy cover, `1 - exp(-0.5 LAI)`.
pub fn lai_share(lai: &Array2<f64>) -> Array2<f64> {
    lai.mapv(|lai| {
        if lai > 0.0 {
            (1.0 - (-0.5 * lai).exp()).min(MAX_TRANSPIRATION_SHARE)
        } else {
            0.0
        }
    })
}

/// Transpiration (mm) as `share` of the ET left after interception.
pub fn split_transpiration(
    et: &Array2<f64>,
    interception: &Array2<f64>,
    share: &Array2<f64>,
) -> Array2<f64> {
    Zip::from(et)
        .and(interception)
        .and(share)
        .map_collect(|et, i, share| {
            if et.is_nan() {
                return f64::NAN;
            }
            let i = if i.is_nan() { 0.0 } else { *i };
            let share = if share.is_nan() { 0.0 } else { *share };
            (et - i).max(0.0) * share
        })
}

/// Linear ramp from 0 at `lower` to 1 at `upper`.
pub fn ramp(value: f64, lower: f64, upper: f64) -> f64 {
    if upper <= lower {
        return if value >= upper { 1.0 } else { 0.0 };
    }
    ((value - lower) / (upper - lower)).clamp(0.0, 1.0)
}

const METRES_PER_DEGREE: f64 = 111_320.0;

/// Terrain slope in percent from a DEM on a geographic grid.
pub fn slope_percent(dem: &Grid) -> Array2<f64> {
    let (rows, cols) = dem.shape();
    let t = dem.transform;
    let z = &dem.data;
    Array2::from_shape_fn((rows, cols), |(r, c)| {
        let (_, lat) = t.cell_center(r, c);
        let dx = t.pixel_width.abs() * METRES_PER_DEGREE * lat.to_radians().cos();
        let dy = t.pixel_height.abs() * METRES_PER_DEGREE;
        let gradient = |lo: f64, hi: f64, steps: usize, spacing: f64| {
            if steps == 0 {
                0.0
            } else {
                (hi - lo) / (steps as f64 * spacing)
            }
        };
        let (c0, c1) = (c.saturating_sub(1), (c + 1).min(cols - 1));
        let (r0, r1) = (r.saturating_sub(1), (r + 1).min(rows - 1));
        let gx = gradient(z[[r, c0]], z[[r, c1]], c1 - c0, dx);
        let gy = gradient(z[[r0, c]], z[[r1, c]], r1 - r0, dy);
        (gx * gx + gy * gy).sqrt() * 100.0
    })
}

/// Percentile rank (0-100) of each pixel's elevation among the basin pixels.
pub fn elevation_rank(dem: &Array2<f64>, lu: &Array2<f64>) -> Array2<f64> {
    let mut inside: Vec<f64> = dem
        .iter()
        .zip(lu.iter())
        .filter(|(z, code)| !z.is_nan() && !code.is_nan())
        .map(|(z, _)| *z)
        .collect();
    inside.sort_by(f64::total_cmp);
    let n = inside.len();
    Zip::from(dem).and(lu).map_collect(|z, code| {
        if z.is_nan() || code.is_nan() || n < 2 {
            return if code.is_nan() { f64::NAN } else { 0.0 };
        }
        let below = inside.partition_point(|v| v < z);
        below as f64 / (n - 1) as f64 * 100.0
    })
}

/// Share of P - ET that cannot be utilized, per pixel.
///
/// Steep or high terrain runs off too fast to be used; protected land is
/// entirely non-utilizable. Without a DEM only protected land counts.
pub fn non_utilizable_fractions(
    dem: Option<&Grid>,
    lu: &Array2<f64>,
    categories: &CategoryMap,
    xs: [f64; 4],
) -> Array2<f64> {
    let terrain = match dem {
        Some(dem) => {
            let slope = slope_percent(dem);
            let rank = elevation_rank(&dem.data, lu);
            Zip::from(&slope)
                .and(&rank)
                .map_collect(|s, r| ramp(*s, xs[0], xs[1]).max(ramp(*r, xs[2], xs[3])))
        }
        None => Array2::zeros(lu.dim()),
    };
    Zip::from(&terrain).and(lu).map_collect(|f, code| {
        if code.is_nan() {
            f64::NAN
        } else if categories.category_of(*code) == Some(Category::Protected) {
            1.0
        } else if f.is_nan() {
            0.0
        } else {
            *f
        }
    })
}

/// Run Sheet 2 for every month with P and ET.
pub fn build(ctx: &SheetContext<'_>, data: CompleteData) -> Result<SheetOutput> {
    let p_dates = data.series(VariableKey::P)?.dates().to_vec();
    let et_dates = data.series(VariableKey::Et)?.dates().to_vec();
    let given_split = data.contains(VariableKey::Etb) && data.contains(VariableKey::Etg);

    let lu = ctx.land_use()?;
    let area = ctx.pixel_area()?;
    let mut derived = DerivedSeries::default();

    let (dates, smoothing_dates) = if given_split {
        let lists = data.date_lists(&[VariableKey::Et, VariableKey::Etb, VariableKey::Etg])?;
        (common_dates(&lists), Vec::new())
    } else {
        let etref_dates = data.series(VariableKey::Etref)?.dates().to_vec();
        let smoothing = common_dates(&[&p_dates, &etref_dates]);
        (common_dates(&[&smoothing, &et_dates]), smoothing)
    };
    if !given_split {
        log::info!(
            "{}: splitting ET into green and blue for {} months",
            ctx.basin.name,
            dates.len()
        );
    }

    let ndm_max = if data.contains(VariableKey::T) {
        None
    } else {
        ndm_maximum(ctx, &data, &lu)?
    };

    let mut accounts = Vec::with_capacity(dates.len());
    for date in &dates {
        let et = ctx.open_month(&data, VariableKey::Et, date, &lu)?;
        let (green, blue) = if given_split {
            (
                ctx.open_month(&data, VariableKey::Etg, date, &lu)?,
                ctx.open_month(&data, VariableKey::Etb, date, &lu)?,
            )
        } else {
            let (p_avg, etref_avg) = smoothed_inputs(ctx, &data, &smoothing_dates, *date, &lu)?;
            let (green, blue) = split_et(&et, &p_avg, &etref_avg);
            let path = ctx.write_month(VariableKey::Etg, date, green.clone(), &lu)?;
            derived.push(VariableKey::Etg, path, *date);
            let path = ctx.write_month(VariableKey::Etb, date, blue.clone(), &lu)?;
            derived.push(VariableKey::Etb, path, *date);
            (green, blue)
        };

        let lai = ctx.open_month_opt(&data, VariableKey::Lai, date, &lu)?;
        let intercepted = match ctx.open_month_opt(&data, VariableKey::I, date, &lu)? {
            Some(given) => given,
            None => {
                let p = ctx.open_month_opt(&data, VariableKey::P, date, &lu)?;
                let n = ctx.open_month_opt(&data, VariableKey::N, date, &lu)?;
                match (p, lai.as_ref(), n) {
                    (Some(p), Some(lai), Some(n)) => {
                        let intercepted = interception(&p, lai, &n);
                        let path =
                            ctx.write_month(VariableKey::I, date, intercepted.clone(), &lu)?;
                        derived.push(VariableKey::I, path, *date);
                        intercepted
                    }
                    _ => Array2::zeros(lu.shape()),
                }
            }
        };
        let transpiration = match ctx.open_month_opt(&data, VariableKey::T, date, &lu)? {
            Some(given) => given,
            None => {
                let ndm = ctx.open_month_opt(&data, VariableKey::Ndm, date, &lu)?;
                let share = match (ndm, ndm_max.as_ref(), lai.as_ref()) {
                    (Some(ndm), Some(max), _) => Some(ndm_share(&ndm, max)),
                    (_, _, Some(lai)) => Some(lai_share(lai)),
                    _ => None,
                };
                match share {
                    Some(share) => {
                        let t = split_transpiration(&et, &intercepted, &share);
                        let path = ctx.write_month(VariableKey::T, date, t.clone(), &lu)?;
                        derived.push(VariableKey::T, path, *date);
                        t
                    }
                    None => Array2::zeros(lu.shape()),
                }
            }
        };
        let components = EtComponents {
            et: &et,
            green: &green,
            blue: &blue,
            transpiration: &transpiration,
            interception: &intercepted,
        };
        accounts.push(AccountFile::monthly(
            SHEET2,
            *date,
            components.table(ctx, &lu, &area),
        ));
    }

    let mut data = derived.merge_into(data)?;
    if !data.contains(VariableKey::Fractions) {
        data = with_fraction_map(ctx, data, &lu, &p_dates)?;
    }
    Ok(SheetOutput { data, accounts })
}

/// Per-pixel maximum of the dry matter series, `None` without one.
fn ndm_maximum(
    ctx: &SheetContext<'_>,
    data: &CompleteData,
    lu: &Grid,
) -> Result<Option<Array2<f64>>> {
    let Some(series) = data.series.get(&VariableKey::Ndm).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    let mut max = Array2::from_elem(lu.shape(), f64::NAN);
    for date in series.dates() {
        let ndm = ctx.open_month(data, VariableKey::Ndm, date, lu)?;
        Zip::from(&mut max).and(&ndm).for_each(|m, v| *m = m.max(*v));
    }
    Ok(Some(max))
}

fn smoothed_inputs(
    ctx: &SheetContext<'_>,
    data: &CompleteData,
    dates: &[NaiveDate],
    date: NaiveDate,
    lu: &Grid,
) -> Result<(Array2<f64>, Array2<f64>)> {
    let index = dates.partition_point(|d| *d < date);
    let length = SMOOTHING_MONTHS.min(index + 1);
    let p = moving_average(dates, date, length, AverageMethod::Tail, |d| {
        ctx.open_month(data, VariableKey::P, &d, lu)
    })?;
    let etref = moving_average(dates, date, length, AverageMethod::Tail, |d| {
        ctx.open_month(data, VariableKey::Etref, &d, lu)
    })?;
    Ok((p, etref))
}

/// Where the static non-utilizable fraction map of a basin is written.
pub fn fraction_map_path(basin_output: &Path) -> PathBuf {
    basin_output
        .join("data")
        .join(VariableKey::Fractions.as_str())
        .join("fractions.tif")
}

fn with_fraction_map(
    ctx: &SheetContext<'_>,
    data: CompleteData,
    lu: &Grid,
    dates: &[NaiveDate],
) -> Result<CompleteData> {
    let dem = ctx.open_static(ctx.global.dem.as_ref(), lu)?;
    if dem.is_none() {
        log::warn!(
            "{}: no DEM, non-utilizable fractions cover protected land only",
            ctx.basin.name
        );
    }
    let fractions =
        non_utilizable_fractions(dem.as_ref(), &lu.data, ctx.categories, ctx.basin.fraction_xs);
    let path = fraction_map_path(&ctx.output_dir);
    let mut grid = lu.with_data(fractions);
    grid.nodata = Some(crate::context::OUTPUT_NODATA);
    ctx.rasters.write(&path, &grid)?;
    let pairs = dates.iter().map(|d| (path.clone(), *d)).collect();
    Ok(data.with_series(VariableKey::Fractions, AlignedSeries::from_pairs(pairs)?))
}

struct EtComponents<'a> {
    et: &'a Array2<f64>,
    green: &'a Array2<f64>,
    blue: &'a Array2<f64>,
    transpiration: &'a Array2<f64>,
    interception: &'a Array2<f64>,
}

impl EtComponents<'_> {
    fn table(&self, ctx: &SheetContext<'_>, lu: &Grid, area: &Array2<f64>) -> SheetTable {
        let zero_nan = |v: f64| if v.is_nan() { 0.0 } else { v };
        let evaporation = Zip::from(self.et)
            .and(self.transpiration)
            .and(self.interception)
            .map_collect(|et, t, i| (et - zero_nan(*t) - zero_nan(*i)).max(0.0));
        let rows: [(&str, CategoryValues); 5] = [
            ("TRANSPIRATION", ctx.category_volumes(self.transpiration, lu, area)),
            ("INTERCEPTION", ctx.category_volumes(self.interception, lu, area)),
            ("EVAPORATION", ctx.category_volumes(&evaporation, lu, area)),
            ("ET GREEN", ctx.category_volumes(self.green, lu, area)),
            ("ET BLUE", ctx.category_volumes(self.blue, lu, area)),
        ];
        let mut table = SheetTable::new();
        for category in Category::ALL {
            for (variable, values) in &rows {
                let value = values.get(&category).copied().unwrap_or(0.0);
                table.push("ET", category.as_str(), variable, value);
            }
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Scenario;
    use chrono::Datelike;
    use ndarray::array;
    use wa_core::GeoTransform;

    #[test]
    fn test_budyko_limits() {
        // Very wet: green ET bounded well below P.
        assert!(budyko(0.01) < 0.15);
        // Very dry: curve tends to the scale factor.
        assert!((budyko(50.0) - BUDYKO_SCALE).abs() < 0.02);
    }

    #[test]
    fn test_split_et_conserves_total() {
        let et = array![[90.0, 30.0, f64::NAN, 10.0]];
        let p = array![[100.0, 100.0, 100.0, 0.0]];
        let etref = array![[120.0, 120.0, 120.0, 120.0]];
        let (green, blue) = split_et(&et, &p, &etref);
        let bound = budyko(1.2) * 100.0;
        assert!((green[[0, 0]] - bound).abs() < 1e-9);
        assert!((green[[0, 0]] + blue[[0, 0]] - 90.0).abs() < 1e-9);
        assert_eq!((green[[0, 1]], blue[[0, 1]]), (30.0, 0.0));
        assert!(green[[0, 2]].is_nan());
        // No rain: everything is blue.
        assert_eq!((green[[0, 3]], blue[[0, 3]]), (0.0, 10.0));
    }

    #[test]
    fn test_interception() {
        let p = array![[100.0, 100.0, 0.0]];
        let lai = array![[2.0, 0.0, 2.0]];
        let n = array![[10.0, 10.0, 10.0]];
        let i = interception(&p, &lai, &n);
        let cover = 1.0 - (-1.0f64).exp();
        let expected = 2.0 * (1.0 - 1.0 / (1.0 + 10.0 * cover / 2.0)) * 10.0;
        assert!((i[[0, 0]] - expected).abs() < 1e-9);
        assert!(i[[0, 0]] < 100.0);
        assert_eq!(i[[0, 1]], 0.0);
        assert_eq!(i[[0, 2]], 0.0);
    }

    #[test]
    fn test_ramp() {
        assert_eq!(ramp(2.0, 4.0, 25.0), 0.0);
        assert_eq!(ramp(30.0, 4.0, 25.0), 1.0);
        assert!((ramp(14.5, 4.0, 25.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_non_utilizable_fractions() {
        let transform = GeoTransform {
            origin_x: 0.0,
            origin_y: 0.0,
            pixel_width: 0.001,
            pixel_height: 0.001,
        };
        let flat = Grid::new(Array2::from_elem((2, 2), 500.0), transform);
        let lu = array![[1.0, 60.0], [20.0, f64::NAN]];
        let fractions = non_utilizable_fractions(
            Some(&flat),
            &lu,
            &CategoryMap::wa_plus(),
            [4.0, 25.0, 4.0, 25.0],
        );
        assert_eq!(fractions[[0, 0]], 1.0);
        assert_eq!(fractions[[0, 1]], 0.0);
        assert!(fractions[[1, 1]].is_nan());

        let steep = Grid::new(array![[0.0, 100.0], [0.0, 100.0]], transform);
        let xs = [4.0, 25.0, 4.0, 25.0];
        let fractions = non_utilizable_fractions(Some(&steep), &lu, &CategoryMap::wa_plus(), xs);
        assert_eq!(fractions[[0, 1]], 1.0);
    }

    #[test]
    fn test_build_splits_et_and_adds_fractions() {
        let scenario = Scenario::new(3);
        let ctx = scenario.context();
        let output = build(&ctx, scenario.raw_data()).unwrap();
        assert_eq!(output.accounts.len(), 3);
        assert_eq!(output.data.series(VariableKey::Etb).unwrap().len(), 3);
        assert_eq!(output.data.series(VariableKey::Fractions).unwrap().len(), 3);

        let table = &output.accounts[2].table;
        let green = table.value("ET", "Managed", "ET GREEN").unwrap();
        let blue = table.value("ET", "Managed", "ET BLUE").unwrap();
        assert!(blue > 0.0);
        let ratio = green / (green + blue);
        assert!((ratio - budyko(1.2) * 100.0 / 90.0).abs() < 1e-9);
        // No transpiration input or vegetation data: all ET is evaporation.
        assert_eq!(table.value("ET", "Managed", "TRANSPIRATION"), Some(0.0));
        let e = table.value("ET", "Managed", "EVAPORATION").unwrap();
        assert!((e - green - blue).abs() < 1e-9);
    }

    #[test]
    fn test_build_reads_given_transpiration_not_runoff() {
        let scenario = Scenario::new(2);
        let data = scenario
            .raw_data()
            .with_series(VariableKey::T, scenario.constant(VariableKey::T, 30.0));
        let ctx = scenario.context();
        let output = build(&ctx, data).unwrap();
        let table = &output.accounts[1].table;
        // 30 mm transpiration leaves 60 mm of the 90 mm ET as evaporation;
        // the 20 mm of runoff plays no part.
        let t = table.value("ET", "Managed", "TRANSPIRATION").unwrap();
        let e = table.value("ET", "Managed", "EVAPORATION").unwrap();
        assert!((e / t - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_build_derives_transpiration_from_dry_matter() {
        let scenario = Scenario::new(2);
        let ndm = scenario.series_with(VariableKey::Ndm, |d| {
            if d.month() == 1 {
                0.4
            } else {
                0.8
            }
        });
        let data = scenario.raw_data().with_series(VariableKey::Ndm, ndm);
        let ctx = scenario.context();
        let output = build(&ctx, data).unwrap();
        assert_eq!(output.data.series(VariableKey::T).unwrap().len(), 2);
        assert!(!output.data.contains(VariableKey::I));

        // January: half the maximum dry matter, 45 of 90 mm transpired.
        let january = &output.accounts[0].table;
        let t = january.value("ET", "Managed", "TRANSPIRATION").unwrap();
        let e = january.value("ET", "Managed", "EVAPORATION").unwrap();
        assert!((e / t - 1.0).abs() < 1e-9);
        // February: the share is capped.
        let february = &output.accounts[1].table;
        let t = february.value("ET", "Managed", "TRANSPIRATION").unwrap();
        let e = february.value("ET", "Managed", "EVAPORATION").unwrap();
        assert!((t / e - 19.0).abs() < 1e-6);
    }

    #[test]
    fn test_split_transpiration() {
        let et = array![[90.0, 10.0, f64::NAN]];
        let i = array![[10.0, 20.0, 0.0]];
        let share = lai_share(&array![[2.0, 2.0, 2.0]]);
        let t = split_transpiration(&et, &i, &share);
        let cover = 1.0 - (-1.0f64).exp();
        assert!((t[[0, 0]] - 80.0 * cover).abs() < 1e-9);
        assert_eq!(t[[0, 1]], 0.0);
        assert!(t[[0, 2]].is_nan());
        assert_eq!(lai_share(&array![[100.0]])[[0, 0]], MAX_TRANSPIRATION_SHARE);
        let shares = ndm_share(&array![[0.2, 1.0, 0.3]], &array![[0.4, 1.0, 0.0]]);
        assert_eq!(shares, array![[0.5, MAX_TRANSPIRATION_SHARE, 0.0]]);
    }

    #[test]
    fn test_build_keeps_given_split() {
        let scenario = Scenario::new(2);
        let data = scenario
            .raw_data()
            .with_series(VariableKey::Etb, scenario.constant(VariableKey::Etb, 40.0))
            .with_series(VariableKey::Etg, scenario.constant(VariableKey::Etg, 50.0));
        let ctx = scenario.context();
        let etb_before = data.series(VariableKey::Etb).unwrap().clone();
        let output = build(&ctx, data).unwrap();
        assert_eq!(output.data.series(VariableKey::Etb).unwrap(), &etb_before);
    }
}
