//! Sheets 4 and 6: supply, return flows and groundwater.
//!
//! Supply is split into surface water and groundwater withdrawals. The
//! non-consumed part of the supply returns to the system, divided between
//! surface runoff and percolation in proportion to the incremental runoff
//! (DSRO) and incremental percolation (DPERC) of each pixel.

use crate::context::{DerivedSeries, SheetContext, SheetOutput};
use chrono::NaiveDate;
use ndarray::{Array2, Zip};
use wa_core::aligner::common_dates;
use wa_core::raster::nansum;
use wa_core::{AccountFile, Category, CompleteData, Result, SheetTable, VariableKey, WaError};

pub const SHEET4: &str = "sheet4";
pub const SHEET6: &str = "sheet6";

/// Share of the returned supply that reaches surface water.
///
/// Missing DSRO or DPERC counts as zero; pixels with nothing to return get 0.
pub fn sw_return_fraction(dsro: &Array2<f64>, dperc: &Array2<f64>) -> Array2<f64> {
    Zip::from(dsro).and(dperc).map_collect(|ro, perc| {
        let ro = if ro.is_nan() { 0.0 } else { *ro };
        let perc = if perc.is_nan() { 0.0 } else { *perc };
        let total = ro + perc;
        if total > 0.0 {
            ro / total
        } else {
            0.0
        }
    })
}

/// Per-pixel supply split, all depths in mm.
#[derive(Debug, Clone, PartialEq)]
pub struct SupplySplit {
    pub supply_sw: Array2<f64>,
    pub supply_gw: Array2<f64>,
    pub return_flow_sw_sw: Array2<f64>,
    pub return_flow_sw_gw: Array2<f64>,
    pub return_flow_gw_sw: Array2<f64>,
    pub return_flow_gw_gw: Array2<f64>,
    pub sw_return_fraction: Array2<f64>,
}

impl SupplySplit {
    /// Returned supply reaching surface water, whatever its source.
    pub fn return_to_sw(&self) -> Array2<f64> {
        &self.return_flow_sw_sw + &self.return_flow_gw_sw
    }

    pub fn return_to_gw(&self) -> Array2<f64> {
        &self.return_flow_sw_gw + &self.return_flow_gw_gw
    }
}

/// Split the supply of one month.
///
/// `sw_share` is the surface water share of supply (NaN read as all-surface).
/// The non-consumed supply is `supply - etb` when blue ET is known, otherwise
/// `dsro + dperc` capped at the supply.
pub fn split_supply(
    supply: &Array2<f64>,
    sw_share: &Array2<f64>,
    dsro: &Array2<f64>,
    dperc: &Array2<f64>,
    etb: Option<&Array2<f64>>,
) -> SupplySplit {
    let share = sw_share.mapv(|f| if f.is_nan() { 1.0 } else { f.clamp(0.0, 1.0) });
    let return_fraction = sw_return_fraction(dsro, dperc);
    let non_consumed = match etb {
        Some(etb) => Zip::from(supply)
            .and(etb)
            .map_collect(|s, e| (s - if e.is_nan() { 0.0 } else { *e }).max(0.0)),
        None => Zip::from(supply).and(dsro).and(dperc).map_collect(|s, ro, perc| {
            let returned = ro.max(0.0) + perc.max(0.0);
            returned.min(s.max(0.0))
        }),
    };
    // NaN supply (outside the basin) stays NaN through every product.
    let non_consumed = Zip::from(&non_consumed)
        .and(supply)
        .map_collect(|n, s| if s.is_nan() { f64::NAN } else { *n });
    let to_sw = &non_consumed * &return_fraction;
    let to_gw = &non_consumed - &to_sw;
    let gw_share = share.mapv(|f| 1.0 - f);
    SupplySplit {
        supply_sw: supply * &share,
        supply_gw: supply * &gw_share,
        return_flow_sw_sw: &to_sw * &share,
        return_flow_sw_gw: &to_gw * &share,
        return_flow_gw_sw: &to_sw * &gw_share,
        return_flow_gw_gw: &to_gw * &gw_share,
        sw_return_fraction: return_fraction,
    }
}

/// Run Sheets 4 and 6 for every month with supply, DSRO and DPERC.
pub fn build(ctx: &SheetContext<'_>, data: CompleteData) -> Result<SheetOutput> {
    let required = [VariableKey::SupplyTotal, VariableKey::Dro, VariableKey::Dperc];
    let dates = common_dates(&data.date_lists(&required)?);
    if dates.is_empty() {
        log::warn!("{}: no common month for sheet 4/6 inputs", ctx.basin.name);
    }

    let lu = ctx.land_use()?;
    let area = ctx.pixel_area()?;
    let sw_share = sw_share_map(ctx, &lu)?;

    let mut derived = DerivedSeries::default();
    let mut accounts = Vec::with_capacity(dates.len() * 2);
    for date in &dates {
        let supply = ctx.open_month(&data, VariableKey::SupplyTotal, date, &lu)?;
        let dsro = ctx.open_month(&data, VariableKey::Dro, date, &lu)?;
        let dperc = ctx.open_month(&data, VariableKey::Dperc, date, &lu)?;
        let etb = ctx.open_month_opt(&data, VariableKey::Etb, date, &lu)?;
        let split = split_supply(&supply, &sw_share, &dsro, &dperc, etb.as_ref());

        let sheet4 = sheet4_table(ctx, &split, &supply, &lu, &area);
        let perc = ctx.open_month_opt(&data, VariableKey::Perc, date, &lu)?;
        let bf = ctx.open_month_opt(&data, VariableKey::Bf, date, &lu)?;
        let sheet6 = sheet6_table(ctx, &split, &dperc, perc.as_ref(), bf.as_ref(), &lu, &area);
        accounts.push(AccountFile::monthly(SHEET4, *date, sheet4));
        accounts.push(AccountFile::monthly(SHEET6, *date, sheet6));

        write_split(ctx, &mut derived, *date, split, &lu)?;
    }
    log::info!(
        "{}: sheet 4/6 done for {} months",
        ctx.basin.name,
        dates.len()
    );
    Ok(SheetOutput {
        data: derived.merge_into(data)?,
        accounts,
    })
}

fn sw_share_map(ctx: &SheetContext<'_>, lu: &wa_core::Grid) -> Result<Array2<f64>> {
    if !ctx.basin.lu_based_supply_split {
        return Ok(Array2::ones(lu.shape()));
    }
    let grid = ctx
        .open_static(ctx.global.equiped_sw_irrigation.as_ref(), lu)?
        .ok_or_else(|| {
            WaError::Config(format!(
                "{}: lu_based_supply_split needs global equiped_sw_irrigation",
                ctx.basin.name
            ))
        })?;
    // Percentages are accepted as well as fractions.
    let scale = if grid.data.iter().any(|v| *v > 1.0) { 0.01 } else { 1.0 };
    Ok(grid.data.mapv(|v| v * scale))
}

fn write_split(
    ctx: &SheetContext<'_>,
    derived: &mut DerivedSeries,
    date: NaiveDate,
    split: SupplySplit,
    lu: &wa_core::Grid,
) -> Result<()> {
    let outputs = [
        (VariableKey::SupplySw, split.supply_sw),
        (VariableKey::SupplyGw, split.supply_gw),
        (VariableKey::ReturnFlowSwSw, split.return_flow_sw_sw),
        (VariableKey::ReturnFlowSwGw, split.return_flow_sw_gw),
        (VariableKey::ReturnFlowGwSw, split.return_flow_gw_sw),
        (VariableKey::ReturnFlowGwGw, split.return_flow_gw_gw),
        (VariableKey::SwReturnFraction, split.sw_return_fraction),
    ];
    for (key, array) in outputs {
        let path = ctx.write_month(key, &date, array, lu)?;
        derived.push(key, path, date);
    }
    Ok(())
}

fn sheet4_table(
    ctx: &SheetContext<'_>,
    split: &SupplySplit,
    supply: &Array2<f64>,
    lu: &wa_core::Grid,
    area: &Array2<f64>,
) -> SheetTable {
    let supply_sw = ctx.category_volumes(&split.supply_sw, lu, area);
    let supply_gw = ctx.category_volumes(&split.supply_gw, lu, area);
    let return_sw = ctx.category_volumes(&split.return_to_sw(), lu, area);
    let return_gw = ctx.category_volumes(&split.return_to_gw(), lu, area);
    let total = ctx.category_volumes(supply, lu, area);

    let mut table = SheetTable::new();
    for category in Category::ALL {
        let get = |m: &wa_core::CategoryValues| m.get(&category).copied().unwrap_or(0.0);
        let name = category.as_str();
        table.push("SUPPLY", name, "Surface water", get(&supply_sw));
        table.push("SUPPLY", name, "Groundwater", get(&supply_gw));
        table.push("RETURN FLOW", name, "Surface water", get(&return_sw));
        table.push("RETURN FLOW", name, "Groundwater", get(&return_gw));
        let consumed = get(&total) - get(&return_sw) - get(&return_gw);
        table.push("CONSUMED", name, "Supply", consumed.max(0.0));
    }
    table
}

fn sheet6_table(
    ctx: &SheetContext<'_>,
    split: &SupplySplit,
    dperc: &Array2<f64>,
    perc: Option<&Array2<f64>>,
    bf: Option<&Array2<f64>>,
    lu: &wa_core::Grid,
    area: &Array2<f64>,
) -> SheetTable {
    let natural = perc.map(|perc| {
        let natural = Zip::from(perc)
            .and(dperc)
            .map_collect(|p, d| (p - if d.is_nan() { 0.0 } else { *d }).max(0.0));
        ctx.category_volumes(&natural, lu, area)
    });
    let supply_return = ctx.category_volumes(&split.return_to_gw(), lu, area);
    let withdrawal = ctx.category_volumes(&split.supply_gw, lu, area);

    let mut table = SheetTable::new();
    for category in Category::ALL {
        let get = |m: &wa_core::CategoryValues| m.get(&category).copied().unwrap_or(0.0);
        let name = category.as_str();
        table.push(
            "RECHARGE",
            name,
            "Natural",
            natural.as_ref().map(get).unwrap_or(0.0),
        );
        table.push("RECHARGE", name, "Supply return", get(&supply_return));
        table.push("WITHDRAWAL", name, "Groundwater", get(&withdrawal));
    }
    let baseflow = bf
        .map(|bf| nansum(&wa_core::raster::depth_to_volume(bf, area)))
        .unwrap_or(0.0);
    table.push("BASEFLOW", "Basin", "Baseflow", baseflow);
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Scenario;
    use ndarray::array;

    #[test]
    fn test_sw_return_fraction() {
        let dsro = array![[1.0, f64::NAN, 0.0, 3.0]];
        let dperc = array![[3.0, 2.0, 0.0, f64::NAN]];
        let fraction = sw_return_fraction(&dsro, &dperc);
        assert_eq!(fraction, array![[0.25, 0.0, 0.0, 1.0]]);
    }

    #[test]
    fn test_split_supply_conserves_volumes() {
        let supply = array![[10.0, 20.0]];
        let share = array![[0.6, f64::NAN]];
        let dsro = array![[1.0, 0.0]];
        let dperc = array![[3.0, 0.0]];
        let etb = array![[6.0, 25.0]];
        let split = split_supply(&supply, &share, &dsro, &dperc, Some(&etb));
        assert!((split.supply_sw[[0, 0]] - 6.0).abs() < 1e-12);
        assert!((split.supply_gw[[0, 0]] - 4.0).abs() < 1e-12);
        // 4 mm returns: 1 to surface water, 3 to groundwater.
        let returned = split.return_to_sw()[[0, 0]] + split.return_to_gw()[[0, 0]];
        assert!((returned - 4.0).abs() < 1e-12);
        assert!((split.return_to_sw()[[0, 0]] - 1.0).abs() < 1e-12);
        assert!((split.return_flow_sw_gw[[0, 0]] - 1.8).abs() < 1e-12);
        // Over-consumed pixel returns nothing and is all-surface.
        assert_eq!(split.supply_sw[[0, 1]], 20.0);
        assert_eq!(split.return_to_gw()[[0, 1]], 0.0);
    }

    #[test]
    fn test_split_supply_without_etb_caps_at_supply() {
        let supply = array![[2.0]];
        let split = split_supply(&supply, &array![[1.0]], &array![[3.0]], &array![[1.0]], None);
        let returned = split.return_to_sw()[[0, 0]] + split.return_to_gw()[[0, 0]];
        assert!((returned - 2.0).abs() < 1e-12);
        assert!((split.return_to_sw()[[0, 0]] - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_build_writes_series_and_tables() {
        let scenario = Scenario::new(3);
        let data = scenario.raw_data();
        let ctx = scenario.context();
        let output = build(&ctx, data).unwrap();
        assert_eq!(output.accounts.len(), 6);
        let supply_sw = output.data.series(VariableKey::SupplySw).unwrap();
        assert_eq!(supply_sw.len(), 3);
        assert!(scenario.rasters.contains(&supply_sw.files()[0]));

        let sheet4 = &output.accounts[0].table;
        assert_eq!(output.accounts[0].sheet, SHEET4);
        let sw = sheet4.value("SUPPLY", "Managed", "Surface water").unwrap();
        assert!(sw > 0.0);
        assert_eq!(sheet4.value("SUPPLY", "Managed", "Groundwater"), Some(0.0));
        let sheet6 = &output.accounts[1].table;
        assert!(sheet6.value("BASEFLOW", "Basin", "Baseflow").unwrap() > 0.0);
    }

    #[test]
    fn test_build_requires_supply() {
        let scenario = Scenario::new(2);
        let mut data = scenario.raw_data();
        data.series.remove(&VariableKey::SupplyTotal);
        let ctx = scenario.context();
        assert!(matches!(
            build(&ctx, data),
            Err(WaError::MissingVariable(name)) if name == "supply_total"
        ));
    }
}
