//! Sheet 1: the closed basin water balance.

use crate::context::{SheetContext, SheetOutput};
use crate::engine::{compute_monthly_balance, BalanceInputs, UtilizedFlowFractions};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::path::PathBuf;
use wa_core::aligner::common_dates;
use wa_core::raster::basin_mean_fraction;
use wa_core::{
    AccountFile, BasinFlows, BoundaryFlows, Category, CompleteData, Grid, MonthlyBalance, Result,
    SheetTable, VariableKey,
};

pub const SHEET1: &str = "sheet1";

/// Mean monthly basin outflow (km³/month); zero without routed months.
pub fn long_term_outflow(flows: &BTreeMap<NaiveDate, BasinFlows>) -> f64 {
    if flows.is_empty() {
        return 0.0;
    }
    flows.values().map(|f| f.outflow).sum::<f64>() / flows.len() as f64
}

/// Boundary terms of the balance from the routed flows.
///
/// Basin inflow enters as surface water; exports leave as surface water and
/// negative transfers (imports) count as surface inflow.
pub fn boundary_flows(flows: &BasinFlows) -> BoundaryFlows {
    let (q_in_sw, q_out_sw) = if flows.transfer >= 0.0 {
        (flows.inflow, flows.transfer)
    } else {
        (flows.inflow - flows.transfer, 0.0)
    };
    BoundaryFlows {
        q_outflow: flows.outflow,
        q_in_sw,
        q_out_sw,
        ..BoundaryFlows::default()
    }
}

/// The Sheet 1 account table of one month.
pub fn balance_table(b: &MonthlyBalance) -> SheetTable {
    let category = |m: &BTreeMap<Category, f64>, c: Category| m.get(&c).copied().unwrap_or(0.0);
    let mut t = SheetTable::new();
    t.push("INFLOW", "PRECIPITATION", "Rainfall", b.p_advection);
    t.push("INFLOW", "PRECIPITATION", "Snowfall", 0.0);
    t.push("INFLOW", "PRECIPITATION", "Precipitation recycling", b.p_recycled);

    t.push("INFLOW", "SURFACE WATER", "Main riverstem", b.flows.q_in_sw);
    t.push("INFLOW", "SURFACE WATER", "Tributaries", 0.0);
    t.push("INFLOW", "SURFACE WATER", "Utilized surface water", 0.0);
    t.push("INFLOW", "SURFACE WATER", "Flood", 0.0);

    t.push("INFLOW", "GROUNDWATER", "Natural", b.flows.q_in_gw);
    t.push("INFLOW", "GROUNDWATER", "Utilized", 0.0);

    t.push("INFLOW", "OTHER", "Desalinized", b.flows.q_in_desal);

    t.push("STORAGE", "CHANGE", "Surface storage", b.ds);
    t.push("STORAGE", "CHANGE", "Storage in sinks", 0.0);

    for c in Category::ALL {
        t.push("OUTFLOW", "ET LANDSCAPE", c.as_str(), category(&b.landscape_et, c));
    }
    for c in Category::ALL {
        t.push("OUTFLOW", "ET UTILIZED FLOW", c.as_str(), category(&b.utilized_flow, c));
    }

    t.push("OUTFLOW", "ET INCREMENTAL", "Manmade", b.manmade);
    t.push("OUTFLOW", "ET INCREMENTAL", "Natural", b.natural);

    t.push("OUTFLOW", "SURFACE WATER", "Main riverstem", b.flows.q_outflow);
    t.push("OUTFLOW", "SURFACE WATER", "Tributaries", 0.0);
    t.push("OUTFLOW", "SURFACE WATER", "Utilized surface water", 0.0);
    t.push("OUTFLOW", "SURFACE WATER", "Flood", 0.0);
    t.push("OUTFLOW", "SURFACE WATER", "Interbasin transfer", b.flows.q_out_sw);

    t.push("OUTFLOW", "GROUNDWATER", "Natural", b.flows.q_out_gw);
    t.push("OUTFLOW", "GROUNDWATER", "Utilized", 0.0);

    t.push("OUTFLOW", "OTHER", "Non-utilizable", b.non_utilizable_outflow);
    t.push("OUTFLOW", "OTHER", "Other", b.other);

    t.push("OUTFLOW", "RESERVED", "Commited", b.reserved_outflow_actual);
    t.push("OUTFLOW", "RESERVED", "Navigational", 0.0);
    t.push("OUTFLOW", "RESERVED", "Environmental", 0.0);
    t
}

/// Basin mean of an optional global fraction raster; 0 when absent or empty.
fn global_fraction(
    ctx: &SheetContext<'_>,
    path: Option<&PathBuf>,
    lu: &Grid,
    name: &str,
) -> Result<f64> {
    let Some(path) = path else {
        log::warn!("{}: no {} raster, using 0", ctx.basin.name, name);
        return Ok(0.0);
    };
    let fraction = basin_mean_fraction(&ctx.rasters.open(path)?, lu);
    if fraction.is_nan() {
        log::warn!("{}: {} has no data inside the basin, using 0", ctx.basin.name, name);
        Ok(0.0)
    } else {
        Ok(fraction)
    }
}

/// Run Sheet 1 for every month with P, ET green, ET blue, fractions and routed flows.
pub fn build(
    ctx: &SheetContext<'_>,
    mut data: CompleteData,
    fractions: &UtilizedFlowFractions,
) -> Result<SheetOutput> {
    fractions.validate()?;
    let keys = [
        VariableKey::P,
        VariableKey::Etb,
        VariableKey::Etg,
        VariableKey::Fractions,
    ];
    let mut lists = data.date_lists(&keys)?;
    let routed: Vec<NaiveDate> = data.flows.keys().copied().collect();
    if routed.is_empty() {
        log::warn!(
            "{}: no routed flows, boundary flows are taken as zero",
            ctx.basin.name
        );
    } else {
        lists.push(&routed);
    }
    let dates = common_dates(&lists);

    let lu = ctx.land_use()?;
    let area = ctx.pixel_area()?;
    let gray_water_fraction = global_fraction(ctx, ctx.global.wpl_tif.as_ref(), &lu, "wpl_tif")?;
    let ewr_fraction =
        global_fraction(ctx, ctx.global.environ_water_req.as_ref(), &lu, "environ_water_req")?;
    let q_out_avg = long_term_outflow(&data.flows);

    let mut accounts = Vec::with_capacity(dates.len());
    let mut balances = Vec::with_capacity(dates.len());
    for date in &dates {
        let p = ctx.open_month(&data, VariableKey::P, date, &lu)?;
        let et_green = ctx.open_month(&data, VariableKey::Etg, date, &lu)?;
        let et_blue = ctx.open_month(&data, VariableKey::Etb, date, &lu)?;
        let non_utilizable_fractions = ctx.open_month(&data, VariableKey::Fractions, date, &lu)?;
        let flows = data
            .flows
            .get(date)
            .map(boundary_flows)
            .unwrap_or_default();
        let inputs = BalanceInputs {
            date: *date,
            p: &p,
            et_green: &et_green,
            et_blue: &et_blue,
            lu: &lu.data,
            pixel_area: &area,
            non_utilizable_fractions: &non_utilizable_fractions,
            recycling_ratio: ctx.basin.recycling_ratio,
            gray_water_fraction,
            ewr_fraction,
            q_out_avg,
            other: 0.0,
            flows,
        };
        let balance = compute_monthly_balance(&inputs, ctx.categories, fractions)?;
        accounts.push(AccountFile::monthly(SHEET1, *date, balance_table(&balance)));
        balances.push(balance);
    }
    for balance in balances {
        data.balances.insert(balance.date, balance);
    }
    log::info!(
        "{}: sheet 1 closed for {} months",
        ctx.basin.name,
        dates.len()
    );
    Ok(SheetOutput { data, accounts })
}
