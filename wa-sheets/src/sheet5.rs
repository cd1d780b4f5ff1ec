//! Sheet 5: surface water routing between subbasins.
//!
//! Every month the subbasins are visited in topological order. A subbasin
//! receives the outflow shares of its upstream neighbours plus any external
//! inflow, adds the runoff generated on its own pixels, loses its surface
//! water withdrawals and interbasin exports, regains the surface return flow
//! and splits what is left equally among its downstream neighbours.

use crate::context::{inside_mask, masked_nansum, SheetContext, SheetOutput};
use chrono::{Datelike, NaiveDate};
use ndarray::Array2;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use wa_core::aligner::common_dates;
use wa_core::basin::{GraceSplitBounds, OUTSIDE};
use wa_core::raster::{depth_to_volume, nanmean};
use wa_core::{
    AccountFile, BasinFlows, CompleteData, Grid, Result, RoutingGraph, SheetTable, SubbasinFlow,
    SupplySplitFit, VariableKey, WaError,
};
use wa_utils::dates::{month_start, parse_date};
use wa_utils::units::m3s_to_km3_per_month;

pub const SHEET5: &str = "sheet5";

/// Grid points per parameter of the GRACE split search.
pub const GRID_STEPS: usize = 21;

/// Read a `date;value` file. A first line whose date does not parse is taken as a header.
///
/// Values must be finite; `nan` or `inf` fail the read.
pub fn read_date_values(path: &Path) -> Result<BTreeMap<NaiveDate, f64>> {
    let text = fs::read_to_string(path)?;
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());
    let mut values = BTreeMap::new();
    for (i, record) in rdr.records().enumerate() {
        let record = record?;
        let (Some(date), Some(value)) = (record.get(0), record.get(1)) else {
            continue;
        };
        let date = match parse_date(date) {
            Ok(date) => month_start(&date),
            Err(_) if i == 0 => continue,
            Err(e) => {
                return Err(WaError::DateParse(format!("{}: {e}", path.display())));
            }
        };
        let parsed: f64 = value.parse()?;
        if !parsed.is_finite() {
            return Err(WaError::NonFinite {
                value: value.to_string(),
                context: format!("{} at {date}", path.display()),
            });
        }
        values.insert(date, parsed);
    }
    Ok(values)
}

/// Monthly volumes (km³) of the summed discharge (m³/s) of several files.
pub fn monthly_volumes(paths: &[PathBuf]) -> Result<BTreeMap<NaiveDate, f64>> {
    let mut volumes = BTreeMap::new();
    for path in paths {
        for (date, discharge) in read_date_values(path)? {
            *volumes.entry(date).or_insert(0.0) += m3s_to_km3_per_month(discharge, &date);
        }
    }
    Ok(volumes)
}

/// Local terms of one subbasin for one month, in km³.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubbasinInputs {
    pub name: String,
    pub external_inflow: f64,
    pub runoff: f64,
    pub supply_sw: f64,
    pub return_sw: f64,
    pub transfer: f64,
}

/// Route one month through the subbasin graph.
pub fn route(
    graph: &RoutingGraph,
    inputs: &BTreeMap<u32, SubbasinInputs>,
    date: NaiveDate,
) -> Result<BasinFlows> {
    let mut received: BTreeMap<u32, f64> = BTreeMap::new();
    let mut subbasins = Vec::with_capacity(inputs.len());
    let mut basin_outflow = 0.0;
    let mut basin_inflow = 0.0;
    for id in graph.topological_order()? {
        let local = inputs
            .get(&id)
            .ok_or_else(|| WaError::Routing(format!("no inputs for subbasin {id}")))?;
        let upstream_inflow = received.get(&id).copied().unwrap_or(0.0);
        let outflow = (upstream_inflow + local.external_inflow + local.runoff - local.supply_sw
            + local.return_sw
            - local.transfer)
            .max(0.0);
        let downstream = graph.downstream(id);
        if downstream.is_empty() {
            basin_outflow += outflow;
        } else {
            let share = outflow / downstream.len() as f64;
            for down in downstream {
                if *down == OUTSIDE {
                    basin_outflow += share;
                } else {
                    *received.entry(*down).or_insert(0.0) += share;
                }
            }
        }
        if graph.is_entry(id) {
            basin_inflow += local.external_inflow;
        }
        subbasins.push(SubbasinFlow {
            id,
            name: local.name.clone(),
            upstream_inflow,
            external_inflow: local.external_inflow,
            runoff: local.runoff,
            supply_sw: local.supply_sw,
            return_sw: local.return_sw,
            transfer: local.transfer,
            outflow,
        });
    }
    let transfer = subbasins.iter().map(|s| s.transfer).sum();
    Ok(BasinFlows {
        date,
        subbasins,
        inflow: basin_inflow,
        outflow: basin_outflow,
        transfer,
    })
}

/// Evenly spaced search values between two bounds, both included.
fn grid_values(lower: f64, upper: f64, steps: usize) -> Vec<f64> {
    if steps < 2 || upper <= lower {
        return vec![lower];
    }
    let step = (upper - lower) / (steps - 1) as f64;
    (0..steps).map(|i| lower + i as f64 * step).collect()
}

/// Deviations from the mean.
fn anomalies(values: &[f64]) -> Vec<f64> {
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| v - mean).collect()
}

/// Cumulative groundwater storage (mm) for a surface water share model.
pub fn groundwater_storage(
    months: &[NaiveDate],
    perc: &[f64],
    bf: &[f64],
    supply: &[f64],
    alpha: f64,
    beta: f64,
    theta: f64,
) -> Vec<f64> {
    let mut storage = 0.0;
    months
        .iter()
        .enumerate()
        .map(|(i, month)| {
            let sw = wa_core::flows::sw_fraction(alpha, beta, theta, month.month());
            storage += perc[i] - bf[i] - supply[i] * (1.0 - sw);
            storage
        })
        .collect()
}

/// Basin-mean monthly terms of the GRACE split fit, in mm.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraceInputs {
    pub months: Vec<NaiveDate>,
    pub perc: Vec<f64>,
    pub bf: Vec<f64>,
    pub supply: Vec<f64>,
    pub grace: Vec<f64>,
}

/// Grid search of `(alpha, beta, theta)` minimising the squared error between
/// the modelled groundwater storage anomaly and the GRACE anomaly.
pub fn fit_supply_split(inputs: &GraceInputs, bounds: &GraceSplitBounds) -> Result<SupplySplitFit> {
    bounds.validate()?;
    let n = inputs.months.len();
    if n < 3 || [&inputs.perc, &inputs.bf, &inputs.supply, &inputs.grace]
        .iter()
        .any(|v| v.len() != n)
    {
        return Err(WaError::Config(format!(
            "GRACE split needs at least 3 aligned months, got {n}"
        )));
    }
    let observed = anomalies(&inputs.grace);
    let mut best = SupplySplitFit {
        alpha: bounds.lower[0],
        beta: bounds.lower[1],
        theta: bounds.lower[2],
        sse: f64::INFINITY,
    };
    for alpha in grid_values(bounds.lower[0], bounds.upper[0], GRID_STEPS) {
        for beta in grid_values(bounds.lower[1], bounds.upper[1], GRID_STEPS) {
            for theta in grid_values(bounds.lower[2], bounds.upper[2], GRID_STEPS) {
                let modelled = anomalies(&groundwater_storage(
                    &inputs.months,
                    &inputs.perc,
                    &inputs.bf,
                    &inputs.supply,
                    alpha,
                    beta,
                    theta,
                ));
                let sse: f64 = modelled
                    .iter()
                    .zip(&observed)
                    .map(|(m, o)| (m - o).powi(2))
                    .sum();
                if sse < best.sse {
                    best = SupplySplitFit {
                        alpha,
                        beta,
                        theta,
                        sse,
                    };
                }
            }
        }
    }
    Ok(best)
}

fn grace_inputs(ctx: &SheetContext<'_>, data: &CompleteData, lu: &Grid) -> Result<GraceInputs> {
    let path = ctx.basin.grace.as_ref().ok_or_else(|| {
        WaError::Config(format!(
            "{}: grace_supply_split needs a GRACE file",
            ctx.basin.name
        ))
    })?;
    let grace = read_date_values(path)?;
    let grace_dates: Vec<NaiveDate> = grace.keys().copied().collect();
    let keys = [VariableKey::Perc, VariableKey::Bf, VariableKey::SupplyTotal];
    let mut lists = data.date_lists(&keys)?;
    lists.push(&grace_dates);
    let months = common_dates(&lists);

    let mut inputs = GraceInputs::default();
    for month in &months {
        let mean = |key| -> Result<f64> {
            let value = nanmean(&ctx.open_month(data, key, month, lu)?);
            Ok(if value.is_nan() { 0.0 } else { value })
        };
        inputs.perc.push(mean(VariableKey::Perc)?);
        inputs.bf.push(mean(VariableKey::Bf)?);
        inputs.supply.push(mean(VariableKey::SupplyTotal)?);
        inputs.grace.push(grace.get(month).copied().unwrap_or(0.0));
    }
    inputs.months = months;
    Ok(inputs)
}

/// Run Sheet 5 for every month with runoff.
pub fn build(ctx: &SheetContext<'_>, mut data: CompleteData) -> Result<SheetOutput> {
    let graph = ctx.basin.routing()?;
    let order = graph.topological_order()?;
    let dates = data.series(VariableKey::Tr)?.dates().to_vec();
    let lu = ctx.land_use()?;
    let area = ctx.pixel_area()?;

    if ctx.basin.grace_supply_split {
        let fit = fit_supply_split(
            &grace_inputs(ctx, &data, &lu)?,
            &ctx.basin.grace_split_alpha_bounds,
        )?;
        log::info!(
            "{}: GRACE supply split alpha {:.3} beta {:.3} theta {:.2} (sse {:.3})",
            ctx.basin.name,
            fit.alpha,
            fit.beta,
            fit.theta,
            fit.sse
        );
        data.supply_split = Some(fit);
    }

    let mut masks: BTreeMap<u32, Array2<bool>> = BTreeMap::new();
    let mut inflows = BTreeMap::new();
    let mut transfers = BTreeMap::new();
    for (id, subbasin) in &ctx.basin.masks {
        let mask = ctx
            .open_static(Some(&subbasin.mask), &lu)?
            .ok_or_else(|| WaError::Config(format!("subbasin {id} has no mask")))?;
        masks.insert(*id, inside_mask(&mask.data));
        inflows.insert(*id, monthly_volumes(&subbasin.inflow_files)?);
        transfers.insert(*id, monthly_volumes(&subbasin.transfer_files)?);
    }

    let mut accounts = Vec::with_capacity(dates.len());
    for date in &dates {
        let volume = |depth: Array2<f64>| depth_to_volume(&depth, &area);
        let runoff = volume(ctx.open_month(&data, VariableKey::Tr, date, &lu)?);
        let supply_sw = match data.supply_split {
            Some(fit) => ctx
                .open_month_opt(&data, VariableKey::SupplyTotal, date, &lu)?
                .map(|s| s * fit.sw_fraction(date.month())),
            None => ctx.open_month_opt(&data, VariableKey::SupplySw, date, &lu)?,
        }
        .map(volume);
        let return_sw = match (
            ctx.open_month_opt(&data, VariableKey::ReturnFlowSwSw, date, &lu)?,
            ctx.open_month_opt(&data, VariableKey::ReturnFlowGwSw, date, &lu)?,
        ) {
            (Some(a), Some(b)) => Some(volume(a + b)),
            (Some(a), None) | (None, Some(a)) => Some(volume(a)),
            (None, None) => None,
        };

        let mut inputs = BTreeMap::new();
        for id in &order {
            let mask = masks
                .get(id)
                .ok_or_else(|| WaError::Routing(format!("subbasin {id} has no mask")))?;
            let sum = |v: &Option<Array2<f64>>| v.as_ref().map_or(0.0, |v| masked_nansum(v, mask));
            let lookup = |m: &BTreeMap<u32, BTreeMap<NaiveDate, f64>>| {
                m.get(id).and_then(|v| v.get(date)).copied().unwrap_or(0.0)
            };
            let name = ctx
                .basin
                .masks
                .get(id)
                .map(|s| s.name.clone())
                .unwrap_or_default();
            inputs.insert(
                *id,
                SubbasinInputs {
                    name,
                    external_inflow: lookup(&inflows),
                    runoff: masked_nansum(&runoff, mask),
                    supply_sw: sum(&supply_sw),
                    return_sw: sum(&return_sw),
                    transfer: lookup(&transfers),
                },
            );
        }
        let flows = route(&graph, &inputs, *date)?;
        log::debug!(
            "{}: {} basin outflow {:.4} km3",
            ctx.basin.name,
            date,
            flows.outflow
        );
        accounts.push(AccountFile::monthly(SHEET5, *date, flows_table(&flows)));
        data.flows.insert(*date, flows);
    }
    log::info!("{}: routed {} months", ctx.basin.name, dates.len());
    Ok(SheetOutput { data, accounts })
}

/// `SUBBASIN` rows per subbasin in routing order, then the basin totals.
pub fn flows_table(flows: &BasinFlows) -> SheetTable {
    let mut table = SheetTable::new();
    for s in &flows.subbasins {
        table.push("SUBBASIN", &s.name, "Inflow", s.upstream_inflow + s.external_inflow);
        table.push("SUBBASIN", &s.name, "Runoff", s.runoff);
        table.push("SUBBASIN", &s.name, "Withdrawals", s.supply_sw);
        table.push("SUBBASIN", &s.name, "Return flow", s.return_sw);
        table.push("SUBBASIN", &s.name, "Interbasin Transfer", s.transfer);
        table.push("SUBBASIN", &s.name, "Outflow: Total", s.outflow);
    }
    table.push("SUBBASIN", "basin", "Inflow", flows.inflow);
    table.push("SUBBASIN", "basin", "Interbasin Transfer", flows.transfer);
    table.push("SUBBASIN", "basin", "Outflow: Total", flows.outflow);
    table
}
