//! Basin water-balance engine.
//!
//! Closes the Sheet 1 balance of one basin for one month. Depth rasters (mm)
//! are turned into volumes (km³) with the basin's cell areas, ET is split by
//! land-use category into landscape (green) and incremental (blue)
//! consumption, and the non-consumed remainder is divided into
//! non-utilizable, reserved and utilizable outflow.

use crate::context::mask_outside;
use chrono::NaiveDate;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use wa_core::raster::{depth_to_volume, ensure_shape, nansum};
use wa_core::{
    BoundaryFlows, Category, CategoryMap, CategoryValues, MonthlyBalance, Result, WaError,
};

/// Allowed deviation of a fraction mapping's sum from 1.0.
pub const FRACTION_TOLERANCE: f64 = 1e-6;

/// How "other" and non-recoverable flows are attributed to the land-use categories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilizedFlowFractions {
    pub other: CategoryValues,
    pub non_recoverable: CategoryValues,
}

impl Default for UtilizedFlowFractions {
    fn default() -> Self {
        let managed_only: CategoryValues = Category::ALL
            .iter()
            .map(|c| (*c, if *c == Category::Managed { 1.0 } else { 0.0 }))
            .collect();
        UtilizedFlowFractions {
            other: managed_only.clone(),
            non_recoverable: managed_only,
        }
    }
}

impl UtilizedFlowFractions {
    pub fn validate(&self) -> Result<()> {
        validate_fractions("other", &self.other)?;
        validate_fractions("non_recoverable", &self.non_recoverable)
    }
}

/// Fail with `FractionSum` unless the fractions add up to 1.0.
pub fn validate_fractions(name: &str, fractions: &CategoryValues) -> Result<()> {
    let sum: f64 = fractions.values().sum();
    if (sum - 1.0).abs() > FRACTION_TOLERANCE || fractions.values().any(|f| !f.is_finite()) {
        return Err(WaError::FractionSum {
            mapping: name.to_string(),
            sum,
        });
    }
    Ok(())
}

/// Recycling and storage terms of the basin balance, in km³.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaterBalance {
    pub p_recycled: f64,
    pub et_advection: f64,
    pub p_advection: f64,
    pub ds: f64,
}

/// Split P and ET into recycled and advected parts and close the balance on dS.
///
/// Recycled precipitation is capped at total precipitation.
pub fn water_balance(
    p_total: f64,
    et_total: f64,
    recycling_ratio: f64,
    flows: &BoundaryFlows,
) -> WaterBalance {
    let p_recycled = (recycling_ratio * et_total).min(p_total);
    let et_advection = et_total - p_recycled;
    let p_advection = p_total - p_recycled;
    let ds = flows.q_outflow + et_advection + flows.q_out_sw + flows.q_out_gw
        - p_advection
        - flows.q_in_sw
        - flows.q_in_gw
        - flows.q_in_desal;
    WaterBalance {
        p_recycled,
        et_advection,
        p_advection,
        ds,
    }
}

/// Incremental ET plus the category's share of "other" and non-recoverable flow.
pub fn utilized_flow(
    incremental_et: &CategoryValues,
    other: f64,
    non_recoverable: f64,
    fractions: &UtilizedFlowFractions,
) -> Result<CategoryValues> {
    fractions.validate()?;
    Ok(Category::ALL
        .iter()
        .map(|c| {
            let share = |m: &CategoryValues| m.get(c).copied().unwrap_or(0.0);
            let value = incremental_et.get(c).copied().unwrap_or(0.0)
                + share(&fractions.other) * other
                + share(&fractions.non_recoverable) * non_recoverable;
            (*c, value)
        })
        .collect())
}

/// Fraction-weighted P - ET, summed over the basin ignoring NaN.
pub fn non_utilizable(p: &Array2<f64>, et: &Array2<f64>, fractions: &Array2<f64>) -> f64 {
    nansum(&((p - et) * fractions))
}

/// Inputs of one basin-month. Depth rasters are in mm on the land-use grid.
pub struct BalanceInputs<'a> {
    pub date: NaiveDate,
    pub p: &'a Array2<f64>,
    pub et_green: &'a Array2<f64>,
    pub et_blue: &'a Array2<f64>,
    pub lu: &'a Array2<f64>,
    pub pixel_area: &'a Array2<f64>,
    pub non_utilizable_fractions: &'a Array2<f64>,
    pub recycling_ratio: f64,
    pub gray_water_fraction: f64,
    pub ewr_fraction: f64,
    /// Long-term average basin outflow (km³/month).
    pub q_out_avg: f64,
    pub other: f64,
    pub flows: BoundaryFlows,
}

/// Compute the closed water balance of one basin for one month.
///
/// Fails with `FractionSum` before any computation if either fraction
/// mapping does not sum to one.
pub fn compute_monthly_balance(
    inputs: &BalanceInputs<'_>,
    categories: &CategoryMap,
    fractions: &UtilizedFlowFractions,
) -> Result<MonthlyBalance> {
    fractions.validate()?;
    let shape = inputs.lu.dim();
    for (name, array) in [
        ("p", inputs.p),
        ("etg", inputs.et_green),
        ("etb", inputs.et_blue),
        ("pixel_area", inputs.pixel_area),
        ("fractions", inputs.non_utilizable_fractions),
    ] {
        ensure_shape(name, array, shape)?;
    }

    let volume = |depth: &Array2<f64>| {
        mask_outside(depth_to_volume(depth, inputs.pixel_area), inputs.lu)
    };
    let p = volume(inputs.p);
    let et_green = volume(inputs.et_green);
    let et_blue = volume(inputs.et_blue);
    let et = &et_blue + &et_green;

    let p_total = nansum(&p);
    let et_total = nansum(&et);
    let flows = inputs.flows;
    let wb = water_balance(p_total, et_total, inputs.recycling_ratio, &flows);

    let non_recoverable = inputs.gray_water_fraction * (flows.q_outflow + flows.q_out_sw);
    let reserved_outflow_demand = inputs.q_out_avg * inputs.ewr_fraction;

    let landscape_et = categories.masked_sum(&et_green, inputs.lu);
    let incremental_et = categories.masked_sum(&et_blue, inputs.lu);
    let manmade = incremental_et.get(&Category::Managed).copied().unwrap_or(0.0);
    let natural: f64 = [Category::Protected, Category::Utilized, Category::Modified]
        .iter()
        .map(|c| incremental_et.get(c).copied().unwrap_or(0.0))
        .sum();
    let utilized_flow = utilized_flow(&incremental_et, inputs.other, non_recoverable, fractions)?;

    let net_inflow =
        wb.p_recycled + wb.p_advection + flows.q_in_sw + flows.q_in_gw + flows.q_in_desal + wb.ds;
    let consumed_water = landscape_et.values().sum::<f64>()
        + incremental_et.values().sum::<f64>()
        + inputs.other
        + non_recoverable;
    let non_consumed_water = net_inflow - consumed_water;

    let non_utilizable_outflow = non_consumed_water
        .min(non_utilizable(&p, &et, inputs.non_utilizable_fractions).max(0.0));
    let reserved_outflow_actual =
        (non_consumed_water - non_utilizable_outflow).min(reserved_outflow_demand);
    let utilizable_outflow =
        (non_consumed_water - non_utilizable_outflow - reserved_outflow_actual).max(0.0);

    log::debug!(
        "{}: P {:.4} ET {:.4} dS {:.4} utilizable {:.4} km3",
        inputs.date,
        p_total,
        et_total,
        wb.ds,
        utilizable_outflow
    );

    Ok(MonthlyBalance {
        date: inputs.date,
        p_total,
        et_total,
        p_recycled: wb.p_recycled,
        p_advection: wb.p_advection,
        et_advection: wb.et_advection,
        ds: wb.ds,
        non_recoverable,
        other: inputs.other,
        reserved_outflow_demand,
        reserved_outflow_actual,
        non_utilizable_outflow,
        utilizable_outflow,
        net_inflow,
        consumed_water,
        non_consumed_water,
        manmade,
        natural,
        landscape_et,
        incremental_et,
        utilized_flow,
        gray_water_fraction: inputs.gray_water_fraction,
        ewr_fraction: inputs.ewr_fraction,
        flows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    const EPS: f64 = 1e-9;

    fn month(y: i32, m: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, 1).unwrap()
    }

    fn balance_with_defaults(inputs: &BalanceInputs<'_>) -> Result<MonthlyBalance> {
        compute_monthly_balance(inputs, &CategoryMap::wa_plus(), &UtilizedFlowFractions::default())
    }

    #[test]
    fn test_water_balance_closure_without_recycling() {
        let flows = BoundaryFlows {
            q_outflow: 12.0,
            q_in_sw: 3.0,
            q_in_gw: 1.0,
            q_in_desal: 0.5,
            q_out_sw: 2.0,
            q_out_gw: 0.25,
        };
        let wb = water_balance(80.0, 55.0, 0.0, &flows);
        assert_eq!(wb.p_recycled, 0.0);
        let expected = 12.0 + 55.0 - 80.0 - 3.0 - 1.0 - 0.5 + 2.0 + 0.25;
        assert!((wb.ds - expected).abs() < EPS);
    }

    #[test]
    fn test_recycled_precipitation_is_capped() {
        let wb = water_balance(10.0, 500.0, 1.0, &BoundaryFlows::default());
        assert_eq!(wb.p_recycled, 10.0);
        assert_eq!(wb.p_advection, 0.0);
        assert_eq!(wb.et_advection, 490.0);
    }

    #[test]
    fn test_fraction_sum_is_enforced() {
        let mut fractions = UtilizedFlowFractions::default();
        fractions.other.insert(Category::Protected, 0.5);
        let result = utilized_flow(&CategoryValues::new(), 1.0, 1.0, &fractions);
        match result {
            Err(WaError::FractionSum { mapping, sum }) => {
                assert_eq!(mapping, "other");
                assert!((sum - 1.5).abs() < EPS);
            }
            other => panic!("expected FractionSum, got {other:?}"),
        }
    }

    #[test]
    fn test_utilized_flow_distributes_other_and_non_recoverable() {
        let incremental: CategoryValues = [(Category::Managed, 2.0), (Category::Modified, 1.0)]
            .into_iter()
            .collect();
        let mut fractions = UtilizedFlowFractions::default();
        fractions.non_recoverable = [(Category::Managed, 0.75), (Category::Utilized, 0.25)]
            .into_iter()
            .collect();
        let uf = utilized_flow(&incremental, 4.0, 8.0, &fractions).unwrap();
        assert!((uf[&Category::Managed] - (2.0 + 4.0 + 6.0)).abs() < EPS);
        assert!((uf[&Category::Utilized] - 2.0).abs() < EPS);
        assert!((uf[&Category::Modified] - 1.0).abs() < EPS);
        assert_eq!(uf[&Category::Protected], 0.0);
    }

    fn single_pixel_inputs<'a>(
        p: &'a Array2<f64>,
        etg: &'a Array2<f64>,
        etb: &'a Array2<f64>,
        lu: &'a Array2<f64>,
        area: &'a Array2<f64>,
        fractions: &'a Array2<f64>,
    ) -> BalanceInputs<'a> {
        BalanceInputs {
            date: month(2010, 1),
            p,
            et_green: etg,
            et_blue: etb,
            lu,
            pixel_area: area,
            non_utilizable_fractions: fractions,
            recycling_ratio: 0.1,
            gray_water_fraction: 0.0,
            ewr_fraction: 0.0,
            q_out_avg: 40.0,
            other: 0.0,
            flows: BoundaryFlows {
                q_outflow: 40.0,
                ..BoundaryFlows::default()
            },
        }
    }

    #[test]
    fn test_balanced_synthetic_month_closes() {
        // one pixel of 1e6 km² so that mm and km³ coincide
        let p = array![[100.0]];
        let etg = array![[40.0]];
        let etb = array![[20.0]];
        let lu = array![[60.0]];
        let area = array![[1e6]];
        let fractions = array![[0.0]];
        let inputs = single_pixel_inputs(&p, &etg, &etb, &lu, &area, &fractions);
        let balance = balance_with_defaults(&inputs).unwrap();
        assert!((balance.p_recycled - 6.0).abs() < EPS);
        assert!((balance.et_advection - 54.0).abs() < EPS);
        assert!((balance.p_advection - 94.0).abs() < EPS);
        assert!(balance.ds.abs() < EPS);
        assert!((balance.incremental_et[&Category::Managed] - 20.0).abs() < EPS);
        assert!((balance.landscape_et[&Category::Managed] - 40.0).abs() < EPS);
        assert!((balance.manmade - 20.0).abs() < EPS);
        // net inflow 100, consumed 60
        assert!((balance.non_consumed_water - 40.0).abs() < EPS);
        assert!((balance.utilizable_outflow - 40.0).abs() < EPS);
    }

    #[test]
    fn test_outflow_allocation_clamps() {
        let p = array![[100.0, 50.0]];
        let etg = array![[40.0, 10.0]];
        let etb = array![[20.0, f64::NAN]];
        let lu = array![[60.0, 3.0]];
        let area = array![[1e6, 1e6]];
        let fractions = array![[1.0, 1.0]];
        let mut inputs = single_pixel_inputs(&p, &etg, &etb, &lu, &area, &fractions);
        inputs.ewr_fraction = 0.5;
        inputs.flows.q_outflow = 0.0;
        let balance = balance_with_defaults(&inputs).unwrap();
        // a NaN blue pixel makes that pixel's ET NaN
        assert!((balance.et_total - 60.0).abs() < EPS);
        assert!(balance.non_utilizable_outflow <= balance.non_consumed_water);
        assert!(balance.non_utilizable_outflow >= 0.0 || balance.non_consumed_water < 0.0);
        assert!(balance.reserved_outflow_actual <= balance.reserved_outflow_demand);
        assert!(balance.utilizable_outflow >= 0.0);
    }

    #[test]
    fn test_utilizable_never_negative_when_overconsumed() {
        let p = array![[10.0]];
        let etg = array![[40.0]];
        let etb = array![[60.0]];
        let lu = array![[60.0]];
        let area = array![[1e6]];
        let fractions = array![[0.5]];
        let mut inputs = single_pixel_inputs(&p, &etg, &etb, &lu, &area, &fractions);
        inputs.recycling_ratio = 1.0;
        inputs.gray_water_fraction = 0.3;
        inputs.ewr_fraction = 0.8;
        inputs.other = 50.0;
        let balance = balance_with_defaults(&inputs).unwrap();
        assert_eq!(balance.p_recycled, 10.0);
        assert!(balance.non_consumed_water < 0.0);
        assert_eq!(balance.utilizable_outflow, 0.0);
    }

    #[test]
    fn test_shape_mismatch_is_reported() {
        let p = array![[1.0, 2.0]];
        let etg = array![[1.0]];
        let etb = array![[1.0]];
        let lu = array![[1.0]];
        let area = array![[1.0]];
        let fractions = array![[0.0]];
        let inputs = single_pixel_inputs(&p, &etg, &etb, &lu, &area, &fractions);
        assert!(matches!(
            balance_with_defaults(&inputs),
            Err(WaError::ShapeMismatch { .. })
        ));
    }
}
