use crate::category::CategoryValues;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Inflow and outflow terms entering the basin-scale balance, in km³/month.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundaryFlows {
    pub q_outflow: f64,
    pub q_in_sw: f64,
    pub q_in_gw: f64,
    pub q_in_desal: f64,
    pub q_out_sw: f64,
    pub q_out_gw: f64,
}

/// Closed water balance of one basin for one month.
///
/// Volumes are km³/month. Created once by the balance engine and never
/// modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyBalance {
    pub date: NaiveDate,
    pub p_total: f64,
    pub et_total: f64,
    pub p_recycled: f64,
    pub p_advection: f64,
    pub et_advection: f64,
    pub ds: f64,
    pub non_recoverable: f64,
    pub other: f64,
    pub reserved_outflow_demand: f64,
    pub reserved_outflow_actual: f64,
    pub non_utilizable_outflow: f64,
    pub utilizable_outflow: f64,
    pub net_inflow: f64,
    pub consumed_water: f64,
    pub non_consumed_water: f64,
    pub manmade: f64,
    pub natural: f64,
    pub landscape_et: CategoryValues,
    pub incremental_et: CategoryValues,
    pub utilized_flow: CategoryValues,
    pub gray_water_fraction: f64,
    pub ewr_fraction: f64,
    pub flows: BoundaryFlows,
}
