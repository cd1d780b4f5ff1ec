use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Routed volumes of one subbasin for one month, in km³.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubbasinFlow {
    pub id: u32,
    pub name: String,
    /// Sum of the outflow shares received from upstream subbasins.
    pub upstream_inflow: f64,
    /// Inflow read from the subbasin's inflow files.
    pub external_inflow: f64,
    pub runoff: f64,
    pub supply_sw: f64,
    pub return_sw: f64,
    /// Positive when water is exported out of the subbasin.
    pub transfer: f64,
    pub outflow: f64,
}

/// Sheet 5 routing result of the whole basin for one month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasinFlows {
    pub date: NaiveDate,
    pub subbasins: Vec<SubbasinFlow>,
    /// External inflow into the basin.
    pub inflow: f64,
    /// Outflow leaving the basin through its exits.
    pub outflow: f64,
    /// Net interbasin transfer, positive for exports.
    pub transfer: f64,
}

impl BasinFlows {
    pub fn subbasin(&self, id: u32) -> Option<&SubbasinFlow> {
        self.subbasins.iter().find(|s| s.id == id)
    }
}

/// Parameters of the seasonal surface water supply fraction
/// `alpha + beta * cos(2π (month - theta) / 12)`, clipped to [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SupplySplitFit {
    pub alpha: f64,
    pub beta: f64,
    pub theta: f64,
    /// Sum of squared errors against the GRACE anomaly at the optimum.
    pub sse: f64,
}

impl SupplySplitFit {
    pub fn sw_fraction(&self, month: u32) -> f64 {
        sw_fraction(self.alpha, self.beta, self.theta, month)
    }
}

/// Surface water share of supply for a calendar month (1-12).
pub fn sw_fraction(alpha: f64, beta: f64, theta: f64, month: u32) -> f64 {
    let phase = 2.0 * std::f64::consts::PI * (month as f64 - theta) / 12.0;
    (alpha + beta * phase.cos()).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sw_fraction_peaks_at_theta() {
        assert!((sw_fraction(0.5, 0.3, 7.0, 7) - 0.8).abs() < 1e-12);
        assert!((sw_fraction(0.5, 0.3, 7.0, 1) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_sw_fraction_is_clipped() {
        assert_eq!(sw_fraction(0.9, 0.5, 1.0, 1), 1.0);
        assert_eq!(sw_fraction(0.1, 0.5, 1.0, 7), 0.0);
    }
}
