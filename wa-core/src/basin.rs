//! Basin metadata, subbasins and the routing graph.

use crate::error::{Result, WaError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Subbasin id standing for everything outside the basin.
pub const OUTSIDE: u32 = 0;

/// A subbasin and the files describing its boundary fluxes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subbasin {
    pub name: String,
    pub mask: PathBuf,
    /// `date;value` discharge files (m³/s) entering from outside the basin.
    #[serde(default)]
    pub inflow_files: Vec<PathBuf>,
    /// `date;value` discharge files (m³/s) exported out of the subbasin.
    #[serde(default)]
    pub transfer_files: Vec<PathBuf>,
}

/// A crop and the file listing its growing seasons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropSeason {
    pub season_file: PathBuf,
    pub crop: String,
    pub category: String,
    pub subcategory: String,
    pub lu_class: i32,
}

/// Search bounds of the seasonal sw/gw split model, ordered (alpha, beta, theta).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GraceSplitBounds {
    pub lower: [f64; 3],
    pub upper: [f64; 3],
}

impl Default for GraceSplitBounds {
    fn default() -> Self {
        GraceSplitBounds {
            lower: [0.0, 0.0, 1.0],
            upper: [1.0, 1.0, 12.0],
        }
    }
}

impl GraceSplitBounds {
    pub fn validate(&self) -> Result<()> {
        for i in 0..3 {
            if !(self.lower[i] <= self.upper[i]) {
                return Err(WaError::Config(format!(
                    "grace_split_alpha_bounds: lower {:?} exceeds upper {:?}",
                    self.lower, self.upper
                )));
            }
        }
        Ok(())
    }
}

/// Basin-independent static rasters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalData {
    pub equiped_sw_irrigation: Option<PathBuf>,
    pub wpl_tif: Option<PathBuf>,
    pub environ_water_req: Option<PathBuf>,
    pub population_tif: Option<PathBuf>,
    pub cattle: Option<PathBuf>,
    pub dem: Option<PathBuf>,
    pub dir: Option<PathBuf>,
    pub root_depth: Option<PathBuf>,
}

fn default_recycling_ratio() -> f64 {
    0.02
}

fn default_start_month() -> u32 {
    1
}

fn default_fraction_xs() -> [f64; 4] {
    [4.0, 25.0, 4.0, 25.0]
}

/// One basin to account for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasinMetadata {
    pub name: String,
    pub id: u32,
    /// Land-use raster; also the reference grid of the basin.
    pub lu: PathBuf,
    pub full_basin_mask: PathBuf,
    pub masks: BTreeMap<u32, Subbasin>,
    #[serde(default = "default_recycling_ratio")]
    pub recycling_ratio: f64,
    #[serde(default = "default_start_month")]
    pub water_year_start_month: u32,
    #[serde(default)]
    pub lu_based_supply_split: bool,
    #[serde(default)]
    pub grace_supply_split: bool,
    /// `date;value` basin-average GRACE storage anomaly (mm).
    #[serde(default)]
    pub grace: Option<PathBuf>,
    #[serde(default)]
    pub grace_split_alpha_bounds: GraceSplitBounds,
    /// Slope (%) and elevation-rank (%) thresholds of the non-utilizable fraction map.
    #[serde(default = "default_fraction_xs")]
    pub fraction_xs: [f64; 4],
    pub dico_in: BTreeMap<u32, Vec<u32>>,
    pub dico_out: BTreeMap<u32, Vec<u32>>,
    #[serde(default)]
    pub crops: Vec<CropSeason>,
}

impl BasinMetadata {
    /// Check the invariants that do not need any file access.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.recycling_ratio) {
            return Err(WaError::Config(format!(
                "{}: recycling_ratio {} is outside [0, 1]",
                self.name, self.recycling_ratio
            )));
        }
        if !(1..=12).contains(&self.water_year_start_month) {
            return Err(WaError::Config(format!(
                "{}: water_year_start_month {} is not a month",
                self.name, self.water_year_start_month
            )));
        }
        if self.masks.contains_key(&OUTSIDE) {
            return Err(WaError::Config(format!(
                "{}: subbasin id 0 is reserved for the basin boundary",
                self.name
            )));
        }
        if self.grace_supply_split && self.grace.is_none() {
            return Err(WaError::Config(format!(
                "{}: grace_supply_split is set but no GRACE file is given",
                self.name
            )));
        }
        self.grace_split_alpha_bounds.validate()?;
        let routing = self.routing()?;
        let routed: BTreeSet<u32> = routing.subbasins().collect();
        let masked: BTreeSet<u32> = self.masks.keys().copied().collect();
        if routed != masked {
            return Err(WaError::Routing(format!(
                "{}: routed subbasins {:?} differ from masked subbasins {:?}",
                self.name, routed, masked
            )));
        }
        routing.topological_order()?;
        Ok(())
    }

    pub fn routing(&self) -> Result<RoutingGraph> {
        RoutingGraph::new(self.dico_in.clone(), self.dico_out.clone())
    }
}

/// Directed subbasin adjacency, with [`OUTSIDE`] as source and sink.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingGraph {
    dico_in: BTreeMap<u32, Vec<u32>>,
    dico_out: BTreeMap<u32, Vec<u32>>,
}

impl RoutingGraph {
    /// Build a graph, checking that `dico_in` and `dico_out` are inverses.
    pub fn new(
        dico_in: BTreeMap<u32, Vec<u32>>,
        dico_out: BTreeMap<u32, Vec<u32>>,
    ) -> Result<Self> {
        if dico_in.contains_key(&OUTSIDE) || dico_out.contains_key(&OUTSIDE) {
            return Err(WaError::Routing("subbasin id 0 cannot have its own entry".into()));
        }
        let ins: BTreeSet<u32> = dico_in.keys().copied().collect();
        let outs: BTreeSet<u32> = dico_out.keys().copied().collect();
        if ins != outs {
            return Err(WaError::Routing(format!(
                "dico_in covers {ins:?} but dico_out covers {outs:?}"
            )));
        }
        for (id, upstream) in &dico_in {
            for up in upstream.iter().filter(|u| **u != OUTSIDE) {
                let downstream = dico_out.get(up).ok_or_else(|| {
                    WaError::Routing(format!("subbasin {id} lists unknown upstream {up}"))
                })?;
                if !downstream.contains(id) {
                    return Err(WaError::Routing(format!(
                        "{up} is upstream of {id} in dico_in but dico_out[{up}] = {downstream:?}"
                    )));
                }
            }
        }
        for (id, downstream) in &dico_out {
            for down in downstream.iter().filter(|d| **d != OUTSIDE) {
                let upstream = dico_in.get(down).ok_or_else(|| {
                    WaError::Routing(format!("subbasin {id} lists unknown downstream {down}"))
                })?;
                if !upstream.contains(id) {
                    return Err(WaError::Routing(format!(
                        "{down} is downstream of {id} in dico_out \
                         but dico_in[{down}] = {upstream:?}"
                    )));
                }
            }
        }
        Ok(RoutingGraph { dico_in, dico_out })
    }

    pub fn subbasins(&self) -> impl Iterator<Item = u32> + '_ {
        self.dico_in.keys().copied()
    }

    /// Real subbasins draining into `id`.
    pub fn upstream(&self, id: u32) -> impl Iterator<Item = u32> + '_ {
        self.dico_in
            .get(&id)
            .into_iter()
            .flatten()
            .copied()
            .filter(|u| *u != OUTSIDE)
    }

    /// All receivers of `id`, including [`OUTSIDE`].
    pub fn downstream(&self, id: u32) -> &[u32] {
        self.dico_out.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// True when the subbasin receives water from outside the basin.
    pub fn is_entry(&self, id: u32) -> bool {
        self.dico_in.get(&id).is_some_and(|u| u.contains(&OUTSIDE))
    }

    /// True when the subbasin drains (at least partly) out of the basin.
    pub fn is_exit(&self, id: u32) -> bool {
        self.downstream(id).contains(&OUTSIDE)
    }

    /// Subbasins ordered so that every subbasin follows all of its upstreams.
    ///
    /// Ties are broken by id, so the order does not depend on how the
    /// configuration lists its entries.
    pub fn topological_order(&self) -> Result<Vec<u32>> {
        let mut pending: BTreeMap<u32, usize> = self
            .dico_in
            .keys()
            .map(|id| (*id, self.upstream(*id).count()))
            .collect();
        let mut ready: BTreeSet<u32> = pending
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(pending.len());
        while let Some(id) = ready.pop_first() {
            pending.remove(&id);
            order.push(id);
            for down in self.downstream(id).iter().filter(|d| **d != OUTSIDE) {
                if let Some(n) = pending.get_mut(down) {
                    *n -= 1;
                    if *n == 0 {
                        ready.insert(*down);
                    }
                }
            }
        }
        if pending.is_empty() {
            Ok(order)
        } else {
            Err(WaError::RoutingCycle(pending.into_keys().collect()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(ins: &[(u32, &[u32])], outs: &[(u32, &[u32])]) -> Result<RoutingGraph> {
        RoutingGraph::new(
            ins.iter().map(|(k, v)| (*k, v.to_vec())).collect(),
            outs.iter().map(|(k, v)| (*k, v.to_vec())).collect(),
        )
    }

    #[test]
    fn test_two_subbasin_chain_order() {
        let g = graph(&[(1, &[]), (2, &[1])], &[(1, &[2]), (2, &[0])]).unwrap();
        assert_eq!(g.topological_order().unwrap(), vec![1, 2]);
        assert!(g.is_exit(2));
        assert!(!g.is_exit(1));
        assert_eq!(g.upstream(2).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_order_independent_of_declaration() {
        let a = graph(
            &[(3, &[1, 2]), (1, &[0]), (2, &[])],
            &[(2, &[3]), (3, &[0]), (1, &[3])],
        )
        .unwrap();
        let b = graph(
            &[(2, &[]), (1, &[0]), (3, &[2, 1])],
            &[(1, &[3]), (2, &[3]), (3, &[0])],
        )
        .unwrap();
        assert_eq!(a.topological_order().unwrap(), vec![1, 2, 3]);
        assert!(a.is_entry(1) && !a.is_entry(2));
        assert_eq!(a.topological_order().unwrap(), b.topological_order().unwrap());
    }

    #[test]
    fn test_cycle_is_rejected() {
        let g = graph(&[(1, &[2]), (2, &[1])], &[(1, &[2]), (2, &[1])]).unwrap();
        match g.topological_order() {
            Err(WaError::RoutingCycle(ids)) => assert_eq!(ids, vec![1, 2]),
            other => panic!("expected a cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_inconsistent_dicos_rejected() {
        assert!(matches!(
            graph(&[(1, &[]), (2, &[1])], &[(1, &[0]), (2, &[0])]),
            Err(WaError::Routing(_))
        ));
        assert!(matches!(
            graph(&[(1, &[])], &[(1, &[0]), (2, &[0])]),
            Err(WaError::Routing(_))
        ));
        assert!(matches!(
            graph(&[(0, &[])], &[(0, &[])]),
            Err(WaError::Routing(_))
        ));
    }

    fn basin_json() -> &'static str {
        r#"{
            "name": "Litani",
            "id": 1,
            "lu": "lu.tif",
            "full_basin_mask": "mask.tif",
            "masks": {
                "1": {"name": "Upper", "mask": "m1.tif"},
                "2": {"name": "Lower", "mask": "m2.tif", "inflow_files": ["in.csv"]}
            },
            "water_year_start_month": 10,
            "dico_in": {"1": [], "2": [1]},
            "dico_out": {"1": [2], "2": [0]}
        }"#
    }

    #[test]
    fn test_basin_metadata_from_json() {
        let basin: BasinMetadata = serde_json::from_str(basin_json()).unwrap();
        assert_eq!(basin.recycling_ratio, 0.02);
        assert_eq!(basin.fraction_xs, [4.0, 25.0, 4.0, 25.0]);
        assert_eq!(basin.masks[&2].inflow_files.len(), 1);
        basin.validate().unwrap();
    }

    #[test]
    fn test_basin_metadata_validation() {
        let mut basin: BasinMetadata = serde_json::from_str(basin_json()).unwrap();
        basin.recycling_ratio = 1.5;
        assert!(matches!(basin.validate(), Err(WaError::Config(_))));

        let mut basin: BasinMetadata = serde_json::from_str(basin_json()).unwrap();
        basin.masks.remove(&2);
        assert!(matches!(basin.validate(), Err(WaError::Routing(_))));

        let mut basin: BasinMetadata = serde_json::from_str(basin_json()).unwrap();
        basin.grace_supply_split = true;
        assert!(matches!(basin.validate(), Err(WaError::Config(_))));
    }
}
