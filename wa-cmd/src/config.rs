//! Run configuration: basins, static data, input folders and stage switches.

use crate::stage::Stage;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use wa_core::aligner::DateStrategy;
use wa_core::{BasinMetadata, CategoryMap, GlobalData, VariableKey, WaError};
use wa_sheets::{UtilizedFlowFractions, YieldSplit};

pub const DEFAULT_ENGINE: &str = "hyperloop";

fn default_engine() -> String {
    DEFAULT_ENGINE.to_string()
}

/// One basin and where its raw monthly rasters live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasinConfig {
    pub metadata: BasinMetadata,
    /// Raw input folder per variable, e.g. `"p": "/data/litani/p"`.
    pub data: BTreeMap<VariableKey, PathBuf>,
    /// How dates are read from the raw file names.
    #[serde(default)]
    pub dates: DateStrategy,
}

impl BasinConfig {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub output_dir: PathBuf,
    #[serde(default = "default_engine")]
    pub engine: String,
    pub basins: Vec<BasinConfig>,
    #[serde(default)]
    pub global_data: GlobalData,
    /// `false` skips a stage and loads its checkpoint instead; absent stages run.
    #[serde(default)]
    pub steps: BTreeMap<Stage, bool>,
    /// Defaults to `<output_dir>/checkpoints.sqlite`.
    #[serde(default)]
    pub checkpoint_db: Option<PathBuf>,
    /// Land-use classes per category; the WA+ classes when absent.
    #[serde(default)]
    pub categories: Option<CategoryMap>,
    #[serde(default)]
    pub utilized_flow_fractions: UtilizedFlowFractions,
    #[serde(default)]
    pub yield_split: YieldSplit,
}

impl RunConfig {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading run configuration {}", path.display()))?;
        let config: RunConfig = serde_json::from_str(&text)
            .with_context(|| format!("parsing run configuration {}", path.display()))?;
        config.validate()?;
        log::info!(
            "loaded {} basins from {}",
            config.basins.len(),
            path.display()
        );
        Ok(config)
    }

    /// Checks that span basins; per-basin problems are reported when the basin runs.
    pub fn validate(&self) -> Result<(), WaError> {
        if self.basins.is_empty() {
            return Err(WaError::Config("no basins configured".to_string()));
        }
        let mut seen = BTreeSet::new();
        for basin in &self.basins {
            if !seen.insert(basin.name()) {
                return Err(WaError::Config(format!(
                    "basin name '{}' is used twice; outputs and checkpoints would collide",
                    basin.name()
                )));
            }
        }
        Ok(())
    }

    pub fn stage_enabled(&self, stage: Stage) -> bool {
        self.steps.get(&stage).copied().unwrap_or(true)
    }

    /// Run exactly `stages`; every other stage is skipped.
    pub fn only_stages(&mut self, stages: &[Stage]) {
        self.steps = Stage::ALL
            .into_iter()
            .map(|s| (s, stages.contains(&s)))
            .collect();
    }

    pub fn categories(&self) -> CategoryMap {
        self.categories.clone().unwrap_or_else(CategoryMap::wa_plus)
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.checkpoint_db
            .clone()
            .unwrap_or_else(|| self.output_dir.join("checkpoints.sqlite"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "output_dir": "/tmp/wa_out",
        "basins": [{
            "metadata": {
                "name": "Litani",
                "id": 7,
                "lu": "/data/litani/lu.tif",
                "full_basin_mask": "/data/litani/mask.tif",
                "masks": {"1": {"name": "Upper", "mask": "/data/litani/mask_1.tif"}},
                "dico_in": {"1": [0]},
                "dico_out": {"1": [0]}
            },
            "data": {"p": "/data/litani/p", "et": "/data/litani/et"},
            "dates": {"fixed": {"year": [-11, -7], "month": [-6, -4]}}
        }],
        "steps": {"reproject": false}
    }"#;

    #[test]
    fn test_parse_with_defaults() {
        let config: RunConfig = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(config.engine, DEFAULT_ENGINE);
        assert!(!config.stage_enabled(Stage::Reproject));
        assert!(config.stage_enabled(Stage::Sheet1));
        assert_eq!(
            config.checkpoint_path(),
            PathBuf::from("/tmp/wa_out/checkpoints.sqlite")
        );
        let basin = &config.basins[0];
        assert_eq!(basin.metadata.recycling_ratio, 0.02);
        assert_eq!(basin.data.len(), 2);
        assert!(basin.data.contains_key(&VariableKey::P));
        assert!(matches!(basin.dates, DateStrategy::Fixed(_)));
        assert_eq!(config.utilized_flow_fractions, UtilizedFlowFractions::default());
        config.validate().unwrap();
    }

    #[test]
    fn test_only_stages() {
        let mut config: RunConfig = serde_json::from_str(SAMPLE).unwrap();
        config.only_stages(&[Stage::Sheet1, Stage::Sheet7]);
        let enabled: Vec<Stage> = Stage::ALL
            .into_iter()
            .filter(|s| config.stage_enabled(*s))
            .collect();
        assert_eq!(enabled, vec![Stage::Sheet1, Stage::Sheet7]);
    }

    #[test]
    fn test_duplicate_basin_names_rejected() {
        let mut config: RunConfig = serde_json::from_str(SAMPLE).unwrap();
        config.basins.push(config.basins[0].clone());
        assert!(matches!(config.validate(), Err(WaError::Config(_))));
    }
}
