//! Engine registry and the `run` command.
//!
//! The configuration names its engine by key; keys resolve to statically
//! known factories at startup, and an unknown key fails before any basin runs.

use crate::config::RunConfig;
use crate::pipeline::{BatchReport, Pipeline};
use crate::stage::Stage;
use anyhow::Context;
use std::path::{Path, PathBuf};
use wa_core::geotiff::GeoTiffAdapter;
use wa_core::RasterAdapter;
use wa_store::CheckpointStore;

pub trait Engine {
    fn name(&self) -> &'static str;

    /// Process every basin of the configuration.
    fn run(&self, config: &RunConfig) -> anyhow::Result<BatchReport>;
}

type Factory = fn() -> Box<dyn Engine>;

const REGISTRY: [(&str, Factory); 1] = [("hyperloop", hyperloop)];

fn hyperloop() -> Box<dyn Engine> {
    Box::new(HyperloopEngine::new(Box::new(GeoTiffAdapter)))
}

pub fn engine_names() -> impl Iterator<Item = &'static str> {
    REGISTRY.iter().map(|(name, _)| *name)
}

pub fn resolve(key: &str) -> anyhow::Result<Box<dyn Engine>> {
    REGISTRY
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, factory)| factory())
        .ok_or_else(|| {
            anyhow::anyhow!(
                "unknown engine '{}' (known: {})",
                key,
                engine_names().collect::<Vec<_>>().join(", ")
            )
        })
}

/// Sheet 4/6, 2, 3, 5, 1 and 7 in sequence, with SQLite checkpoints.
pub struct HyperloopEngine {
    rasters: Box<dyn RasterAdapter>,
}

impl HyperloopEngine {
    pub fn new(rasters: Box<dyn RasterAdapter>) -> Self {
        HyperloopEngine { rasters }
    }
}

impl Engine for HyperloopEngine {
    fn name(&self) -> &'static str {
        "hyperloop"
    }

    fn run(&self, config: &RunConfig) -> anyhow::Result<BatchReport> {
        let path = config.checkpoint_path();
        let store = CheckpointStore::open(&path)
            .with_context(|| format!("opening checkpoint store {}", path.display()))?;
        let pipeline = Pipeline::new(config, self.rasters.as_ref(), &store);
        Ok(pipeline.run_batch())
    }
}

/// Load a configuration, apply command-line overrides and run its engine.
pub fn run_config(
    config_path: &Path,
    output_dir: Option<PathBuf>,
    stages: &[Stage],
) -> anyhow::Result<()> {
    let mut config = RunConfig::from_path(config_path)?;
    if let Some(dir) = output_dir {
        config.output_dir = dir;
    }
    if !stages.is_empty() {
        config.only_stages(stages);
    }
    let engine = resolve(&config.engine)?;
    log::info!(
        "running engine {} for {} basins into {}",
        engine.name(),
        config.basins.len(),
        config.output_dir.display()
    );
    let report = engine.run(&config)?;
    for done in &report.completed {
        log::info!(
            "{}: {} stages, {} account tables{}",
            done.basin,
            done.stages_run.len(),
            done.accounts_written,
            if done.degraded { " (degraded resume)" } else { "" }
        );
    }
    if !report.failed.is_empty() {
        anyhow::bail!(
            "{} of {} basins failed",
            report.failed.len(),
            config.basins.len()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_engine() {
        let engine = resolve("hyperloop").unwrap();
        assert_eq!(engine.name(), "hyperloop");
    }

    #[test]
    fn test_unknown_engine_fails_fast() {
        let err = resolve("engine2").err().unwrap();
        assert!(err.to_string().contains("hyperloop"));
    }
}
