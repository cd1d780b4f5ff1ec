//! Basin pipeline: reproject, then the sheets in order, checkpointing after
//! every stage.
//!
//! Basins run one after another. A failing basin is reported with the stage
//! and cause and the batch moves on to the next one. A disabled stage passes
//! the state of the stage before it on; its checkpoint is only read when the
//! run has no state yet.

use crate::config::{BasinConfig, RunConfig};
use crate::stage::Stage;
use anyhow::Context;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use wa_core::aligner::{scan_series, DateStrategy};
use wa_core::account::write_yearly_rollups;
use wa_core::{
    AccountFile, AlignedSeries, CategoryMap, CompleteData, RasterAdapter, VariableKey,
    WaterYearCalendar,
};
use wa_sheets::{sheet1, sheet2, sheet3, sheet46, sheet5, sheet7, SheetContext, SheetOutput};
use wa_store::CheckpointStore;

/// A basin that went through every enabled stage.
#[derive(Debug, Clone, PartialEq)]
pub struct BasinSummary {
    pub basin: String,
    pub stages_run: Vec<Stage>,
    pub accounts_written: usize,
    /// Input was rebuilt from folder scans because a checkpoint was missing.
    pub degraded: bool,
}

/// A basin that stopped early. `stage` is `None` when its configuration was
/// rejected before any stage started.
#[derive(Debug, Clone, PartialEq)]
pub struct BasinFailure {
    pub basin: String,
    pub stage: Option<Stage>,
    pub cause: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub completed: Vec<BasinSummary>,
    pub failed: Vec<BasinFailure>,
}

pub struct Pipeline<'a> {
    config: &'a RunConfig,
    rasters: &'a dyn RasterAdapter,
    store: &'a CheckpointStore,
    categories: CategoryMap,
}

fn failure(basin: &str, stage: Option<Stage>, error: anyhow::Error) -> BasinFailure {
    BasinFailure {
        basin: basin.to_string(),
        stage,
        cause: format!("{error:#}"),
    }
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a RunConfig,
        rasters: &'a dyn RasterAdapter,
        store: &'a CheckpointStore,
    ) -> Self {
        Pipeline {
            config,
            rasters,
            store,
            categories: config.categories(),
        }
    }

    pub fn run_batch(&self) -> BatchReport {
        let mut report = BatchReport::default();
        for basin in &self.config.basins {
            match self.run_basin(basin) {
                Ok(summary) => report.completed.push(summary),
                Err(failed) => {
                    log::error!(
                        "{}: failed at {}: {}",
                        failed.basin,
                        failed.stage.map_or("configuration", |s| s.as_str()),
                        failed.cause
                    );
                    report.failed.push(failed);
                }
            }
        }
        log::info!(
            "batch done: {} basins completed, {} failed",
            report.completed.len(),
            report.failed.len()
        );
        report
    }

    pub fn run_basin(&self, basin: &BasinConfig) -> Result<BasinSummary, BasinFailure> {
        let name = basin.name();
        basin
            .metadata
            .validate()
            .map_err(|e| failure(name, None, e.into()))?;
        let calendar = WaterYearCalendar::new(basin.metadata.water_year_start_month)
            .ok_or_else(|| {
                failure(
                    name,
                    None,
                    anyhow::anyhow!("water_year_start_month is not a month"),
                )
            })?;
        let ctx = SheetContext::new(
            &basin.metadata,
            &self.config.global_data,
            self.rasters,
            &self.categories,
            &self.config.output_dir,
        );

        let mut summary = BasinSummary {
            basin: name.to_string(),
            stages_run: Vec::new(),
            accounts_written: 0,
            degraded: false,
        };
        let mut state: Option<CompleteData> = None;
        for stage in Stage::ALL {
            if !self.config.stage_enabled(stage) {
                if state.is_some() {
                    log::info!("{}: {} skipped, carrying state forward", name, stage);
                } else {
                    state = self.skip(name, stage);
                }
                continue;
            }
            let input = match state.take() {
                Some(data) => data,
                None => self
                    .restore(&ctx, basin, stage, &mut summary)
                    .map_err(|e| failure(name, Some(stage), e))?,
            };
            log::info!("{}: running {}", name, stage);
            let output = self
                .run_stage(&ctx, basin, stage, input)
                .map_err(|e| failure(name, Some(stage), e))?;
            summary.accounts_written += write_accounts(&ctx.output_dir, &output.accounts, &calendar)
                .map_err(|e| failure(name, Some(stage), e))?;
            self.store
                .save(name, stage.as_str(), &output.data)
                .map_err(|e| failure(name, Some(stage), e.into()))?;
            summary.stages_run.push(stage);
            state = Some(output.data);
        }
        Ok(summary)
    }

    /// Load the checkpoint of a skipped stage, if there is a usable one.
    fn skip(&self, basin: &str, stage: Stage) -> Option<CompleteData> {
        match self.store.load(basin, stage.as_str()) {
            Ok(Some(data)) => {
                log::info!("{}: {} skipped, checkpoint loaded", basin, stage);
                Some(data)
            }
            Ok(None) => {
                log::info!("{}: {} skipped, no checkpoint", basin, stage);
                None
            }
            Err(e) => {
                log::warn!("{}: {} skipped, checkpoint unusable: {}", basin, stage, e);
                None
            }
        }
    }

    /// Input of the first stage that runs: the checkpoint it resumes from, or
    /// the raw scans for the first stage. A missing checkpoint degrades to
    /// folder scans instead of failing.
    fn restore(
        &self,
        ctx: &SheetContext<'_>,
        basin: &BasinConfig,
        stage: Stage,
        summary: &mut BasinSummary,
    ) -> anyhow::Result<CompleteData> {
        let Some(from) = stage.resume_from() else {
            return scan_inputs(basin);
        };
        match self.store.load(basin.name(), from.as_str()) {
            Ok(Some(data)) => {
                log::info!("{}: {} resumes from the {} checkpoint", basin.name(), stage, from);
                return Ok(data);
            }
            Ok(None) => log::warn!(
                "{}: no {} checkpoint for {}, rebuilding input from folder scans",
                basin.name(),
                from,
                stage
            ),
            Err(e) => log::warn!(
                "{}: {} checkpoint unusable for {} ({}), rebuilding input from folder scans",
                basin.name(),
                from,
                stage,
                e
            ),
        }
        summary.degraded = true;
        rescan(&ctx.output_dir, basin)
    }

    fn run_stage(
        &self,
        ctx: &SheetContext<'_>,
        basin: &BasinConfig,
        stage: Stage,
        data: CompleteData,
    ) -> anyhow::Result<SheetOutput> {
        let output = match stage {
            Stage::Reproject => reproject(ctx, basin, data)?,
            Stage::Sheet46 => sheet46::build(ctx, data)?,
            Stage::Sheet2 => sheet2::build(ctx, data)?,
            Stage::Sheet3 => sheet3::build(ctx, data, self.config.yield_split)?,
            Stage::Sheet5 => sheet5::build(ctx, data)?,
            Stage::Sheet1 => sheet1::build(ctx, data, &self.config.utilized_flow_fractions)?,
            Stage::Sheet7 => sheet7::build(ctx, data)?,
        };
        Ok(output)
    }
}

/// Scan every configured raw folder.
pub fn scan_inputs(basin: &BasinConfig) -> anyhow::Result<CompleteData> {
    let mut data = CompleteData::default();
    for (key, folder) in &basin.data {
        if !folder.is_dir() {
            anyhow::bail!(
                "{}: input folder for '{}' does not exist: {}",
                basin.name(),
                key,
                folder.display()
            );
        }
        let series = scan_series(folder, &basin.dates)
            .with_context(|| format!("scanning '{}' in {}", key, folder.display()))?;
        log::info!(
            "{}: {} has {} months in {}",
            basin.name(),
            key,
            series.len(),
            folder.display()
        );
        data = data.with_series(*key, series);
    }
    Ok(data)
}

/// Rebuild basin data from whatever is on disk: written outputs under
/// `<basin output>/data/<variable>` where present, the raw folders otherwise.
pub fn rescan(basin_output: &Path, basin: &BasinConfig) -> anyhow::Result<CompleteData> {
    let data_dir = basin_output.join("data");
    let mut data = CompleteData::default();
    for key in VariableKey::all() {
        let written = data_dir.join(key.as_str());
        let mut attempts: Vec<(PathBuf, DateStrategy)> = Vec::new();
        if written.is_dir() {
            attempts.push((written.clone(), basin.dates));
            attempts.push((written, DateStrategy::AutoDetect { strict: true }));
        }
        if let Some(raw) = basin.data.get(&key) {
            attempts.push((raw.clone(), basin.dates));
        }
        let found = attempts
            .iter()
            .find_map(|(folder, strategy)| scan_series(folder, strategy).ok());
        match found {
            Some(series) => data = data.with_series(key, series),
            None if !attempts.is_empty() && key != VariableKey::Fractions => {
                log::warn!("{}: nothing usable found for '{}'", basin.name(), key)
            }
            None => {}
        }
    }

    let fractions = sheet2::fraction_map_path(basin_output);
    if !data.contains(VariableKey::Fractions) && fractions.is_file() {
        if let Ok(p) = data.series(VariableKey::P) {
            let pairs = p.dates().iter().map(|d| (fractions.clone(), *d)).collect();
            let series = AlignedSeries::from_pairs(pairs)?;
            data = data.with_series(VariableKey::Fractions, series);
        }
    }
    if data.series.is_empty() {
        anyhow::bail!("{}: no input folders could be scanned", basin.name());
    }
    log::info!(
        "{}: rebuilt {} series from folder scans",
        basin.name(),
        data.series.len()
    );
    Ok(data)
}

/// Resample every raw series onto the land-use grid, under
/// `<basin output>/data/<variable>/` with unchanged file names.
pub fn reproject(
    ctx: &SheetContext<'_>,
    basin: &BasinConfig,
    mut data: CompleteData,
) -> anyhow::Result<SheetOutput> {
    for key in basin.data.keys() {
        let Ok(series) = data.series(*key) else {
            continue;
        };
        let target = ctx.output_dir.join("data").join(key.as_str());
        let written = ctx
            .rasters
            .match_to_reference(&basin.metadata.lu, series.files(), &target)
            .with_context(|| format!("reprojecting '{key}'"))?;
        let pairs = written.into_iter().zip(series.dates().iter().copied()).collect();
        let reprojected = AlignedSeries::from_pairs(pairs)?;
        log::debug!("{}: reprojected {} rasters of '{}'", basin.name(), reprojected.len(), key);
        data = data.with_series(*key, reprojected);
    }
    Ok(SheetOutput {
        data,
        accounts: Vec::new(),
    })
}

/// Write monthly and labelled tables under `<basin output>/<sheet>/`, then the
/// water-year rollups of the monthly ones. Returns the number of files written.
pub fn write_accounts(
    basin_output: &Path,
    accounts: &[AccountFile],
    calendar: &WaterYearCalendar,
) -> anyhow::Result<usize> {
    let mut written = 0;
    for account in accounts {
        let dir = basin_output.join(account.sheet);
        account
            .write_into(&dir)
            .with_context(|| format!("writing {}", account.file_name()))?;
        written += 1;
    }
    let sheets: BTreeSet<&str> = accounts.iter().map(|a| a.sheet).collect();
    for sheet in sheets {
        let dir = basin_output.join(sheet);
        written += write_yearly_rollups(sheet, accounts, calendar, &dir)
            .with_context(|| format!("rolling up {sheet}"))?
            .len();
    }
    Ok(written)
}
