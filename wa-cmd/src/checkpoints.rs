//! `checkpoints`: inspect or drop stored stage checkpoints.

use anyhow::Context;
use std::path::Path;
use wa_store::CheckpointStore;

pub fn run_checkpoints(db: &Path, basin: Option<&str>, remove: Option<&str>) -> anyhow::Result<()> {
    let store = CheckpointStore::open(db)
        .with_context(|| format!("opening checkpoint store {}", db.display()))?;
    if let Some(stage) = remove {
        let basin = basin.context("--remove needs --basin")?;
        if store.remove(basin, stage)? {
            log::info!("removed checkpoint {}/{}", basin, stage);
        } else {
            log::warn!("no checkpoint {}/{}", basin, stage);
        }
        return Ok(());
    }
    for info in store.list(basin)? {
        println!(
            "{}\t{}\tv{}\t{}\t{} bytes",
            info.basin, info.stage, info.schema_version, info.created, info.size
        );
    }
    Ok(())
}
