//! Save, load, list and remove stage checkpoints.

use crate::error::{Result, StoreError};
use crate::models::CheckpointInfo;
use crate::schema::SCHEMA_VERSION;
use crate::CheckpointStore;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rusqlite::{params, OptionalExtension};
use std::io::{Read, Write};
use wa_core::CompleteData;

fn compress(data: &CompleteData) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(data)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

fn decompress(payload: &[u8]) -> Result<CompleteData> {
    let mut json = Vec::new();
    GzDecoder::new(payload).read_to_end(&mut json)?;
    Ok(serde_json::from_slice(&json)?)
}

impl CheckpointStore {
    /// Store the snapshot taken after `stage`, replacing any earlier one.
    pub fn save(&self, basin: &str, stage: &str, data: &CompleteData) -> Result<()> {
        let payload = compress(data)?;
        let created = chrono::Utc::now().to_rfc3339();
        let conn = self.conn.borrow();
        conn.execute(
            "INSERT OR REPLACE INTO checkpoints (basin, stage, schema_version, created, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![basin, stage, SCHEMA_VERSION, created, payload],
        )?;
        log::info!(
            "checkpoint {}/{} saved ({} bytes)",
            basin,
            stage,
            payload.len()
        );
        Ok(())
    }

    /// The snapshot taken after `stage`, if any.
    ///
    /// A snapshot written by another schema version is an error, not a miss,
    /// so callers can decide whether to fall back to a rescan.
    pub fn load(&self, basin: &str, stage: &str) -> Result<Option<CompleteData>> {
        let conn = self.conn.borrow();
        let row: Option<(i64, Vec<u8>)> = conn
            .query_row(
                "SELECT schema_version, payload FROM checkpoints
                 WHERE basin = ?1 AND stage = ?2",
                params![basin, stage],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((found, payload)) = row else {
            log::debug!("no checkpoint for {}/{}", basin, stage);
            return Ok(None);
        };
        if found != SCHEMA_VERSION {
            return Err(StoreError::SchemaVersion {
                basin: basin.to_string(),
                stage: stage.to_string(),
                found,
                expected: SCHEMA_VERSION,
            });
        }
        let data = decompress(&payload)?;
        log::info!(
            "checkpoint {}/{} loaded ({} series)",
            basin,
            stage,
            data.series.len()
        );
        Ok(Some(data))
    }

    /// Stored checkpoints, optionally for one basin, ordered by basin then stage.
    pub fn list(&self, basin: Option<&str>) -> Result<Vec<CheckpointInfo>> {
        let conn = self.conn.borrow();
        let mut stmt = conn.prepare(
            "SELECT basin, stage, schema_version, created, LENGTH(payload)
             FROM checkpoints
             WHERE ?1 IS NULL OR basin = ?1
             ORDER BY basin, stage",
        )?;
        let rows = stmt
            .query_map(params![basin], |row| {
                Ok(CheckpointInfo {
                    basin: row.get(0)?,
                    stage: row.get(1)?,
                    schema_version: row.get(2)?,
                    created: row.get(3)?,
                    size: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        log::info!("checkpoint list returned {} records", rows.len());
        Ok(rows)
    }

    /// Delete one checkpoint; `true` when a row was removed.
    pub fn remove(&self, basin: &str, stage: &str) -> Result<bool> {
        let conn = self.conn.borrow();
        let n = conn.execute(
            "DELETE FROM checkpoints WHERE basin = ?1 AND stage = ?2",
            params![basin, stage],
        )?;
        Ok(n > 0)
    }

    /// Delete every checkpoint of a basin; returns the number removed.
    pub fn clear_basin(&self, basin: &str) -> Result<usize> {
        let conn = self.conn.borrow();
        Ok(conn.execute("DELETE FROM checkpoints WHERE basin = ?1", params![basin])?)
    }
}
