//! SQL schema of the checkpoint store.

/// Version of the checkpoint payload layout. Rows written with another
/// version are refused on load.
pub const SCHEMA_VERSION: i64 = 1;

/// Returns the full SQL schema as a single batch string.
///
/// One row per (basin, stage): the gzip-compressed JSON snapshot of the
/// basin's accumulated data after that stage completed.
pub fn create_schema() -> &'static str {
    r#"
    CREATE TABLE IF NOT EXISTS checkpoints (
        basin TEXT NOT NULL,
        stage TEXT NOT NULL,
        schema_version INTEGER NOT NULL,
        created TEXT NOT NULL,
        payload BLOB NOT NULL,
        PRIMARY KEY (basin, stage)
    );
    CREATE INDEX IF NOT EXISTS idx_checkpoints_basin ON checkpoints(basin);
    "#
}
