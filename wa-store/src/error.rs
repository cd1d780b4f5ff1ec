use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("checkpoint payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint {basin}/{stage} has schema version {found}, expected {expected}")]
    SchemaVersion {
        basin: String,
        stage: String,
        found: i64,
        expected: i64,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;
