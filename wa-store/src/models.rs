use serde::Serialize;

/// One stored checkpoint, without its payload.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CheckpointInfo {
    pub basin: String,
    pub stage: String,
    pub schema_version: i64,
    /// RFC 3339 time the checkpoint was written.
    pub created: String,
    /// Compressed payload size in bytes.
    pub size: i64,
}
