//! SQLite checkpoint store for the water accounting pipeline.
//!
//! After every completed stage the orchestrator snapshots the basin's
//! [`CompleteData`](wa_core::CompleteData) here, so a later run can resume
//! from the last good stage instead of rescanning the output folders.
//!
//! # Architecture
//!
//! - `Rc<RefCell<Connection>>` wrapper; the pipeline processes basins
//!   sequentially on one thread
//! - On-disk SQLite via `rusqlite` (bundled), or in-memory for tests
//! - Payloads are gzip-compressed JSON with a schema version column
//!
//! # Usage
//!
//! ```rust
//! use wa_store::CheckpointStore;
//! use wa_core::CompleteData;
//!
//! let store = CheckpointStore::open_in_memory().unwrap();
//! store.save("Litani", "sheet46", &CompleteData::default()).unwrap();
//! let restored = store.load("Litani", "sheet46").unwrap();
//! assert_eq!(restored, Some(CompleteData::default()));
//! ```
//!
//! # Tables
//!
//! See [`schema::create_schema`] for the SQL schema.

mod checkpoints;
pub mod error;
pub mod models;
pub mod schema;

pub use error::{Result, StoreError};
pub use models::CheckpointInfo;

use rusqlite::Connection;
use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::rc::Rc;

/// Checkpoint database handle. Cheaply cloneable.
#[derive(Clone)]
pub struct CheckpointStore {
    conn: Rc<RefCell<Connection>>,
}

impl CheckpointStore {
    /// Open (or create) the store at `path`, creating parent folders as needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        log::info!("checkpoint store opened at {}", path.display());
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(schema::create_schema())?;
        Ok(CheckpointStore {
            conn: Rc::new(RefCell::new(conn)),
        })
    }
}
