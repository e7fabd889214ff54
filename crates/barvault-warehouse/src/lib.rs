//! # barvault warehouse
//!
//! Durable document storage for barvault.
//!
//! ## Overview
//!
//! - [`KeyValueStore`]: pluggable `get` / `put` / `list` by slash-separated key
//! - [`FsStore`]: one JSON file per key, written through [`CrashSafeWriter`]
//! - [`DuckDbStore`]: the same keys in an embedded `DuckDB` table
//! - [`layout`]: the stable key layout for records, quarantine, and jobs
//!
//! ## Crash safety
//!
//! [`CrashSafeWriter`] refuses corrupted serialized forms, writes to a `.tmp`
//! sibling, syncs, renames over the destination and re-reads the result to
//! compare SHA-256 checksums. A crash between the temp write and the rename
//! leaves the previous file untouched.
//!
//! ```rust,no_run
//! use barvault_warehouse::{FsStore, KeyValueStore, WriterConfig};
//! use serde_json::json;
//!
//! # async fn demo() -> Result<(), barvault_warehouse::WarehouseError> {
//! let store = FsStore::new("/var/lib/barvault", WriterConfig::default());
//! store.put("jobs/demo/metadata.json", &json!({"job_id": "demo"})).await?;
//! let listed = store.list("jobs").await?;
//! assert_eq!(listed.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod duckdb_store;
pub mod error;
pub mod fs_store;
pub mod integrity;
pub mod layout;
pub mod pool;
pub mod store;
pub mod writer;

pub use duckdb_store::DuckDbStore;
pub use error::{IntegrityError, WarehouseError, WriteError};
pub use fs_store::FsStore;
pub use integrity::{checksum, inspect_serialized};
pub use pool::{DuckDbConnectionManager, PooledConnection};
pub use store::{KeyValueStore, PutReceipt, StoreEntry, StoreFuture};
pub use writer::{
    BatchFailure, BatchWriteReport, CrashSafeWriter, WriteReceipt, WriteStats, WriterConfig,
};
