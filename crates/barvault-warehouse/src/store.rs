//! Pluggable document store contract.

use std::future::Future;
use std::pin::Pin;

use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;

use crate::error::WarehouseError;
use crate::writer::{BatchWriteReport, WriteStats};

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, WarehouseError>> + Send + 'a>>;

/// One listed document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreEntry {
    /// Slash-separated key relative to the store root.
    pub key: String,
    #[serde(with = "time::serde::rfc3339")]
    pub modified: OffsetDateTime,
    pub size: u64,
}

/// Confirmation of a verified `put`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PutReceipt {
    pub key: String,
    pub checksum: String,
    pub bytes: usize,
}

/// Key/value document storage.
///
/// Keys are slash-separated relative paths such as
/// `historical/daily/AAPL/2024/01/2024-01-02.json`. `list` treats its prefix as
/// a directory: `jobs` matches `jobs/abc/metadata.json` but not `jobsx/...`.
pub trait KeyValueStore: Send + Sync {
    /// Short backend name for logs and CLI output.
    fn kind(&self) -> &'static str;

    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Value>>;

    fn put<'a>(&'a self, key: &'a str, value: &'a Value) -> StoreFuture<'a, PutReceipt>;

    fn list<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, Vec<StoreEntry>>;

    /// Writes many documents with bounded concurrency. Individual failures are
    /// reported in the returned report rather than as an `Err`.
    fn put_batch<'a>(
        &'a self,
        entries: Vec<(String, Value)>,
        max_concurrent: usize,
    ) -> StoreFuture<'a, BatchWriteReport>;

    /// Writer counters, for backends that write through [`crate::CrashSafeWriter`].
    fn write_stats(&self) -> Option<WriteStats> {
        None
    }

    /// Flushes in-flight work. Later writes may be refused.
    fn shutdown<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// Validates a key and returns its slash-separated components.
pub fn key_segments(key: &str) -> Result<Vec<&str>, WarehouseError> {
    let invalid = |reason| WarehouseError::InvalidKey {
        key: key.to_owned(),
        reason,
    };

    if key.is_empty() {
        return Err(invalid("key is empty"));
    }
    if key.starts_with('/') {
        return Err(invalid("key must be relative"));
    }
    if key.contains('\\') {
        return Err(invalid("key must use '/' separators"));
    }

    let segments = key.split('/').collect::<Vec<_>>();
    for segment in &segments {
        if segment.is_empty() {
            return Err(invalid("key contains an empty segment"));
        }
        if *segment == "." || *segment == ".." {
            return Err(invalid("key must not contain relative segments"));
        }
    }
    Ok(segments)
}

/// Normalizes a list prefix to directory form (`""` or `"a/b/"`).
pub fn directory_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}
