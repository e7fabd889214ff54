//! Filesystem-backed store: keys map to files under a root directory and
//! every write goes through [`CrashSafeWriter`].

use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use time::OffsetDateTime;

use crate::error::WarehouseError;
use crate::store::{directory_prefix, key_segments, KeyValueStore, PutReceipt, StoreEntry, StoreFuture};
use crate::writer::{BatchWriteReport, CrashSafeWriter, WriteStats, WriterConfig};

#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
    writer: Arc<CrashSafeWriter>,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>, config: WriterConfig) -> Self {
        Self::with_writer(root, Arc::new(CrashSafeWriter::new(config)))
    }

    pub fn with_writer(root: impl Into<PathBuf>, writer: Arc<CrashSafeWriter>) -> Self {
        Self {
            root: root.into(),
            writer,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn writer(&self) -> &Arc<CrashSafeWriter> {
        &self.writer
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, WarehouseError> {
        let segments = key_segments(key)?;
        Ok(segments
            .into_iter()
            .fold(self.root.clone(), |path, segment| path.join(segment)))
    }
}

impl KeyValueStore for FsStore {
    fn kind(&self) -> &'static str {
        "fs"
    }

    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Value>> {
        Box::pin(async move {
            let path = self.resolve(key)?;
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(error) => return Err(error.into()),
            };
            Ok(Some(serde_json::from_slice(&bytes)?))
        })
    }

    fn put<'a>(&'a self, key: &'a str, value: &'a Value) -> StoreFuture<'a, PutReceipt> {
        Box::pin(async move {
            let path = self.resolve(key)?;
            let receipt = self.writer.write(&path, value).await?;
            Ok(PutReceipt {
                key: key.to_owned(),
                checksum: receipt.checksum,
                bytes: receipt.bytes,
            })
        })
    }

    fn list<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, Vec<StoreEntry>> {
        Box::pin(async move {
            let prefix = directory_prefix(prefix);
            let start = if prefix.is_empty() {
                self.root.clone()
            } else {
                self.resolve(prefix.trim_end_matches('/'))?
            };
            let root = self.root.clone();

            tokio::task::spawn_blocking(move || {
                let mut entries = Vec::new();
                if start.is_dir() {
                    collect_json_files(&root, &start, &mut entries)?;
                }
                entries.sort_by(|left, right| left.key.cmp(&right.key));
                Ok(entries)
            })
            .await
            .map_err(|error| WarehouseError::Task(error.to_string()))?
        })
    }

    fn put_batch<'a>(
        &'a self,
        entries: Vec<(String, Value)>,
        max_concurrent: usize,
    ) -> StoreFuture<'a, BatchWriteReport> {
        Box::pin(async move {
            let pairs = entries
                .into_iter()
                .map(|(key, value)| Ok((self.resolve(&key)?, value)))
                .collect::<Result<Vec<_>, WarehouseError>>()?;
            Ok(self.writer.write_batch(pairs, max_concurrent).await)
        })
    }

    fn write_stats(&self) -> Option<WriteStats> {
        Some(self.writer.stats())
    }

    fn shutdown<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move { self.writer.shutdown().await })
    }
}

fn collect_json_files(
    root: &Path,
    dir: &Path,
    entries: &mut Vec<StoreEntry>,
) -> Result<(), WarehouseError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            collect_json_files(root, &path, entries)?;
            continue;
        }
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }

        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let key = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let modified = metadata
            .modified()
            .map(OffsetDateTime::from)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH);

        entries.push(StoreEntry {
            key,
            modified,
            size: metadata.len(),
        });
    }
    Ok(())
}
