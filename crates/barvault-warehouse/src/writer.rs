//! Crash-safe JSON file writer.
//!
//! Every write goes through the same protocol: inspect the serialized form,
//! checksum it, write a `.tmp` sibling, flush and sync, rename over the final
//! path, then re-read and compare checksums. Failures are retried with a short
//! linear backoff before being reported.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::WriteError;
use crate::integrity::{checksum, inspect_serialized};

/// Writer tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterConfig {
    /// Attempts per write before a failure is reported.
    pub max_attempts: u32,
    /// Base delay between attempts; attempt `n` waits `n * retry_delay`.
    pub retry_delay: Duration,
    /// Process-wide cap on simultaneous file writes.
    pub max_concurrent: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_millis(100),
            max_concurrent: 10,
        }
    }
}

/// Result of a verified write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteReceipt {
    pub path: PathBuf,
    pub checksum: String,
    pub bytes: usize,
    pub attempts: u32,
}

/// A single entry that could not be written during a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    pub target: String,
    pub code: String,
    pub error: String,
}

/// Outcome of a batch write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchWriteReport {
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<BatchFailure>,
}

impl BatchWriteReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Snapshot of the writer counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WriteStats {
    pub total_writes: u64,
    pub successful_writes: u64,
    pub failed_writes: u64,
    pub retries: u64,
    pub corruption_prevented: u64,
    pub verification_failures: u64,
    pub success_rate: f64,
    pub corruption_prevention_rate: f64,
}

#[derive(Debug, Default)]
struct WriteCounters {
    total_writes: AtomicU64,
    successful_writes: AtomicU64,
    failed_writes: AtomicU64,
    retries: AtomicU64,
    corruption_prevented: AtomicU64,
    verification_failures: AtomicU64,
}

impl WriteCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

type PathLock = Arc<tokio::sync::Mutex<()>>;

/// Atomic, verified JSON writer with per-path locking.
#[derive(Debug)]
pub struct CrashSafeWriter {
    config: WriterConfig,
    locks: Mutex<HashMap<PathBuf, PathLock>>,
    gate: Arc<Semaphore>,
    counters: WriteCounters,
}

impl Default for CrashSafeWriter {
    fn default() -> Self {
        Self::new(WriterConfig::default())
    }
}

impl CrashSafeWriter {
    pub fn new(config: WriterConfig) -> Self {
        let permits = config.max_concurrent.max(1);
        Self {
            config,
            locks: Mutex::new(HashMap::new()),
            gate: Arc::new(Semaphore::new(permits)),
            counters: WriteCounters::default(),
        }
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// Serializes `value` as pretty JSON and writes it crash-safely.
    pub async fn write<T>(&self, path: &Path, value: &T) -> Result<WriteReceipt, WriteError>
    where
        T: Serialize + ?Sized,
    {
        let text = serde_json::to_string_pretty(value)?;
        self.write_text(path, &text).await
    }

    /// Writes an already serialized document.
    pub async fn write_text(&self, path: &Path, text: &str) -> Result<WriteReceipt, WriteError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| WriteError::ShutDown)?;
        WriteCounters::bump(&self.counters.total_writes);

        if let Err(source) = inspect_serialized(text) {
            WriteCounters::bump(&self.counters.corruption_prevented);
            WriteCounters::bump(&self.counters.failed_writes);
            warn!(path = %path.display(), reason = %source, "refused corrupted document");
            return Err(WriteError::CorruptionPrevented {
                path: path.to_path_buf(),
                source,
            });
        }

        let expected = checksum(text.as_bytes());
        let lock = self.path_lock(path);
        let _guard = lock.lock().await;

        let mut attempt = 0_u32;
        loop {
            attempt += 1;
            match write_once(path, text.as_bytes(), &expected).await {
                Ok(()) => {
                    WriteCounters::bump(&self.counters.successful_writes);
                    debug!(path = %path.display(), attempts = attempt, "write verified");
                    return Ok(WriteReceipt {
                        path: path.to_path_buf(),
                        checksum: expected,
                        bytes: text.len(),
                        attempts: attempt,
                    });
                }
                Err(err) => {
                    if matches!(err, WriteError::VerificationFailed { .. }) {
                        WriteCounters::bump(&self.counters.verification_failures);
                    }
                    if attempt >= self.config.max_attempts.max(1) {
                        WriteCounters::bump(&self.counters.failed_writes);
                        error!(path = %path.display(), attempts = attempt, error = %err, "write failed");
                        return Err(err);
                    }
                    WriteCounters::bump(&self.counters.retries);
                    warn!(path = %path.display(), attempt, error = %err, "retrying write");
                    tokio::time::sleep(self.config.retry_delay * attempt).await;
                }
            }
        }
    }

    /// Writes every pair with at most `max_concurrent` writes in flight.
    ///
    /// The process-wide gate still applies, so a batch never exceeds
    /// `WriterConfig::max_concurrent` either.
    pub async fn write_batch(
        self: &Arc<Self>,
        pairs: Vec<(PathBuf, Value)>,
        max_concurrent: usize,
    ) -> BatchWriteReport {
        let limit = Arc::new(Semaphore::new(max_concurrent.max(1)));
        let mut tasks = JoinSet::new();

        for (path, value) in pairs {
            let writer = Arc::clone(self);
            let limit = Arc::clone(&limit);
            tasks.spawn(async move {
                let outcome = match limit.acquire_owned().await {
                    Ok(_permit) => writer.write(&path, &value).await,
                    Err(_) => Err(WriteError::ShutDown),
                };
                (path, outcome)
            });
        }

        let mut report = BatchWriteReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(_))) => report.succeeded += 1,
                Ok((path, Err(err))) => {
                    report.failed += 1;
                    report.failures.push(BatchFailure {
                        target: path.display().to_string(),
                        code: err.code().to_owned(),
                        error: err.to_string(),
                    });
                }
                Err(join_error) => {
                    report.failed += 1;
                    report.failures.push(BatchFailure {
                        target: String::from("<unknown>"),
                        code: String::from("write.task"),
                        error: join_error.to_string(),
                    });
                }
            }
        }

        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            "batch write finished"
        );
        report
    }

    pub fn stats(&self) -> WriteStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        let total = load(&self.counters.total_writes);
        let successful = load(&self.counters.successful_writes);
        let prevented = load(&self.counters.corruption_prevented);
        let ratio = |part: u64| {
            if total == 0 {
                0.0
            } else {
                part as f64 / total as f64
            }
        };

        WriteStats {
            total_writes: total,
            successful_writes: successful,
            failed_writes: load(&self.counters.failed_writes),
            retries: load(&self.counters.retries),
            corruption_prevented: prevented,
            verification_failures: load(&self.counters.verification_failures),
            success_rate: ratio(successful),
            corruption_prevention_rate: ratio(prevented),
        }
    }

    /// Waits for in-flight writes, refuses new ones and drops idle locks.
    pub async fn shutdown(&self) {
        let permits = u32::try_from(self.config.max_concurrent.max(1)).unwrap_or(u32::MAX);
        if let Ok(drained) = self.gate.acquire_many(permits).await {
            drained.forget();
        }
        self.gate.close();
        self.cleanup_locks();
        info!(stats = ?self.stats(), "writer shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.gate.is_closed()
    }

    /// Drops lock entries no writer currently holds.
    pub fn cleanup_locks(&self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    fn path_lock(&self, path: &Path) -> PathLock {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(path.to_path_buf()).or_default())
    }
}

async fn write_once(path: &Path, bytes: &[u8], expected: &str) -> Result<(), WriteError> {
    let io_error = |source: std::io::Error| WriteError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(io_error)?;
    }

    let temp = temp_path(path);
    let mut file = fs::File::create(&temp).await.map_err(io_error)?;
    file.write_all(bytes).await.map_err(io_error)?;
    file.flush().await.map_err(io_error)?;
    file.sync_all().await.map_err(io_error)?;
    drop(file);

    if let Err(source) = fs::rename(&temp, path).await {
        let _ = fs::remove_file(&temp).await;
        return Err(io_error(source));
    }

    let written = fs::read(path).await.map_err(io_error)?;
    let actual = checksum(&written);
    if actual != expected {
        return Err(WriteError::VerificationFailed {
            path: path.to_path_buf(),
            expected: expected.to_owned(),
            actual,
        });
    }

    Ok(())
}

/// `2024-01-02.json` becomes `2024-01-02.json.tmp`.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
