//! Append-Only Trace Store
//!
//! Persists trace records as one JSON line per record in `trace.jsonl`
//! under the session data directory. Producers (the collector thread and
//! the encode workers) hand records to a clonable [`TraceSink`]; a
//! dedicated writer thread flushes pending records in batches.
//!
//! A batch write failure is retried with bounded exponential backoff, then
//! the batch is dropped with a surfaced warning: data loss is possible but
//! bounded and reported, and a failed append can never corrupt records
//! already on disk. A crash mid-append may leave one torn trailing line;
//! the reader skips it with a warning.

use super::record::TraceRecord;
use parking_lot::{Condvar, Mutex};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// File name of the trace log inside the data directory
pub const TRACE_FILE_NAME: &str = "trace.jsonl";

/// Trace store tuning
#[derive(Debug, Clone)]
pub struct TraceStoreConfig {
    /// Interval between batch flushes
    pub flush_interval: std::time::Duration,
    /// Maximum records buffered before drop-on-saturation
    pub max_pending: usize,
    /// Write attempts per batch (1 initial + retries)
    pub max_attempts: u32,
    /// Base delay for exponential backoff between attempts
    pub retry_base_delay: std::time::Duration,
}

impl Default for TraceStoreConfig {
    fn default() -> Self {
        Self {
            flush_interval: std::time::Duration::from_millis(500),
            max_pending: 8192,
            max_attempts: 3,
            retry_base_delay: std::time::Duration::from_millis(50),
        }
    }
}

/// Store statistics
#[derive(Debug, Default)]
pub struct StoreStats {
    /// Records accepted into the pending buffer
    pub appended: AtomicU64,
    /// Records written to disk
    pub written: AtomicU64,
    /// Records dropped (saturated buffer or exhausted retries)
    pub dropped: AtomicU64,
    /// Batch write attempts that failed and were retried
    pub retries: AtomicU64,
}

impl StoreStats {
    pub fn appended(&self) -> u64 {
        self.appended.load(Ordering::Relaxed)
    }

    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }
}

struct StoreShared {
    pending: Mutex<Vec<TraceRecord>>,
    kick: Condvar,
    shutdown: AtomicBool,
    path: PathBuf,
    config: TraceStoreConfig,
    stats: StoreStats,
}

/// Clonable producer handle to the trace store
#[derive(Clone)]
pub struct TraceSink {
    shared: Arc<StoreShared>,
}

impl TraceSink {
    /// Queue a record for the next batch flush.
    ///
    /// Non-blocking: when the pending buffer is saturated the record is
    /// dropped and counted rather than stalling the capture path.
    pub fn append(&self, record: TraceRecord) -> bool {
        let mut pending = self.shared.pending.lock();
        if pending.len() >= self.shared.config.max_pending {
            drop(pending);
            self.shared.stats.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("trace store pending buffer saturated, dropping record");
            return false;
        }
        pending.push(record);
        drop(pending);
        self.shared.stats.appended.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Store statistics
    pub fn stats(&self) -> &StoreStats {
        &self.shared.stats
    }
}

/// Append-only trace store with a dedicated batch writer thread
pub struct TraceStore {
    shared: Arc<StoreShared>,
    writer: Option<JoinHandle<()>>,
}

impl TraceStore {
    /// Open (or create) the trace log in `data_dir` and start the writer.
    pub fn open(data_dir: &Path, config: TraceStoreConfig) -> crate::Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join(TRACE_FILE_NAME);

        // Probe writability up front so a bad directory fails at startup,
        // not on the first batch.
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;

        let shared = Arc::new(StoreShared {
            pending: Mutex::new(Vec::new()),
            kick: Condvar::new(),
            shutdown: AtomicBool::new(false),
            path,
            config,
            stats: StoreStats::default(),
        });

        let writer_shared = Arc::clone(&shared);
        let writer = thread::Builder::new()
            .name("trace-writer".into())
            .spawn(move || writer_loop(writer_shared))
            .map_err(|e| crate::Error::Persistence(format!("failed to spawn writer: {e}")))?;

        Ok(Self {
            shared,
            writer: Some(writer),
        })
    }

    /// Producer handle for capture threads
    pub fn sink(&self) -> TraceSink {
        TraceSink {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Store statistics
    pub fn stats(&self) -> &StoreStats {
        &self.shared.stats
    }

    /// Path of the trace log
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Flush remaining records and stop the writer thread.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(writer) = self.writer.take() {
            self.shared.shutdown.store(true, Ordering::SeqCst);
            self.shared.kick.notify_all();
            let _ = writer.join();
        }
    }
}

impl Drop for TraceStore {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn writer_loop(shared: Arc<StoreShared>) {
    loop {
        let batch = {
            let mut pending = shared.pending.lock();
            if pending.is_empty() && !shared.shutdown.load(Ordering::SeqCst) {
                shared
                    .kick
                    .wait_for(&mut pending, shared.config.flush_interval);
            }
            std::mem::take(&mut *pending)
        };

        if !batch.is_empty() {
            write_batch(&shared, &batch);
        }

        if shared.shutdown.load(Ordering::SeqCst) && shared.pending.lock().is_empty() {
            break;
        }
    }
    debug!("trace writer stopped");
}

/// Write one batch transactionally: serialize every record, append all
/// lines in a single write, fsync. Retries with exponential backoff; on
/// exhaustion the whole batch is dropped and reported.
fn write_batch(shared: &StoreShared, batch: &[TraceRecord]) {
    let mut buf = String::with_capacity(batch.len() * 128);
    for record in batch {
        match serde_json::to_string(record) {
            Ok(line) => {
                buf.push_str(&line);
                buf.push('\n');
            }
            Err(e) => {
                shared.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "unserializable trace record dropped");
            }
        }
    }
    if buf.is_empty() {
        return;
    }

    let mut attempt = 0;
    loop {
        match append_all(&shared.path, buf.as_bytes()) {
            Ok(()) => {
                shared
                    .stats
                    .written
                    .fetch_add(batch.len() as u64, Ordering::Relaxed);
                return;
            }
            Err(e) => {
                attempt += 1;
                if attempt >= shared.config.max_attempts {
                    shared
                        .stats
                        .dropped
                        .fetch_add(batch.len() as u64, Ordering::Relaxed);
                    warn!(
                        records = batch.len(),
                        error = %e,
                        "trace batch dropped after exhausting write retries"
                    );
                    return;
                }
                shared.stats.retries.fetch_add(1, Ordering::Relaxed);
                let delay = shared.config.retry_base_delay * 2u32.pow(attempt - 1);
                warn!(attempt, error = %e, "trace batch write failed, backing off");
                thread::sleep(delay);
            }
        }
    }
}

fn append_all(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(bytes)?;
    file.sync_data()
}

/// Load every record from a trace log.
///
/// Malformed lines (a torn tail after a crash) are skipped with a warning;
/// prior records are always recovered.
pub fn read_trace(path: &Path) -> crate::Result<Vec<TraceRecord>> {
    let content = std::fs::read_to_string(path)?;
    let mut records = Vec::new();
    let mut skipped = 0usize;

    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<TraceRecord>(line) {
            Ok(record) => records.push(record),
            Err(e) => {
                skipped += 1;
                warn!(line = index + 1, error = %e, "skipping malformed trace line");
            }
        }
    }

    if skipped > 0 {
        warn!(skipped, recovered = records.len(), "trace log partially recovered");
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::Timestamp;
    use crate::trace::record::TracePayload;
    use tempfile::TempDir;

    fn key_record(millis: u64, token: &str) -> TraceRecord {
        TraceRecord {
            timestamp: Timestamp::from_millis(millis),
            device: 0,
            app: None,
            payload: TracePayload::Key {
                token: token.to_string(),
                count: 1,
            },
        }
    }

    fn quick_config() -> TraceStoreConfig {
        TraceStoreConfig {
            flush_interval: std::time::Duration::from_millis(20),
            ..Default::default()
        }
    }

    #[test]
    fn test_append_and_read_back() {
        let dir = TempDir::new().unwrap();
        let store = TraceStore::open(dir.path(), quick_config()).unwrap();
        let sink = store.sink();

        for i in 0..10 {
            assert!(sink.append(key_record(i * 10, "a")));
        }
        store.close();

        let records = read_trace(&dir.path().join(TRACE_FILE_NAME)).unwrap();
        assert_eq!(records.len(), 10);
        assert_eq!(records[3], key_record(30, "a"));
    }

    #[test]
    fn test_records_preserve_append_order() {
        let dir = TempDir::new().unwrap();
        let store = TraceStore::open(dir.path(), quick_config()).unwrap();
        let sink = store.sink();

        for i in 0..50 {
            sink.append(key_record(i, "x"));
        }
        store.close();

        let records = read_trace(&dir.path().join(TRACE_FILE_NAME)).unwrap();
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.timestamp, Timestamp::from_millis(i as u64));
        }
    }

    #[test]
    fn test_appends_survive_across_store_instances() {
        let dir = TempDir::new().unwrap();

        {
            let store = TraceStore::open(dir.path(), quick_config()).unwrap();
            store.sink().append(key_record(1, "a"));
            store.close();
        }
        {
            let store = TraceStore::open(dir.path(), quick_config()).unwrap();
            store.sink().append(key_record(2, "b"));
            store.close();
        }

        let records = read_trace(&dir.path().join(TRACE_FILE_NAME)).unwrap();
        assert_eq!(records.len(), 2, "second session must not truncate the first");
    }

    #[test]
    fn test_saturated_buffer_drops_and_counts() {
        let dir = TempDir::new().unwrap();
        let store = TraceStore::open(
            dir.path(),
            TraceStoreConfig {
                // Long flush interval so the buffer actually fills
                flush_interval: std::time::Duration::from_secs(60),
                max_pending: 4,
                ..Default::default()
            },
        )
        .unwrap();
        let sink = store.sink();

        for i in 0..8 {
            sink.append(key_record(i, "a"));
        }

        assert_eq!(store.stats().appended(), 4);
        assert_eq!(store.stats().dropped(), 4);
        store.close();
    }

    #[test]
    fn test_close_flushes_pending() {
        let dir = TempDir::new().unwrap();
        let store = TraceStore::open(
            dir.path(),
            TraceStoreConfig {
                flush_interval: std::time::Duration::from_secs(60),
                ..Default::default()
            },
        )
        .unwrap();
        store.sink().append(key_record(5, "z"));
        store.close();

        let records = read_trace(&dir.path().join(TRACE_FILE_NAME)).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_torn_trailing_line_is_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(TRACE_FILE_NAME);

        let good = serde_json::to_string(&key_record(1, "a")).unwrap();
        std::fs::write(&path, format!("{good}\n{good}\n{{\"timestamp\":12")).unwrap();

        let records = read_trace(&path).unwrap();
        assert_eq!(records.len(), 2, "torn tail must not lose prior records");
    }

    #[test]
    fn test_read_missing_file_errors() {
        let dir = TempDir::new().unwrap();
        assert!(read_trace(&dir.path().join("absent.jsonl")).is_err());
    }

    #[test]
    fn test_open_bad_directory_fails_fast() {
        let dir = TempDir::new().unwrap();
        let file_as_dir = dir.path().join("occupied");
        std::fs::write(&file_as_dir, "not a directory").unwrap();

        assert!(TraceStore::open(&file_as_dir, quick_config()).is_err());
    }

    #[test]
    fn test_concurrent_sinks() {
        let dir = TempDir::new().unwrap();
        let store = TraceStore::open(dir.path(), quick_config()).unwrap();

        let mut handles = Vec::new();
        for t in 0..4u64 {
            let sink = store.sink();
            handles.push(std::thread::spawn(move || {
                for i in 0..25 {
                    sink.append(key_record(t * 1000 + i, "k"));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        store.close();

        let records = read_trace(&dir.path().join(TRACE_FILE_NAME)).unwrap();
        assert_eq!(records.len(), 100);
    }
}
