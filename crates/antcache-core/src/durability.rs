//! The durability engine: journaling, periodic snapshots, compaction.
//!
//! Mutations flow through a bounded channel into a dedicated log-writer
//! task; the channel is the flow-control valve. When it fills up the
//! record is dropped with a warning rather than blocking the mutating
//! command — the log path is the engine's only lossy path.
//!
//! Three background tasks run while the engine is `Running`:
//! - the log-writer drains the channel and appends to the ACL,
//! - the snapshot task writes an ATD every `atd_interval` (or on
//!   demand, e.g. after FLUSHALL) and truncates the journal that the
//!   snapshot supersedes,
//! - the compaction task merges rotated journal files every
//!   `acl_interval`.
//!
//! On `stop()` the writer drains within a short grace window, then a
//! final snapshot and compaction run before file handles close.
//! Durability errors are logged and never surfaced to clients.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use antcache_persistence::journal::{JournalWriter, LogRecord, Verb};
use antcache_persistence::recovery;
use antcache_persistence::snapshot::{SnapEntry, SnapshotWriter};
use antcache_persistence::{compaction, FormatError, PersistedValue};
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::keyspace::Keyspace;
use crate::time;
use crate::types::{Value, ValueKind};

/// Capacity of the mutation-record channel.
pub const LOG_CHANNEL_CAPACITY: usize = 10_000;

/// How long the log-writer may keep draining after the stop signal.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Lifecycle of a durability engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Constructed without paths; every hook is a no-op.
    Disabled,
    /// Constructed with paths but not yet started. Records already
    /// queue in the channel and are written once the engine starts.
    Created,
    Running,
    Stopping,
    /// Final snapshot and compaction done; nothing further is logged.
    Stopped,
}

/// Paths and cadence for the persistence artifacts.
#[derive(Debug, Clone)]
pub struct DurabilityConfig {
    pub atd_path: PathBuf,
    pub acl_path: PathBuf,
    pub atd_interval: Duration,
    pub acl_interval: Duration,
}

/// The keyspace-facing journal hook: a non-blocking sender. Emission
/// happens inside the keyspace's exclusive critical section, so a
/// blocking send here could deadlock the whole server under load —
/// on a full channel the record is dropped and a warning logged.
#[derive(Clone)]
pub struct LogHook {
    tx: mpsc::Sender<LogRecord>,
}

impl LogHook {
    pub(crate) fn emit(&self, record: LogRecord) {
        match self.tx.try_send(record) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(record)) => {
                warn!(
                    verb = %record.verb,
                    key = %record.key,
                    "journal channel full, dropping record"
                );
            }
            // engine stopped; keyspace stays queryable in memory
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

/// What recovery found on disk.
#[derive(Debug, Default)]
pub struct RecoverySummary {
    pub snapshot_items: usize,
    pub journal_records: usize,
    pub loaded_snapshot: bool,
    pub replayed_journal: bool,
}

struct EngineInner {
    config: DurabilityConfig,
    tx: mpsc::Sender<LogRecord>,
    rx: Mutex<Option<mpsc::Receiver<LogRecord>>>,
    journal: Arc<Mutex<JournalWriter>>,
    snapshot_trigger: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Dual-track persistence: periodic compressed snapshots plus an
/// append-only command journal, replayed on startup.
pub struct DurabilityEngine {
    inner: Option<EngineInner>,
    state: Mutex<EngineState>,
}

impl DurabilityEngine {
    /// An engine with persistence disabled; all hooks are no-ops.
    pub fn disabled() -> Self {
        Self {
            inner: None,
            state: Mutex::new(EngineState::Disabled),
        }
    }

    /// Creates an engine for the given paths. Opens the journal (and
    /// creates parent directories) but spawns nothing until
    /// [`Self::start`].
    pub fn new(config: DurabilityConfig) -> Result<Self, FormatError> {
        let journal = JournalWriter::open(&config.acl_path)?;
        let (tx, rx) = mpsc::channel(LOG_CHANNEL_CAPACITY);
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            inner: Some(EngineInner {
                config,
                tx,
                rx: Mutex::new(Some(rx)),
                journal: Arc::new(Mutex::new(journal)),
                snapshot_trigger: Arc::new(Notify::new()),
                shutdown,
                tasks: Mutex::new(Vec::new()),
            }),
            state: Mutex::new(EngineState::Created),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock().expect("engine state lock poisoned")
    }

    /// The journal hook to attach to the keyspace. `None` when
    /// persistence is disabled.
    pub fn log_hook(&self) -> Option<LogHook> {
        self.inner
            .as_ref()
            .map(|inner| LogHook { tx: inner.tx.clone() })
    }

    /// Startup recovery: load the snapshot, then replay the journal on
    /// top of it without re-emitting records.
    ///
    /// Missing or corrupt files fall back to whatever could be read; a
    /// snapshot header mismatch (unknown magic or version) is fatal.
    pub fn recover(&self, keyspace: &mut Keyspace) -> Result<RecoverySummary, FormatError> {
        let Some(inner) = &self.inner else {
            return Ok(RecoverySummary::default());
        };

        let mut summary = RecoverySummary::default();

        match recovery::read_snapshot(&inner.config.atd_path) {
            Ok(entries) => {
                summary.loaded_snapshot = !entries.is_empty();
                for entry in entries {
                    if time::is_expired(entry.expires_at) {
                        continue;
                    }
                    summary.snapshot_items += 1;
                    keyspace.restore(entry.key, from_persisted(entry.value), entry.expires_at);
                }
            }
            Err(e) if e.is_header_mismatch() => return Err(e),
            Err(e) => {
                warn!(
                    path = %inner.config.atd_path.display(),
                    "failed to load snapshot, continuing with journal only: {e}"
                );
            }
        }

        // replay rotated siblings first (their names sort by rotation
        // time), then the active file
        let mut journal_paths = match compaction::rotated_siblings(&inner.config.acl_path) {
            Ok(paths) => paths,
            Err(e) => {
                warn!("failed to list rotated journals: {e}");
                Vec::new()
            }
        };
        journal_paths.push(inner.config.acl_path.clone());

        for path in &journal_paths {
            match recovery::read_journal(path) {
                Ok(records) => {
                    for record in records {
                        summary.journal_records += 1;
                        apply_record(keyspace, record);
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), "failed to replay journal: {e}");
                }
            }
        }
        summary.replayed_journal = summary.journal_records > 0;

        info!(
            snapshot_items = summary.snapshot_items,
            journal_records = summary.journal_records,
            "recovery complete"
        );
        Ok(summary)
    }

    /// Spawns the log-writer, snapshot, and compaction tasks.
    pub fn start(&self, keyspace: Arc<RwLock<Keyspace>>) {
        let Some(inner) = &self.inner else { return };

        let rx = inner
            .rx
            .lock()
            .expect("engine receiver lock poisoned")
            .take();
        let Some(rx) = rx else {
            warn!("durability engine already started");
            return;
        };

        let mut tasks = inner.tasks.lock().expect("engine task lock poisoned");
        tasks.push(tokio::spawn(log_writer(
            rx,
            inner.journal.clone(),
            inner.shutdown.subscribe(),
        )));
        tasks.push(tokio::spawn(snapshot_task(
            keyspace,
            inner.config.atd_path.clone(),
            inner.config.atd_interval,
            inner.journal.clone(),
            inner.tx.clone(),
            inner.snapshot_trigger.clone(),
            inner.shutdown.subscribe(),
        )));
        tasks.push(tokio::spawn(compaction_task(
            inner.journal.clone(),
            inner.config.acl_interval,
            inner.shutdown.subscribe(),
        )));

        *self.state.lock().expect("engine state lock poisoned") = EngineState::Running;
        info!(
            atd = %inner.config.atd_path.display(),
            acl = %inner.config.acl_path.display(),
            "durability engine started"
        );
    }

    /// Asks the snapshot task for an immediate snapshot. Used after
    /// FLUSHALL so recovery sees the post-flush state.
    pub fn trigger_snapshot(&self) {
        if let Some(inner) = &self.inner {
            inner.snapshot_trigger.notify_one();
        }
    }

    /// Graceful stop: broadcast the stop signal, let the writer drain
    /// within the grace window, then write a final snapshot and run a
    /// final compaction.
    pub async fn stop(&self, keyspace: &RwLock<Keyspace>) {
        let Some(inner) = &self.inner else { return };

        {
            let mut state = self.state.lock().expect("engine state lock poisoned");
            if matches!(*state, EngineState::Stopping | EngineState::Stopped) {
                return;
            }
            *state = EngineState::Stopping;
        }

        let _ = inner.shutdown.send(true);
        let tasks: Vec<JoinHandle<()>> = {
            let mut guard = inner.tasks.lock().expect("engine task lock poisoned");
            guard.drain(..).collect()
        };
        for task in tasks {
            if tokio::time::timeout(DRAIN_GRACE * 2, task).await.is_err() {
                warn!("durability task did not stop within the grace window");
            }
        }

        // the writer already drained; anything still queued is lost
        match write_snapshot(keyspace, &inner.config.atd_path, &inner.journal, None) {
            Ok(count) => info!(items = count, "final snapshot written"),
            Err(e) => error!("final snapshot failed: {e}"),
        }
        if let Err(e) = inner
            .journal
            .lock()
            .expect("journal mutex poisoned")
            .compact()
        {
            error!("final compaction failed: {e}");
        }

        *self.state.lock().expect("engine state lock poisoned") = EngineState::Stopped;
        info!("durability engine stopped");
    }
}

/// Drains the record channel into the journal. On shutdown, whatever is
/// already queued is flushed within the grace window.
async fn log_writer(
    mut rx: mpsc::Receiver<LogRecord>,
    journal: Arc<Mutex<JournalWriter>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(record) => append(&journal, &record),
                None => return,
            },
            _ = shutdown.changed() => {
                let deadline = tokio::time::Instant::now() + DRAIN_GRACE;
                while let Ok(record) = rx.try_recv() {
                    append(&journal, &record);
                    if tokio::time::Instant::now() >= deadline {
                        warn!("journal drain exceeded grace window, remaining records dropped");
                        break;
                    }
                }
                if let Err(e) = journal.lock().expect("journal mutex poisoned").sync() {
                    error!("journal sync on shutdown failed: {e}");
                }
                return;
            }
        }
    }
}

fn append(journal: &Mutex<JournalWriter>, record: &LogRecord) {
    if let Err(e) = journal.lock().expect("journal mutex poisoned").append(record) {
        error!(key = %record.key, "journal append failed: {e}");
    }
}

/// Writes a snapshot every `interval`, or immediately when triggered.
async fn snapshot_task(
    keyspace: Arc<RwLock<Keyspace>>,
    atd_path: PathBuf,
    interval: Duration,
    journal: Arc<Mutex<JournalWriter>>,
    tx: mpsc::Sender<LogRecord>,
    trigger: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await; // the first tick completes immediately

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = trigger.notified() => {}
            _ = shutdown.changed() => return,
        }
        match write_snapshot(&keyspace, &atd_path, &journal, Some(&tx)) {
            Ok(count) => info!(items = count, "snapshot written"),
            Err(e) => error!("snapshot failed: {e}"),
        }
    }
}

/// Merges rotated journal files every `interval`.
async fn compaction_task(
    journal: Arc<Mutex<JournalWriter>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => return,
        }
        if let Err(e) = journal.lock().expect("journal mutex poisoned").compact() {
            error!("journal compaction failed: {e}");
        }
    }
}

/// Enumerates the keyspace under a shared read lock and writes a
/// snapshot; on success the journal is truncated while the lock is
/// still held, so no later mutation's record can be lost and every
/// truncated record's effect is already in the snapshot.
///
/// On any I/O error the existing snapshot file is left untouched.
pub fn write_snapshot(
    keyspace: &RwLock<Keyspace>,
    atd_path: &std::path::Path,
    journal: &Mutex<JournalWriter>,
    pending: Option<&mpsc::Sender<LogRecord>>,
) -> Result<u64, FormatError> {
    let ks = keyspace.read().expect("keyspace lock poisoned");

    // mutations are blocked while we hold the read lock, so the record
    // channel can only shrink; give the log-writer a bounded moment to
    // drain records emitted before the lock was taken, otherwise they
    // would be appended after the truncation below and replayed on top
    // of a snapshot that already contains their effects
    if let Some(tx) = pending {
        for _ in 0..50 {
            if tx.capacity() == tx.max_capacity() {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    let mut writer = SnapshotWriter::create(atd_path)?;
    for (key, value, expires_at) in ks.iter_live() {
        writer.write_entry(&SnapEntry {
            key: key.to_owned(),
            value: to_persisted(value),
            expires_at,
        })?;
    }
    let count = writer.finish()?;

    journal
        .lock()
        .expect("journal mutex poisoned")
        .truncate()?;
    Ok(count)
}

/// Applies one replayed journal record to the keyspace without
/// re-emitting it. TTLs are rebased at replay time, matching the
/// journal's relative-TTL encoding.
fn apply_record(keyspace: &mut Keyspace, record: LogRecord) {
    if record.verb.is_delete() {
        keyspace.forget(&record.key);
    } else {
        let expires_at = time::expires_at_from_ttl(record.ttl_nanos);
        keyspace.restore(record.key, from_persisted(record.value), expires_at);
    }
}

pub(crate) fn to_persisted(value: &Value) -> PersistedValue {
    match value {
        Value::String(s) => PersistedValue::String(s.clone()),
        Value::Array(elems) => PersistedValue::Array(elems.clone()),
        Value::Object(fields) => PersistedValue::Object(fields.clone()),
    }
}

pub(crate) fn from_persisted(value: PersistedValue) -> Value {
    match value {
        PersistedValue::String(s) => Value::String(s),
        PersistedValue::Array(elems) => Value::Array(elems),
        PersistedValue::Object(fields) => Value::Object(fields),
    }
}

fn set_verb(kind: ValueKind, nx: bool) -> Verb {
    match (kind, nx) {
        (ValueKind::String, false) => Verb::Set,
        (ValueKind::Array, false) => Verb::SetArray,
        (ValueKind::Object, false) => Verb::SetObject,
        (ValueKind::String, true) => Verb::SetNx,
        (ValueKind::Array, true) => Verb::SetArrayNx,
        (ValueKind::Object, true) => Verb::SetObjectNx,
    }
}

/// Builds the journal record for a set mutation.
pub(crate) fn set_record(key: &str, value: &Value, ttl_nanos: i64, nx: bool) -> LogRecord {
    LogRecord {
        timestamp_nanos: time::now_nanos(),
        verb: set_verb(value.kind(), nx),
        key: key.to_owned(),
        value: to_persisted(value),
        ttl_nanos: ttl_nanos.max(0),
    }
}

/// Builds the journal record for a delete.
pub(crate) fn delete_record(key: &str) -> LogRecord {
    LogRecord {
        timestamp_nanos: time::now_nanos(),
        verb: Verb::Del,
        key: key.to_owned(),
        value: PersistedValue::empty(),
        ttl_nanos: 0,
    }
}
