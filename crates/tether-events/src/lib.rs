//! Append-only, per-run event logs.
//!
//! [`EventStore`] is the pluggable storage contract: `append` assigns the
//! next dense `step_index` and persists the event atomically with respect to
//! other appends to the same run, `load` returns the run's events in append
//! order. [`FileEventStore`] keeps one JSON Lines file per run;
//! [`InMemoryEventStore`] keeps them in a map. [`EventJournal`] couples a
//! store with a broadcast hub so live subscribers see every append.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use parking_lot::Mutex;
use tether_protocol::{Event, EventPayload, RunId};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, instrument, warn};

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append `payload` as the next event of `run_id` and return the stored
    /// event. The read-count + write pair is atomic per run.
    async fn append(&self, run_id: &RunId, payload: EventPayload) -> Result<Event>;

    /// All events of a run in append order; empty for an unknown run.
    async fn load(&self, run_id: &RunId) -> Result<Vec<Event>>;

    async fn exists(&self, run_id: &RunId) -> Result<bool> {
        Ok(!self.load(run_id).await?.is_empty())
    }

    async fn list_runs(&self) -> Result<Vec<RunId>>;
}

/// Size of a log file and the number of events it held when last scanned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct LogExtent {
    bytes: u64,
    events: u64,
    /// The last event has no trailing newline yet.
    unterminated: bool,
}

/// What follows the last newline of a log.
#[derive(Debug)]
enum Tail {
    Clean,
    /// A whole event written without its newline.
    Unterminated(Box<Event>),
    /// Partial bytes of an interrupted write.
    Torn,
}

fn classify_tail(tail: &[u8]) -> Tail {
    if tail.iter().all(u8::is_ascii_whitespace) {
        return Tail::Clean;
    }
    match serde_json::from_slice::<Event>(tail) {
        Ok(event) => Tail::Unterminated(Box::new(event)),
        Err(_) => Tail::Torn,
    }
}

fn is_terminal(payload: &EventPayload) -> bool {
    matches!(payload, EventPayload::RunStatus(record) if record.status.is_terminal())
}

#[derive(Debug)]
pub struct FileEventStore {
    root: PathBuf,
    write_locks: Mutex<HashMap<RunId, Arc<tokio::sync::Mutex<()>>>>,
    extent_cache: Mutex<HashMap<RunId, LogExtent>>,
}

impl FileEventStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_locks: Mutex::new(HashMap::new()),
            extent_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }

    pub fn file_path(&self, run_id: &RunId) -> Result<PathBuf> {
        validate_run_id(run_id)?;
        Ok(self.runs_dir().join(format!("{run_id}.jsonl")))
    }

    async fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create runs dir {parent:?}"))?;
        }
        Ok(())
    }

    fn lock_for(&self, run_id: &RunId) -> Arc<tokio::sync::Mutex<()>> {
        let mut guard = self.write_locks.lock();
        guard
            .entry(run_id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn cached_extent(&self, run_id: &RunId) -> Option<LogExtent> {
        self.extent_cache.lock().get(run_id).copied()
    }

    fn update_cached_extent(&self, run_id: &RunId, extent: LogExtent) {
        self.extent_cache.lock().insert(run_id.clone(), extent);
    }

    /// Drop per-run bookkeeping once a run is terminal. The lock entry stays
    /// while another append holds or awaits it.
    fn forget(&self, run_id: &RunId, lock: &Arc<tokio::sync::Mutex<()>>) {
        self.extent_cache.lock().remove(run_id);
        let mut locks = self.write_locks.lock();
        let idle = locks
            .get(run_id)
            .is_some_and(|entry| Arc::ptr_eq(entry, lock) && Arc::strong_count(entry) == 2);
        if idle {
            locks.remove(run_id);
        }
    }

    async fn path_exists(path: &Path) -> Result<bool> {
        fs::try_exists(path)
            .await
            .with_context(|| format!("failed checking {path:?}"))
    }

    /// Count the events in the file. A torn trailing line left by an
    /// interrupted write is cut off; a whole event that only lacks its
    /// newline is kept and counted.
    async fn scan_extent(path: &Path) -> Result<LogExtent> {
        if !Self::path_exists(path).await? {
            return Ok(LogExtent::default());
        }

        let data = fs::read(path)
            .await
            .with_context(|| format!("failed reading event log {path:?}"))?;
        let (complete, tail) = split_complete_lines(&data);
        let events = complete
            .split(|byte| *byte == b'\n')
            .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
            .count() as u64;

        match classify_tail(tail) {
            Tail::Clean => Ok(LogExtent {
                bytes: data.len() as u64,
                events,
                unterminated: false,
            }),
            Tail::Unterminated(_) => {
                debug!(path = %path.display(), "last event has no trailing newline");
                Ok(LogExtent {
                    bytes: data.len() as u64,
                    events: events + 1,
                    unterminated: true,
                })
            }
            Tail::Torn => {
                warn!(
                    path = %path.display(),
                    torn_bytes = tail.len(),
                    "discarding torn trailing event line"
                );
                let file = OpenOptions::new()
                    .write(true)
                    .open(path)
                    .await
                    .with_context(|| format!("failed opening event log {path:?}"))?;
                file.set_len(complete.len() as u64).await?;
                file.sync_data().await?;
                Ok(LogExtent {
                    bytes: complete.len() as u64,
                    events,
                    unterminated: false,
                })
            }
        }
    }
}

/// Split a log into its newline-terminated prefix and whatever follows.
fn split_complete_lines(data: &[u8]) -> (&[u8], &[u8]) {
    match data.iter().rposition(|byte| *byte == b'\n') {
        Some(last) => data.split_at(last + 1),
        None => (&data[..0], data),
    }
}

/// Run ids become file names, so reject anything that could escape the
/// runs directory.
pub fn validate_run_id(run_id: &RunId) -> Result<()> {
    let id = run_id.as_str();
    if id.is_empty() {
        bail!("run id cannot be empty");
    }
    if id.contains('/') || id.contains('\\') || id.contains("..") || id.contains('\0') {
        bail!("run id contains invalid characters: {id:?}");
    }
    if id.chars().any(char::is_control) {
        bail!("run id contains control characters: {id:?}");
    }
    Ok(())
}

#[async_trait]
impl EventStore for FileEventStore {
    #[instrument(skip(self, payload), fields(run_id = %run_id, event_type = %payload.event_type()))]
    async fn append(&self, run_id: &RunId, payload: EventPayload) -> Result<Event> {
        let path = self.file_path(run_id)?;
        Self::ensure_parent(&path).await?;

        let lock = self.lock_for(run_id);
        let _guard = lock.lock().await;

        let current_bytes = match fs::metadata(&path).await {
            Ok(metadata) => metadata.len(),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => 0,
            Err(error) => {
                return Err(error).with_context(|| format!("failed to stat event log {path:?}"));
            }
        };
        let extent = match self.cached_extent(run_id) {
            Some(extent) if extent.bytes == current_bytes => extent,
            cached => {
                if cached.is_some() {
                    debug!("event log changed outside this store; rescanning");
                }
                let extent = Self::scan_extent(&path).await?;
                self.update_cached_extent(run_id, extent);
                extent
            }
        };

        let event = Event::new(run_id.clone(), extent.events, payload);
        let mut line = String::new();
        if extent.unterminated {
            line.push('\n');
        }
        line.push_str(&serde_json::to_string(&event).context("failed serializing event")?);
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("failed opening event log {path:?}"))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        file.sync_data()
            .await
            .with_context(|| format!("failed syncing event log {path:?}"))?;

        self.update_cached_extent(
            run_id,
            LogExtent {
                bytes: extent.bytes + line.len() as u64,
                events: extent.events + 1,
                unterminated: false,
            },
        );
        debug!(step_index = event.step_index, "event appended to store");
        if is_terminal(&event.payload) {
            self.forget(run_id, &lock);
        }
        Ok(event)
    }

    #[instrument(skip(self), fields(run_id = %run_id))]
    async fn load(&self, run_id: &RunId) -> Result<Vec<Event>> {
        let path = self.file_path(run_id)?;
        if !Self::path_exists(&path).await? {
            return Ok(Vec::new());
        }

        let data = fs::read(&path)
            .await
            .with_context(|| format!("failed reading event log {path:?}"))?;
        let (complete, tail) = split_complete_lines(&data);

        let mut out = Vec::new();
        for line in complete.split(|byte| *byte == b'\n') {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let event: Event = serde_json::from_slice(line)
                .with_context(|| format!("failed parsing event line in {path:?}"))?;
            out.push(event);
        }
        match classify_tail(tail) {
            Tail::Clean => {}
            Tail::Unterminated(event) => out.push(*event),
            Tail::Torn => warn!(torn_bytes = tail.len(), "ignoring torn trailing event line"),
        }
        debug!(count = out.len(), "events loaded from store");
        Ok(out)
    }

    async fn list_runs(&self) -> Result<Vec<RunId>> {
        let dir = self.runs_dir();
        if !Self::path_exists(&dir).await? {
            return Ok(Vec::new());
        }
        let mut entries = fs::read_dir(&dir)
            .await
            .with_context(|| format!("failed listing runs dir {dir:?}"))?;
        let mut runs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("jsonl") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                runs.push(RunId::from(stem));
            }
        }
        runs.sort();
        Ok(runs)
    }
}

/// Process-local store; count + push happen under one lock.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    runs: Mutex<HashMap<RunId, Vec<Event>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, run_id: &RunId, payload: EventPayload) -> Result<Event> {
        let mut runs = self.runs.lock();
        let events = runs.entry(run_id.clone()).or_default();
        let event = Event::new(run_id.clone(), events.len() as u64, payload);
        events.push(event.clone());
        Ok(event)
    }

    async fn load(&self, run_id: &RunId) -> Result<Vec<Event>> {
        Ok(self.runs.lock().get(run_id).cloned().unwrap_or_default())
    }

    async fn list_runs(&self) -> Result<Vec<RunId>> {
        let mut runs: Vec<_> = self.runs.lock().keys().cloned().collect();
        runs.sort();
        Ok(runs)
    }
}

#[derive(Clone, Debug)]
pub struct EventStreamHub {
    sender: broadcast::Sender<Event>,
}

impl EventStreamHub {
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer);
        Self { sender }
    }

    pub fn publish(&self, event: Event) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn subscribe_stream(&self) -> BroadcastStream<Event> {
        BroadcastStream::new(self.sender.subscribe())
    }
}

#[derive(Clone)]
pub struct EventJournal {
    store: Arc<dyn EventStore>,
    stream: EventStreamHub,
}

impl EventJournal {
    pub fn new(store: Arc<dyn EventStore>, stream: EventStreamHub) -> Self {
        Self { store, stream }
    }

    /// Persist first, then publish. A send with no subscribers is not an error.
    pub async fn append(&self, run_id: &RunId, payload: impl Into<EventPayload>) -> Result<Event> {
        let event = self.store.append(run_id, payload.into()).await?;
        self.stream.publish(event.clone());
        debug!(
            run_id = %run_id,
            step_index = event.step_index,
            "event published to stream"
        );
        Ok(event)
    }

    pub async fn load(&self, run_id: &RunId) -> Result<Vec<Event>> {
        self.store.load(run_id).await
    }

    pub async fn list_runs(&self) -> Result<Vec<RunId>> {
        self.store.list_runs().await
    }

    pub fn store(&self) -> Arc<dyn EventStore> {
        self.store.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.stream.subscribe()
    }

    pub fn subscribe_stream(&self) -> BroadcastStream<Event> {
        self.stream.subscribe_stream()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::{SystemTime, UNIX_EPOCH};

    use anyhow::Result;
    use tether_protocol::{EventType, RunId, RunStatusRecord, UserMessage};
    use tokio::fs;
    use tokio::io::AsyncWriteExt;

    use crate::{EventJournal, EventStore, EventStreamHub, FileEventStore, InMemoryEventStore};

    fn unique_test_root(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("{name}-{nanos}"))
    }

    fn user(content: &str) -> tether_protocol::EventPayload {
        UserMessage {
            content: content.to_owned(),
        }
        .into()
    }

    #[tokio::test]
    async fn file_store_assigns_dense_step_indexes() -> Result<()> {
        let root = unique_test_root("tether-events-dense");
        let store = FileEventStore::new(&root);
        let run_id = RunId::generate();

        let first = store.append(&run_id, user("hello")).await?;
        let second = store
            .append(&run_id, RunStatusRecord::completed("hi").into())
            .await?;
        assert_eq!(first.step_index, 0);
        assert_eq!(second.step_index, 1);

        let events = store.load(&run_id).await?;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type(), EventType::UserMessage);
        assert_eq!(events[1].event_type(), EventType::RunStatus);
        assert_eq!(events, vec![first, second]);

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn unknown_run_loads_as_empty() -> Result<()> {
        let root = unique_test_root("tether-events-unknown");
        let store = FileEventStore::new(&root);
        assert!(store.load(&RunId::from("missing")).await?.is_empty());
        assert!(!store.exists(&RunId::from("missing")).await?);
        Ok(())
    }

    #[tokio::test]
    async fn file_store_sees_appends_from_another_writer() -> Result<()> {
        let root = unique_test_root("tether-events-external");
        let ours = FileEventStore::new(&root);
        let theirs = FileEventStore::new(&root);
        let run_id = RunId::generate();

        ours.append(&run_id, user("one")).await?;
        theirs.append(&run_id, user("two")).await?;
        let third = ours.append(&run_id, user("three")).await?;
        assert_eq!(third.step_index, 2);

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn torn_trailing_line_is_discarded() -> Result<()> {
        let root = unique_test_root("tether-events-torn");
        let store = FileEventStore::new(&root);
        let run_id = RunId::generate();
        store.append(&run_id, user("intact")).await?;

        let path = store.file_path(&run_id)?;
        let mut file = fs::OpenOptions::new().append(true).open(&path).await?;
        file.write_all(br#"{"run_id": "#).await?;
        file.flush().await?;
        drop(file);

        assert_eq!(store.load(&run_id).await?.len(), 1);

        let fresh = FileEventStore::new(&root);
        let next = fresh.append(&run_id, user("after crash")).await?;
        assert_eq!(next.step_index, 1);
        assert_eq!(fresh.load(&run_id).await?.len(), 2);

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn event_without_trailing_newline_is_kept() -> Result<()> {
        let root = unique_test_root("tether-events-unterminated");
        let store = FileEventStore::new(&root);
        let run_id = RunId::from("manual");
        let path = store.file_path(&run_id)?;
        fs::create_dir_all(store.runs_dir()).await?;
        let written = tether_protocol::Event::new(run_id.clone(), 0, user("by hand"));
        fs::write(&path, serde_json::to_string(&written)?).await?;

        assert_eq!(store.load(&run_id).await?, vec![written.clone()]);

        let next = store.append(&run_id, user("next")).await?;
        assert_eq!(next.step_index, 1);
        assert_eq!(store.load(&run_id).await?, vec![written, next]);
        let data = fs::read_to_string(&path).await?;
        assert_eq!(data.lines().count(), 2);
        assert!(data.ends_with('\n'));

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn io_errors_are_not_read_as_an_empty_log() -> Result<()> {
        let root = unique_test_root("tether-events-broken");
        fs::create_dir_all(&root).await?;
        fs::write(root.join("runs"), b"not a directory").await?;
        let store = FileEventStore::new(&root);
        let run_id = RunId::from("some-run");

        assert!(store.load(&run_id).await.is_err());
        assert!(store.exists(&run_id).await.is_err());
        assert!(store.list_runs().await.is_err());
        assert!(store.append(&run_id, user("x")).await.is_err());

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn terminal_runs_release_their_bookkeeping() -> Result<()> {
        let root = unique_test_root("tether-events-forget");
        let store = FileEventStore::new(&root);
        let done = RunId::from("done");
        let open = RunId::from("open");

        store.append(&done, user("hi")).await?;
        store.append(&open, user("hi")).await?;
        assert_eq!(store.write_locks.lock().len(), 2);

        store
            .append(&done, RunStatusRecord::completed("bye").into())
            .await?;
        assert!(!store.write_locks.lock().contains_key(&done));
        assert!(!store.extent_cache.lock().contains_key(&done));
        assert!(store.write_locks.lock().contains_key(&open));

        // A later append rescans instead of trusting a stale count.
        let late = store.append(&done, user("late")).await?;
        assert_eq!(late.step_index, 2);

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn rejects_run_ids_that_escape_the_runs_dir() -> Result<()> {
        let root = unique_test_root("tether-events-invalid");
        let store = FileEventStore::new(&root);
        for bad in ["", "../etc", "a/b", "a\\b", "bad\nid"] {
            let err = store.append(&RunId::from(bad), user("x")).await.unwrap_err();
            assert!(err.to_string().contains("run id"), "{bad:?}: {err}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn list_runs_reports_each_log_once() -> Result<()> {
        let root = unique_test_root("tether-events-list");
        let store = FileEventStore::new(&root);
        let a = RunId::from("aaaa");
        let b = RunId::from("bbbb");
        store.append(&b, user("b")).await?;
        store.append(&a, user("a1")).await?;
        store.append(&a, user("a2")).await?;
        assert_eq!(store.list_runs().await?, vec![a, b]);

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn journal_publishes_after_persisting() -> Result<()> {
        let store = Arc::new(InMemoryEventStore::new());
        let journal = EventJournal::new(store.clone(), EventStreamHub::new(16));
        let mut rx = journal.subscribe();
        let run_id = RunId::generate();

        let appended = journal
            .append(&run_id, UserMessage { content: "hi".into() })
            .await?;
        let received = rx.recv().await?;
        assert_eq!(received, appended);
        assert_eq!(store.load(&run_id).await?, vec![appended]);
        Ok(())
    }
}
