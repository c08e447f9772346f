#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tonehub_core::hash::full_hash;
use tonehub_core::{
    ContentHash, ExtractedTag, ExtractedValue, ExtractionSession, FormatExtractor,
    IndexError, IndexEvent, IndexObserver, Result,
};
use tonehub_model::{FormatCategory, SourceId};

pub const STUB_NAMESPACE: &str = "stub";

/// Counters shared by every session of a [`StubExtractor`].
#[derive(Debug, Default)]
pub struct StubCounters {
    pub extractions: AtomicUsize,
    pub hashes: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl StubCounters {
    pub fn extractions(&self) -> usize {
        self.extractions.load(Ordering::SeqCst)
    }

    pub fn hashes(&self) -> usize {
        self.hashes.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(self)
    }
}

struct InFlight<'a>(&'a StubCounters);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Extractor for `.txt` files whose lines describe their own metadata:
///
/// ```text
/// format=2
/// tag:4=Artist
/// value:42=[{"start":0}]
/// fail=extract
/// ```
///
/// The hash covers the whole file, so identical contents dedupe.
#[derive(Debug, Clone, Default)]
pub struct StubExtractor {
    pub counters: Arc<StubCounters>,
    pub delay: Duration,
}

impl StubExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }
}

impl FormatExtractor for StubExtractor {
    fn namespace(&self) -> &str {
        STUB_NAMESPACE
    }

    fn supports(&self, path: &Path) -> bool {
        path.extension().is_some_and(|ext| ext == "txt")
    }

    fn initialize(&self, path: &Path) -> Result<Box<dyn ExtractionSession>> {
        let contents = fs::read_to_string(path)?;
        Ok(Box::new(StubSession {
            path: path.to_path_buf(),
            contents,
            counters: Arc::clone(&self.counters),
            delay: self.delay,
        }))
    }
}

struct StubSession {
    path: PathBuf,
    contents: String,
    counters: Arc<StubCounters>,
    delay: Duration,
}

impl StubSession {
    fn field(&self, key: &str) -> Option<&str> {
        self.contents.lines().find_map(|line| {
            line.split_once('=')
                .filter(|(k, _)| *k == key)
                .map(|(_, v)| v)
        })
    }

    fn fails(&self) -> Result<()> {
        if self.field("fail") == Some("extract") {
            return Err(IndexError::extraction(&self.path, "corrupt stub file"));
        }
        Ok(())
    }
}

impl ExtractionSession for StubSession {
    fn classify(&mut self) -> Result<FormatCategory> {
        let _guard = self.counters.enter();
        self.counters.extractions.fetch_add(1, Ordering::SeqCst);
        self.fails()?;
        Ok(self
            .field("format")
            .and_then(|raw| raw.parse().ok())
            .map(FormatCategory::from_raw)
            .unwrap_or_default())
    }

    fn extract_tags(&mut self) -> Result<Vec<ExtractedTag>> {
        self.fails()?;
        Ok(self
            .contents
            .lines()
            .filter_map(|line| {
                let rest = line.strip_prefix("tag:")?;
                let (code, value) = rest.split_once('=')?;
                Some(ExtractedTag::new(STUB_NAMESPACE, code.parse().ok()?, value))
            })
            .collect())
    }

    fn extract_values(&mut self) -> Result<Vec<ExtractedValue>> {
        self.fails()?;
        Ok(self
            .contents
            .lines()
            .filter_map(|line| {
                let rest = line.strip_prefix("value:")?;
                let (code, raw) = rest.split_once('=')?;
                let value: Value = serde_json::from_str(raw).ok()?;
                Some(ExtractedValue::new(STUB_NAMESPACE, code.parse().ok()?, value))
            })
            .collect())
    }

    fn compute_hash(&mut self) -> Result<ContentHash> {
        let _guard = self.counters.enter();
        self.counters.hashes.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        Ok(full_hash(self.contents.as_bytes())?)
    }
}

/// Records every event and forwards it to a channel.
#[derive(Debug)]
pub struct RecordingObserver {
    events: Mutex<Vec<IndexEvent>>,
    tx: mpsc::UnboundedSender<IndexEvent>,
}

impl RecordingObserver {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<IndexEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
                tx,
            }),
            rx,
        )
    }

    pub fn events(&self) -> Vec<IndexEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl IndexObserver for RecordingObserver {
    fn on_event(&self, event: &IndexEvent) {
        self.events.lock().unwrap().push(event.clone());
        let _ = self.tx.send(event.clone());
    }
}

/// Wait for the next terminal pass event of `source`.
pub async fn next_pass_end(
    events: &mut mpsc::UnboundedReceiver<IndexEvent>,
    source: SourceId,
) -> IndexEvent {
    let wait = async {
        loop {
            let event = events.recv().await.expect("observer dropped");
            match &event {
                IndexEvent::PassCompleted { source_id, .. }
                | IndexEvent::PassCancelled { source_id, .. }
                | IndexEvent::PassFailed { source_id, .. }
                    if *source_id == source =>
                {
                    return event;
                }
                _ => {}
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(30), wait)
        .await
        .expect("pass did not finish in time")
}

/// Wait for the next `PassStarted` of `source`.
pub async fn next_pass_start(
    events: &mut mpsc::UnboundedReceiver<IndexEvent>,
    source: SourceId,
) {
    let wait = async {
        loop {
            if let IndexEvent::PassStarted { source_id, .. } =
                events.recv().await.expect("observer dropped")
            {
                if source_id == source {
                    return;
                }
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(30), wait)
        .await
        .expect("pass did not start in time")
}

pub fn write(root: &Path, relative: &str, contents: &str) -> PathBuf {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, contents).unwrap();
    path
}

/// Rewrite a file and push its mtime forward so the change is observable at
/// millisecond precision.
pub fn rewrite(path: &Path, contents: &str) {
    fs::write(path, contents).unwrap();
    let file = fs::File::options().write(true).open(path).unwrap();
    let later = std::time::SystemTime::now() + Duration::from_secs(5);
    file.set_modified(later).unwrap();
}
