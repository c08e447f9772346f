mod common;

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc;
use tonehub_core::{
    ExtractorRegistry, InMemoryCatalog, IndexEvent, IndexerConfig, ReconcilerHandle,
    SourceReconciler,
};
use tonehub_model::{FormatCategory, Source, SourceId};

use common::{RecordingObserver, StubExtractor, next_pass_end, next_pass_start, write};

const FILES: usize = 40;
const HASH_DELAY: Duration = Duration::from_millis(25);

fn config(poll_interval_ms: u64) -> IndexerConfig {
    let mut config = IndexerConfig {
        poll_interval_ms,
        ..IndexerConfig::default()
    };
    config.watch.enabled = false;
    config
}

/// A tree that takes roughly a second to index with [`HASH_DELAY`].
fn slow_tree(format: u32) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for i in 0..FILES {
        write(
            dir.path(),
            &format!("disc{}/track{i:02}.txt", i % 4),
            &format!("format={format}\ntag:1=Track {i}\n"),
        );
    }
    dir
}

fn spawn(
    catalog: &InMemoryCatalog,
    stub: &StubExtractor,
    config: IndexerConfig,
) -> (
    ReconcilerHandle,
    Arc<RecordingObserver>,
    mpsc::UnboundedReceiver<IndexEvent>,
) {
    let (observer, events) = RecordingObserver::new();
    let handle = SourceReconciler::new(
        Arc::new(catalog.clone()),
        ExtractorRegistry::new().with(Arc::new(stub.clone())),
        config,
    )
    .with_observer(observer.clone())
    .spawn()
    .unwrap();
    (handle, observer, events)
}

/// Every pass start must be followed by its end before the next one starts.
fn assert_passes_never_overlap(events: &[IndexEvent], source: SourceId) {
    let mut open = false;
    for event in events {
        match event {
            IndexEvent::PassStarted { source_id, .. } if *source_id == source => {
                assert!(!open, "two passes of one source overlapped: {events:#?}");
                open = true;
            }
            IndexEvent::PassCompleted { source_id, .. }
            | IndexEvent::PassCancelled { source_id, .. }
            | IndexEvent::PassFailed { source_id, .. }
                if *source_id == source =>
            {
                open = false;
            }
            _ => {}
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn source_change_cancels_and_restarts_the_running_pass() {
    let dir = slow_tree(2);
    let source = Source::new(dir.path());
    let catalog = InMemoryCatalog::new();
    catalog.upsert_source(source.clone()).await;
    let stub = StubExtractor::with_delay(HASH_DELAY);
    let (handle, observer, mut events) = spawn(&catalog, &stub, config(3_600_000));

    next_pass_start(&mut events, source.id).await;
    for _ in 0..3 {
        handle.notify_source_changed(source.id).await.unwrap();
    }

    let first = next_pass_end(&mut events, source.id).await;
    assert!(matches!(first, IndexEvent::PassCancelled { .. }), "{first:?}");

    let second = next_pass_end(&mut events, source.id).await;
    let IndexEvent::PassCompleted { update, .. } = second else {
        panic!("expected the restarted pass to complete, got {second:?}");
    };
    assert_eq!(update.created + update.unchanged, FILES as u64);
    assert_eq!(catalog.entry_count().await, FILES);
    assert_eq!(stub.counters.max_in_flight(), 1);

    handle.shutdown().await;
    assert_passes_never_overlap(&observer.events(), source.id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ticks_leave_a_running_pass_alone() {
    let dir = slow_tree(2);
    let source = Source::new(dir.path());
    let catalog = InMemoryCatalog::new();
    catalog.upsert_source(source.clone()).await;
    let stub = StubExtractor::with_delay(HASH_DELAY);
    let (handle, observer, mut events) = spawn(&catalog, &stub, config(50));

    let first = next_pass_end(&mut events, source.id).await;
    let IndexEvent::PassCompleted { update, .. } = first else {
        panic!("ticks must not cancel a running pass, got {first:?}");
    };
    assert_eq!(update.created, FILES as u64);

    // Later ticks rescan the idle source, one pass at a time.
    next_pass_end(&mut events, source.id).await;
    handle.shutdown().await;
    assert_eq!(stub.counters.max_in_flight(), 1);
    assert_passes_never_overlap(&observer.events(), source.id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn removed_source_is_cancelled() {
    let dir = slow_tree(2);
    let source = Source::new(dir.path());
    let catalog = InMemoryCatalog::new();
    catalog.upsert_source(source.clone()).await;
    let stub = StubExtractor::with_delay(HASH_DELAY);
    let (handle, observer, mut events) = spawn(&catalog, &stub, config(3_600_000));

    next_pass_start(&mut events, source.id).await;
    catalog.remove_source(source.id).await;
    handle.reconcile_now().await.unwrap();

    let end = next_pass_end(&mut events, source.id).await;
    assert!(matches!(end, IndexEvent::PassCancelled { .. }), "{end:?}");

    handle.reconcile_now().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.shutdown().await;

    let starts = observer
        .events()
        .iter()
        .filter(|event| matches!(event, IndexEvent::PassStarted { .. }))
        .count();
    assert_eq!(starts, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn edited_source_restarts_with_its_new_filter() {
    let dir = slow_tree(2);
    let source = Source::new(dir.path());
    let catalog = InMemoryCatalog::new();
    catalog.upsert_source(source.clone()).await;
    let stub = StubExtractor::with_delay(HASH_DELAY);
    let (handle, _observer, mut events) = spawn(&catalog, &stub, config(3_600_000));

    next_pass_start(&mut events, source.id).await;
    catalog
        .upsert_source(source.clone().with_filter(FormatCategory::Podcast))
        .await;
    handle.reconcile_now().await.unwrap();

    let first = next_pass_end(&mut events, source.id).await;
    assert!(matches!(first, IndexEvent::PassCancelled { .. }), "{first:?}");

    let second = next_pass_end(&mut events, source.id).await;
    let IndexEvent::PassCompleted { update, .. } = second else {
        panic!("expected a completed pass, got {second:?}");
    };
    assert_eq!(update.created, 0);
    assert_eq!(update.unchanged, 0);
    assert_eq!(update.filtered, FILES as u64);
    // Entries committed before the edit no longer pass the filter.
    let entries = catalog.entries(source.id).await;
    assert!(entries.iter().all(|entry| !entry.enabled), "{entries:?}");

    handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disabled_sources_are_never_scanned() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.txt", "tag:1=A\n");
    let disabled = Source::new(dir.path()).disabled();
    let catalog = InMemoryCatalog::new();
    catalog.upsert_source(disabled.clone()).await;
    let stub = StubExtractor::new();
    let (handle, observer, _events) = spawn(&catalog, &stub, config(50));

    handle.notify_source_changed(disabled.id).await.unwrap();
    handle.reconcile_now().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    handle.shutdown().await;

    assert!(observer.events().is_empty());
    assert_eq!(catalog.entry_count().await, 0);
    assert_eq!(stub.counters.hashes(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sources_are_indexed_independently() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    write(first.path(), "a.txt", "tag:1=A\n");
    write(second.path(), "b.txt", "tag:1=B\n");
    write(second.path(), "c.txt", "tag:1=C\n");

    let one = Source::new(first.path());
    let two = Source::new(second.path());
    let catalog = InMemoryCatalog::new();
    catalog.upsert_source(one.clone()).await;
    catalog.upsert_source(two.clone()).await;
    let stub = StubExtractor::new();
    let (handle, observer, _events) = spawn(&catalog, &stub, config(3_600_000));

    let done = async {
        loop {
            if catalog.entries(one.id).await.len() == 1
                && catalog.entries(two.id).await.len() == 2
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(30), done).await.unwrap();
    handle.shutdown().await;

    let events = observer.events();
    assert_passes_never_overlap(&events, one.id);
    assert_passes_never_overlap(&events, two.id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_cancels_in_flight_passes() {
    let dir = slow_tree(2);
    let source = Source::new(dir.path());
    let catalog = InMemoryCatalog::new();
    catalog.upsert_source(source.clone()).await;
    let stub = StubExtractor::with_delay(HASH_DELAY);
    let (handle, observer, mut events) = spawn(&catalog, &stub, config(3_600_000));

    next_pass_start(&mut events, source.id).await;
    tokio::time::timeout(Duration::from_secs(10), handle.shutdown())
        .await
        .expect("shutdown hung");

    assert!(handle.is_shutdown());
    assert!(
        observer
            .events()
            .iter()
            .any(|event| matches!(event, IndexEvent::PassCancelled { .. }))
    );
    assert!(catalog.entry_count().await < FILES);
    assert!(handle.reconcile_now().await.is_err());
}

#[tokio::test]
async fn spawn_rejects_an_empty_extractor_registry() {
    let result = SourceReconciler::new(
        Arc::new(InMemoryCatalog::new()),
        ExtractorRegistry::new(),
        config(1_000),
    )
    .spawn();
    assert!(result.is_err());
}
