mod common;

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc;
use tonehub_core::{
    CatalogRepository, EntryChanges, ExtractedTag, ExtractedValue, ExtractorRegistry,
    InMemoryCatalog, IndexEvent, IndexerConfig, ReconcilerHandle, SourceReconciler,
    UpdateStats,
};
use tonehub_model::{CUSTOM_TAG_TYPE_START, FormatCategory, Source};

use common::{RecordingObserver, StubExtractor, next_pass_end, rewrite, write};

struct Harness {
    dir: TempDir,
    catalog: InMemoryCatalog,
    source: Source,
    stub: StubExtractor,
    events: mpsc::UnboundedReceiver<IndexEvent>,
    handle: Option<ReconcilerHandle>,
}

fn config(grace_secs: u64) -> IndexerConfig {
    let mut config = IndexerConfig {
        poll_interval_ms: 3_600_000,
        orphan_grace_secs: grace_secs,
        ..IndexerConfig::default()
    };
    config.watch.enabled = false;
    config
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let source = Source::new(dir.path());
        let (_, events) = mpsc::unbounded_channel();
        Self {
            dir,
            catalog: InMemoryCatalog::new(),
            source,
            stub: StubExtractor::new(),
            events,
            handle: None,
        }
    }

    fn write(&self, relative: &str, contents: &str) {
        write(self.dir.path(), relative, contents);
    }

    /// Start the reconciler and wait for the first pass.
    async fn start(&mut self, config: IndexerConfig) -> IndexEvent {
        self.catalog.upsert_source(self.source.clone()).await;
        let (observer, events) = RecordingObserver::new();
        self.events = events;
        let extractors = ExtractorRegistry::new().with(Arc::new(self.stub.clone()));
        let handle = SourceReconciler::new(Arc::new(self.catalog.clone()), extractors, config)
            .with_observer(observer)
            .spawn()
            .unwrap();
        self.handle = Some(handle);
        next_pass_end(&mut self.events, self.source.id).await
    }

    async fn rescan(&mut self) -> IndexEvent {
        self.handle.as_ref().unwrap().reconcile_now().await.unwrap();
        next_pass_end(&mut self.events, self.source.id).await
    }

    async fn stop(self) {
        if let Some(handle) = self.handle {
            handle.shutdown().await;
        }
    }
}

fn completed(event: IndexEvent) -> UpdateStats {
    match event {
        IndexEvent::PassCompleted { update, .. } => update,
        other => panic!("expected a completed pass, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reindexing_an_unchanged_tree_only_refreshes_liveness() {
    let mut harness = Harness::new();
    harness.write("a.txt", "format=1\ntag:1=Alpha\ntag:4=Shared Artist\n");
    harness.write("nested/b.txt", "format=1\ntag:1=Beta\ntag:4=Shared Artist\nvalue:42=[1,2]\n");
    harness.write("nested/cover.jpg", "not indexed");

    let first = completed(harness.start(config(86_400)).await);
    assert_eq!(first.created, 2);
    assert_eq!(harness.catalog.tag_count().await, 3);

    let writes = harness.catalog.write_count();
    let extractions = harness.stub.counters.extractions();
    let before = harness.catalog.record_at(harness.source.id, "nested/b.txt").await.unwrap();

    let second = completed(harness.rescan().await);
    assert_eq!(second.unchanged, 2);
    assert_eq!(second.created + second.updated + second.moved, 0);
    assert_eq!(harness.catalog.write_count(), writes);
    assert_eq!(harness.stub.counters.extractions(), extractions);

    let after = harness.catalog.record_at(harness.source.id, "nested/b.txt").await.unwrap();
    assert_eq!(after.tags, before.tags);
    assert_eq!(after.values, before.values);
    assert!(after.entry.last_checked_at >= before.entry.last_checked_at);
    assert_eq!(after.entry.hash, before.entry.hash);

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn moved_file_keeps_its_entry_without_re_extraction() {
    let mut harness = Harness::new();
    harness.write("inbox/book.txt", "format=2\ntag:1=Dune\nvalue:42=[{\"start\":0}]\n");
    completed(harness.start(config(86_400)).await);

    let original = harness
        .catalog
        .record_at(harness.source.id, "inbox/book.txt")
        .await
        .unwrap();
    let extractions = harness.stub.counters.extractions();

    fs::create_dir_all(harness.dir.path().join("library/herbert")).unwrap();
    fs::rename(
        harness.dir.path().join("inbox/book.txt"),
        harness.dir.path().join("library/herbert/dune.txt"),
    )
    .unwrap();

    let stats = completed(harness.rescan().await);
    assert_eq!(stats.moved, 1);
    assert_eq!(stats.created, 0);
    assert_eq!(harness.stub.counters.extractions(), extractions);

    let moved = harness
        .catalog
        .record_at(harness.source.id, "library/herbert/dune.txt")
        .await
        .unwrap();
    assert_eq!(moved.entry.id, original.entry.id);
    assert_eq!(moved.tags, original.tags);
    assert_eq!(moved.values, original.values);
    assert!(moved.entry.enabled);
    assert!(
        harness
            .catalog
            .record_at(harness.source.id, "inbox/book.txt")
            .await
            .is_none()
    );
    assert_eq!(harness.catalog.entry_count().await, 1);

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn identical_copies_keep_separate_entries() {
    let mut harness = Harness::new();
    harness.write("one.txt", "tag:1=Same\n");
    harness.write("two.txt", "tag:1=Same\n");

    let first = completed(harness.start(config(86_400)).await);
    assert_eq!(first.created, 2);
    assert_eq!(first.moved, 0);

    let second = completed(harness.rescan().await);
    assert_eq!(second.unchanged, 2);
    assert_eq!(harness.catalog.entry_count().await, 2);

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn custom_associations_survive_re_extraction() {
    let mut harness = Harness::new();
    let path = write(harness.dir.path(), "a.txt", "tag:1=Old Title\ntag:4=Artist\n");
    completed(harness.start(config(86_400)).await);

    let record = harness.catalog.record_at(harness.source.id, "a.txt").await.unwrap();
    let mut custom = EntryChanges::entry_only(record.entry.clone());
    custom
        .add_tags
        .push(ExtractedTag::new("user", CUSTOM_TAG_TYPE_START, "favourite"));
    custom.add_values.push(ExtractedValue::new(
        "user",
        CUSTOM_TAG_TYPE_START + 1,
        serde_json::json!({"rating": 5}),
    ));
    harness.catalog.apply_entry_changes(custom).await.unwrap();

    // The extractor now reports nothing at all.
    rewrite(&path, "format=1\n");
    let stats = completed(harness.rescan().await);
    assert_eq!(stats.updated, 1);

    let record = harness.catalog.record_at(harness.source.id, "a.txt").await.unwrap();
    assert_eq!(record.tags.len(), 1);
    assert_eq!(record.tags[0].tag.value, "favourite");
    assert_eq!(record.values.len(), 1);
    assert_eq!(record.values[0].type_code, CUSTOM_TAG_TYPE_START + 1);
    assert_eq!(record.entry.format, FormatCategory::Music);

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn re_extracting_identical_tags_keeps_associations() {
    let mut harness = Harness::new();
    let path = write(harness.dir.path(), "a.txt", "tag:1=Title\ntag:10=Rock\n");
    completed(harness.start(config(86_400)).await);
    let before = harness.catalog.record_at(harness.source.id, "a.txt").await.unwrap();

    rewrite(&path, "tag:10=Rock\ntag:1=Title\n");
    let stats = completed(harness.rescan().await);
    assert_eq!(stats.updated, 1);

    let after = harness.catalog.record_at(harness.source.id, "a.txt").await.unwrap();
    assert_eq!(after.tags, before.tags);
    assert_ne!(after.entry.hash, before.entry.hash);
    assert!(after.entry.modified_at > before.entry.modified_at);

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deleted_file_is_disabled_then_purged_after_the_grace_period() {
    let mut harness = Harness::new();
    let gone = write(harness.dir.path(), "a.txt", "tag:1=Only A\ntag:4=Both\n");
    harness.write("b.txt", "tag:1=Only B\ntag:4=Both\n");

    assert_eq!(completed(harness.start(config(2)).await).created, 2);
    assert_eq!(harness.catalog.tag_count().await, 3);

    fs::remove_file(gone).unwrap();
    let second = harness.rescan().await;
    let IndexEvent::PassCompleted { sweep, .. } = second else {
        panic!("expected a completed pass, got {second:?}");
    };
    assert_eq!(sweep.disabled, 1);
    assert_eq!(sweep.deleted, 0);
    let a = harness.catalog.record_at(harness.source.id, "a.txt").await.unwrap();
    assert!(!a.entry.enabled);
    assert!(
        harness
            .catalog
            .record_at(harness.source.id, "b.txt")
            .await
            .unwrap()
            .entry
            .enabled
    );

    tokio::time::sleep(Duration::from_millis(2_100)).await;
    let third = harness.rescan().await;
    let IndexEvent::PassCompleted { sweep, .. } = third else {
        panic!("expected a completed pass, got {third:?}");
    };
    assert_eq!(sweep.deleted, 1);
    assert_eq!(sweep.tags_collected, 1);
    assert!(harness.catalog.record_at(harness.source.id, "a.txt").await.is_none());
    assert_eq!(harness.catalog.entry_count().await, 1);
    assert_eq!(harness.catalog.tag_count().await, 2);
    assert!(harness.catalog.find_tag_by_value("Only A").await.unwrap().is_none());
    assert!(harness.catalog.find_tag_by_value("Both").await.unwrap().is_some());

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reappearing_file_is_re_enabled() {
    let mut harness = Harness::new();
    let path = write(harness.dir.path(), "a.txt", "tag:1=Title\n");
    completed(harness.start(config(86_400)).await);

    let parked = harness.dir.path().join("a.parked");
    fs::rename(&path, &parked).unwrap();
    completed(harness.rescan().await);
    assert!(!harness.catalog.entries(harness.source.id).await[0].enabled);

    fs::rename(&parked, &path).unwrap();
    let stats = completed(harness.rescan().await);
    assert_eq!(stats.unchanged, 1);
    assert!(harness.catalog.entries(harness.source.id).await[0].enabled);

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn format_filter_skips_other_categories() {
    let mut harness = Harness::new();
    harness.source = harness.source.clone().with_filter(FormatCategory::Audiobook);
    harness.write("book.txt", "format=2\n");
    harness.write("song.txt", "format=1\n");
    harness.write("unknown.txt", "tag:1=Unclassified\n");

    let stats = completed(harness.start(config(86_400)).await);
    assert_eq!(stats.created, 2);
    assert_eq!(stats.filtered, 1);

    let unknown = harness.catalog.record_at(harness.source.id, "unknown.txt").await.unwrap();
    assert_eq!(unknown.entry.format, FormatCategory::Audiobook);
    assert!(harness.catalog.record_at(harness.source.id, "song.txt").await.is_none());

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn narrowing_the_filter_disables_entries_it_now_rejects() {
    let mut harness = Harness::new();
    harness.write("song1.txt", "format=1\n");
    let touched = write(harness.dir.path(), "song2.txt", "format=1\n");
    harness.write("book.txt", "format=2\n");
    assert_eq!(completed(harness.start(config(86_400)).await).created, 3);

    harness
        .catalog
        .upsert_source(harness.source.clone().with_filter(FormatCategory::Audiobook))
        .await;
    rewrite(&touched, "format=1\n");
    let stats = completed(harness.rescan().await);
    assert_eq!(stats.filtered, 2);
    assert_eq!(stats.unchanged, 1);

    let (catalog, source) = (harness.catalog.clone(), harness.source.id);
    let enabled = |location: &'static str| {
        let catalog = catalog.clone();
        async move { catalog.record_at(source, location).await.unwrap().entry.enabled }
    };
    assert!(!enabled("song1.txt").await);
    assert!(!enabled("song2.txt").await);
    assert!(enabled("book.txt").await);

    harness.catalog.upsert_source(harness.source.clone()).await;
    let stats = completed(harness.rescan().await);
    assert_eq!(stats.unchanged, 2);
    assert_eq!(stats.updated, 1);
    assert!(enabled("song1.txt").await);
    assert!(enabled("song2.txt").await);

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn older_modification_time_is_not_re_extracted() {
    let mut harness = Harness::new();
    let path = write(harness.dir.path(), "a.txt", "tag:1=Original\n");
    completed(harness.start(config(86_400)).await);
    let extractions = harness.stub.counters.extractions();

    fs::write(&path, "tag:1=Rewritten\n").unwrap();
    let file = fs::File::options().write(true).open(&path).unwrap();
    file.set_modified(std::time::SystemTime::now() - Duration::from_secs(3_600))
        .unwrap();

    let stats = completed(harness.rescan().await);
    assert_eq!(stats.unchanged, 1);
    assert_eq!(stats.updated, 0);
    assert_eq!(harness.stub.counters.extractions(), extractions);

    let record = harness.catalog.record_at(harness.source.id, "a.txt").await.unwrap();
    assert_eq!(record.tags[0].tag.value, "Original");

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn present_file_survives_a_failed_liveness_refresh() {
    let mut harness = Harness::new();
    harness.catalog =
        InMemoryCatalog::new().with_seen_failure_hook(|entry| entry.location == "a.txt");
    harness.write("a.txt", "tag:1=A\n");
    harness.write("b.txt", "tag:1=B\n");
    assert_eq!(completed(harness.start(config(0)).await).created, 2);

    // With no grace period an unobserved entry would be disabled and purged
    // by the same sweep.
    let stats = completed(harness.rescan().await);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.unchanged, 1);

    let record = harness.catalog.record_at(harness.source.id, "a.txt").await.unwrap();
    assert!(record.entry.enabled);
    assert_eq!(harness.catalog.entry_count().await, 2);

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn persistence_failures_stay_local_to_the_file() {
    let mut harness = Harness::new();
    harness.catalog = InMemoryCatalog::new().with_failure_hook(|entry| entry.location == "b.txt");
    harness.write("a.txt", "tag:1=A\n");
    harness.write("b.txt", "tag:1=B\n");
    harness.write("c.txt", "tag:1=C\n");

    let stats = completed(harness.start(config(86_400)).await);
    assert_eq!(stats.created, 2);
    assert_eq!(stats.failed, 1);
    assert!(harness.catalog.record_at(harness.source.id, "c.txt").await.is_some());

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreadable_file_is_skipped_and_its_entry_kept_alive() {
    let mut harness = Harness::new();
    let path = write(harness.dir.path(), "a.txt", "tag:1=Good\n");
    completed(harness.start(config(86_400)).await);

    rewrite(&path, "fail=extract\n");
    let stats = completed(harness.rescan().await);
    assert_eq!(stats.skipped, 1);

    let record = harness.catalog.record_at(harness.source.id, "a.txt").await.unwrap();
    assert!(record.entry.enabled);
    assert_eq!(record.tags[0].tag.value, "Good");

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_root_fails_the_pass_without_sweeping() {
    let mut harness = Harness::new();
    harness.write("album/a.txt", "tag:1=A\n");
    completed(harness.start(config(0)).await);

    fs::remove_dir_all(harness.dir.path()).unwrap();
    let event = harness.rescan().await;
    assert!(matches!(event, IndexEvent::PassFailed { .. }), "{event:?}");

    let entries = harness.catalog.entries(harness.source.id).await;
    assert_eq!(entries.len(), 1);
    assert!(entries[0].enabled);

    harness.stop().await;
}
