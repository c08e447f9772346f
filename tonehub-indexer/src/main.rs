//! Indexer daemon: loads settings, opens the catalog and runs the
//! reconciler until interrupted.

use std::sync::Arc;

use anyhow::{Context, bail};
use tonehub_config::{ConfigSource, IndexerSettings, SourceSettings};
use tonehub_core::{
    AudioExtractor, CatalogRepository, ExtractorRegistry, InMemoryCatalog, PostgresCatalog,
    SourceReconciler,
};
use tonehub_model::Source;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tonehub_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let (settings, origin) =
        IndexerSettings::load_from_env().context("failed to load configuration")?;
    match &origin {
        ConfigSource::EnvPath(path) | ConfigSource::File(path) => {
            info!(path = %path.display(), "indexer config loaded from file")
        }
        ConfigSource::EnvInline => info!("indexer config loaded from inline environment json"),
        ConfigSource::Default => info!("no indexer config found, using defaults"),
    }

    let repository = open_catalog(&settings).await?;
    let extractors = ExtractorRegistry::new()
        .with(Arc::new(AudioExtractor::new(settings.indexer.max_hash_bytes)));

    let handle = SourceReconciler::new(repository, extractors, settings.indexer.clone())
        .spawn()
        .context("failed to start the reconciler")?;
    info!(sources = settings.sources.len(), "indexer running");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for the shutdown signal")?;
    info!("shutdown requested");
    handle.shutdown().await;
    Ok(())
}

async fn open_catalog(settings: &IndexerSettings) -> anyhow::Result<Arc<dyn CatalogRepository>> {
    let sources: Vec<Source> = settings.sources.iter().map(SourceSettings::to_source).collect();

    let Some(url) = settings.database_url() else {
        warn!("no database configured, the catalog lives in memory only");
        let catalog = InMemoryCatalog::new();
        for source in sources {
            catalog.upsert_source(source).await;
        }
        return Ok(Arc::new(catalog));
    };

    if let Some(unnamed) = settings.sources.iter().find(|source| source.id.is_none()) {
        bail!(
            "source {} needs an `id` when a database is configured",
            unnamed.path.display()
        );
    }

    let catalog = PostgresCatalog::connect(url, settings.database.max_connections)
        .await
        .context("failed to connect to the catalog database")?;
    catalog
        .migrate()
        .await
        .context("failed to run catalog migrations")?;
    for source in &sources {
        catalog
            .upsert_source(source)
            .await
            .with_context(|| format!("failed to register source {}", source.location.display()))?;
    }
    info!(sources = sources.len(), "catalog database ready");
    Ok(Arc::new(catalog))
}
