use std::io::Write;
use tracing::info;

use crate::catalog::{self, Catalog};
use crate::checkpoint::CheckpointManager;
use crate::config::SyncConfig;
use crate::output::{JsonLinesWriter, MessageSink};
use crate::provider::{MetadataProvider, PostgresProvider, RowProvider};
use crate::state::{self, ReplicationState};
use crate::sync::SyncEngine;
use crate::{Config, Result};

/// Runs discovery and extraction against the configured source.
pub struct Replicator {
    config: Config,
}

impl Replicator {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    async fn connect(&self) -> Result<PostgresProvider> {
        PostgresProvider::connect(&self.config.postgres_url(), self.config.source.schemas.clone()).await
    }

    /// Discovers every table visible to the configured user.
    pub async fn discover(&self) -> Result<Catalog> {
        let provider = self.connect().await?;
        let catalog = catalog::discover(&provider).await;
        provider.close().await?;
        catalog
    }

    /// Syncs the streams selected in `catalog`, writing messages to `out`.
    pub async fn run<W: Write>(
        &self,
        catalog: &Catalog,
        state: &ReplicationState,
        out: W,
    ) -> Result<ReplicationState> {
        info!("Replicator starting");

        let provider = self.connect().await?;
        let result = sync_catalog(&provider, catalog, state, JsonLinesWriter::new(out), &self.config.sync).await;
        provider.close().await?;

        let state = result?;
        info!("Replicator finished");
        Ok(state)
    }
}

/// Resolves `catalog` against what `provider` currently reports, rebuilds the
/// state and syncs every resolved stream into `sink`.
pub async fn sync_catalog<P, S>(
    provider: &P,
    catalog: &Catalog,
    raw_state: &ReplicationState,
    sink: S,
    settings: &SyncConfig,
) -> Result<ReplicationState>
where
    P: MetadataProvider + RowProvider + Sync + ?Sized,
    S: MessageSink,
{
    let discovered = catalog::discover(provider).await?;
    let resolved = catalog::resolve_catalog(catalog, &discovered, raw_state);
    let state = state::build_state(raw_state, &resolved);
    info!(streams = resolved.streams.len(), "Resolved catalog");

    let mut engine = SyncEngine::new(provider, sink).with_checkpoint_interval(settings.checkpoint_interval_rows);
    if let Some(path) = &settings.state_file {
        engine = engine.with_checkpoint_manager(CheckpointManager::new(path));
    }

    engine.sync(&resolved, state).await
}
