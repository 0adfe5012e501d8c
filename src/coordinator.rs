use crate::costs::{Costs, TariffConfig};
use crate::glowmarkt::{GlowmarktClient, GlowmarktError, Resource};
use crate::reading_cache::ReadingCache;
use chrono::{DateTime, Utc};
use serde_derive::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Everything a consumer needs from one successful refresh.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub readings: BTreeMap<String, Option<f64>>,
    pub resources: BTreeMap<String, Resource>,
    pub costs: Costs,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Fetching,
    Merging,
    Costing,
    Published,
    Failed,
}

/// A refresh cycle that was aborted; the previous snapshot stays published.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{0}")]
pub struct UpdateFailed(pub String);

impl From<GlowmarktError> for UpdateFailed {
    fn from(err: GlowmarktError) -> Self {
        match err {
            GlowmarktError::Auth(message) => Self(format!("Authentication error: {message}")),
            GlowmarktError::Api(message) => Self(format!("API error: {message}")),
        }
    }
}

/// Owns one account's client and turns its readings into published snapshots.
pub struct Coordinator {
    client: GlowmarktClient,
    tariff: TariffConfig,
    cache: ReadingCache,
    state: RefreshState,
    published: watch::Sender<Option<Arc<Snapshot>>>,
}

impl Coordinator {
    /// Discovery is scoped by the client's own virtual entity selector.
    pub fn new(client: GlowmarktClient, tariff: TariffConfig) -> Self {
        let (published, _) = watch::channel(None);
        Self {
            client,
            tariff,
            cache: ReadingCache::new(),
            state: RefreshState::Idle,
            published,
        }
    }

    /// Runs one cycle to completion and publishes its snapshot.
    pub async fn refresh(&mut self) -> Result<Arc<Snapshot>, UpdateFailed> {
        match self.run_cycle().await {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                self.published.send_replace(Some(Arc::clone(&snapshot)));
                self.transition(RefreshState::Published);
                info!(
                    "Published readings {:?}, total cost {:.2}",
                    snapshot.readings, snapshot.costs.total
                );
                Ok(snapshot)
            }
            Err(err) => {
                self.transition(RefreshState::Failed);
                let err = UpdateFailed::from(err);
                warn!("Refresh failed: {err}");
                Err(err)
            }
        }
    }

    async fn run_cycle(&mut self) -> Result<Snapshot, GlowmarktError> {
        self.transition(RefreshState::Fetching);
        if self.client.resources().is_empty() {
            self.client.discover_resources(None).await?;
        }
        let fresh = self.client.fetch_readings().await?;

        self.transition(RefreshState::Merging);
        let readings = self.cache.merge(&fresh);

        self.transition(RefreshState::Costing);
        let costs = Costs::compute(&readings, &self.tariff);

        Ok(Snapshot {
            readings,
            resources: self.client.resources().clone(),
            costs,
            updated_at: Utc::now(),
        })
    }

    fn transition(&mut self, state: RefreshState) {
        debug!("Refresh state {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.published.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Snapshot>>> {
        self.published.subscribe()
    }

    pub fn state(&self) -> RefreshState {
        self.state
    }

    pub fn resources(&self) -> &BTreeMap<String, Resource> {
        self.client.resources()
    }

    pub fn tariff_config(&self) -> &TariffConfig {
        &self.tariff
    }

    /// Takes effect from the next cycle.
    pub fn update_tariff_config(&mut self, tariff: TariffConfig) {
        self.tariff = tariff;
        debug!("Tariff updated: {tariff:?}");
    }

    /// Call at local midnight so yesterday's totals don't mask today's gaps.
    pub fn clear_daily_cache(&mut self) {
        self.cache.clear();
    }
}
