use anyhow::Result;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::domain::{decode_assets, Asset, Network};
use crate::graph::{enrich_elevation, orient_edges, NetworkBuilder};
use crate::risk::{RiskProfile, RiskResult, RiskSolver};
use crate::sampling::{CellSampler, CellSamples, HttpCellSampler, Layer, SamplerError};
use crate::spatial::{CellId, SpatialError};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("network {0} not found")]
    NotFound(Uuid),

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    Config(#[from] SpatialError),

    #[error("solver task failed: {0}")]
    Solver(String),
}

#[derive(Clone)]
pub struct AppState {
    pub cfg: Config,
    pub service: Arc<NetworkService>,
    /// Cancelled on shutdown; request tokens are children of it
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(cfg: Config) -> Result<Self> {
        let sampler: Arc<dyn CellSampler> = Arc::new(HttpCellSampler::new(&cfg.sampler)?);
        Self::with_sampler(cfg, sampler)
    }

    pub fn with_sampler(cfg: Config, sampler: Arc<dyn CellSampler>) -> Result<Self> {
        let service = Arc::new(NetworkService::new(&cfg, sampler)?);
        Ok(Self {
            cfg,
            service,
            shutdown: CancellationToken::new(),
        })
    }
}

/// Runs the build → enrich → orient pipeline and answers risk queries for
/// the networks it has built.
///
/// Stored networks are immutable snapshots; each build produces a fresh one
/// and nothing is shared between builds.
pub struct NetworkService {
    builder: NetworkBuilder,
    solver: RiskSolver,
    sampler: Arc<dyn CellSampler>,
    networks: RwLock<HashMap<Uuid, Arc<Network>>>,
}

impl NetworkService {
    pub fn new(cfg: &Config, sampler: Arc<dyn CellSampler>) -> Result<Self, ServiceError> {
        Ok(Self {
            builder: NetworkBuilder::new(&cfg.network)?,
            solver: RiskSolver::new(cfg.solver.clone()),
            sampler,
            networks: RwLock::new(HashMap::new()),
        })
    }

    pub async fn build_network(
        &self,
        assets: &[Asset],
        cancel: &CancellationToken,
    ) -> Result<Arc<Network>, ServiceError> {
        self.build_and_store(assets, 0, cancel).await
    }

    /// Build from raw JSON items. Items that do not decode as an asset are
    /// counted as skipped instead of failing the batch.
    pub async fn build_network_from_json(
        &self,
        items: &[serde_json::Value],
        cancel: &CancellationToken,
    ) -> Result<Arc<Network>, ServiceError> {
        let (assets, rejected) = decode_assets(items);
        if rejected > 0 {
            warn!(rejected, accepted = assets.len(), "undecodable assets skipped");
        }
        self.build_and_store(&assets, rejected, cancel).await
    }

    async fn build_and_store(
        &self,
        assets: &[Asset],
        rejected: usize,
        cancel: &CancellationToken,
    ) -> Result<Arc<Network>, ServiceError> {
        if cancel.is_cancelled() {
            return Err(ServiceError::Cancelled);
        }

        let mut network = self.builder.build(assets);
        network.stats.skipped_assets += rejected;
        // Sampler failures degrade to missing elevation; only cancellation
        // surfaces here.
        enrich_elevation(&mut network, self.sampler.as_ref(), cancel)
            .await
            .map_err(|_| ServiceError::Cancelled)?;
        orient_edges(&mut network);

        let network = Arc::new(network);
        self.networks
            .write()
            .await
            .insert(network.id, network.clone());
        Ok(network)
    }

    pub async fn network(&self, id: Uuid) -> Option<Arc<Network>> {
        self.networks.read().await.get(&id).cloned()
    }

    pub async fn remove_network(&self, id: Uuid) -> Result<(), ServiceError> {
        self.networks
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(ServiceError::NotFound(id))
    }

    pub async fn compute_risk(
        &self,
        id: Uuid,
        profile: RiskProfile,
        cancel: &CancellationToken,
    ) -> Result<RiskResult, ServiceError> {
        let network = self.network(id).await.ok_or(ServiceError::NotFound(id))?;
        let samples = self.fetch_risk_inputs(&network, &profile, cancel).await?;

        let solver = self.solver.clone();
        tokio::task::spawn_blocking(move || solver.compute(&network, &samples, &profile))
            .await
            .map_err(|e| ServiceError::Solver(e.to_string()))
    }

    /// One batched request per layer, all in flight together. A layer the
    /// sampler cannot deliver is treated as unavailable for every cell.
    async fn fetch_risk_inputs(
        &self,
        network: &Network,
        profile: &RiskProfile,
        cancel: &CancellationToken,
    ) -> Result<CellSamples, ServiceError> {
        let cells: Vec<CellId> = RiskSolver::required_cells(network);
        let mut layers = vec![Layer::LandCover, Layer::Slope];
        if profile.design_rain_mm.is_none() {
            layers.insert(0, Layer::Precipitation);
        }
        if cancel.is_cancelled() {
            return Err(ServiceError::Cancelled);
        }
        if cells.is_empty() {
            return Ok(CellSamples::new());
        }

        let fetches = layers.iter().map(|layer| {
            let cells = &cells;
            async move { (*layer, self.sampler.fetch(cells, std::slice::from_ref(layer)).await) }
        });
        let results = tokio::select! {
            _ = cancel.cancelled() => return Err(ServiceError::Cancelled),
            results = join_all(fetches) => results,
        };

        let mut merged = CellSamples::with_capacity(cells.len());
        for (layer, result) in results {
            match result {
                Ok(samples) => {
                    for (cell, sample) in samples {
                        merged.entry(cell).or_default().merge(sample);
                    }
                }
                Err(SamplerError::Cancelled) => return Err(ServiceError::Cancelled),
                Err(e) => warn!(network_id = %network.id, %layer, error = %e, "risk layer unavailable"),
            }
        }

        info!(
            network_id = %network.id,
            cells = cells.len(),
            sampled = merged.len(),
            "risk inputs fetched"
        );
        Ok(merged)
    }
}
