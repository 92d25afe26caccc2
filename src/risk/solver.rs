use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use super::runoff::{compute_runoff_risk, RiskClass, RunoffInput};
use crate::config::SolverConfig;
use crate::domain::{Direction, Network};
use crate::sampling::{CellSample, CellSamples};
use crate::spatial::CellId;

/// Scenario applied on top of sampled cell data
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct RiskProfile {
    /// Design-storm rainfall used for every cell instead of sampled precipitation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0.0, max = 2000.0))]
    pub design_rain_mm: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeRisk {
    pub node_id: String,
    /// Sum of runoff scores over the node's own and attached catchment cells
    pub local_inflow: f64,
    pub accumulated_flow: f64,
    pub peak_local_risk: f64,
    pub risk_class: RiskClass,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EdgeRisk {
    pub edge_id: String,
    /// Flow pushed through the edge in the final iteration
    pub flow: f64,
    pub direction: Direction,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SolverStats {
    pub iterations: u32,
    pub converged: bool,
    pub max_delta: f64,
    pub cells_scored: usize,
    pub cells_skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskResult {
    pub network_id: Uuid,
    pub nodes: Vec<NodeRisk>,
    pub edges: Vec<EdgeRisk>,
    pub stats: SolverStats,
}

/// Steady-state flow accumulation over a drainage network.
///
/// Damped Jacobi relaxation: every sweep regenerates each node's local
/// inflow, pushes current node flow along all edges with exponential decay,
/// and blends the proposal into the previous state. The loop is bounded by
/// `max_iterations`, so cyclic graphs always terminate; hitting the cap is
/// reported through `SolverStats::converged`, not as an error.
#[derive(Debug, Clone)]
pub struct RiskSolver {
    config: SolverConfig,
}

impl RiskSolver {
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Cells whose data the solver needs: every node cell plus the cells of
    /// every attached catchment.
    pub fn required_cells(network: &Network) -> Vec<CellId> {
        let mut cells = BTreeSet::new();
        for node in &network.nodes {
            cells.insert(node.cell);
            for catchment in &node.catchments {
                if let Some(catchment_cells) = network.catchment_cells.get(catchment) {
                    cells.extend(catchment_cells.iter().copied());
                }
            }
        }
        cells.into_iter().collect()
    }

    pub fn compute(&self, network: &Network, samples: &CellSamples, profile: &RiskProfile) -> RiskResult {
        let mut stats = SolverStats::default();
        let (local, peak) = self.local_inflow(network, samples, profile, &mut stats);
        let (flow, edge_flow) = self.propagate(network, &local, &mut stats);

        if !stats.converged {
            warn!(
                network_id = %network.id,
                iterations = stats.iterations,
                max_delta = stats.max_delta,
                "flow accumulation did not converge"
            );
        }
        info!(
            network_id = %network.id,
            iterations = stats.iterations,
            converged = stats.converged,
            cells = stats.cells_scored,
            "risk computed"
        );

        let nodes = network
            .nodes
            .iter()
            .enumerate()
            .map(|(slot, node)| NodeRisk {
                node_id: node.id.clone(),
                local_inflow: local[slot],
                accumulated_flow: flow[slot],
                peak_local_risk: peak[slot],
                risk_class: RiskClass::from_score(peak[slot]),
            })
            .collect();
        let edges = network
            .edges
            .iter()
            .zip(edge_flow)
            .map(|(edge, flow)| EdgeRisk {
                edge_id: edge.id.clone(),
                flow,
                direction: edge.direction(),
            })
            .collect();

        RiskResult {
            network_id: network.id,
            nodes,
            edges,
            stats,
        }
    }

    /// Per-node sum and maximum of cell runoff scores.
    fn local_inflow(
        &self,
        network: &Network,
        samples: &CellSamples,
        profile: &RiskProfile,
        stats: &mut SolverStats,
    ) -> (Vec<f64>, Vec<f64>) {
        let mut local = vec![0.0; network.nodes.len()];
        let mut peak = vec![0.0; network.nodes.len()];

        for (slot, node) in network.nodes.iter().enumerate() {
            let mut cells = BTreeSet::from([node.cell]);
            for catchment in &node.catchments {
                if let Some(catchment_cells) = network.catchment_cells.get(catchment) {
                    cells.extend(catchment_cells.iter().copied());
                }
            }

            for cell in cells {
                match samples.get(&cell).and_then(|s| cell_score(s, profile)) {
                    Some(score) => {
                        local[slot] += score;
                        peak[slot] = f64::max(peak[slot], score);
                        stats.cells_scored += 1;
                    }
                    None => stats.cells_skipped += 1,
                }
            }
        }
        (local, peak)
    }

    /// Bounded fixed-point iteration. Returns node flows and final edge flows.
    fn propagate(&self, network: &Network, local: &[f64], stats: &mut SolverStats) -> (Vec<f64>, Vec<f64>) {
        let cfg = &self.config;
        let links: Vec<Option<(usize, usize, f64)>> = network
            .edges
            .iter()
            .map(|edge| {
                let from = network.slot(&edge.from)?;
                let to = network.slot(&edge.to)?;
                let mut transfer = (-cfg.decay_per_m * edge.length_m).exp();
                if edge.direction() == Direction::Unknown {
                    transfer *= cfg.unknown_direction_penalty;
                }
                Some((from, to, transfer))
            })
            .collect();

        let mut flow = local.to_vec();
        let mut edge_flow = vec![0.0; links.len()];

        for iteration in 1..=cfg.max_iterations {
            let mut proposed = local.to_vec();
            edge_flow.iter_mut().for_each(|q| *q = 0.0);

            for (e, link) in links.iter().enumerate() {
                let Some((from, to, transfer)) = *link else { continue };
                let q_in = flow[from];
                if q_in > cfg.flow_threshold {
                    let q_out = q_in * transfer;
                    proposed[to] += q_out;
                    edge_flow[e] = q_out;
                }
            }

            let mut max_delta: f64 = 0.0;
            for (current, next) in flow.iter_mut().zip(&proposed) {
                let damped = (1.0 - cfg.damping) * *current + cfg.damping * next;
                max_delta = max_delta.max((damped - *current).abs());
                *current = damped;
            }

            stats.iterations = iteration;
            stats.max_delta = max_delta;
            if max_delta < cfg.convergence_tolerance {
                stats.converged = true;
                break;
            }
        }
        (flow, edge_flow)
    }
}

/// Runoff score of one sampled cell; `None` when it contributes nothing.
fn cell_score(sample: &CellSample, profile: &RiskProfile) -> Option<f64> {
    let rain = profile.design_rain_mm.or(sample.precipitation_mm)?;
    let input = RunoffInput {
        rain24h_mm: rain,
        clc_code: sample.clc_code,
        slope_deg: sample.slope.unwrap_or(0.0),
    };
    compute_runoff_risk(&input).map(|risk| risk.risk_score)
}
