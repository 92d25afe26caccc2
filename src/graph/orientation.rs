use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::{Direction, Edge, Network};
use crate::sampling::{CellSampler, Layer, SamplerError};

/// Below this absolute slope (0.1 %) an edge is too flat to orient
pub const FLAT_SLOPE_THRESHOLD: f64 = 0.001;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrichmentStats {
    pub cells_requested: usize,
    pub nodes_enriched: usize,
    /// The sampler call failed and no elevations were applied
    pub unavailable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrientationStats {
    pub downhill: usize,
    pub reversed: usize,
    pub flat: usize,
}

/// Assign each node the elevation sampled for its cell.
///
/// All distinct node cells go out in one batched request. Cells without a
/// numeric elevation leave their nodes untouched, and a failed request is
/// logged and treated as "no elevations" so orientation falls back to
/// `unknown` directions. Only cancellation is reported as an error.
pub async fn enrich_elevation(
    network: &mut Network,
    sampler: &dyn CellSampler,
    cancel: &CancellationToken,
) -> Result<EnrichmentStats, SamplerError> {
    let cells = network.node_cells();
    let mut stats = EnrichmentStats {
        cells_requested: cells.len(),
        ..Default::default()
    };
    if cells.is_empty() {
        return Ok(stats);
    }
    if cancel.is_cancelled() {
        return Err(SamplerError::Cancelled);
    }

    let samples = tokio::select! {
        _ = cancel.cancelled() => return Err(SamplerError::Cancelled),
        result = sampler.fetch(&cells, &[Layer::Elevation]) => result,
    };
    let samples = match samples {
        Ok(samples) => samples,
        Err(SamplerError::Cancelled) => return Err(SamplerError::Cancelled),
        Err(e) => {
            warn!(network_id = %network.id, error = %e, "elevation unavailable");
            stats.unavailable = true;
            return Ok(stats);
        }
    };

    for node in network.nodes.iter_mut() {
        if let Some(elevation) = samples.get(&node.cell).and_then(|s| s.elevation) {
            node.elevation = Some(elevation);
            stats.nodes_enriched += 1;
        }
    }

    info!(
        network_id = %network.id,
        cells = stats.cells_requested,
        nodes_enriched = stats.nodes_enriched,
        "elevation enrichment done"
    );
    Ok(stats)
}

/// Point every confidently sloped edge downhill.
///
/// Each edge is replaced by a re-oriented copy; unset elevations count as 0.
pub fn orient_edges(network: &mut Network) -> OrientationStats {
    let mut stats = OrientationStats::default();
    let edges = std::mem::take(&mut network.edges);

    let oriented_edges: Vec<Edge> = edges
        .into_iter()
        .map(|edge| {
            let (from_elev, to_elev) = match (network.node(&edge.from), network.node(&edge.to)) {
                (Some(from), Some(to)) => (from.elevation_or_zero(), to.elevation_or_zero()),
                _ => (0.0, 0.0),
            };
            let oriented = orient(&edge, from_elev, to_elev);
            match oriented.properties.direction {
                Some(Direction::Unknown) => stats.flat += 1,
                _ if oriented.from != edge.from => stats.reversed += 1,
                _ => stats.downhill += 1,
            }
            oriented
        })
        .collect();
    network.edges = oriented_edges;

    info!(
        network_id = %network.id,
        downhill = stats.downhill,
        reversed = stats.reversed,
        flat = stats.flat,
        "edges oriented"
    );
    stats
}

/// Orientation of a single edge given its endpoint elevations
pub fn orient(edge: &Edge, from_elevation: f64, to_elevation: f64) -> Edge {
    let slope = if edge.length_m > 0.0 {
        (from_elevation - to_elevation) / edge.length_m
    } else {
        0.0
    };

    if slope.abs() < FLAT_SLOPE_THRESHOLD {
        let mut flat = edge.clone();
        flat.slope = slope;
        flat.properties.direction = Some(Direction::Unknown);
        flat.properties.is_flat = true;
        return flat;
    }

    let mut oriented = if slope < 0.0 {
        let mut swapped = edge.reversed();
        swapped.slope = -slope;
        swapped
    } else {
        let mut downhill = edge.clone();
        downhill.slope = slope;
        downhill
    };
    oriented.properties.direction = Some(Direction::Downhill);
    oriented.properties.is_flat = false;
    oriented
}
