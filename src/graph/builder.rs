use h3o::Resolution;
use ordered_float::OrderedFloat;
use tracing::{debug, info};

use crate::config::NetworkConfig;
use crate::domain::{Asset, AssetCategory, Edge, EdgeProperties, Geometry, Network, Node, NodeType};
use crate::spatial::{self, polygon_cells, ring_centroid, GeoPoint, SpatialError, SpatialIndex};

/// Assembles a drainage network from raw assets.
///
/// Assets are consumed in three passes so that fixed structures exist before
/// pipe ends try to snap to them:
/// 1. point assets become nodes (or snap onto an existing one)
/// 2. line assets become edges between their snapped end vertices; a pipe
///    whose ends collapse onto one node still yields a zero-length edge
/// 3. catchments attach to the node nearest their centroid and keep the
///    cells that fill their outer ring
///
/// Assets with unusable geometry are skipped one by one; they never fail the
/// whole build.
#[derive(Debug, Clone)]
pub struct NetworkBuilder {
    resolution: Resolution,
    snap_tolerance_m: f64,
}

impl NetworkBuilder {
    pub fn new(config: &NetworkConfig) -> Result<Self, SpatialError> {
        Ok(Self {
            resolution: spatial::resolution(config.cell_resolution)?,
            snap_tolerance_m: config.snap_tolerance_m,
        })
    }

    pub fn snap_tolerance_m(&self) -> f64 {
        self.snap_tolerance_m
    }

    pub fn build(&self, assets: &[Asset]) -> Network {
        let mut pass = BuildPass {
            network: Network::new(),
            index: SpatialIndex::new(self.resolution, self.snap_tolerance_m),
        };

        for asset in assets.iter().filter(|a| a.category == AssetCategory::Point) {
            pass.add_point(asset);
        }
        for asset in assets.iter().filter(|a| a.category == AssetCategory::Line) {
            pass.add_line(asset);
        }
        for asset in assets.iter().filter(|a| a.category == AssetCategory::Catchment) {
            pass.attach_catchment(asset);
        }

        let mut network = pass.network;
        network.stats.node_count = network.nodes.len();
        network.stats.edge_count = network.edges.len();

        info!(
            network_id = %network.id,
            nodes = network.stats.node_count,
            edges = network.stats.edge_count,
            snaps = network.stats.snaps,
            skipped = network.stats.skipped_assets,
            "network built"
        );
        network
    }
}

struct BuildPass {
    network: Network,
    index: SpatialIndex,
}

impl BuildPass {
    fn add_point(&mut self, asset: &Asset) {
        let Geometry::Point(position) = &asset.geometry else {
            self.skip(asset, "point asset without point geometry");
            return;
        };
        let point = GeoPoint::from_position(*position);
        let node_type = asset.node_type.unwrap_or_default();

        match self.resolve(point, &asset.id, node_type) {
            Ok(_) => self.network.asset_ids.push(asset.id.clone()),
            Err(e) => self.skip(asset, &e.to_string()),
        }
    }

    fn add_line(&mut self, asset: &Asset) {
        let vertices = match &asset.geometry {
            Geometry::LineString(vertices) if vertices.len() >= 2 => vertices,
            Geometry::LineString(_) => {
                self.skip(asset, "line with fewer than two vertices");
                return;
            }
            _ => {
                self.skip(asset, "line asset without line geometry");
                return;
            }
        };
        let (Some(first), Some(last)) = (vertices.first(), vertices.last()) else {
            return;
        };
        let start = GeoPoint::from_position(*first);
        let end = GeoPoint::from_position(*last);

        // Validate both ends before creating anything so a bad far end does
        // not leave an orphan vertex behind.
        if let Err(e) = self
            .index
            .cell_for(start.lat, start.lon)
            .and_then(|_| self.index.cell_for(end.lat, end.lon))
        {
            self.skip(asset, &e.to_string());
            return;
        }

        let resolved = self
            .resolve(start, &vertex_id(start), NodeType::Vertex)
            .and_then(|from| {
                self.resolve(end, &vertex_id(end), NodeType::Vertex)
                    .map(|to| (from, to))
            });
        let (from, to) = match resolved {
            Ok(pair) => pair,
            Err(e) => {
                self.skip(asset, &e.to_string());
                return;
            }
        };
        let from_node = &self.network.nodes[from];
        let to_node = &self.network.nodes[to];
        let edge = Edge {
            id: self.unique_edge_id(&asset.id),
            from: from_node.id.clone(),
            to: to_node.id.clone(),
            length_m: from_node.position.distance_m(&to_node.position),
            slope: 0.0,
            asset_id: asset.id.clone(),
            properties: EdgeProperties {
                direction: None,
                is_flat: false,
                extra: asset
                    .properties
                    .iter()
                    .filter(|(key, _)| !EdgeProperties::RESERVED_KEYS.contains(&key.as_str()))
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect(),
            },
        };
        self.network.edges.push(edge);
        self.network.asset_ids.push(asset.id.clone());
    }

    fn attach_catchment(&mut self, asset: &Asset) {
        let Geometry::Polygon(rings) = &asset.geometry else {
            self.skip(asset, "catchment without polygon geometry");
            return;
        };
        let Some(outer) = rings.first() else {
            self.skip(asset, "polygon without rings");
            return;
        };
        let Some(centroid) = ring_centroid(outer) else {
            self.skip(asset, "empty outer ring");
            return;
        };

        // Full scan: strict minimum distance, first node wins exact ties.
        let nearest = self
            .network
            .nodes
            .iter()
            .enumerate()
            .min_by_key(|(slot, node)| (OrderedFloat(node.position.distance_m(&centroid)), *slot))
            .map(|(slot, _)| slot);
        let Some(slot) = nearest else {
            self.skip(asset, "no node to attach to");
            return;
        };

        let mut cells = match polygon_cells(outer, self.index.resolution()) {
            Ok(cells) => cells,
            Err(e) => {
                debug!(asset_id = %asset.id, error = %e, "catchment polygon not fillable");
                Vec::new()
            }
        };
        // Smaller than one cell: the centroid cell stands in for the area.
        if cells.is_empty() {
            cells.extend(self.index.cell_for(centroid.lat, centroid.lon).ok());
        }

        self.network.nodes[slot].catchments.push(asset.id.clone());
        self.network.catchment_cells.insert(asset.id.clone(), cells);
        self.network.stats.catchments_attached += 1;
        self.network.asset_ids.push(asset.id.clone());
    }

    /// Snap `point` onto an existing node or create a new one.
    fn resolve(&mut self, point: GeoPoint, id: &str, node_type: NodeType) -> Result<usize, SpatialError> {
        if let Some(slot) = self.index.find_nearest(point.lat, point.lon)? {
            self.network.stats.snaps += 1;
            return Ok(slot);
        }

        let cell = self.index.cell_for(point.lat, point.lon)?;
        let id = self.unique_node_id(id);
        let slot = self.network.push_node(Node {
            id,
            node_type,
            position: point,
            elevation: None,
            cell,
            catchments: Vec::new(),
        });
        self.index.insert(slot, cell, point);
        Ok(slot)
    }

    fn unique_node_id(&self, base: &str) -> String {
        unique_id(base, |candidate| self.network.contains_node(candidate))
    }

    fn unique_edge_id(&self, base: &str) -> String {
        unique_id(base, |candidate| self.network.edges.iter().any(|e| e.id == candidate))
    }

    fn skip(&mut self, asset: &Asset, reason: &str) {
        debug!(asset_id = %asset.id, reason, "skipping asset");
        self.network.stats.skipped_assets += 1;
    }
}

/// Synthesized id for an unmatched pipe end
fn vertex_id(point: GeoPoint) -> String {
    format!("v:{:.6},{:.6}", point.lat, point.lon)
}

fn unique_id(base: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{base}#{n}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}
