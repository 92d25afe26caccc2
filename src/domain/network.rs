use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::spatial::{CellId, GeoPoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NodeType {
    Inlet,
    Manhole,
    Outfall,
    /// Synthesized at a pipe end that matched no existing structure
    Vertex,
}

impl Default for NodeType {
    fn default() -> Self {
        NodeType::Manhole
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    pub id: String,
    pub node_type: NodeType,
    pub position: GeoPoint,
    /// Meters; `None` until enrichment finds a value for the node's cell
    pub elevation: Option<f64>,
    pub cell: CellId,
    /// Catchment asset ids in attachment order
    pub catchments: Vec<String>,
}

impl Node {
    pub fn elevation_or_zero(&self) -> f64 {
        self.elevation.unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Direction {
    Downhill,
    Unknown,
}

/// Open property bag carried by each edge
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EdgeProperties {
    /// Set by orientation; absent until then
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(rename = "isFlat")]
    pub is_flat: bool,
    /// Properties copied from the source asset
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl EdgeProperties {
    /// Keys owned by orientation; never taken from asset properties
    pub const RESERVED_KEYS: [&'static str; 2] = ["direction", "isFlat"];
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Edge {
    pub id: String,
    pub from: String,
    pub to: String,
    /// Great-circle distance between the endpoint nodes
    pub length_m: f64,
    /// Rise over run; positive means downhill in the stored orientation
    pub slope: f64,
    pub asset_id: String,
    pub properties: EdgeProperties,
}

impl Edge {
    /// Direction used by flow routing. Edges never oriented count as unknown.
    pub fn direction(&self) -> Direction {
        self.properties.direction.unwrap_or(Direction::Unknown)
    }

    /// Copy with endpoints swapped
    pub fn reversed(&self) -> Edge {
        Edge {
            from: self.to.clone(),
            to: self.from.clone(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NetworkStats {
    pub node_count: usize,
    pub edge_count: usize,
    /// Endpoints resolved to an already existing node
    pub snaps: usize,
    pub skipped_assets: usize,
    pub catchments_attached: usize,
}

/// Drainage graph snapshot produced by one build
#[derive(Debug, Clone, Serialize)]
pub struct Network {
    pub id: Uuid,
    pub built_at: DateTime<Utc>,
    /// Insertion order; snapping and attachment ties resolve to the earlier node
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub asset_ids: Vec<String>,
    /// Constituent cells of each attached catchment
    pub catchment_cells: BTreeMap<String, Vec<CellId>>,
    pub stats: NetworkStats,
    #[serde(skip)]
    slots: HashMap<String, usize>,
}

impl Network {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            built_at: Utc::now(),
            nodes: Vec::new(),
            edges: Vec::new(),
            asset_ids: Vec::new(),
            catchment_cells: BTreeMap::new(),
            stats: NetworkStats::default(),
            slots: HashMap::new(),
        }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.slot(id).map(|slot| &self.nodes[slot])
    }

    /// Position of a node in insertion order
    pub fn slot(&self, id: &str) -> Option<usize> {
        self.slots.get(id).copied()
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.slots.contains_key(id)
    }

    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.edges.iter().find(|e| e.id == id)
    }

    /// Append a node and return its slot. Ids must be unique.
    pub(crate) fn push_node(&mut self, node: Node) -> usize {
        let slot = self.nodes.len();
        self.slots.insert(node.id.clone(), slot);
        self.nodes.push(node);
        slot
    }

    /// Distinct cells referenced by the nodes, in first-seen order
    pub fn node_cells(&self) -> Vec<CellId> {
        use itertools::Itertools;
        self.nodes.iter().map(|n| n.cell).unique().collect()
    }

    /// Endpoints of every edge exist in the node set
    pub fn is_consistent(&self) -> bool {
        self.edges
            .iter()
            .all(|e| self.contains_node(&e.from) && self.contains_node(&e.to))
    }
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::resolution;

    fn node(id: &str, lat: f64, lon: f64) -> Node {
        Node {
            id: id.to_string(),
            node_type: NodeType::Manhole,
            position: GeoPoint::new(lat, lon),
            elevation: None,
            cell: CellId::from_lat_lon(lat, lon, resolution(11).unwrap()).unwrap(),
            catchments: vec![],
        }
    }

    #[test]
    fn test_node_type_strings() {
        assert_eq!(NodeType::Outfall.to_string(), "outfall");
        assert_eq!("vertex".parse::<NodeType>().unwrap(), NodeType::Vertex);
        assert_eq!(NodeType::default(), NodeType::Manhole);
    }

    #[test]
    fn test_lookup_by_id() {
        let mut network = Network::new();
        network.push_node(node("A", 41.0, 12.0));
        network.push_node(node("B", 41.001, 12.001));

        assert_eq!(network.slot("B"), Some(1));
        assert_eq!(network.node("A").unwrap().position.lat, 41.0);
        assert!(network.node("C").is_none());
    }

    #[test]
    fn test_node_cells_are_distinct() {
        let mut network = Network::new();
        network.push_node(node("A", 41.0, 12.0));
        network.push_node(node("B", 41.0, 12.0));
        network.push_node(node("C", 41.01, 12.01));
        assert_eq!(network.node_cells().len(), 2);
    }

    #[test]
    fn test_edge_properties_serialize_flat_flag() {
        let edge = Edge {
            id: "E".into(),
            from: "A".into(),
            to: "B".into(),
            length_m: 10.0,
            slope: 0.0,
            asset_id: "E".into(),
            properties: EdgeProperties {
                direction: Some(Direction::Unknown),
                is_flat: true,
                extra: Default::default(),
            },
        };
        let json = serde_json::to_value(&edge).unwrap();
        assert_eq!(json["properties"]["direction"], "unknown");
        assert_eq!(json["properties"]["isFlat"], true);
        assert_eq!(edge.reversed().from, "B");
    }
}
