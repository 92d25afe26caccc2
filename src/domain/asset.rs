use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

use super::NodeType;

/// Role an input asset plays when the network is assembled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetCategory {
    /// Fixed structure such as a manhole, inlet or outfall
    Point,
    /// Conduit such as a pipe or culvert
    Line,
    /// Land area draining toward the network
    Catchment,
}

/// GeoJSON-shaped geometry; positions are `[lon, lat]`.
///
/// Decoding is lenient: a trailing altitude is dropped, and any other
/// geometry type or malformed coordinate array becomes `Unsupported` so the
/// asset can be skipped on its own instead of failing the whole batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point([f64; 2]),
    LineString(Vec<[f64; 2]>),
    /// Outer ring first; holes are ignored
    Polygon(Vec<Vec<[f64; 2]>>),
    /// GeoJSON type name of a geometry the builder cannot use
    Unsupported(String),
}

#[derive(Deserialize)]
struct RawGeometry {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    coordinates: Value,
}

impl<'de> Deserialize<'de> for Geometry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawGeometry::deserialize(deserializer)?;
        let parsed = match raw.kind.as_str() {
            "Point" => position(&raw.coordinates).map(Geometry::Point),
            "LineString" => positions(&raw.coordinates).map(Geometry::LineString),
            "Polygon" => raw
                .coordinates
                .as_array()
                .and_then(|rings| rings.iter().map(positions).collect::<Option<Vec<_>>>())
                .map(Geometry::Polygon),
            _ => None,
        };
        Ok(parsed.unwrap_or(Geometry::Unsupported(raw.kind)))
    }
}

/// `[lon, lat]` or `[lon, lat, z]`; anything past the second number is dropped
fn position(value: &Value) -> Option<[f64; 2]> {
    match value.as_array()?.as_slice() {
        [lon, lat, ..] => Some([lon.as_f64()?, lat.as_f64()?]),
        _ => None,
    }
}

fn positions(value: &Value) -> Option<Vec<[f64; 2]>> {
    value.as_array()?.iter().map(position).collect()
}

/// Raw infrastructure record as supplied by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub category: AssetCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<NodeType>,
    pub geometry: Geometry,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// Decode each item on its own. Items that are not a valid asset are
/// dropped and counted.
pub fn decode_assets(items: &[Value]) -> (Vec<Asset>, usize) {
    let mut assets = Vec::with_capacity(items.len());
    let mut rejected = 0;
    for (i, item) in items.iter().enumerate() {
        match Asset::deserialize(item) {
            Ok(asset) => assets.push(asset),
            Err(e) => {
                debug!(index = i, error = %e, "asset rejected");
                rejected += 1;
            }
        }
    }
    (assets, rejected)
}

impl Asset {
    pub fn point(id: impl Into<String>, node_type: Option<NodeType>, lat: f64, lon: f64) -> Self {
        Self {
            id: id.into(),
            category: AssetCategory::Point,
            node_type,
            geometry: Geometry::Point([lon, lat]),
            properties: Default::default(),
        }
    }

    /// Line through `(lat, lon)` vertices
    pub fn line(id: impl Into<String>, vertices: &[(f64, f64)]) -> Self {
        Self {
            id: id.into(),
            category: AssetCategory::Line,
            node_type: None,
            geometry: Geometry::LineString(vertices.iter().map(|(lat, lon)| [*lon, *lat]).collect()),
            properties: Default::default(),
        }
    }

    /// Catchment bounded by a ring of `(lat, lon)` vertices
    pub fn catchment(id: impl Into<String>, ring: &[(f64, f64)]) -> Self {
        Self {
            id: id.into(),
            category: AssetCategory::Catchment,
            node_type: None,
            geometry: Geometry::Polygon(vec![ring.iter().map(|(lat, lon)| [*lon, *lat]).collect()]),
            properties: Default::default(),
        }
    }
}
