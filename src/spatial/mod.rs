//! Geographic helpers and the hexagonal bucket index used for endpoint snapping.

pub mod geo;
pub mod index;

pub use geo::*;
pub use index::SpatialIndex;

use geo_types::LineString;
use h3o::geom::{PolyfillConfig, Polygon, ToCells};
use h3o::{CellIndex, LatLng, Resolution};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum SpatialError {
    #[error("invalid coordinate: lat={lat}, lon={lon}")]
    InvalidCoordinate { lat: f64, lon: f64 },

    #[error("invalid H3 resolution: {0}")]
    InvalidResolution(u8),

    #[error("invalid cell id: {0}")]
    InvalidCellId(String),

    #[error("invalid polygon: {0}")]
    InvalidPolygon(String),
}

/// Hexagonal cell identifier; serialized as the canonical H3 hex string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(CellIndex);

impl CellId {
    /// Cell containing the given point at `resolution`.
    pub fn from_lat_lon(lat: f64, lon: f64, resolution: Resolution) -> Result<Self, SpatialError> {
        if !lat.is_finite() || !lon.is_finite() || lat.abs() > 90.0 || lon.abs() > 180.0 {
            return Err(SpatialError::InvalidCoordinate { lat, lon });
        }
        let coord =
            LatLng::new(lat, lon).map_err(|_| SpatialError::InvalidCoordinate { lat, lon })?;
        Ok(Self(coord.to_cell(resolution)))
    }

    pub fn index(&self) -> CellIndex {
        self.0
    }

    /// This cell plus every cell within `k` rings of it.
    pub fn disk(&self, k: u32) -> Vec<CellId> {
        self.0
            .grid_disk::<Vec<_>>(k)
            .into_iter()
            .map(CellId)
            .collect()
    }
}

impl From<CellIndex> for CellId {
    fn from(cell: CellIndex) -> Self {
        Self(cell)
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CellId {
    type Err = SpatialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<CellIndex>()
            .map(Self)
            .map_err(|_| SpatialError::InvalidCellId(s.to_string()))
    }
}

impl Serialize for CellId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for CellId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

pub fn resolution(level: u8) -> Result<Resolution, SpatialError> {
    Resolution::try_from(level).map_err(|_| SpatialError::InvalidResolution(level))
}

/// Cells whose centers lie inside the ring of GeoJSON `[lon, lat]` positions.
///
/// The result is sorted and may be empty when the ring is smaller than a
/// single cell or has no area.
pub fn polygon_cells(ring: &[[f64; 2]], resolution: Resolution) -> Result<Vec<CellId>, SpatialError> {
    let exterior: LineString<f64> = ring.iter().map(|p| (p[0], p[1])).collect();
    let polygon = Polygon::from_degrees(geo_types::Polygon::new(exterior, Vec::new()))
        .map_err(|e| SpatialError::InvalidPolygon(e.to_string()))?;

    let mut cells: Vec<CellId> = polygon
        .to_cells(PolyfillConfig::new(resolution))
        .map(CellId)
        .collect();
    cells.sort_unstable();
    cells.dedup();
    Ok(cells)
}
