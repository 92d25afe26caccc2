//! Client side of the per-cell data sampling service.
//!
//! The service answers "what is layer X at cell Y" for a batch of hexagonal
//! cells. Absent values mean the layer is unavailable for that cell and must
//! never be read as zero.

pub mod http;
pub mod memory;

pub use http::HttpCellSampler;
pub use memory::StaticSampler;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::{Display, EnumString};
use thiserror::Error;

use crate::spatial::CellId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Layer {
    /// Terrain elevation in meters
    Elevation,
    /// 24 h accumulated precipitation
    #[serde(rename = "precipitation_mm")]
    #[strum(serialize = "precipitation_mm")]
    Precipitation,
    /// CORINE land cover code
    #[serde(rename = "clc_code")]
    #[strum(serialize = "clc_code")]
    LandCover,
    /// Terrain slope in degrees
    Slope,
}

/// Values sampled for one cell
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CellSample {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elevation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precipitation_mm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clc_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slope: Option<f64>,
}

impl CellSample {
    /// Build from a raw JSON object, keeping numeric values only.
    pub fn from_json(raw: &serde_json::Map<String, serde_json::Value>) -> Self {
        let number = |layer: Layer| {
            raw.get(layer.to_string().as_str())
                .and_then(serde_json::Value::as_f64)
                .filter(|v| v.is_finite())
        };
        Self {
            elevation: number(Layer::Elevation),
            precipitation_mm: number(Layer::Precipitation),
            clc_code: number(Layer::LandCover)
                .filter(|v| *v >= 0.0 && *v <= u16::MAX as f64)
                .map(|v| v.round() as u16),
            slope: number(Layer::Slope),
        }
    }

    /// Fill fields that are absent here from `other`.
    pub fn merge(&mut self, other: CellSample) {
        self.elevation = self.elevation.or(other.elevation);
        self.precipitation_mm = self.precipitation_mm.or(other.precipitation_mm);
        self.clc_code = self.clc_code.or(other.clc_code);
        self.slope = self.slope.or(other.slope);
    }

    /// Copy that keeps only the requested layers
    pub fn restricted_to(&self, layers: &[Layer]) -> CellSample {
        let keep = |layer: Layer| layers.contains(&layer);
        CellSample {
            elevation: self.elevation.filter(|_| keep(Layer::Elevation)),
            precipitation_mm: self.precipitation_mm.filter(|_| keep(Layer::Precipitation)),
            clc_code: self.clc_code.filter(|_| keep(Layer::LandCover)),
            slope: self.slope.filter(|_| keep(Layer::Slope)),
        }
    }
}

pub type CellSamples = HashMap<CellId, CellSample>;

#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("sampler request failed: {0}")]
    Transport(#[from] reqwest_middleware::Error),

    #[error("sampler response read failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("sampler returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("sampler payload invalid: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("sampler unavailable: {0}")]
    Unavailable(String),

    #[error("sampling cancelled")]
    Cancelled,
}

#[async_trait]
pub trait CellSampler: Send + Sync {
    /// Sample `layers` for every cell in `cells`.
    ///
    /// Cells the service knows nothing about are simply missing from the map.
    async fn fetch(&self, cells: &[CellId], layers: &[Layer]) -> Result<CellSamples, SamplerError>;
}
