use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{CellSample, CellSampler, CellSamples, Layer, SamplerError};
use crate::spatial::CellId;

/// Sampler backed by a fixed in-memory table.
///
/// Used for offline runs and tests. Counts `fetch` calls so callers can
/// check that requests are batched.
#[derive(Debug, Default)]
pub struct StaticSampler {
    cells: HashMap<CellId, CellSample>,
    fail: bool,
    calls: AtomicUsize,
}

impl StaticSampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, cell: CellId, sample: CellSample) -> Self {
        self.cells.entry(cell).or_default().merge(sample);
        self
    }

    /// Every fetch fails as if the service were down
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CellSampler for StaticSampler {
    async fn fetch(&self, cells: &[CellId], layers: &[Layer]) -> Result<CellSamples, SamplerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(SamplerError::Unavailable("static sampler set to fail".into()));
        }

        Ok(cells
            .iter()
            .filter_map(|cell| {
                self.cells
                    .get(cell)
                    .map(|sample| (*cell, sample.restricted_to(layers)))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::resolution;

    #[tokio::test]
    async fn test_returns_only_requested_cells_and_layers() {
        let res = resolution(9).unwrap();
        let a = CellId::from_lat_lon(41.0, 12.0, res).unwrap();
        let b = CellId::from_lat_lon(42.0, 12.0, res).unwrap();
        let sampler = StaticSampler::new()
            .with(a, CellSample { elevation: Some(10.0), slope: Some(2.0), ..Default::default() })
            .with(b, CellSample { elevation: Some(20.0), ..Default::default() });

        let out = sampler.fetch(&[a], &[Layer::Elevation]).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[&a], CellSample { elevation: Some(10.0), ..Default::default() });
        assert_eq!(sampler.calls(), 1);
    }

    #[tokio::test]
    async fn test_failing_sampler() {
        let sampler = StaticSampler::new().failing();
        assert!(sampler.fetch(&[], &[Layer::Slope]).await.is_err());
    }
}
