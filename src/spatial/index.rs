use std::collections::{BTreeSet, HashMap};

use h3o::Resolution;
use ordered_float::OrderedFloat;

use super::{CellId, GeoPoint, SpatialError};

/// Bucketed proximity index over node positions.
///
/// Every inserted entry is filed under its own hexagonal cell. A lookup scans
/// the query cell plus its neighbour ring, so points just across a cell
/// boundary are still found without touching the rest of the network.
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    resolution: Resolution,
    tolerance_m: f64,
    ring: u32,
    buckets: HashMap<CellId, Vec<(usize, GeoPoint)>>,
}

impl SpatialIndex {
    pub fn new(resolution: Resolution, tolerance_m: f64) -> Self {
        // A one-ring disk only covers about one cell width around the query;
        // widen it when the tolerance is larger than that.
        let ring = (tolerance_m / resolution.edge_length_m()).ceil().max(1.0) as u32;
        Self {
            resolution,
            tolerance_m,
            ring,
            buckets: HashMap::new(),
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn tolerance_m(&self) -> f64 {
        self.tolerance_m
    }

    pub fn cell_for(&self, lat: f64, lon: f64) -> Result<CellId, SpatialError> {
        CellId::from_lat_lon(lat, lon, self.resolution)
    }

    /// Bucket keys that may hold a node within tolerance of the point
    pub fn buckets_for(&self, lat: f64, lon: f64) -> Result<BTreeSet<CellId>, SpatialError> {
        Ok(self.cell_for(lat, lon)?.disk(self.ring).into_iter().collect())
    }

    /// Record `slot` (the node's insertion position) at `point`.
    pub fn insert(&mut self, slot: usize, cell: CellId, point: GeoPoint) {
        self.buckets.entry(cell).or_default().push((slot, point));
    }

    /// Nearest indexed slot within the snap tolerance.
    ///
    /// Ties on distance go to the lowest slot, i.e. the first inserted node.
    pub fn find_nearest(&self, lat: f64, lon: f64) -> Result<Option<usize>, SpatialError> {
        let query = GeoPoint::new(lat, lon);
        let nearest = self
            .buckets_for(lat, lon)?
            .iter()
            .filter_map(|cell| self.buckets.get(cell))
            .flatten()
            .map(|(slot, point)| (OrderedFloat(query.distance_m(point)), *slot))
            .filter(|(distance, _)| distance.0 <= self.tolerance_m)
            .min()
            .map(|(_, slot)| slot);
        Ok(nearest)
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::resolution;

    fn index_with(points: &[(f64, f64)]) -> SpatialIndex {
        let mut index = SpatialIndex::new(resolution(11).unwrap(), 5.0);
        for (slot, (lat, lon)) in points.iter().enumerate() {
            let cell = index.cell_for(*lat, *lon).unwrap();
            index.insert(slot, cell, GeoPoint::new(*lat, *lon));
        }
        index
    }

    #[test]
    fn test_empty_index_finds_nothing() {
        let index = index_with(&[]);
        assert!(index.is_empty());
        assert_eq!(index.find_nearest(41.0, 12.0).unwrap(), None);
    }

    #[test]
    fn test_finds_point_within_tolerance() {
        let index = index_with(&[(41.0, 12.0)]);
        // ~1.1 m north
        assert_eq!(index.find_nearest(41.00001, 12.0).unwrap(), Some(0));
    }

    #[test]
    fn test_ignores_point_outside_tolerance() {
        let index = index_with(&[(41.0, 12.0)]);
        // ~11 m north
        assert_eq!(index.find_nearest(41.0001, 12.0).unwrap(), None);
    }

    #[test]
    fn test_picks_closest_candidate() {
        let index = index_with(&[(41.0, 12.0), (41.00003, 12.0)]);
        assert_eq!(index.find_nearest(41.000025, 12.0).unwrap(), Some(1));
    }

    #[test]
    fn test_exact_tie_goes_to_first_inserted() {
        let index = index_with(&[(41.0, 12.0), (41.0, 12.0)]);
        assert_eq!(index.find_nearest(41.0, 12.0).unwrap(), Some(0));
    }

    #[test]
    fn test_buckets_include_neighbour_ring() {
        let index = index_with(&[]);
        let buckets = index.buckets_for(41.0, 12.0).unwrap();
        assert_eq!(buckets.len(), 7);
        assert!(buckets.contains(&index.cell_for(41.0, 12.0).unwrap()));
    }

    #[test]
    fn test_ring_widens_for_large_tolerance() {
        let res = resolution(13).unwrap();
        let index = SpatialIndex::new(res, 20.0);
        assert!(index.buckets_for(41.0, 12.0).unwrap().len() > 7);
    }

    #[test]
    fn test_rejects_invalid_query() {
        let index = index_with(&[]);
        assert!(index.find_nearest(120.0, 12.0).is_err());
    }
}
