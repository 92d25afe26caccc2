//! Network construction phases: build, elevation enrichment, edge orientation.

pub mod builder;
pub mod orientation;

pub use builder::NetworkBuilder;
pub use orientation::{
    enrich_elevation, orient, orient_edges, EnrichmentStats, OrientationStats, FLAT_SLOPE_THRESHOLD,
};
