//! End-to-end pipeline tests: build → enrich → orient → risk, against an
//! in-memory sampler.

use async_trait::async_trait;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use stormwater_network::config::{Config, NetworkConfig};
use stormwater_network::domain::{Asset, Direction, NodeType};
use stormwater_network::graph::NetworkBuilder;
use stormwater_network::risk::RiskProfile;
use stormwater_network::sampling::{CellSample, CellSampler, CellSamples, Layer, SamplerError, StaticSampler};
use stormwater_network::service::{NetworkService, ServiceError};
use stormwater_network::spatial::{haversine_m, resolution, CellId};

fn builder() -> NetworkBuilder {
    NetworkBuilder::new(&NetworkConfig::default()).unwrap()
}

fn cell(lat: f64, lon: f64) -> CellId {
    let res = resolution(NetworkConfig::default().cell_resolution).unwrap();
    CellId::from_lat_lon(lat, lon, res).unwrap()
}

fn terrain(elevation: f64, rain: f64, clc: u16, slope: f64) -> CellSample {
    CellSample {
        elevation: Some(elevation),
        precipitation_mm: Some(rain),
        clc_code: Some(clc),
        slope: Some(slope),
    }
}

#[test]
fn test_outfall_scenario_merges_coincident_points() {
    let network = builder().build(&[
        Asset::point("A", Some(NodeType::Outfall), 41.0, 12.0),
        Asset::point("B", Some(NodeType::Manhole), 41.001, 12.001),
        Asset::point("C", None, 41.00001, 12.0),
        Asset::line("B-A", &[(41.001, 12.001), (41.0, 12.0)]),
    ]);

    assert_eq!(network.stats.node_count, 2);
    assert_eq!(network.stats.edge_count, 1);
    assert!(network.stats.snaps >= 1);
    assert!(network.node("C").is_none());
    assert!(network.is_consistent());
}

#[test]
fn test_build_twice_gives_identical_counts() {
    let assets = vec![
        Asset::point("A", Some(NodeType::Outfall), 41.0, 12.0),
        Asset::point("B", Some(NodeType::Manhole), 41.001, 12.001),
        Asset::point("C", None, 41.00001, 12.0),
        Asset::line("B-A", &[(41.001, 12.001), (41.0, 12.0)]),
        Asset::line("loose", &[(41.002, 12.0), (41.003, 12.0)]),
        Asset::catchment("K", &[(41.0011, 12.0011), (41.0012, 12.0011), (41.0012, 12.0012)]),
    ];
    let first = builder().build(&assets);
    let second = builder().build(&assets);

    assert_eq!(first.stats, second.stats);
    assert_ne!(first.id, second.id);
}

#[tokio::test]
async fn test_flat_edge_converges_without_divergence() {
    let a = cell(41.0, 12.0);
    let b = cell(41.001, 12.0);
    let sampler = StaticSampler::new()
        .with(a, terrain(20.0, 40.0, 112, 10.0))
        .with(b, terrain(20.0, 40.0, 112, 10.0));
    let service = NetworkService::new(&Config::default(), Arc::new(sampler)).unwrap();
    let cancel = CancellationToken::new();

    let network = service
        .build_network(
            &[
                Asset::point("A", Some(NodeType::Inlet), 41.0, 12.0),
                Asset::point("B", Some(NodeType::Outfall), 41.001, 12.0),
                Asset::line("P", &[(41.0, 12.0), (41.001, 12.0)]),
            ],
            &cancel,
        )
        .await
        .unwrap();

    let edge = &network.edges[0];
    assert_eq!(edge.properties.direction, Some(Direction::Unknown));
    assert!(edge.properties.is_flat);

    let result = service
        .compute_risk(network.id, RiskProfile::default(), &cancel)
        .await
        .unwrap();
    assert!(result.stats.converged);
    assert!(result.stats.iterations <= 20);
    for node in &result.nodes {
        assert!(node.accumulated_flow.is_finite());
        assert!(node.accumulated_flow >= 0.0);
    }
    assert_eq!(result.edges[0].direction, Direction::Unknown);
}

#[tokio::test]
async fn test_downhill_chain_accumulates_at_outfall() {
    // inlet (high) -> manhole -> outfall (low), pipes digitised uphill
    let points = [(41.0, 12.0), (41.001, 12.0), (41.002, 12.0)];
    let sampler = StaticSampler::new()
        .with(cell(41.0, 12.0), terrain(30.0, 45.0, 112, 12.0))
        .with(cell(41.001, 12.0), terrain(25.0, 45.0, 211, 6.0))
        .with(cell(41.002, 12.0), terrain(20.0, 45.0, 311, 2.0));
    let service = NetworkService::new(&Config::default(), Arc::new(sampler)).unwrap();
    let cancel = CancellationToken::new();

    let network = service
        .build_network(
            &[
                Asset::point("inlet", Some(NodeType::Inlet), points[0].0, points[0].1),
                Asset::point("mh", Some(NodeType::Manhole), points[1].0, points[1].1),
                Asset::point("out", Some(NodeType::Outfall), points[2].0, points[2].1),
                Asset::line("P1", &[points[1], points[0]]),
                Asset::line("P2", &[points[2], points[1]]),
            ],
            &cancel,
        )
        .await
        .unwrap();

    for edge in &network.edges {
        assert_eq!(edge.direction(), Direction::Downhill);
        assert!(edge.slope >= 0.0);
        let from = network.node(&edge.from).unwrap().elevation.unwrap();
        let to = network.node(&edge.to).unwrap().elevation.unwrap();
        assert!(from >= to);
    }

    let result = service
        .compute_risk(network.id, RiskProfile::default(), &cancel)
        .await
        .unwrap();
    let out = result.nodes.iter().find(|n| n.node_id == "out").unwrap();
    assert!(out.accumulated_flow > out.local_inflow);
    assert!(result.edges.iter().all(|e| e.flow > 0.0));
}

#[tokio::test]
async fn test_catchment_cells_feed_local_inflow() {
    let ring = [(41.0101, 12.0101), (41.0109, 12.0101), (41.0109, 12.0109), (41.0101, 12.0109), (41.0101, 12.0101)];
    let network = builder().build(&[
        Asset::point("A", Some(NodeType::Inlet), 41.0, 12.0),
        Asset::point("B", Some(NodeType::Outfall), 41.01, 12.01),
        Asset::catchment("K", &ring),
    ]);
    assert_eq!(network.node("B").unwrap().catchments, vec!["K".to_string()]);

    let mut sampler = StaticSampler::new();
    for cell in &network.catchment_cells["K"] {
        sampler = sampler.with(*cell, terrain(5.0, 50.0, 111, 30.0));
    }
    let service = NetworkService::new(&Config::default(), Arc::new(sampler)).unwrap();
    let cancel = CancellationToken::new();
    let built = service
        .build_network(
            &[
                Asset::point("A", Some(NodeType::Inlet), 41.0, 12.0),
                Asset::point("B", Some(NodeType::Outfall), 41.01, 12.01),
                Asset::catchment("K", &ring),
            ],
            &cancel,
        )
        .await
        .unwrap();

    let result = service
        .compute_risk(built.id, RiskProfile::default(), &cancel)
        .await
        .unwrap();
    let b = result.nodes.iter().find(|n| n.node_id == "B").unwrap();
    let a = result.nodes.iter().find(|n| n.node_id == "A").unwrap();
    assert!(b.local_inflow >= 1.0);
    assert_eq!(b.peak_local_risk, 1.0);
    assert_eq!(a.local_inflow, 0.0);
}

#[tokio::test]
async fn test_risk_inputs_are_one_call_per_layer() {
    let sampler = Arc::new(StaticSampler::new());
    let service = NetworkService::new(&Config::default(), sampler.clone()).unwrap();
    let cancel = CancellationToken::new();

    let network = service
        .build_network(
            &[
                Asset::point("A", None, 41.0, 12.0),
                Asset::point("B", None, 41.001, 12.0),
                Asset::point("C", None, 41.002, 12.0),
            ],
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(sampler.calls(), 1);

    service
        .compute_risk(network.id, RiskProfile::default(), &cancel)
        .await
        .unwrap();
    assert_eq!(sampler.calls(), 4);

    service
        .compute_risk(network.id, RiskProfile { design_rain_mm: Some(60.0) }, &cancel)
        .await
        .unwrap();
    assert_eq!(sampler.calls(), 6);
}

#[tokio::test]
async fn test_sampler_outage_still_builds() {
    let service = NetworkService::new(&Config::default(), Arc::new(StaticSampler::new().failing())).unwrap();
    let cancel = CancellationToken::new();

    let network = service
        .build_network(&[Asset::line("P", &[(41.0, 12.0), (41.001, 12.0)])], &cancel)
        .await
        .unwrap();
    assert_eq!(network.edges[0].direction(), Direction::Unknown);

    let result = service
        .compute_risk(network.id, RiskProfile::default(), &cancel)
        .await
        .unwrap();
    assert!(result.nodes.iter().all(|n| n.local_inflow == 0.0));
}

/// Sampler that never answers before the test cancels
struct StalledSampler;

#[async_trait]
impl CellSampler for StalledSampler {
    async fn fetch(&self, _cells: &[CellId], _layers: &[Layer]) -> Result<CellSamples, SamplerError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(CellSamples::new())
    }
}

#[tokio::test]
async fn test_cancellation_aborts_pending_fetch() {
    let service = Arc::new(NetworkService::new(&Config::default(), Arc::new(StalledSampler)).unwrap());
    let cancel = CancellationToken::new();

    let task = {
        let service = service.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            service
                .build_network(&[Asset::point("A", None, 41.0, 12.0)], &cancel)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("build should stop once cancelled")
        .unwrap();
    assert!(matches!(result, Err(ServiceError::Cancelled)));
}

/// Point `distance_m` away from (lat, lon) along `bearing` radians
fn offset(lat: f64, lon: f64, distance_m: f64, bearing: f64) -> (f64, f64) {
    let d_lat = distance_m * bearing.cos() / 111_194.93;
    let d_lon = distance_m * bearing.sin() / (111_194.93 * lat.to_radians().cos());
    (lat + d_lat, lon + d_lon)
}

proptest! {
    #[test]
    fn prop_points_within_tolerance_share_a_node(
        lat in -60.0f64..60.0,
        lon in -170.0f64..170.0,
        distance in 0.0f64..4.9,
        bearing in 0.0f64..std::f64::consts::TAU,
    ) {
        let (lat2, lon2) = offset(lat, lon, distance, bearing);
        prop_assume!(haversine_m(lat, lon, lat2, lon2) <= 5.0);

        let network = builder().build(&[
            Asset::point("P1", None, lat, lon),
            Asset::point("P2", None, lat2, lon2),
        ]);
        prop_assert_eq!(network.stats.node_count, 1);
    }

    #[test]
    fn prop_points_beyond_tolerance_stay_apart(
        lat in -60.0f64..60.0,
        lon in -170.0f64..170.0,
        distance in 5.2f64..500.0,
        bearing in 0.0f64..std::f64::consts::TAU,
    ) {
        let (lat2, lon2) = offset(lat, lon, distance, bearing);
        prop_assume!(haversine_m(lat, lon, lat2, lon2) > 5.0);

        let network = builder().build(&[
            Asset::point("P1", None, lat, lon),
            Asset::point("P2", None, lat2, lon2),
        ]);
        prop_assert_eq!(network.stats.node_count, 2);
    }
}
