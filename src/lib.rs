pub mod api;
pub mod config;
pub mod domain;
pub mod graph;
pub mod risk;
pub mod sampling;
pub mod service;
pub mod spatial;
pub mod telemetry;
