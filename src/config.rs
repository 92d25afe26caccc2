use anyhow::Result;
use figment::{providers::{Env, Format, Toml}, Figment};
use serde::Deserialize;
use std::net::SocketAddr;
use validator::Validate;

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct Config {
    #[serde(default)]
    #[validate(nested)]
    pub server: ServerConfig,
    #[serde(default)]
    #[validate(nested)]
    pub sampler: SamplerConfig,
    #[serde(default)]
    #[validate(nested)]
    pub network: NetworkConfig,
    #[serde(default)]
    #[validate(nested)]
    pub solver: SolverConfig,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[validate(range(min = 1))]
    pub request_timeout_secs: u64,
    #[validate(range(min = 1024))]
    pub max_body_bytes: usize,
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            request_timeout_secs: 60,
            max_body_bytes: 16 * 1024 * 1024,
            enable_cors: false,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

/// Cell-data sampling service
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct SamplerConfig {
    pub base_url: String,
    #[validate(range(min = 1))]
    pub http_timeout_seconds: u64,
    /// Maximum number of cells sent in one request
    #[validate(range(min = 1))]
    pub batch_size: usize,
    #[validate(range(min = 1))]
    pub max_concurrent_batches: usize,
    pub max_retries: u32,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8090".to_string(),
            http_timeout_seconds: 30,
            batch_size: 500,
            max_concurrent_batches: 4,
            max_retries: 3,
        }
    }
}

/// Network builder parameters
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct NetworkConfig {
    /// Two coordinates closer than this resolve to the same node
    #[validate(range(min = 0.01))]
    pub snap_tolerance_m: f64,
    /// H3 resolution of node cells
    #[validate(range(max = 15))]
    pub cell_resolution: u8,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            snap_tolerance_m: 5.0,
            cell_resolution: 11,
        }
    }
}

/// Flow accumulation solver parameters
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct SolverConfig {
    #[validate(range(min = 1, max = 10_000))]
    pub max_iterations: u32,
    /// Exponential decay per meter of edge length
    #[validate(range(min = 0.0))]
    pub decay_per_m: f64,
    #[validate(range(min = 0.01, max = 1.0))]
    pub damping: f64,
    /// Stop once the largest per-node change drops below this
    #[validate(range(min = 0.0))]
    pub convergence_tolerance: f64,
    /// Upstream flow at or below this is not pushed downstream
    #[validate(range(min = 0.0))]
    pub flow_threshold: f64,
    /// Extra multiplier on edges whose direction could not be inferred
    #[validate(range(min = 0.0, max = 1.0))]
    pub unknown_direction_penalty: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            decay_per_m: 0.001,
            damping: 0.5,
            convergence_tolerance: 0.01,
            flow_threshold: 0.001,
            unknown_direction_penalty: 0.5,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("STORMWATER__").split("__"));
        let cfg: Config = figment.extract()?;
        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.network.snap_tolerance_m, 5.0);
        assert_eq!(cfg.solver.max_iterations, 20);
        assert_eq!(cfg.solver.damping, 0.5);
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        let mut cfg = Config::default();
        cfg.network.cell_resolution = 16;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.solver.damping = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.sampler.batch_size = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg: Config = Figment::new()
            .merge(Toml::string("[network]\nsnap_tolerance_m = 2.5\n"))
            .extract()
            .unwrap();
        assert_eq!(cfg.network.snap_tolerance_m, 2.5);
        assert_eq!(cfg.network.cell_resolution, 11);
        assert_eq!(cfg.solver.decay_per_m, 0.001);
        assert_eq!(cfg.server.port, 8080);
    }
}
