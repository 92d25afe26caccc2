//! Runoff scoring and flow accumulation over a built network.

pub mod runoff;
pub mod solver;

pub use runoff::{compute_runoff_risk, RiskClass, RunoffFactors, RunoffInput, RunoffRisk};
pub use solver::{EdgeRisk, NodeRisk, RiskProfile, RiskResult, RiskSolver, SolverStats};
