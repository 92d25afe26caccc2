pub mod asset;
pub mod network;

pub use asset::*;
pub use network::*;
