pub mod config;
pub mod error;
pub mod network;
pub mod mapping;
pub mod simulation;
pub mod compute;
pub mod session;

#[cfg(test)]
mod testing;

pub use config::SimulationConfig;
pub use error::{ControlError, Result};
pub use session::*;
