use anyhow::{Context, Result};

pub mod network;
pub mod session;

pub use network::*;
pub use session::*;

/// Network description plus session parameters, both loaded from TOML.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub network: NetworkConfig,
    pub session: SessionConfig,
}

impl SimulationConfig {
    pub fn load_from_files(network_path: &str, session_path: &str) -> Result<Self> {
        let network_content = std::fs::read_to_string(network_path)
            .with_context(|| format!("reading network description {}", network_path))?;
        let session_content = std::fs::read_to_string(session_path)
            .with_context(|| format!("reading session config {}", session_path))?;

        Self::from_toml_strs(&network_content, &session_content)
    }

    pub fn from_toml_strs(network_toml: &str, session_toml: &str) -> Result<Self> {
        let network: NetworkConfig = toml::from_str(network_toml)?;
        let session: SessionConfig = toml::from_str(session_toml)?;

        // Validate configurations
        network.validate()?;
        session.validate()?;

        Ok(SimulationConfig { network, session })
    }
}

pub trait Validate {
    fn validate(&self) -> Result<()>;
}
