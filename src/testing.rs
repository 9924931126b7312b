//! Shared fixtures for unit tests.

use std::sync::Arc;

use crate::config::NetworkConfig;
use crate::network::{Network, NetworkIndex};

pub const CORRIDOR_TOML: &str = include_str!("../tests/data/corridor.toml");

pub fn corridor() -> Network {
    let config: NetworkConfig = toml::from_str(CORRIDOR_TOML).expect("corridor fixture parses");
    Network::from_config(&config).expect("corridor fixture is valid")
}

pub fn corridor_index() -> Arc<NetworkIndex> {
    Arc::new(NetworkIndex::new(Arc::new(corridor()), 50.0))
}
