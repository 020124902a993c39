//! Core configuration, loaded from a TOML file named by the
//! `IDCHAIN_CONFIG` environment variable.
use std::fs;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::IDCHAIN_CONFIG;

lazy_static! {
    /// Lazy static reference to core configuration. Falls back to local
    /// defaults when `IDCHAIN_CONFIG` is unset.
    pub static ref CORE_CONFIG: CoreConfig = load();
}

fn load() -> CoreConfig {
    match std::env::var(IDCHAIN_CONFIG) {
        Ok(path) => parse_toml(
            &fs::read_to_string(&path)
                .unwrap_or_else(|e| panic!("Error reading config file {path}: {e}")),
        ),
        Err(_) => CoreConfig::default(),
    }
}

/// Parses and returns core configuration.
fn parse_toml(toml_str: &str) -> CoreConfig {
    toml::from_str::<Config>(toml_str)
        .expect("Error parsing idchain config")
        .core
}

/// Gets `idchain-core` configuration variables.
pub fn core_config() -> &'static CORE_CONFIG {
    &CORE_CONFIG
}

/// Configuration variables for the `idchain-core` crate.
#[derive(Serialize, Deserialize, PartialEq, Debug)]
pub struct CoreConfig {
    /// Network name carried in connection strings.
    pub network: String,
    /// Endpoint of the document-storage ledger.
    pub ledger_endpoint: String,
    /// Endpoint of the DID governance chain.
    pub governance_endpoint: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            network: "local".to_string(),
            ledger_endpoint: "http://localhost:9984".to_string(),
            governance_endpoint: "ws://localhost:9944".to_string(),
        }
    }
}

/// Wrapper struct for parsing the `core` table.
#[derive(Serialize, Deserialize, PartialEq, Debug)]
struct Config {
    /// Core configuration data.
    core: CoreConfig,
}
