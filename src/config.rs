use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::optimizer::StockLossPolicy;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
pub const ENV_PREFIX: &str = "SCHEDULER__";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub solver: SolverConfig,
    #[serde(default)]
    pub model: ModelConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Backend name: "microlp", "cbc" or "highs"
    pub name: String,
    /// Forward the backend's own log output
    pub verbose: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            name: "microlp".to_string(),
            verbose: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub stock_loss_policy: StockLossPolicy,
    /// Add the direction binaries even for convex cost curves
    pub force_sign_binaries: bool,
    /// Round reported stock trajectories to this many decimals
    pub decimal_precision: Option<u32>,
    /// Allowed drift of the planned stock beyond the device bounds
    pub stock_tolerance: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            stock_loss_policy: StockLossPolicy::Linear,
            force_sign_binaries: false,
            decimal_precision: None,
            stock_tolerance: 1e-6,
        }
    }
}

impl Config {
    /// Defaults, then `config/default.toml` if present, then `SCHEDULER__*` env vars
    pub fn load() -> Result<Self> {
        Self::extract(Self::figment(DEFAULT_CONFIG_PATH))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        Self::extract(Self::figment(path))
            .with_context(|| format!("Failed to load config from {}", path.display()))
    }

    pub fn figment(path: impl AsRef<Path>) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    fn extract(figment: Figment) -> Result<Self> {
        Ok(figment.extract()?)
    }
}
