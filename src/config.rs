//! `.vaultgraph.toml` loading.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};
use crate::eval::EmptyQuery;
use crate::links::AmbiguityPolicy;

/// Per-vault settings. Every field has a default, so an absent file and an
/// empty file behave the same.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VaultConfig {
    /// Paths never listed by the store (directory prefixes or globs).
    pub ignore: Vec<String>,

    /// Documents carrying any of these tags are dropped from `list` results.
    pub suppressed_tags: Vec<String>,

    pub empty_query: EmptyQuery,

    pub ambiguous_links: AmbiguityPolicy,

    pub links: LinkConfig,

    pub graph: GraphConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinkConfig {
    pub max_depth: usize,
    pub skip_anchors: bool,
    pub skip_embeds: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            max_depth: 1,
            skip_anchors: false,
            skip_embeds: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GraphConfig {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub damping: f64,
    pub iterations: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            damping: 0.85,
            iterations: 50,
        }
    }
}

impl VaultConfig {
    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path).map_err(|e| VaultError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::parse(&text).map_err(|message| VaultError::Config {
            path: path.to_path_buf(),
            message,
        })
    }

    fn parse(text: &str) -> std::result::Result<Self, String> {
        let config: Self = toml::from_str(text).map_err(|e| e.to_string())?;
        if !(config.graph.damping > 0.0 && config.graph.damping < 1.0) {
            return Err(format!(
                "graph.damping must be between 0 and 1, got {}",
                config.graph.damping
            ));
        }
        if config.graph.iterations == 0 {
            return Err("graph.iterations must be at least 1".to_string());
        }
        Ok(config)
    }
}
