//! Allocator configuration
//!
//! Settings come from an optional TOML file, overridden by `ZSPOOL_*`
//! environment variables:
//!
//! ```toml
//! total_budget = 4194304
//! class_sizes = [32, 64, 128, 256]
//! fallback_min_block_size = 0
//! ```
//!
//! `ZSPOOL_CLASS_SIZES` takes a comma separated list.

use crate::error::{Error, Result};
use crate::slab::pool::validate_class_sizes;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Size classes used when none are configured
pub const DEFAULT_CLASS_SIZES: [usize; 14] = [
    32, 48, 64, 128, 256, 512, 1024, 2048, 2336, 2448, 2720, 3072, 3264, 4096,
];

/// Default total budget (4 MiB)
pub const DEFAULT_TOTAL_BUDGET: usize = 4 * 1024 * 1024;

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "ZSPOOL";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Bytes reserved across all size classes
    pub total_budget: usize,
    /// Ascending block sizes, one size class each
    pub class_sizes: Vec<usize>,
    /// Smallest block size the fallback search may spill into
    ///
    /// The ideal class is always eligible. 0 lets every class take part.
    pub fallback_min_block_size: usize,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            total_budget: DEFAULT_TOTAL_BUDGET,
            class_sizes: DEFAULT_CLASS_SIZES.to_vec(),
            fallback_min_block_size: 0,
        }
    }
}

impl AllocatorConfig {
    pub fn new(total_budget: usize, class_sizes: Vec<usize>) -> Self {
        Self {
            total_budget,
            class_sizes,
            ..Self::default()
        }
    }

    pub fn with_fallback_min_block_size(mut self, size: usize) -> Self {
        self.fallback_min_block_size = size;
        self
    }

    /// Load configuration from an optional TOML file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Like [`AllocatorConfig::load`], reading `ZSPOOL_*` overrides from
    /// `vars` instead of the process environment when given
    pub fn load_with_env(
        path: Option<&Path>,
        vars: Option<::config::Map<String, String>>,
    ) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            debug!(path = ?path, "Loading allocator config file");
            builder = builder.add_source(::config::File::from(path).required(true));
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("class_sizes")
                .source(vars),
        );

        let cfg: Self = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| Error::Config(format!("Failed to load configuration: {}", e)))?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(text)
            .map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to render TOML: {}", e)))
    }

    /// Check the settings a pool would reject
    pub fn validate(&self) -> Result<()> {
        if self.total_budget == 0 {
            return Err(Error::Construction("Total budget must be positive".into()));
        }
        validate_class_sizes(&self.class_sizes)
    }
}
