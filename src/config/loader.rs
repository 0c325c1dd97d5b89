//! Configuration Loader
//!
//! Layers configuration sources, lowest precedence first:
//!
//! 1. [`BulkConfig::default`]
//! 2. an optional YAML/TOML/JSON file
//! 3. `BULKOPS__*` environment variables (e.g. `BULKOPS__MAX_PARALLEL=8`)
//!
//! The merged result is validated before it is returned.

use config::{Config, Environment, File};
use std::path::Path;
use tracing::debug;

use super::BulkConfig;
use crate::error::BulkResult;

const ENV_PREFIX: &str = "BULKOPS";

impl BulkConfig {
    /// Load from `path`, then apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> BulkResult<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading bulk configuration");
        Self::build(Some(path))
    }

    /// Defaults plus environment overrides only
    pub fn from_env() -> BulkResult<Self> {
        Self::build(None)
    }

    fn build(path: Option<&Path>) -> BulkResult<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&BulkConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        let config: BulkConfig = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;

        debug!(
            chunk_size = config.chunk_size,
            max_parallel = config.max_parallel,
            retries = config.retries,
            operation = %config.operation,
            "Bulk configuration loaded"
        );

        Ok(config)
    }
}
