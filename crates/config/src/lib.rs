//! Node configuration: the file-loaded settings, the module set and the
//! constants shared by the sync pipeline and the query surface.

pub mod constants;
pub mod types;

use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::types::{BlockVersion, Modules, ServersSource};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

fn default_advanced_load_blocks() -> usize {
    10
}

fn default_count_blocks_in_batch() -> usize {
    10
}

/// Settings of one embedded KV database.
#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    pub path_to_bd: String,
    pub write_buffer_size_mb: usize,
    pub lru_cache_mb: usize,
    #[serde(default)]
    pub is_bloom_filter: bool,
    #[serde(default)]
    pub is_checks: bool,
}

/// Bounds of the in-memory caches; 0 disables a cache entirely.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CachesConfig {
    #[serde(default)]
    pub max_count_elements_block_cache: usize,
    #[serde(default)]
    pub max_count_blocks_txs_cache: usize,
    #[serde(default)]
    pub max_local_cache_elements: usize,
}

/// Top-level node configuration, loaded from the single positional CLI
/// argument. YAML and JSON shaped files both parse.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    #[serde(flatten)]
    pub db: DbConfig,
    /// Directory holding the `*.blk` archive files.
    pub path_to_folder: String,
    pub count_threads: usize,
    pub port: u16,
    #[serde(default)]
    pub get_blocks_from_file: bool,
    pub count_connections: usize,
    pub servers: ServersSource,
    pub modules: Vec<String>,
    #[serde(default = "default_advanced_load_blocks")]
    pub advanced_load_blocks: usize,
    #[serde(default = "default_count_blocks_in_batch")]
    pub count_blocks_in_batch: usize,
    #[serde(default)]
    pub compress_blocks: bool,
    #[serde(flatten)]
    pub caches: CachesConfig,
    /// Base name of the node key; the key material lives in
    /// `<sign_key>.raw.prv` next to the working directory.
    #[serde(default)]
    pub sign_key: String,
    #[serde(default)]
    pub block_version: BlockVersion,
    #[serde(default)]
    pub validate: bool,
    #[serde(rename = "validateSign", default)]
    pub validate_sign: bool,
    #[serde(default)]
    pub test_nodes_result_server: String,
    #[serde(default)]
    pub other_torrent_port: u16,
}

impl NodeConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: NodeConfig = serde_yaml::from_str(&raw)?;
        if config.other_torrent_port == 0 {
            config.other_torrent_port = config.port;
        }
        config.validate_settings()?;
        Ok(config)
    }

    pub fn parsed_modules(&self) -> Result<Modules, ConfigError> {
        Modules::parse(self.modules.iter().map(String::as_str))
            .map_err(|module| ConfigError::Invalid(format!("unknown module `{module}`")))
    }

    fn validate_settings(&self) -> Result<(), ConfigError> {
        if self.count_connections == 0 {
            return Err(ConfigError::Invalid("count_connections is 0".into()));
        }
        if self.count_threads == 0 {
            return Err(ConfigError::Invalid("count_threads is 0".into()));
        }
        let modules = self.parsed_modules()?;
        if self.validate && self.get_blocks_from_file {
            return Err(ConfigError::Invalid(
                "validate and get_blocks_from_file options not compatible".into(),
            ));
        }
        if modules.users() && self.get_blocks_from_file {
            return Err(ConfigError::Invalid(
                "users module and get_blocks_from_file options not compatible".into(),
            ));
        }
        Ok(())
    }
}
