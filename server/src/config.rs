use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chunk_store::UploadConfig;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

pub const ENV_PREFIX: &str = "CHUNKSTORE_";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
    /// Root directory of the on-disk blob store.
    pub storage_root: PathBuf,
    pub database_path: PathBuf,
    /// Hard cap on a single chunk request body.
    pub max_chunk_bytes: u64,
    /// SHA-256 hex of a bearer token mapped to the user id it authenticates.
    pub tokens: HashMap<String, String>,
    pub upload: UploadConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 8080,
            storage_root: PathBuf::from("./storage"),
            database_path: PathBuf::from("./chunkstore.db"),
            max_chunk_bytes: 16 * 1024 * 1024,
            tokens: HashMap::new(),
            upload: UploadConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Loads the TOML file if present, then applies `CHUNKSTORE_` variables on top.
    pub fn load(path: &Path) -> Result<Self> {
        let mut figment = Figment::new();
        if path.exists() {
            tracing::info!(config_path = %path.display(), "Loading configuration from file");
            figment = figment.merge(Toml::file(path));
        } else {
            tracing::debug!(config_path = %path.display(), "No config file found, using defaults");
        }

        let config: ServerConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if let Err(reason) = self.upload.validate() {
            bail!("invalid upload configuration: {}", reason);
        }
        if self.max_chunk_bytes == 0 {
            bail!("max_chunk_bytes must be at least 1");
        }
        for hash in self.tokens.keys() {
            let hash = hash.strip_prefix("sha256:").unwrap_or(hash);
            if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
                bail!("invalid token hash: expected 64 hex chars");
            }
        }
        if self.tokens.is_empty() {
            tracing::warn!("No tokens configured; every upload request will be rejected");
        }
        Ok(())
    }
}
