use quorio_core::{Credentials, QuorioError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variables that pin the admin credential for the process.
pub const ACCESS_KEY_ENV: &str = "QUORIO_ACCESS_KEY";
pub const SECRET_KEY_ENV: &str = "QUORIO_SECRET_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub node: NodeConfig,
    /// Every node of the cluster, this one included, in the same order on
    /// every node.
    pub peers: Vec<String>,
    pub drives: Vec<PathBuf>,
    pub config_dir: PathBuf,
    #[serde(default = "default_region")]
    pub region: String,
    /// Seeds the configuration document on first boot.
    pub credentials: CredentialsConfig,
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub bind_addr: String,
    #[serde(default)]
    pub advertise_addr: Option<String>,
}

impl NodeConfig {
    pub fn effective_address(&self) -> String {
        self.advertise_addr
            .clone()
            .unwrap_or_else(|| self.bind_addr.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    pub access_key: String,
    pub secret_key: String,
}

impl From<CredentialsConfig> for Credentials {
    fn from(config: CredentialsConfig) -> Self {
        Credentials::new(config.access_key, config.secret_key)
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_rpc_timeout_ms() -> u64 {
    10_000
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(::config::Environment::with_prefix("QUORIO").separator("__"))
            .build()
            .map_err(|e| QuorioError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| QuorioError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let address = self.node.effective_address();
        if !self.peers.iter().any(|peer| *peer == address) {
            return Err(QuorioError::Config(format!(
                "node address '{}' is not listed in peers",
                address
            )));
        }
        if self.drives.is_empty() {
            return Err(QuorioError::Config("at least one drive is required".to_string()));
        }
        if self.rpc_timeout_ms == 0 {
            return Err(QuorioError::Config("rpc_timeout_ms must be positive".to_string()));
        }
        Ok(())
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    /// Credentials pinned through the environment, if both halves are set.
    pub fn pinned_credentials(&self) -> Option<Credentials> {
        let access_key = std::env::var(ACCESS_KEY_ENV).ok()?;
        let secret_key = std::env::var(SECRET_KEY_ENV).ok()?;
        Some(Credentials::new(access_key, secret_key))
    }
}
