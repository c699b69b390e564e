//! On-disk configuration document of a single node.
//!
//! The committed document lives at `<dir>/config.json`. Staged candidates are
//! written next to it as `config-<ULID>.json` and promoted by rename.

use crate::{Credentials, QuorioError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use ulid::Ulid;

pub const CONFIG_FILE: &str = "config.json";
pub const CONFIG_VERSION: &str = "1";

const STAGED_PREFIX: &str = "config-";
const STAGED_SUFFIX: &str = ".json";

/// Staged files older than this are removed after a successful commit.
pub const STALE_STAGED_AGE: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDocument {
    pub version: String,
    pub credential: Credentials,
    #[serde(default = "default_region")]
    pub region: String,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl ConfigDocument {
    pub fn new(credential: Credentials, region: impl Into<String>) -> Self {
        Self {
            version: CONFIG_VERSION.to_string(),
            credential,
            region: region.into(),
        }
    }

    /// Parses and validates a candidate document.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let document: ConfigDocument = serde_json::from_slice(bytes).map_err(|error| {
            QuorioError::MalformedRequest(format!("invalid configuration document: {}", error))
        })?;

        if document.version != CONFIG_VERSION {
            return Err(QuorioError::MalformedRequest(format!(
                "unsupported configuration version {:?}",
                document.version
            )));
        }
        document.credential.validate()?;

        Ok(document)
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec_pretty(self)?))
    }
}

/// Fresh, unguessable staging name for one commit attempt.
pub fn staged_config_name() -> String {
    format!("{}{}{}", STAGED_PREFIX, Ulid::new(), STAGED_SUFFIX)
}

pub fn is_staged_config_name(name: &str) -> bool {
    name.strip_prefix(STAGED_PREFIX)
        .and_then(|rest| rest.strip_suffix(STAGED_SUFFIX))
        .map(|id| Ulid::from_string(id).is_ok())
        .unwrap_or(false)
}

pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    pub fn new(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    pub async fn read_bytes(&self) -> Result<Bytes> {
        let data = fs::read(self.config_path()).await?;
        Ok(Bytes::from(data))
    }

    pub async fn load(&self) -> Result<ConfigDocument> {
        let data = self.read_bytes().await?;
        serde_json::from_slice(&data).map_err(|error| {
            QuorioError::Config(format!(
                "failed to decode {}: {}",
                self.config_path().display(),
                error
            ))
        })
    }

    /// Loads the committed document, writing `default` first if none exists.
    pub async fn load_or_init(&self, default: ConfigDocument) -> Result<ConfigDocument> {
        if fs::try_exists(self.config_path()).await? {
            return self.load().await;
        }

        self.save(&default).await?;
        tracing::info!("Initialized configuration at {:?}", self.config_path());
        Ok(default)
    }

    pub async fn save(&self, document: &ConfigDocument) -> Result<()> {
        let payload = document.to_bytes()?;
        write_atomic(&self.config_path(), &payload).await
    }

    /// Writes a staged candidate. Staged files are never read as config.
    pub async fn stage(&self, name: &str, payload: &[u8]) -> Result<()> {
        let path = self.staged_path(name)?;
        write_atomic(&path, payload).await?;
        tracing::debug!("Staged configuration {}", name);
        Ok(())
    }

    /// Promotes a staged candidate to the committed document.
    pub async fn commit(&self, name: &str) -> Result<()> {
        let staged = self.staged_path(name)?;
        if !fs::try_exists(&staged).await? {
            return Err(QuorioError::InvalidArgument(format!(
                "staged configuration {} not found",
                name
            )));
        }

        fs::rename(&staged, self.config_path()).await?;
        tracing::info!("Committed staged configuration {}", name);

        match self.prune_staged(STALE_STAGED_AGE).await {
            Ok(0) => {}
            Ok(removed) => tracing::info!("Removed {} stale staged configurations", removed),
            Err(error) => tracing::warn!("Failed to prune staged configurations: {}", error),
        }

        Ok(())
    }

    /// Removes staged candidates last modified more than `max_age` ago.
    pub async fn prune_staged(&self, max_age: Duration) -> Result<usize> {
        let now = SystemTime::now();
        let mut removed = 0;
        let mut entries = fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if !is_staged_config_name(name) {
                continue;
            }

            let modified = entry.metadata().await?.modified()?;
            let age = now.duration_since(modified).unwrap_or_default();
            if age >= max_age {
                fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }

        Ok(removed)
    }

    fn staged_path(&self, name: &str) -> Result<PathBuf> {
        if !is_staged_config_name(name) {
            return Err(QuorioError::InvalidArgument(format!(
                "invalid staged configuration name {:?}",
                name
            )));
        }
        Ok(self.dir.join(name))
    }
}

/// Write to a temporary file first, then rename for atomicity.
pub(crate) async fn write_atomic(path: &Path, payload: &[u8]) -> Result<()> {
    let temp_path = path.with_extension(format!("{}.tmp", Ulid::new()));
    let mut file = fs::File::create(&temp_path).await?;
    let written = async {
        file.write_all(payload).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp_path, path).await
    }
    .await;

    if let Err(error) = written {
        let _ = fs::remove_file(&temp_path).await;
        return Err(error.into());
    }
    Ok(())
}
