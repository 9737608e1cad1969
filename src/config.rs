use std::path::Path;
use std::time::Duration;
use serde::Deserialize;
use url::Url;
use crate::uploader::{Result, ResetPolicy, TransferErrorPolicy, UploaderError};

const DEFAULT_MAX_UPLOAD_SIZE_MB: f64 = 200.0;
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Settings of one uploader widget. They can change while the session is running.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub max_upload_size_mb: f64,
    pub multiple_files: bool,
    /// Allowed extensions (`"csv"` or `".csv"`) or mime types. Empty accepts everything.
    pub accepted_types: Vec<String>,
    pub disabled: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_upload_size_mb: DEFAULT_MAX_UPLOAD_SIZE_MB,
            multiple_files: false,
            accepted_types: Vec::new(),
            disabled: false,
        }
    }
}

impl SessionConfig {
    pub fn max_size_bytes(&self) -> u64 {
        (self.max_upload_size_mb * 1024.0 * 1024.0).round() as u64
    }

    /// Extensions without the leading dot, lowercased.
    pub fn accepted_extensions(&self) -> Vec<String> {
        self.accepted_types
            .iter()
            .filter(|ty| !ty.contains('/'))
            .map(|ty| ty.trim_start_matches('.').to_ascii_lowercase())
            .collect()
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub endpoint: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl ClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn endpoint_url(&self) -> Result<Url> {
        let url = Url::parse(&self.endpoint)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(UploaderError::InvalidConfig(format!(
                "endpoint must be http(s): {}",
                self.endpoint
            )));
        }
        Ok(url)
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ManagerConfig {
    pub transfer_error_policy: TransferErrorPolicy,
    pub reset_policy: ResetPolicy,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    pub client: ClientConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub manager: ManagerConfig,
}

impl Config {
    pub fn from_toml(content: &str) -> Result<Config> {
        let config: Config = toml::from_str(content)?;
        config.client.endpoint_url()?;
        Ok(config)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Config> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_toml(&content)
    }
}
