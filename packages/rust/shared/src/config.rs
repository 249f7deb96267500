//! Application configuration for kbforge.
//!
//! User config lives at `~/.kbforge/kbforge.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{KbForgeError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "kbforge.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".kbforge";

// ---------------------------------------------------------------------------
// Config structs (matching kbforge.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Generative service settings.
    #[serde(default)]
    pub service: ServiceConfig,

    /// Knowledge-base container selection.
    #[serde(default)]
    pub knowledge_base: KnowledgeBaseConfig,

    /// Record store location.
    #[serde(default)]
    pub store: StoreConfig,

    /// Incident → article link settings.
    #[serde(default)]
    pub relationship: RelationshipConfig,
}

/// `[service]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Chat-completions endpoint the payload is POSTed to.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model identifier sent in every payload.
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature. Kept low for factual phrasing.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Total time budget for one outbound request.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Extra attempts after a transport error. Status errors are never retried.
    #[serde(default)]
    pub max_retries: u32,

    /// Base delay for exponential backoff between retries.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
            max_retries: 0,
            retry_base_ms: default_retry_base_ms(),
        }
    }
}

impl ServiceConfig {
    /// Request timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Parse and validate the endpoint URL.
    pub fn endpoint_url(&self) -> Result<Url> {
        let url = Url::parse(&self.endpoint).map_err(|e| {
            KbForgeError::config(format!("invalid service endpoint '{}': {e}", self.endpoint))
        })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(KbForgeError::config(format!(
                "unsupported endpoint scheme '{other}'"
            ))),
        }
    }

    /// Read the API key from the configured env var, if set and non-empty.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|val| !val.is_empty())
    }
}

fn default_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".into()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_model() -> String {
    "gpt-4.1-mini".into()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_retry_base_ms() -> u64 {
    500
}

/// `[knowledge_base]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBaseConfig {
    /// Container title substring used for the default lookup.
    #[serde(default = "default_title_contains")]
    pub title_contains: String,

    /// Fixed container id. Skips the lookup when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Default for KnowledgeBaseConfig {
    fn default() -> Self {
        Self {
            title_contains: default_title_contains(),
            id: None,
        }
    }
}

fn default_title_contains() -> String {
    "IT".into()
}

/// `[store]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the libSQL database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "var/kbforge.db".into()
}

/// `[relationship]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipConfig {
    /// Relationship type tag written on incident → article links.
    #[serde(default = "default_relationship_kind")]
    pub kind: String,
}

impl Default for RelationshipConfig {
    fn default() -> Self {
        Self {
            kind: default_relationship_kind(),
        }
    }
}

fn default_relationship_kind() -> String {
    "KB".into()
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.kbforge/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| KbForgeError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.kbforge/kbforge.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| KbForgeError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        KbForgeError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| KbForgeError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| KbForgeError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| KbForgeError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the service API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    match config.service.api_key() {
        Some(_) => Ok(()),
        None => Err(KbForgeError::config(format!(
            "generative service API key not found. Set the {} environment variable.",
            config.service.api_key_env
        ))),
    }
}
