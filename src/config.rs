//! Run configuration.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (OPENAI_SECRET, HF, GRADIO_URL, CAPTIONKIT_LOG),
//!    after `.env` has been loaded by the binary
//! 2. Config file (`--config <path>`, or the nearest .captionkit/config.yaml)
//! 3. Defaults
//!
//! Config file discovery:
//! - Searches the current directory and its parents for .captionkit/config.yaml
//! - Falls back to <user config dir>/captionkit/config.yaml
//!
//! [`Settings`] is resolved once at startup and passed down explicitly.
//! Nothing below the CLI reads the environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::adapters::RateLimitPolicy;
use crate::core::Mode;

/// Default Gradio endpoint of a locally started captioning app
pub const DEFAULT_CAPTION_ENDPOINT: &str = "http://127.0.0.1:7860/";

/// Default chat completions base URL
pub const DEFAULT_REFINE_BASE_URL: &str = "https://api.openai.com/v1/";

/// Environment variable holding the refinement API key
pub const ENV_REFINE_API_KEY: &str = "OPENAI_SECRET";

/// Environment variable holding the captioning access token
pub const ENV_CAPTION_TOKEN: &str = "HF";

/// Environment variable overriding the captioning endpoint
pub const ENV_CAPTION_ENDPOINT: &str = "GRADIO_URL";

/// Environment variable overriding the log file (empty disables it)
pub const ENV_LOG_FILE: &str = "CAPTIONKIT_LOG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Required environment variable {0} is not set")]
    MissingCredential(&'static str),

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub caption: CaptionSettings,
    #[serde(default)]
    pub refine: RefineSettings,
    #[serde(default)]
    pub batch: BatchSettings,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

/// Captioning backend settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptionSettings {
    /// Gradio app base URL
    pub endpoint: String,
    /// Gradio API name of the captioning function
    pub api_name: String,
    /// Client-side timeout per HTTP request
    pub timeout_seconds: u64,
}

impl Default for CaptionSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_CAPTION_ENDPOINT.to_string(),
            api_name: "stream_chat".to_string(),
            timeout_seconds: 300,
        }
    }
}

/// Refinement backend settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RefineSettings {
    pub base_url: String,
    pub model: String,
    /// Output budget per refinement
    pub max_tokens: u32,
    pub timeout_seconds: u64,
    pub rate_limit: RateLimitPolicy,
}

impl Default for RefineSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_REFINE_BASE_URL.to_string(),
            model: "gpt-4".to_string(),
            max_tokens: 1000,
            timeout_seconds: 300,
            rate_limit: RateLimitPolicy::default(),
        }
    }
}

/// Batch processing settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    /// Delay after every file that reached a backend
    pub pacing_seconds: u64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self { pacing_seconds: 60 }
    }
}

/// Credentials required by the selected mode
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub caption_token: Option<String>,
    pub refine_api_key: Option<String>,
}

/// Resolved configuration
#[derive(Debug, Clone)]
pub struct Settings {
    pub caption: CaptionSettings,
    pub refine: RefineSettings,
    pub batch: BatchSettings,
    /// Append-only log file, if any
    pub log_file: Option<PathBuf>,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    caption_token: Option<String>,
    refine_api_key: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self::resolve(None, |_| None)
    }
}

impl Settings {
    /// Load settings from the config file and the process environment
    pub fn load(explicit_config: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = match explicit_config {
            Some(path) => Some(path.to_path_buf()),
            None => find_config_file(),
        };

        let file = match config_path {
            Some(path) => {
                let config = load_config_file(&path)?;
                Some((path, config))
            }
            None => None,
        };

        Ok(Self::resolve(file, |key| std::env::var(key).ok()))
    }

    /// Merge a parsed config file with environment lookups
    pub fn resolve(
        file: Option<(PathBuf, ConfigFile)>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let (config_file, config) = match file {
            Some((path, config)) => (Some(path), config),
            None => (None, ConfigFile::default()),
        };

        let mut caption = config.caption;
        if let Some(endpoint) = non_empty(env(ENV_CAPTION_ENDPOINT)) {
            caption.endpoint = endpoint;
        }

        let log_file = match env(ENV_LOG_FILE) {
            Some(value) if value.trim().is_empty() => None,
            Some(value) => Some(PathBuf::from(value)),
            None => Some(
                config
                    .log_file
                    .unwrap_or_else(|| PathBuf::from("training.log")),
            ),
        };

        Self {
            caption,
            refine: config.refine,
            batch: config.batch,
            log_file,
            config_file,
            caption_token: non_empty(env(ENV_CAPTION_TOKEN)),
            refine_api_key: non_empty(env(ENV_REFINE_API_KEY)),
        }
    }

    /// Check that every credential the mode needs is present
    pub fn credentials_for(&self, mode: Mode) -> Result<Credentials, ConfigError> {
        let mut credentials = Credentials::default();

        if mode.needs_captioner() {
            credentials.caption_token = Some(
                self.caption_token
                    .clone()
                    .ok_or(ConfigError::MissingCredential(ENV_CAPTION_TOKEN))?,
            );
        }

        if mode.needs_refiner() {
            credentials.refine_api_key = Some(
                self.refine_api_key
                    .clone()
                    .ok_or(ConfigError::MissingCredential(ENV_REFINE_API_KEY))?,
            );
        }

        Ok(credentials)
    }

    /// Delay applied after each attempted file in paced modes
    pub fn pacing(&self) -> Duration {
        Duration::from_secs(self.batch.pacing_seconds)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".captionkit").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    dirs::config_dir()
        .map(|dir| dir.join("captionkit").join("config.yaml"))
        .filter(|path| path.exists())
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
