/*!
Configuration management for the territory governor
*/

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::outbound::RetryPolicy;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Static reference data and last known ownership
    pub reference: ReferenceConfig,
    /// Per-world ingestion queues
    pub ingestion: IngestionConfig,
    /// Map snapshot polling
    pub polling: PollingConfig,
    /// Outbound buffer and sink retry behavior
    pub outbound: OutboundConfig,
    /// Event stream input
    pub stream: StreamConfig,
    /// Output configuration
    pub outputs: Vec<OutputConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReferenceConfig {
    /// Path to the territory database
    pub database_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestionConfig {
    /// Maximum number of queued signals per world
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollingConfig {
    pub enabled: bool,
    /// Seconds between map snapshots of the same world
    pub interval_secs: u64,
    pub census_base_url: String,
    pub service_id: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutboundConfig {
    /// Events buffered for the sink before the oldest are dropped
    pub capacity: usize,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    /// Upper bound on the final flush during shutdown
    pub flush_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamConfig {
    /// Newline-delimited JSON signal feed, `-` for stdin
    pub input: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Output plugin type
    pub plugin: OutputPlugin,
    /// Whether this output is enabled
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub enum OutputPlugin {
    Sqlite { path: PathBuf },
    Json { path: PathBuf, pretty: bool },
    Webhook { url: String, auth_token: Option<String> },
    Terminal { format: TerminalFormat },
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum TerminalFormat {
    Plain,
    Colored,
    Json,
}

impl GovernorConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Load from `path` if it exists, otherwise use the defaults
    pub fn load_or_default(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Default location under the user's configuration directory
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("territory-governor")
            .join("config.toml")
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl OutboundConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_secs(self.flush_timeout_secs)
    }
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("./territory.db"),
        }
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            census_base_url: "https://census.daybreakgames.com".to_string(),
            service_id: "s:example".to_string(),
            request_timeout_secs: 15,
        }
    }
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            capacity: 4096,
            max_attempts: 3,
            retry_backoff_ms: 500,
            flush_timeout_secs: 5,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            input: Some(PathBuf::from("-")),
        }
    }
}

impl Default for GovernorConfig {
    fn default() -> Self {
        let reference = ReferenceConfig::default();
        Self {
            outputs: vec![
                OutputConfig {
                    plugin: OutputPlugin::Terminal {
                        format: TerminalFormat::Colored,
                    },
                    enabled: true,
                },
                OutputConfig {
                    plugin: OutputPlugin::Sqlite {
                        path: reference.database_path.clone(),
                    },
                    enabled: true,
                },
            ],
            reference,
            ingestion: IngestionConfig::default(),
            polling: PollingConfig::default(),
            outbound: OutboundConfig::default(),
            stream: StreamConfig::default(),
        }
    }
}
