use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::bootstrap::DEFAULT_CREATE_URL;
use crate::query::{QueryOptions, Variant};
use crate::session::{DEFAULT_CHATHUB_URL, SessionConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root state directory (default: ~/.chathub)
    pub settings_dir: PathBuf,
    /// Conversation creation endpoint
    pub create_url: String,
    /// Chat hub websocket endpoint
    pub chathub_url: String,
    /// Seconds between keep-alive pings
    pub keepalive_secs: u64,
    /// Seconds to wait for the websocket to open
    pub connect_timeout_secs: u64,
    pub locale: String,
    pub market: String,
    pub region: String,
    pub variant: Variant,
    pub tone: String,
    /// Where `--logs` writes server frames (default: <settings_dir>/logs)
    pub logs_dir: Option<PathBuf>,
    /// Extra headers sent with conversation creation
    pub headers: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        let home_dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let query = QueryOptions::default();
        Self {
            settings_dir: home_dir.join(".chathub"),
            create_url: DEFAULT_CREATE_URL.to_string(),
            chathub_url: DEFAULT_CHATHUB_URL.to_string(),
            keepalive_secs: 15,
            connect_timeout_secs: 30,
            locale: query.locale,
            market: query.market,
            region: query.region,
            variant: query.variant,
            tone: query.tone,
            logs_dir: None,
            headers: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Default config file location.
    pub fn default_path() -> PathBuf {
        let home_dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home_dir.join(".chathub").join("config.toml")
    }

    /// Load configuration from file; a missing file yields defaults.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = path.unwrap_or_else(Self::default_path);

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("reading {}", config_path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("parsing {}", config_path.display()))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => self.settings_dir.join("config.toml"),
        };

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.logs_dir
            .clone()
            .unwrap_or_else(|| self.settings_dir.join("logs"))
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            endpoint: self.chathub_url.clone(),
            keepalive_interval: Duration::from_secs(self.keepalive_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        }
    }

    /// Query defaults for a new turn.
    pub fn query_options(&self) -> QueryOptions {
        QueryOptions {
            locale: self.locale.clone(),
            market: self.market.clone(),
            region: self.region.clone(),
            variant: self.variant,
            tone: self.tone.clone(),
            ..QueryOptions::default()
        }
    }

    pub fn extra_headers(&self) -> Result<HeaderMap> {
        let mut map = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("invalid header name `{name}`"))?;
            let value = HeaderValue::from_str(value)
                .with_context(|| format!("invalid value for header `{name}`"))?;
            map.insert(name, value);
        }
        Ok(map)
    }
}
