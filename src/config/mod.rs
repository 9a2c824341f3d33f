use crate::model::ConnectionParams;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.toml";
const ENV_PREFIX: &str = "HELM_";

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub sync: SyncConfig,
    pub alerts: AlertsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub autoconnect: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4455,
            password: None,
            autoconnect: false,
        }
    }
}

impl EngineConfig {
    pub fn params(&self) -> ConnectionParams {
        ConnectionParams {
            host: self.host.clone(),
            port: self.port,
            password: self.password.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    pub status_interval_ms: u64,
    pub scene_interval_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            status_interval_ms: 1000,
            scene_interval_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub suppress_while_live: bool,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            suppress_while_live: true,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = Self::default();
        let config_path = active_config_path();

        if let Ok(raw) = fs::read_to_string(&config_path) {
            if let Ok(file_config) = toml::from_str::<Config>(&raw) {
                config = file_config;
            }
        }

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var(format!("{}ENGINE_HOST", ENV_PREFIX)) {
            self.engine.host = val;
        }
        if let Ok(val) = env::var(format!("{}ENGINE_PORT", ENV_PREFIX)) {
            if let Ok(port) = val.parse() {
                self.engine.port = port;
            }
        }
        if let Ok(val) = env::var(format!("{}ENGINE_PASSWORD", ENV_PREFIX)) {
            self.engine.password = Some(val);
        }
        if let Ok(val) = env::var(format!("{}ENGINE_AUTOCONNECT", ENV_PREFIX)) {
            self.engine.autoconnect = val.parse().unwrap_or(false);
        }
        if let Ok(val) = env::var(format!("{}STATUS_INTERVAL_MS", ENV_PREFIX)) {
            if let Ok(interval) = val.parse() {
                self.sync.status_interval_ms = interval;
            }
        }
        if let Ok(val) = env::var(format!("{}SCENE_INTERVAL_MS", ENV_PREFIX)) {
            if let Ok(interval) = val.parse() {
                self.sync.scene_interval_ms = interval;
            }
        }
        if let Ok(val) = env::var(format!("{}SUPPRESS_WHILE_LIVE", ENV_PREFIX)) {
            self.alerts.suppress_while_live = val.parse().unwrap_or(true);
        }
    }

    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        // same bound connect() enforces, so a bad config fails before a dial
        self.engine.params().validate()?;
        if self.sync.status_interval_ms < 250 {
            return Err("sync.status_interval_ms must be >= 250".into());
        }
        if self.sync.scene_interval_ms < self.sync.status_interval_ms {
            return Err("sync.scene_interval_ms must be >= sync.status_interval_ms".into());
        }
        Ok(())
    }

    /// Writes the remembered last-known-good connection params back so a
    /// restart can offer a retry without re-prompting.
    pub fn remember_params(&mut self, params: &ConnectionParams) {
        self.engine.host = params.host.clone();
        self.engine.port = params.port;
        self.engine.password = params.password.clone();
    }

    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<(), Box<dyn std::error::Error>> {
        if path.as_ref().exists() {
            return Err("config.toml already exists".into());
        }
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let data = toml::to_string_pretty(&Config::default())?;
        fs::write(path, data)?;
        Ok(())
    }

    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        let path = active_config_path();
        self.validate()?;
        let data = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, data)?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        managed_config_path()
    }
}

fn managed_config_path() -> PathBuf {
    if let Ok(path) = env::var(format!("{}CONFIG_PATH", ENV_PREFIX)) {
        return PathBuf::from(path);
    }
    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".config").join("obs-helm").join(CONFIG_FILE)
}

fn active_config_path() -> PathBuf {
    let local = PathBuf::from(CONFIG_FILE);
    if local.exists() {
        local
    } else {
        managed_config_path()
    }
}
