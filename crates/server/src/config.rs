use std::{
    collections::HashMap,
    env,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context};
use config::{Config, Environment, File, FileFormat};
use relay::RelayLimits;
use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_CONFIG_FILE: &str = "relay.toml";
pub const CONFIG_PATH_VAR: &str = "RELAY_CONFIG";

// Applied last, over APP__* variables.
const LEGACY_VARS: &[(&str, &str)] = &[
    ("SERVER_BIND", "server_bind"),
    ("JWT_SECRET", "jwt_secret"),
    ("PERSISTENCE_URL", "persistence_url"),
    ("MAX_CONNECTIONS", "max_connections"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server_bind: String,
    pub jwt_secret: String,
    pub jwt_issuer: Option<String>,
    pub jwt_leeway_secs: u64,
    pub persistence_url: String,
    pub persistence_timeout_ms: u64,
    pub max_connections: usize,
    pub max_message_bytes: usize,
    pub outbound_queue_capacity: usize,
    pub idle_timeout_secs: u64,
    pub ping_interval_secs: u64,
    pub persist_read_receipts: bool,
    pub ledger_capacity: usize,
    pub health_memory_limit_mb: u64,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:8080".into(),
            jwt_secret: String::new(),
            jwt_issuer: None,
            jwt_leeway_secs: 0,
            persistence_url: "http://127.0.0.1:5000/api/".into(),
            persistence_timeout_ms: 5_000,
            max_connections: 10_000,
            max_message_bytes: RelayLimits::DEFAULT_MAX_MESSAGE_BYTES,
            outbound_queue_capacity: RelayLimits::DEFAULT_OUTBOUND_QUEUE_CAPACITY,
            idle_timeout_secs: 60,
            ping_interval_secs: 25,
            persist_read_receipts: false,
            ledger_capacity: RelayLimits::DEFAULT_LEDGER_CAPACITY,
            health_memory_limit_mb: 1_024,
            log_filter: "info".into(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.jwt_secret.trim().is_empty() {
            bail!("jwt_secret must be set (JWT_SECRET or APP__JWT_SECRET)");
        }
        if self.max_connections == 0 {
            bail!("max_connections must be greater than zero");
        }
        if self.outbound_queue_capacity == 0 {
            bail!("outbound_queue_capacity must be greater than zero");
        }
        if self.max_message_bytes == 0 {
            bail!("max_message_bytes must be greater than zero");
        }
        if self.persistence_timeout_ms == 0 {
            bail!("persistence_timeout_ms must be greater than zero");
        }
        if self.ping_interval_secs == 0 || self.ping_interval_secs >= self.idle_timeout_secs {
            bail!("ping_interval_secs must be non-zero and shorter than idle_timeout_secs");
        }
        self.persistence_base_url()?;
        Ok(())
    }

    pub fn persistence_base_url(&self) -> anyhow::Result<Url> {
        let mut url = Url::parse(&self.persistence_url)
            .with_context(|| format!("invalid persistence_url '{}'", self.persistence_url))?;
        if url.cannot_be_a_base() {
            bail!("persistence_url '{}' cannot carry a path", self.persistence_url);
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }

    pub fn relay_limits(&self) -> RelayLimits {
        RelayLimits {
            max_message_bytes: self.max_message_bytes,
            outbound_queue_capacity: self.outbound_queue_capacity,
            ledger_capacity: self.ledger_capacity,
            persist_read_receipts: self.persist_read_receipts,
        }
    }
}

pub fn config_path(vars: &HashMap<String, String>) -> PathBuf {
    vars.get(CONFIG_PATH_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

pub fn load_settings() -> anyhow::Result<Settings> {
    let vars: HashMap<String, String> = env::vars().collect();
    load_settings_from(&config_path(&vars), &vars)
}

pub fn load_settings_from(path: &Path, vars: &HashMap<String, String>) -> anyhow::Result<Settings> {
    let app_vars: config::Map<String, String> = vars
        .iter()
        .filter(|(key, _)| key.starts_with("APP__"))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    let mut builder = Config::builder()
        .add_source(Config::try_from(&Settings::default()).context("encoding default settings")?)
        .add_source(File::from(path).format(FileFormat::Toml).required(false))
        .add_source(
            Environment::with_prefix("APP")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .source(Some(app_vars)),
        );
    for (var, key) in LEGACY_VARS {
        builder = builder
            .set_override_option(*key, vars.get(*var).cloned())
            .with_context(|| format!("applying {var}"))?;
    }

    let settings: Settings = builder
        .build()
        .with_context(|| format!("loading settings (file: {})", path.display()))?
        .try_deserialize()
        .context("decoding settings")?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
