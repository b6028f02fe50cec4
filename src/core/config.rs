use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::namespace::Namespaces;
use super::session::PeerMetadata;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub project: ProjectConfig,
    pub namespaces: Namespaces,
    pub settle: SettleConfig,
    pub wallet: WalletConfig,
    pub store: StoreConfig,
    pub demo: DemoWalletConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub project_id: String,
    pub metadata: PeerMetadata,
}

/// Bounds for waiting on the client store to catch up after a mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettleConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    pub timeout_ms: u64,
    /// How long to wait for the wallet to approve a proposal.
    pub approval_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    pub deep_link_base: String,
    pub open_on_connect: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
}

/// Behaviour of the in-process simulated wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoWalletConfig {
    pub address: String,
    pub chain_id: u64,
    pub node_url: String,
    pub session_ttl_secs: u64,
    pub pairing_ttl_secs: u64,
    pub persist_lag_ms: u64,
    pub auto_approve: bool,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        ProjectConfig {
            project_id: "aab32a91d28dac99f7d99a9f1a4d8827".to_string(),
            metadata: PeerMetadata {
                name: "Zenon Connect".to_string(),
                description: "Connect a dApp to the Syrius wallet".to_string(),
                url: "localhost".to_string(),
                icons: Vec::new(),
            },
        }
    }
}

impl Default for SettleConfig {
    fn default() -> Self {
        SettleConfig {
            initial_delay_ms: 250,
            max_delay_ms: 2000,
            backoff_factor: 2.0,
            timeout_ms: 15_000,
            approval_timeout_ms: 5 * 60 * 1000,
        }
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        WalletConfig {
            deep_link_base: "syrius://".to_string(),
            open_on_connect: false,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        let data_dir = project_dirs()
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".zenon-connect"));
        StoreConfig { data_dir }
    }
}

impl Default for DemoWalletConfig {
    fn default() -> Self {
        DemoWalletConfig {
            address: "z1qqjnwjjpnue8xmmpanz6csze6tcmtzzdtfsww7".to_string(),
            chain_id: 1,
            node_url: "wss://my.hc1node.com:35998".to_string(),
            session_ttl_secs: 7 * 24 * 60 * 60,
            pairing_ttl_secs: 30 * 24 * 60 * 60,
            persist_lag_ms: 1500,
            auto_approve: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            project: ProjectConfig::default(),
            namespaces: Namespaces::zenon(),
            settle: SettleConfig::default(),
            wallet: WalletConfig::default(),
            store: StoreConfig::default(),
            demo: DemoWalletConfig::default(),
        }
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("network", "zenon", "zenon-connect")
}

impl Config {
    pub fn load() -> Result<Self> {
        match Self::config_file() {
            Some(config_file) if config_file.exists() => Self::load_from(&config_file),
            _ => Ok(Config::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        tracing::debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        if let Some(config_file) = Self::config_file() {
            if let Some(parent) = config_file.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let content = toml::to_string_pretty(self)?;
            std::fs::write(&config_file, content)?;
            tracing::info!("Saved config to {:?}", config_file);
        }
        Ok(())
    }

    pub fn config_file() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn store_file(&self) -> PathBuf {
        self.store.data_dir.join("wc-store.json")
    }
}

impl SettleConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn approval_timeout(&self) -> Duration {
        Duration::from_millis(self.approval_timeout_ms)
    }
}
