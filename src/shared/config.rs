use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_DATA_SUBDIR: &str = "haul-sync";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub remote: RemoteConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// Versioned namespace of the durable queue; becomes the database file stem.
    pub queue_namespace: String,
    pub max_connections: u32,
    /// Key (file stem) of the serialized mirror list.
    pub mirror_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Upper bound for a single remote write. Expiry counts as an ambiguous outcome.
    pub write_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub mirror_enabled: bool,
    pub drain_on_reconnect: bool,
    pub drain_mirror_on_reconnect: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                data_dir: default_data_dir(),
                queue_namespace: "mutation-queue-v1".to_string(),
                max_connections: 1,
                mirror_key: "offline_docs".to_string(),
            },
            remote: RemoteConfig {
                write_timeout_ms: 15_000,
            },
            sync: SyncConfig {
                mirror_enabled: true,
                drain_on_reconnect: true,
                drain_mirror_on_reconnect: true,
            },
        }
    }
}

impl StorageConfig {
    pub fn queue_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.db", self.queue_namespace))
    }

    pub fn mirror_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.json", self.mirror_key))
    }
}

impl RemoteConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl AppConfig {
    /// Config rooted at an explicit directory, everything else default.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let mut cfg = Self::default();
        cfg.storage.data_dir = data_dir.into();
        cfg
    }

    pub fn from_env() -> Self {
        // 既定値
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("HAUL_SYNC_DATA_DIR") {
            let trimmed = v.trim();
            if !trimmed.is_empty() {
                cfg.storage.data_dir = PathBuf::from(trimmed);
            }
        }
        if let Ok(v) = std::env::var("HAUL_SYNC_QUEUE_NAMESPACE") {
            let trimmed = v.trim();
            if !trimmed.is_empty() {
                cfg.storage.queue_namespace = trimmed.to_string();
            }
        }
        if let Ok(v) = std::env::var("HAUL_SYNC_WRITE_TIMEOUT_MS") {
            if let Some(value) = parse_u64(&v) {
                cfg.remote.write_timeout_ms = value.max(1);
            }
        }
        if let Ok(v) = std::env::var("HAUL_SYNC_MIRROR_ENABLED") {
            cfg.sync.mirror_enabled = parse_bool(&v, cfg.sync.mirror_enabled);
        }
        if let Ok(v) = std::env::var("HAUL_SYNC_DRAIN_ON_RECONNECT") {
            cfg.sync.drain_on_reconnect = parse_bool(&v, cfg.sync.drain_on_reconnect);
        }
        if let Ok(v) = std::env::var("HAUL_SYNC_DRAIN_MIRROR_ON_RECONNECT") {
            cfg.sync.drain_mirror_on_reconnect =
                parse_bool(&v, cfg.sync.drain_mirror_on_reconnect);
        }

        cfg
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.storage.max_connections == 0 {
            return Err("Storage max_connections must be greater than 0".to_string());
        }
        if self.storage.queue_namespace.trim().is_empty() {
            return Err("Storage queue_namespace cannot be empty".to_string());
        }
        if self.storage.mirror_key.trim().is_empty() {
            return Err("Storage mirror_key cannot be empty".to_string());
        }
        if self.storage.queue_namespace == self.storage.mirror_key {
            return Err("Storage queue_namespace and mirror_key must differ".to_string());
        }
        if self.remote.write_timeout_ms == 0 {
            return Err("Remote write_timeout_ms must be greater than 0".to_string());
        }
        Ok(())
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|base| base.join(DEFAULT_DATA_SUBDIR))
        .unwrap_or_else(|| PathBuf::from("./data"))
}

fn parse_bool(s: &str, default: bool) -> bool {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

fn parse_u64(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok()
}
