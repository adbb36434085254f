use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

/// Settings file read when `PHASE_CONFIG` is not set.
pub const DEFAULT_CONFIG_FILE: &str = "phase.toml";

pub static CONFIG: LazyLock<Config> = LazyLock::new(|| {
    let path = std::env::var_os("PHASE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    Config::load_from(&path).expect("FATAL: invalid phase-bridge configuration")
});

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_addr: String,
    pub loglevel: String,
    pub vault: VaultSettings,
    pub connection: ConnectionSettings,
    pub query: QuerySettings,
}

/// Where the key and the encrypted blob live. Keep them in separate directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultSettings {
    pub key_path: PathBuf,
    pub blob_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    /// Profile decrypted once at startup, connections drawn from a pool.
    Pooled,
    /// Decrypt and open a fresh connection for every request.
    PerRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub mode: ConnectionMode,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    pub query_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySettings {
    pub table: String,
    pub column: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:5000".to_string(),
            loglevel: "info".to_string(),
            vault: VaultSettings::default(),
            connection: ConnectionSettings::default(),
            query: QuerySettings::default(),
        }
    }
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            key_path: PathBuf::from("secret.key"),
            blob_path: PathBuf::from("config.ini.enc"),
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            mode: ConnectionMode::Pooled,
            max_connections: 10,
            acquire_timeout_secs: 5,
            query_timeout_secs: 5,
        }
    }
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            table: "ZSCORE".to_string(),
            column: "CAM1".to_string(),
        }
    }
}

impl ConnectionSettings {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs.max(1))
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs.max(1))
    }
}

impl Config {
    /// Defaults, then the optional TOML file, then `PHASE_*` env (`__` separates nested keys).
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("PHASE_").ignore(&["CONFIG"]).split("__"))
    }

    pub fn load_from(path: &Path) -> Result<Self, figment::Error> {
        Self::figment(path).extract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_without_file_or_env() {
        Jail::expect_with(|_jail| {
            let cfg = Config::load_from(Path::new("missing.toml"))?;
            assert_eq!(cfg.listen_addr, "0.0.0.0:5000");
            assert_eq!(cfg.vault.key_path, PathBuf::from("secret.key"));
            assert_eq!(cfg.vault.blob_path, PathBuf::from("config.ini.enc"));
            assert_eq!(cfg.connection.mode, ConnectionMode::Pooled);
            assert_eq!(cfg.query.table, "ZSCORE");
            assert_eq!(cfg.query.column, "CAM1");
            Ok(())
        });
    }

    #[test]
    fn env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "phase.toml",
                r#"
                listen_addr = "127.0.0.1:7000"

                [connection]
                mode = "per_request"
                query_timeout_secs = 2

                [vault]
                key_path = "/etc/phase/secret.key"
                "#,
            )?;
            jail.set_env("PHASE_LISTEN_ADDR", "127.0.0.1:7100");
            jail.set_env("PHASE_QUERY__COLUMN", "CAM2");

            let cfg = Config::load_from(Path::new("phase.toml"))?;
            assert_eq!(cfg.listen_addr, "127.0.0.1:7100");
            assert_eq!(cfg.connection.mode, ConnectionMode::PerRequest);
            assert_eq!(cfg.connection.query_timeout(), Duration::from_secs(2));
            assert_eq!(cfg.connection.max_connections, 10);
            assert_eq!(cfg.vault.key_path, PathBuf::from("/etc/phase/secret.key"));
            assert_eq!(cfg.query.column, "CAM2");
            Ok(())
        });
    }
}
