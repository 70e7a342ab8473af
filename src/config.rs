//! Service configuration, read from a TOML file
//!
//! Every key is optional; a missing file falls back to `Config::default()`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Listen address, e.g. "0.0.0.0:8080"
    pub addr: String,
    pub log: LogConfig,
    /// Primary database holding tenants' models, adapters, enforcers and permissions
    pub database: DatabaseConfig,
    pub policy: PolicyConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// Fallback filter when RUST_LOG is unset
    pub level: String,
}

/// Database flavours sea-orm is built with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    #[default]
    Postgres,
    Mysql,
    Sqlite,
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DatabaseKind::Postgres => "postgres",
            DatabaseKind::Mysql => "mysql",
            DatabaseKind::Sqlite => "sqlite",
        })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    #[serde(rename = "type")]
    pub kind: DatabaseKind,
    pub host: String,
    pub port: u16,
    #[serde(rename = "database")]
    pub name: String,
    pub username: String,
    pub password: String,
    /// Database file for `type = "sqlite"`
    pub path: PathBuf,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Per-adapter policy files live here when the primary database is sqlite
    pub dir: PathBuf,
    /// Keep resolved enforcers in memory between requests
    pub cache: bool,
    /// Deadline for a single sync or enforce call
    pub timeout_secs: u64,
    /// Upper bound on the tuples one permission may compile into
    pub max_rules_per_permission: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
            log: LogConfig::default(),
            database: DatabaseConfig::default(),
            policy: PolicyConfig::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            kind: DatabaseKind::Postgres,
            host: "localhost".to_string(),
            port: 5432,
            name: "identity".to_string(),
            username: "postgres".to_string(),
            password: String::new(),
            path: PathBuf::from("./data/identity.db"),
            max_connections: 50,
            connect_timeout_secs: 8,
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./data/policies"),
            cache: true,
            timeout_secs: 30,
            max_rules_per_permission: 10_000,
        }
    }
}

impl DatabaseConfig {
    /// sea-orm connection URL
    pub fn connection_url(&self) -> String {
        match self.kind {
            DatabaseKind::Sqlite => format!("sqlite://{}?mode=rwc", self.path.display()),
            DatabaseKind::Postgres | DatabaseKind::Mysql => format!(
                "{}://{}:{}@{}:{}/{}",
                self.kind, self.username, self.password, self.host, self.port, self.name
            ),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl PolicyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }
}
