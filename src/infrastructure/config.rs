use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Application configuration, loaded from an optional `rowsync.toml` in the
/// working directory. CLI flags override everything found here; a missing
/// file simply yields the defaults.
#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub connection: DbConfig,
    #[serde(default)]
    pub diff: DiffConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    /// Database driver: "postgres" (default), "mysql", "mariadb", or "sqlite".
    #[serde(default = "default_driver")]
    pub driver: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub dbname: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
}

fn default_driver() -> String {
    "postgres".to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

impl Default for DbConfig {
    fn default() -> Self {
        DbConfig {
            driver: default_driver(),
            host: default_host(),
            port: 0,
            dbname: String::new(),
            user: String::new(),
            password: String::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct DiffConfig {
    #[serde(default)]
    pub ignore_columns: Vec<String>,
    #[serde(default)]
    pub continue_on_error: bool,
    #[serde(default)]
    pub commit: bool,
    #[serde(default)]
    pub force_create: bool,
}

impl DbConfig {
    /// Build a sqlx-compatible connection URL from this config.
    pub fn url(&self) -> String {
        let port = if self.port != 0 {
            self.port
        } else {
            match self.driver.as_str() {
                "mysql" | "mariadb" => 3306,
                _ => 5432,
            }
        };
        match self.driver.as_str() {
            "mysql" | "mariadb" => format!(
                "mysql://{}:{}@{}:{}/{}",
                self.user, self.password, self.host, port, self.dbname
            ),
            "sqlite" => format!("sqlite://{}", self.dbname),
            _ => format!(
                "postgres://{}:{}@{}:{}/{}",
                self.user, self.password, self.host, port, self.dbname
            ),
        }
    }
}

impl AppConfig {
    /// Load from `path`. A missing file is not an error — the defaults are
    /// returned and the CLI flags are expected to fill in the rest.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(AppConfig::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let cfg: AppConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(cfg)
    }
}
