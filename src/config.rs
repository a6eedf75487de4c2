//! Deployment settings read from the environment.
//!
//! Each config has a `from_lookup` constructor taking the variable source, so
//! tests do not have to mutate the process environment.

use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};

pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";
pub const DEFAULT_ALLOWED_ORIGINS: &[&str] = &[
    "http://localhost:5173",
    "http://localhost:3000",
    "https://shared-pomodoro-production.up.railway.app",
];
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:3001/ws";
pub const DEFAULT_ADMIN_PASSWORD: &str = "admin123";

const RECONNECT_DELAY: Duration = Duration::from_secs(2);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: DEFAULT_BIND_HOST.to_string(),
            port: DEFAULT_PORT,
            allowed_origins: DEFAULT_ALLOWED_ORIGINS
                .iter()
                .map(|origin| origin.to_string())
                .collect(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(port) = lookup("PORT") {
            config.port = port
                .trim()
                .parse()
                .with_context(|| format!("PORT is not a valid port number: {port}"))?;
        }
        if let Some(host) = lookup("THE_LOOP_BIND").filter(|h| !h.trim().is_empty()) {
            config.bind_host = host.trim().to_string();
        }
        if let Some(origins) = lookup("THE_LOOP_ALLOWED_ORIGINS") {
            config.allowed_origins = parse_origins(&origins);
        }

        Ok(config)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }

    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.iter().any(|allowed| allowed == origin)
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|origin| origin.trim().trim_end_matches('/'))
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub server_url: String,
    pub data_dir: PathBuf,
    pub admin_password: String,
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let data_dir = match lookup("THE_LOOP_DATA_DIR") {
            Some(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
            _ => default_data_dir()?,
        };

        Ok(Self {
            server_url: lookup("THE_LOOP_SERVER_URL")
                .filter(|url| !url.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string()),
            data_dir,
            admin_password: lookup("THE_LOOP_ADMIN_PASSWORD")
                .unwrap_or_else(|| DEFAULT_ADMIN_PASSWORD.to_string()),
            reconnect_delay: RECONNECT_DELAY,
            connect_timeout: CONNECT_TIMEOUT,
        })
    }

    pub fn storage_path(&self) -> PathBuf {
        self.data_dir.join("storage.json")
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("theloop.sqlite3")
    }
}

fn default_data_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|dir| dir.join("the-loop"))
        .context("could not determine a data directory; set THE_LOOP_DATA_DIR")
}
