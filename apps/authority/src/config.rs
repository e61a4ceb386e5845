//! Server configuration read from the environment.

use std::path::PathBuf;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_LOG_FILTER: &str = "info";

/// Settings for the authority server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityConfig {
    pub host: String,
    pub port: u16,
    /// `tracing` filter directive.
    pub log_filter: String,
    /// JSON snapshot the authority is loaded from and saved to after every
    /// mutation. Without one the authority lives in memory only.
    pub snapshot: Option<PathBuf>,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            snapshot: None,
        }
    }
}

impl AuthorityConfig {
    /// Load `.env` if present, then read `HOST`, `PORT`, `RUST_LOG` and
    /// `AUTHORITY_SNAPSHOT`.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let port = match lookup("PORT") {
            Some(port) => port
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a port number, got {port:?}"))?,
            None => defaults.port,
        };

        Ok(Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port,
            log_filter: lookup("RUST_LOG").unwrap_or(defaults.log_filter),
            snapshot: lookup("AUTHORITY_SNAPSHOT")
                .filter(|path| !path.is_empty())
                .map(PathBuf::from),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
