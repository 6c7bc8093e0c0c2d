use serde::Deserialize;

use crate::conn::READ_CHUNK_SIZE;

/// Server-side limits for the connection core, loaded from environment
/// variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bytes requested by a single socket read (default: 4096)
    pub read_chunk_size: usize,

    /// Maximum number of live connections (default: 1024)
    pub max_connections: usize,

    /// Resolve peer hostnames with a reverse DNS lookup on create
    /// (default: true). The lookup blocks the creating thread.
    pub reverse_dns: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: READ_CHUNK_SIZE,
            max_connections: 1024,
            reverse_dns: true,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables (with .env support).
    ///
    /// Missing or malformed values fall back to the defaults.
    pub fn from_env() -> Self {
        // Load .env file if present (ignore errors if missing)
        let _ = dotenvy::dotenv();

        let defaults = Self::default();
        ServerConfig {
            read_chunk_size: std::env::var("ALPACA_READ_CHUNK_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|&n: &usize| n > 0)
                .unwrap_or(defaults.read_chunk_size),
            max_connections: std::env::var("ALPACA_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_connections),
            reverse_dns: std::env::var("ALPACA_REVERSE_DNS")
                .map(|v| {
                    matches!(
                        v.to_lowercase().as_str(),
                        "true" | "1" | "yes"
                    )
                })
                .unwrap_or(defaults.reverse_dns),
        }
    }

    pub fn read_chunk_size(mut self, bytes: usize) -> Self {
        self.read_chunk_size = bytes.max(1);
        self
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn reverse_dns(mut self, enabled: bool) -> Self {
        self.reverse_dns = enabled;
        self
    }
}
