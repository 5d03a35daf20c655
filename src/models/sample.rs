use serde::{Deserialize, Serialize};

/// Server identity. Distinct (host, port) pairs are never merged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerAddr {
    pub host: String,
    pub port: u16,
}

impl ServerAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse "host:port". Returns None for a missing or non-numeric port.
    pub fn parse(s: &str) -> Option<Self> {
        let (host, port) = s.rsplit_once(':')?;
        let host = host.trim();
        if host.is_empty() {
            return None;
        }
        let port: u16 = port.trim().parse().ok()?;
        Some(Self::new(host, port))
    }
}

impl std::fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One server's reported state within a poll cycle, as handed to the store.
/// Map names arrive as reported by the remote server; the scanner strips
/// control characters but otherwise arbitrary strings are valid keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub server: ServerAddr,
    pub map: String,
    pub players: u32,
    pub server_name: Option<String>,
    pub country_code: Option<String>,
}

/// A stored sample joined with its snapshot timestamp, as loaded for
/// aggregation.
#[derive(Debug, Clone)]
pub struct SampleFact {
    pub server: ServerAddr,
    pub map: String,
    pub players: i64,
    pub timestamp_ms: i64,
}

/// Per-server probe backoff state, persisted across restarts.
#[derive(Debug, Clone, PartialEq)]
pub struct Cooldown {
    pub timeout_secs: f64,
    pub failures: u32,
    pub skip_until_ms: i64,
}
