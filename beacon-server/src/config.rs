const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8443;
const DEFAULT_SWEEP_INTERVAL_MS: u64 = 1000;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Interval of the occupancy sweep that releases the pipeline of an
    /// empty room.
    pub sweep_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
        }
    }
}

impl ServerConfig {
    /// Read config from the environment.
    ///
    /// Variables: `BEACON_HOST`, `BEACON_PORT`, `BEACON_SWEEP_INTERVAL_MS`.
    /// Unset or unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        let host = std::env::var("BEACON_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());

        let port = std::env::var("BEACON_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let sweep_interval_ms = std::env::var("BEACON_SWEEP_INTERVAL_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_SWEEP_INTERVAL_MS);

        Self {
            host,
            port,
            sweep_interval_ms,
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
