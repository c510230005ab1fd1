use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env::var("SKIFF_PIER_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3003),
            // Bind the whole interface so peers on the local network can
            // reach the relay, not just loopback clients.
            bind_address: env::var("SKIFF_PIER_BIND").unwrap_or_else(|_| "0.0.0.0".to_string()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3003,
            bind_address: "0.0.0.0".to_string(),
        }
    }
}
