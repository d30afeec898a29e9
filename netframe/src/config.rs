//! TOML-backed configuration, loaded with `serdeconv` the way
//! `gamerunner`'s `GameConfig` loads its own config file.

use serde::{Deserialize, Serialize};
use sloggers::types::Severity;
use std::path::Path;

pub const DEFAULT_PORT: u16 = 9981;

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    /// -1 means unbounded, matching the original server's `max_clients` convention.
    pub max_clients: i32,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            bind_address: format!("0.0.0.0:{}", DEFAULT_PORT),
            max_clients: -1,
            log_level: default_log_level(),
        }
    }
}

impl ServerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> ServerConfig {
        serdeconv::from_toml_file(path).expect("error loading server configuration file")
    }

    pub fn severity(&self) -> Severity {
        parse_severity(&self.log_level)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ClientConfig {
    fn default() -> ClientConfig {
        ClientConfig {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            log_level: default_log_level(),
        }
    }
}

impl ClientConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> ClientConfig {
        serdeconv::from_toml_file(path).expect("error loading client configuration file")
    }

    pub fn severity(&self) -> Severity {
        parse_severity(&self.log_level)
    }
}

fn parse_severity(level: &str) -> Severity {
    match level {
        "trace" => Severity::Trace,
        "debug" => Severity::Debug,
        "warning" | "warn" => Severity::Warning,
        "error" => Severity::Error,
        "critical" => Severity::Critical,
        _ => Severity::Info,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_server_config_is_unbounded() {
        let config = ServerConfig::default();
        assert_eq!(config.max_clients, -1);
        assert!(config.bind_address.ends_with(&DEFAULT_PORT.to_string()));
    }

    #[test]
    fn severity_parses_known_levels() {
        assert_eq!(parse_severity("debug"), Severity::Debug);
        assert_eq!(parse_severity("bogus"), Severity::Info);
    }
}
