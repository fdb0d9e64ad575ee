//! Server configuration, read from the environment (§6 Configuration Surface).
//!
//! Grounded in the original implementation's `env.go`: a lookup-with-default
//! helper per key, no config file, no CLI flags beyond what `main.rs` reads.

use std::env;

const PORT_VAR: &str = "SOCKS5_PORT";
const HOSTNAME_VAR: &str = "SOCKS5_HOSTNAME";
const USERNAME_VAR: &str = "SOCKS5_USERNAME";
const PASSWORD_VAR: &str = "SOCKS5_PASSWORD";

const DEFAULT_PORT: u16 = 1080;
const DEFAULT_HOSTNAME: &str = "localhost";

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// TCP/UDP bind port (default `1080`).
    pub port: u16,
    /// Bytes used as `BND.ADDR` in the UDP ASSOCIATE success reply
    /// (default `localhost`).
    pub hostname: String,
    /// If set together with `password`, the authenticator accepts exactly
    /// this username/password pair.
    pub username: Option<String>,
    /// See `username`.
    pub password: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            hostname: DEFAULT_HOSTNAME.to_string(),
            username: None,
            password: None,
        }
    }
}

impl Config {
    /// Reads configuration from the environment, falling back to defaults
    /// for anything unset or unparsable.
    pub fn from_env() -> Self {
        Self {
            port: env_var(PORT_VAR)
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            hostname: env_var(HOSTNAME_VAR).unwrap_or_else(|| DEFAULT_HOSTNAME.to_string()),
            username: env_var(USERNAME_VAR),
            password: env_var(PASSWORD_VAR),
        }
    }

    /// Whether a single fixed username/password pair is configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => Some((u.as_str(), p.as_str())),
            _ => None,
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}
