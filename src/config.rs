//! Settings for embedding a server or client.
use std::{
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    str::FromStr,
};

use thiserror::Error;

use crate::protocol::{Credentials, DEFAULT_WORKERS, SessionStore};

pub const DEFAULT_PORT: u16 = 7777;
pub const DEFAULT_PROTOCOL_VERSION: &str = "2.0";

fn default_address() -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, DEFAULT_PORT))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub address: SocketAddr,
    pub protocol_version: String,
    pub workers: usize,
    pub users: Vec<Credentials>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_string(),
            workers: DEFAULT_WORKERS,
            users: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// A session store accepting the configured users and version.
    pub fn sessions(&self) -> SessionStore {
        SessionStore::new(self.protocol_version.as_str(), self.users.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub address: SocketAddr,
    pub protocol_version: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("expected 'user:passphrase', got '{0}'")]
pub struct InvalidCredentials(String);

/// Parses the `user:passphrase` form used on the command line.
impl FromStr for Credentials {
    type Err = InvalidCredentials;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((user, passphrase)) if !user.is_empty() => Ok(Credentials::new(user, passphrase)),
            _ => Err(InvalidCredentials(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.address.to_string(), "127.0.0.1:7777");
        assert_eq!(config.protocol_version, "2.0");
        assert_eq!(config.workers, 16);
        assert!(config.users.is_empty());
    }

    #[test]
    fn credentials_from_str() {
        let creds: Credentials = "a:se:cret".parse().unwrap();
        assert_eq!(creds, Credentials::new("a", "se:cret"));

        assert!("nopass".parse::<Credentials>().is_err());
        assert!(":secret".parse::<Credentials>().is_err());
    }

    #[test]
    fn sessions_use_configured_users() {
        let config = ServerConfig {
            users: vec![Credentials::new("a", "secret")],
            ..Default::default()
        };
        let store = config.sessions();

        assert_eq!(store.version(), "2.0");
        assert!(store.login("a", "secret", "2.0").is_ok());
    }
}
