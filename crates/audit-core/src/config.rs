use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuditServerConfig {
    pub listen_addr: String,
    pub listen_port: u16,
    /// How long `stop()` waits for in-flight handlers before aborting them.
    pub drain_timeout_ms: u64,
    pub accept_error_backoff_ms: u64,
}

impl Default for AuditServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1".to_string(),
            listen_port: 8443,
            drain_timeout_ms: 30_000,
            accept_error_backoff_ms: 10,
        }
    }
}

impl AuditServerConfig {
    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        Self {
            listen_addr: addr.ip().to_string(),
            listen_port: addr.port(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), AuditConfigError> {
        if self.listen_addr.trim().is_empty() {
            return Err(AuditConfigError::EmptyListenAddr);
        }
        self.listen_socket_addr()?;
        if self.drain_timeout_ms == 0 {
            return Err(AuditConfigError::ZeroValue("drain_timeout_ms"));
        }
        Ok(())
    }

    pub fn listen_socket_addr(&self) -> Result<SocketAddr, AuditConfigError> {
        let host = self.listen_addr.trim();
        let host = host
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .unwrap_or(host);
        let ip = host
            .parse::<IpAddr>()
            .map_err(|_| AuditConfigError::InvalidListenAddr(self.listen_addr.clone()))?;
        Ok(SocketAddr::new(ip, self.listen_port))
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn accept_error_backoff(&self) -> Duration {
        Duration::from_millis(self.accept_error_backoff_ms)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuditConfigError {
    #[error("listen_addr must not be empty")]
    EmptyListenAddr,
    #[error("listen_addr {0:?} is not an IP address")]
    InvalidListenAddr(String),
    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),
}
