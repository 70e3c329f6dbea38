use std::io;

use thiserror::Error;

use crate::client_identity::ClientIdentity;
use crate::config::AuditConfigError;

#[derive(Debug, Error)]
pub enum SessionHandlerError {
    #[error("connection I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("profile execution failed: {0}")]
    Profile(String),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("peer address unavailable: {0}")]
    IdentityUnavailable(#[source] io::Error),
    #[error("session handler for {client_id} failed: {source}")]
    Handler {
        client_id: ClientIdentity,
        #[source]
        source: SessionHandlerError,
    },
    #[error("session handler for {client_id} panicked")]
    HandlerPanicked { client_id: ClientIdentity },
    #[error("session handler for {client_id} was cancelled")]
    HandlerCancelled { client_id: ClientIdentity },
}

impl DispatchError {
    pub fn client_id(&self) -> Option<ClientIdentity> {
        match self {
            Self::IdentityUnavailable(_) => None,
            Self::Handler { client_id, .. }
            | Self::HandlerPanicked { client_id }
            | Self::HandlerCancelled { client_id } => Some(*client_id),
        }
    }
}

#[derive(Debug, Error)]
pub enum AuditServerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] AuditConfigError),
    #[error("runtime I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}
