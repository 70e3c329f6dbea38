//! Connection dispatcher for the sslcaudit TLS client audit server.
//!
//! Every accepted connection is resolved to the host address of its peer and
//! routed to the one [`Session`] owned by that client. Sessions are created on
//! first contact with a snapshot of the configured profiles and live for the
//! rest of the server run.

mod client_identity;
mod config;
mod dispatcher;
mod errors;
mod handler_guard;
mod metrics;
mod profile;
mod profile_cursor;
pub mod server;
mod session;

pub use client_identity::ClientIdentity;
pub use config::{AuditConfigError, AuditServerConfig};
pub use dispatcher::{DispatchOutcome, SessionDispatcher};
pub use errors::{AuditServerError, DispatchError, SessionHandlerError};
pub use metrics::DispatcherMetrics;
pub use profile::{flatten_profiles, ProfileCatalog, ProfileSource, SharedProfileSource};
pub use profile_cursor::{ProfileCursor, ProfileCursorFactory, ProfileCursorHandler, ProfileRunner};
pub use server::{AuditServer, AuditServerHandle, ServerRunSummary};
pub use session::{
    ClientConnection, ConnectionOf, PeerConnection, Session, SessionContext, SessionHandler,
    SessionHandlerFactory, SessionOf, SessionState,
};
pub use sslcaudit_observe::{AuditOutcome, OutcomeContext, OutcomeKind, ResultSink};
