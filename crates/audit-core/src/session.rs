use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use sslcaudit_observe::ResultSink;
use tokio::net::TcpStream;
use uuid::Uuid;

use crate::client_identity::ClientIdentity;
use crate::errors::SessionHandlerError;

/// A transport connection that can name its remote end.
pub trait PeerConnection: Send + 'static {
    fn peer_addr(&self) -> io::Result<SocketAddr>;
}

impl PeerConnection for TcpStream {
    fn peer_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }
}

/// Connection handed to session handlers by the listener. The peer address is
/// the one reported by `accept`, so it stays available after the peer resets.
#[derive(Debug)]
pub struct ClientConnection {
    stream: TcpStream,
    peer_addr: SocketAddr,
}

impl ClientConnection {
    pub fn new(stream: TcpStream, peer_addr: SocketAddr) -> Self {
        Self { stream, peer_addr }
    }

    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    pub fn into_stream(self) -> TcpStream {
        self.stream
    }
}

impl PeerConnection for ClientConnection {
    fn peer_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.peer_addr)
    }
}

/// Everything a handler is bound to when its session is created.
#[derive(Debug)]
pub struct SessionContext<P> {
    pub client_id: ClientIdentity,
    pub session_id: Uuid,
    pub profiles: Arc<[P]>,
    pub result_sink: ResultSink,
}

/// Per-client audit logic. `handle` is called once per connection routed to
/// the session and may be re-entered concurrently when one client opens
/// several connections at once; any ordering between those calls is up to
/// the implementation.
pub trait SessionHandler: Send + Sync + 'static {
    type Connection: PeerConnection;

    fn handle(
        &self,
        connection: Self::Connection,
    ) -> impl Future<Output = Result<(), SessionHandlerError>> + Send;
}

pub trait SessionHandlerFactory: Send + Sync + 'static {
    type Profile: Send + Sync + 'static;
    type Handler: SessionHandler;

    fn create_handler(&self, context: SessionContext<Self::Profile>) -> Self::Handler;
}

pub type ConnectionOf<F> =
    <<F as SessionHandlerFactory>::Handler as SessionHandler>::Connection;
pub type SessionOf<F> =
    Session<<F as SessionHandlerFactory>::Profile, <F as SessionHandlerFactory>::Handler>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Active,
}

pub struct Session<P, H> {
    client_id: ClientIdentity,
    session_id: Uuid,
    profiles: Arc<[P]>,
    result_sink: ResultSink,
    handler: H,
    routed_connections: AtomicU64,
}

impl<P, H> Session<P, H> {
    pub(crate) fn new(
        client_id: ClientIdentity,
        session_id: Uuid,
        profiles: Arc<[P]>,
        result_sink: ResultSink,
        handler: H,
    ) -> Self {
        Self {
            client_id,
            session_id,
            profiles,
            result_sink,
            handler,
            routed_connections: AtomicU64::new(0),
        }
    }

    pub fn client_id(&self) -> ClientIdentity {
        self.client_id
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn profiles(&self) -> &[P] {
        &self.profiles
    }

    pub fn result_sink(&self) -> &ResultSink {
        &self.result_sink
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn routed_connections(&self) -> u64 {
        self.routed_connections.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> SessionState {
        if self.routed_connections() == 0 {
            SessionState::Created
        } else {
            SessionState::Active
        }
    }

    /// Returns the 1-based index of the connection being routed.
    pub(crate) fn begin_connection(&self) -> u64 {
        self.routed_connections.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl<P, H> fmt::Debug for Session<P, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("client_id", &self.client_id)
            .field("session_id", &self.session_id)
            .field("profile_count", &self.profiles.len())
            .field("routed_connections", &self.routed_connections())
            .finish_non_exhaustive()
    }
}
