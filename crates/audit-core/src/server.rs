use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sslcaudit_observe::ResultSink;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinError, JoinHandle, JoinSet};

use crate::config::AuditServerConfig;
use crate::dispatcher::{DispatchOutcome, SessionDispatcher};
use crate::errors::{AuditServerError, DispatchError};
use crate::profile::ProfileCatalog;
use crate::session::{ClientConnection, SessionHandler, SessionHandlerFactory};

const LISTEN_BACKLOG: u32 = 1024;

/// Source of accepted streams for the accept loop.
pub(crate) trait ConnectionAcceptor: Send + 'static {
    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;
}

impl ConnectionAcceptor for TcpListener {
    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServerRunSummary {
    pub accepted_connections: u64,
    pub completed_connections: u64,
    pub failed_connections: u64,
    /// Connections whose handlers were still running when the drain timeout
    /// elapsed.
    pub aborted_connections: u64,
}

impl ServerRunSummary {
    fn record(&mut self, joined: Result<Result<DispatchOutcome, DispatchError>, JoinError>) {
        match joined {
            Ok(Ok(_)) => self.completed_connections += 1,
            Ok(Err(DispatchError::HandlerCancelled { .. })) => self.aborted_connections += 1,
            Ok(Err(_)) => self.failed_connections += 1,
            Err(error) if error.is_cancelled() => self.aborted_connections += 1,
            Err(error) => {
                tracing::warn!(error = %error, "connection task failed outside the handler");
                self.failed_connections += 1;
            }
        }
    }
}

/// An unstarted audit server: a [`SessionDispatcher`] plus the address it
/// will listen on.
pub struct AuditServer<F: SessionHandlerFactory> {
    config: AuditServerConfig,
    dispatcher: Arc<SessionDispatcher<F>>,
}

impl<F> AuditServer<F>
where
    F: SessionHandlerFactory,
    F::Handler: SessionHandler<Connection = ClientConnection>,
{
    pub fn new(
        config: AuditServerConfig,
        factory: F,
        profile_catalog: ProfileCatalog<F::Profile>,
        result_sink: Option<ResultSink>,
    ) -> Result<Self, AuditServerError> {
        config.validate()?;
        Ok(Self {
            config,
            dispatcher: Arc::new(SessionDispatcher::new(factory, profile_catalog, result_sink)),
        })
    }

    pub fn config(&self) -> &AuditServerConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<SessionDispatcher<F>> {
        &self.dispatcher
    }

    pub fn result_sink(&self) -> &ResultSink {
        self.dispatcher.result_sink()
    }

    /// Binds the listener and spawns the accept loop. Returns as soon as the
    /// socket is listening; bind failures are reported here.
    pub async fn start(self) -> Result<AuditServerHandle<F>, AuditServerError> {
        let listener = bind_listener(&self.config)?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, "audit server listening");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept_loop = AcceptLoop {
            dispatcher: Arc::clone(&self.dispatcher),
            accept_error_backoff: self.config.accept_error_backoff(),
            drain_timeout: self.config.drain_timeout(),
        };
        let join_handle = tokio::spawn(accept_loop.run(listener, shutdown_rx));

        Ok(AuditServerHandle {
            local_addr,
            dispatcher: self.dispatcher,
            run_state: Mutex::new(RunState {
                running: Some(RunningServer {
                    shutdown_tx,
                    join_handle,
                }),
                summary: None,
            }),
        })
    }
}

struct RunningServer {
    shutdown_tx: watch::Sender<bool>,
    join_handle: JoinHandle<ServerRunSummary>,
}

struct RunState {
    running: Option<RunningServer>,
    summary: Option<ServerRunSummary>,
}

/// A running audit server. Dropping the handle without calling
/// [`Self::stop`] closes the listener but does not wait for in-flight
/// handlers.
pub struct AuditServerHandle<F: SessionHandlerFactory> {
    local_addr: SocketAddr,
    dispatcher: Arc<SessionDispatcher<F>>,
    run_state: Mutex<RunState>,
}

impl<F: SessionHandlerFactory> AuditServerHandle<F> {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn dispatcher(&self) -> &Arc<SessionDispatcher<F>> {
        &self.dispatcher
    }

    pub fn result_sink(&self) -> &ResultSink {
        self.dispatcher.result_sink()
    }

    /// Stops accepting, releases the listening socket, then waits for
    /// in-flight handlers up to the configured drain timeout. Handlers still
    /// running after that are aborted. Calling `stop` again returns the
    /// summary of the first call.
    ///
    /// When every handler finishes within the drain timeout, none of them
    /// pushes results after `stop` returns. Aborted handlers give no such
    /// guarantee: abort takes effect at the handler's next await point and
    /// the handler is dropped on its own task, so one that is busy in
    /// synchronous code, or that pushes from a drop guard, may still push
    /// after `stop` returns.
    pub async fn stop(&self) -> Result<ServerRunSummary, AuditServerError> {
        let mut run_state = self.run_state.lock().await;
        if let Some(summary) = run_state.summary {
            return Ok(summary);
        }
        let Some(running) = run_state.running.take() else {
            return Ok(ServerRunSummary::default());
        };

        let _ = running.shutdown_tx.send(true);
        match running.join_handle.await {
            Ok(summary) => {
                run_state.summary = Some(summary);
                tracing::info!(
                    local_addr = %self.local_addr,
                    accepted = summary.accepted_connections,
                    completed = summary.completed_connections,
                    failed = summary.failed_connections,
                    aborted = summary.aborted_connections,
                    "audit server stopped"
                );
                Ok(summary)
            }
            Err(error) => {
                run_state.summary = Some(ServerRunSummary::default());
                Err(AuditServerError::Join(error))
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        self.run_state.lock().await.running.is_some()
    }
}

struct AcceptLoop<F: SessionHandlerFactory> {
    dispatcher: Arc<SessionDispatcher<F>>,
    accept_error_backoff: Duration,
    drain_timeout: Duration,
}

impl<F> AcceptLoop<F>
where
    F: SessionHandlerFactory,
    F::Handler: SessionHandler<Connection = ClientConnection>,
{
    async fn run<A: ConnectionAcceptor>(
        self,
        mut acceptor: A,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> ServerRunSummary {
        let mut summary = ServerRunSummary::default();
        let mut tasks = JoinSet::new();

        if !*shutdown_rx.borrow() {
            loop {
                tokio::select! {
                    biased;
                    // A dropped sender means the handle is gone; treat it as shutdown.
                    _ = shutdown_rx.changed() => break,
                    Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                        summary.record(joined);
                    }
                    accepted = acceptor.accept() => match accepted {
                        Ok((stream, peer_addr)) => {
                            summary.accepted_connections += 1;
                            self.dispatcher.metrics_store().record_accept();
                            if let Err(error) = stream.set_nodelay(true) {
                                tracing::debug!(%peer_addr, error = %error, "set_nodelay failed");
                            }
                            let dispatcher = Arc::clone(&self.dispatcher);
                            tasks.spawn(async move {
                                dispatcher
                                    .dispatch(ClientConnection::new(stream, peer_addr))
                                    .await
                            });
                        }
                        Err(error) => {
                            self.dispatcher.metrics_store().record_accept_error();
                            tracing::warn!(error = %error, "accept failed; listener keeps serving");
                            tokio::time::sleep(self.accept_error_backoff).await;
                        }
                    },
                }
            }
        }

        drop(acceptor);
        tracing::debug!(in_flight = tasks.len(), "listener closed; draining connections");

        let drained =
            tokio::time::timeout(self.drain_timeout, drain_tasks(&mut tasks, &mut summary)).await;
        if drained.is_err() {
            tracing::warn!(
                in_flight = tasks.len(),
                "drain timeout elapsed; aborting in-flight connections"
            );
            tasks.abort_all();
            drain_tasks(&mut tasks, &mut summary).await;
        }
        summary
    }
}

async fn drain_tasks(
    tasks: &mut JoinSet<Result<DispatchOutcome, DispatchError>>,
    summary: &mut ServerRunSummary,
) {
    while let Some(joined) = tasks.join_next().await {
        summary.record(joined);
    }
}

fn bind_listener(config: &AuditServerConfig) -> io::Result<TcpListener> {
    let listen_addr = config
        .listen_socket_addr()
        .map_err(|error| io::Error::new(io::ErrorKind::AddrNotAvailable, error.to_string()))?;
    let socket = if listen_addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(listen_addr)?;
    socket.listen(LISTEN_BACKLOG)
}
