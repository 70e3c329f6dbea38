use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::errors::DispatchError;
use crate::metrics::DispatcherMetricsStore;
use crate::session::{ConnectionOf, SessionHandler, SessionHandlerFactory, SessionOf};

/// Aborts the wrapped task when dropped, so a cancelled dispatch does not
/// leave its handler running detached.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Runs `handle` on its own task so that a panicking handler is reported as a
/// failed dispatch instead of unwinding into the caller.
pub(crate) async fn run_isolated<F>(
    session: Arc<SessionOf<F>>,
    connection: ConnectionOf<F>,
    metrics_store: &DispatcherMetricsStore,
) -> Result<(), DispatchError>
where
    F: SessionHandlerFactory,
{
    let client_id = session.client_id();
    let session_id = session.session_id();
    let mut task = AbortOnDrop(tokio::spawn(async move {
        session.handler().handle(connection).await
    }));

    match (&mut task.0).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => {
            metrics_store.record_handler_failure();
            tracing::warn!(
                client_id = %client_id,
                session_id = %session_id,
                error = %source,
                "session handler failed"
            );
            Err(DispatchError::Handler { client_id, source })
        }
        Err(join_error) if join_error.is_panic() => {
            metrics_store.record_handler_panic();
            tracing::warn!(
                client_id = %client_id,
                session_id = %session_id,
                "session handler panicked"
            );
            Err(DispatchError::HandlerPanicked { client_id })
        }
        Err(_join_error) => Err(DispatchError::HandlerCancelled { client_id }),
    }
}
