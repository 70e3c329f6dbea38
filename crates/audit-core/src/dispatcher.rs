use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use sslcaudit_observe::ResultSink;
use uuid::Uuid;

use crate::client_identity::ClientIdentity;
use crate::errors::DispatchError;
use crate::handler_guard::run_isolated;
use crate::metrics::{DispatcherMetrics, DispatcherMetricsStore};
use crate::profile::ProfileCatalog;
use crate::session::{ConnectionOf, Session, SessionContext, SessionHandlerFactory, SessionOf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub client_id: ClientIdentity,
    pub session_id: Uuid,
    pub created_session: bool,
    /// 1-based position of this connection among those routed to the session.
    pub connection_index: u64,
}

/// Routes every connection to the single session owned by its client.
///
/// The peer→session table is only reachable through [`Self::dispatch`] and the
/// read-only accessors below. One exclusive lock covers the find-or-create
/// step; handlers run after it is released, so a slow client never blocks
/// routing for anyone else.
pub struct SessionDispatcher<F: SessionHandlerFactory> {
    factory: F,
    profile_catalog: ProfileCatalog<F::Profile>,
    result_sink: ResultSink,
    sessions: Mutex<HashMap<ClientIdentity, Arc<SessionOf<F>>>>,
    metrics_store: DispatcherMetricsStore,
}

impl<F: SessionHandlerFactory> SessionDispatcher<F> {
    /// When `result_sink` is `None` the dispatcher creates its own queue,
    /// reachable through [`Self::result_sink`].
    pub fn new(
        factory: F,
        profile_catalog: ProfileCatalog<F::Profile>,
        result_sink: Option<ResultSink>,
    ) -> Self {
        Self {
            factory,
            profile_catalog,
            result_sink: result_sink.unwrap_or_default(),
            sessions: Mutex::new(HashMap::new()),
            metrics_store: DispatcherMetricsStore::default(),
        }
    }

    pub async fn dispatch(
        &self,
        connection: ConnectionOf<F>,
    ) -> Result<DispatchOutcome, DispatchError> {
        self.metrics_store.record_dispatch();
        let client_id = match ClientIdentity::resolve(&connection) {
            Ok(client_id) => client_id,
            Err(error) => {
                self.metrics_store.record_identity_failure();
                tracing::warn!(error = %error, "dropping connection without a peer address");
                return Err(DispatchError::IdentityUnavailable(error));
            }
        };

        let (session, created_session) = self.find_or_create_session(client_id);
        let connection_index = session.begin_connection();
        let session_id = session.session_id();
        tracing::debug!(
            client_id = %client_id,
            session_id = %session_id,
            connection_index,
            "routing connection to session"
        );

        run_isolated::<F>(session, connection, &self.metrics_store).await?;
        Ok(DispatchOutcome {
            client_id,
            session_id,
            created_session,
            connection_index,
        })
    }

    fn find_or_create_session(&self, client_id: ClientIdentity) -> (Arc<SessionOf<F>>, bool) {
        let mut sessions = self.sessions.lock();
        match sessions.entry(client_id) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
            Entry::Vacant(entry) => {
                let session_id = Uuid::new_v4();
                let profiles: Arc<[F::Profile]> = Arc::from(self.profile_catalog.flatten());
                let profile_count = profiles.len();
                let handler = self.factory.create_handler(SessionContext {
                    client_id,
                    session_id,
                    profiles: Arc::clone(&profiles),
                    result_sink: self.result_sink.clone(),
                });
                let session = Arc::new(Session::new(
                    client_id,
                    session_id,
                    profiles,
                    self.result_sink.clone(),
                    handler,
                ));
                entry.insert(Arc::clone(&session));
                self.metrics_store.record_session_created();
                tracing::debug!(
                    client_id = %client_id,
                    session_id = %session_id,
                    profile_count,
                    "created audit session"
                );
                (session, true)
            }
        }
    }

    pub fn session(&self, client_id: &ClientIdentity) -> Option<Arc<SessionOf<F>>> {
        self.sessions.lock().get(client_id).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn client_ids(&self) -> Vec<ClientIdentity> {
        let mut client_ids: Vec<ClientIdentity> = self.sessions.lock().keys().copied().collect();
        client_ids.sort_unstable();
        client_ids
    }

    pub fn result_sink(&self) -> &ResultSink {
        &self.result_sink
    }

    pub fn profile_catalog(&self) -> &ProfileCatalog<F::Profile> {
        &self.profile_catalog
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn metrics(&self) -> DispatcherMetrics {
        self.metrics_store.snapshot()
    }

    pub(crate) fn metrics_store(&self) -> &DispatcherMetricsStore {
        &self.metrics_store
    }
}

impl<F: SessionHandlerFactory> fmt::Debug for SessionDispatcher<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionDispatcher")
            .field("session_count", &self.session_count())
            .field("profile_catalog", &self.profile_catalog)
            .finish_non_exhaustive()
    }
}
