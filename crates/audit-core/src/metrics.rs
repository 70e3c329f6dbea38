use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatcherMetrics {
    pub accepted_connections: u64,
    pub accept_errors: u64,
    pub dispatched_connections: u64,
    pub sessions_created: u64,
    pub identity_failures: u64,
    pub handler_failures: u64,
    pub handler_panics: u64,
}

#[derive(Debug, Default)]
pub(crate) struct DispatcherMetricsStore {
    accepted_connections: AtomicU64,
    accept_errors: AtomicU64,
    dispatched_connections: AtomicU64,
    sessions_created: AtomicU64,
    identity_failures: AtomicU64,
    handler_failures: AtomicU64,
    handler_panics: AtomicU64,
}

impl DispatcherMetricsStore {
    pub(crate) fn snapshot(&self) -> DispatcherMetrics {
        DispatcherMetrics {
            accepted_connections: self.accepted_connections.load(Ordering::Relaxed),
            accept_errors: self.accept_errors.load(Ordering::Relaxed),
            dispatched_connections: self.dispatched_connections.load(Ordering::Relaxed),
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            identity_failures: self.identity_failures.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_accept(&self) {
        self.accepted_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_accept_error(&self) {
        self.accept_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatch(&self) {
        self.dispatched_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_session_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_identity_failure(&self) {
        self.identity_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_handler_failure(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_handler_panic(&self) {
        self.handler_panics.fetch_add(1, Ordering::Relaxed);
    }
}
