//! Session handler that walks a client's profile list one profile per
//! connection.
//!
//! A client under test usually reconnects after every handshake, so each new
//! connection gets the next untried profile. Once every profile has finished
//! the handler reports [`OutcomeKind::AuditCompleted`] exactly once; later
//! connections are closed without running anything.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use sslcaudit_observe::{AuditOutcome, OutcomeContext, OutcomeKind, ResultSink};
use uuid::Uuid;

use crate::client_identity::ClientIdentity;
use crate::errors::SessionHandlerError;
use crate::session::{PeerConnection, SessionContext, SessionHandler, SessionHandlerFactory};

const INTERRUPTED_RUN_ERROR: &str = "profile run interrupted";

/// Runs one opaque profile against one connection.
pub trait ProfileRunner: Send + Sync + 'static {
    type Profile: Send + Sync + 'static;
    type Connection: PeerConnection;

    /// Short name used in outcome records.
    fn label(&self, profile: &Self::Profile) -> String;

    /// `Ok` carries attributes for the success record; `Err` is recorded as a
    /// failed profile and does not fail the connection.
    fn run(
        &self,
        profile: &Self::Profile,
        connection: Self::Connection,
    ) -> impl Future<Output = Result<BTreeMap<String, String>, SessionHandlerError>> + Send;
}

#[derive(Debug)]
pub struct ProfileCursorFactory<R> {
    runner: Arc<R>,
}

impl<R: ProfileRunner> ProfileCursorFactory<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner: Arc::new(runner),
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }
}

impl<R: ProfileRunner> SessionHandlerFactory for ProfileCursorFactory<R> {
    type Profile = R::Profile;
    type Handler = ProfileCursorHandler<R>;

    fn create_handler(&self, context: SessionContext<Self::Profile>) -> Self::Handler {
        ProfileCursorHandler {
            client_id: context.client_id,
            session_id: context.session_id,
            profiles: context.profiles,
            result_sink: context.result_sink,
            runner: Arc::clone(&self.runner),
            cursor: Mutex::new(ProfileCursor::default()),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProfileCursor {
    pub next_profile: usize,
    pub finished_profiles: usize,
    pub completed: bool,
}

pub struct ProfileCursorHandler<R: ProfileRunner> {
    client_id: ClientIdentity,
    session_id: Uuid,
    profiles: Arc<[R::Profile]>,
    result_sink: ResultSink,
    runner: Arc<R>,
    cursor: Mutex<ProfileCursor>,
}

impl<R: ProfileRunner> ProfileCursorHandler<R> {
    pub fn cursor(&self) -> ProfileCursor {
        *self.cursor.lock()
    }

    fn context(&self) -> OutcomeContext {
        OutcomeContext::for_session(self.client_id.to_string(), self.session_id)
    }

    /// Claims the next untried profile. Concurrent connections from the same
    /// client each get a distinct profile.
    fn claim_next_profile(&self) -> Option<usize> {
        let mut cursor = self.cursor.lock();
        if cursor.next_profile >= self.profiles.len() {
            return None;
        }
        let index = cursor.next_profile;
        cursor.next_profile += 1;
        Some(index)
    }

    /// Returns true for exactly one caller: the one that observes the last
    /// profile finishing (or the first caller when there are no profiles).
    fn finish_profile(&self, finished: bool) -> bool {
        let mut cursor = self.cursor.lock();
        if finished {
            cursor.finished_profiles += 1;
        }
        if cursor.completed || cursor.finished_profiles < self.profiles.len() {
            return false;
        }
        cursor.completed = true;
        true
    }

    fn complete_profile(&self) {
        if self.finish_profile(true) {
            self.push_audit_completed();
        }
    }

    fn push_audit_completed(&self) {
        let outcome = AuditOutcome::new(OutcomeKind::AuditCompleted, self.context())
            .with_attribute("profiles_total", self.profiles.len().to_string());
        self.result_sink.push(outcome);
    }
}

impl<R: ProfileRunner> SessionHandler for ProfileCursorHandler<R> {
    type Connection = R::Connection;

    async fn handle(&self, connection: Self::Connection) -> Result<(), SessionHandlerError> {
        let Some(index) = self.claim_next_profile() else {
            tracing::debug!(
                client_id = %self.client_id,
                session_id = %self.session_id,
                "profile list exhausted; closing connection"
            );
            if self.finish_profile(false) {
                self.push_audit_completed();
            }
            return Ok(());
        };

        let profile = &self.profiles[index];
        let label = self.runner.label(profile);
        let context = self.context().with_profile(index, label.clone());
        self.result_sink
            .push(AuditOutcome::new(OutcomeKind::ProfileStarted, context.clone()));
        let attempt = ProfileAttempt {
            handler: self,
            context: Some(context.clone()),
        };

        let finished = match self.runner.run(profile, connection).await {
            Ok(attributes) => {
                let mut outcome = AuditOutcome::new(OutcomeKind::ProfileSucceeded, context);
                outcome.attributes = attributes;
                outcome
            }
            Err(error) => {
                tracing::debug!(
                    client_id = %self.client_id,
                    profile = %label,
                    error = %error,
                    "profile run failed"
                );
                AuditOutcome::new(OutcomeKind::ProfileFailed, context)
                    .with_attribute("error", error.to_string())
            }
        };
        attempt.finish(finished);
        Ok(())
    }
}

/// A claimed profile that has not reported a result yet. Dropping it without
/// [`Self::finish`] (the runner panicked or the connection task was aborted)
/// records the profile as failed so the cursor can still complete.
struct ProfileAttempt<'a, R: ProfileRunner> {
    handler: &'a ProfileCursorHandler<R>,
    context: Option<OutcomeContext>,
}

impl<R: ProfileRunner> ProfileAttempt<'_, R> {
    fn finish(mut self, outcome: AuditOutcome) {
        self.context = None;
        self.handler.result_sink.push(outcome);
        self.handler.complete_profile();
    }
}

impl<R: ProfileRunner> Drop for ProfileAttempt<'_, R> {
    fn drop(&mut self) {
        let Some(context) = self.context.take() else {
            return;
        };
        tracing::warn!(
            client_id = %self.handler.client_id,
            profile_index = ?context.profile_index,
            "profile run interrupted before reporting a result"
        );
        let outcome = AuditOutcome::new(OutcomeKind::ProfileFailed, context)
            .with_attribute("error", INTERRUPTED_RUN_ERROR);
        self.handler.result_sink.push(outcome);
        self.handler.complete_profile();
    }
}
