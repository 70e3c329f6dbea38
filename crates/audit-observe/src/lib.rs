use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use uuid::Uuid;

mod result_sink;

pub use result_sink::ResultSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    ProfileStarted,
    ProfileSucceeded,
    ProfileFailed,
    AuditCompleted,
}

impl OutcomeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProfileStarted => "profile_started",
            Self::ProfileSucceeded => "profile_succeeded",
            Self::ProfileFailed => "profile_failed",
            Self::AuditCompleted => "audit_completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeContext {
    pub client_id: String,
    pub session_id: Uuid,
    pub profile_index: Option<usize>,
    pub profile_label: Option<String>,
}

impl OutcomeContext {
    pub fn for_session(client_id: impl Into<String>, session_id: Uuid) -> Self {
        Self {
            client_id: client_id.into(),
            session_id,
            profile_index: None,
            profile_label: None,
        }
    }

    pub fn with_profile(mut self, profile_index: usize, profile_label: impl Into<String>) -> Self {
        self.profile_index = Some(profile_index);
        self.profile_label = Some(profile_label.into());
        self
    }
}

/// One record produced by a session handler. `sequence_id` is zero until the
/// record has been pushed into a [`ResultSink`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditOutcome {
    pub sequence_id: u64,
    pub kind: OutcomeKind,
    pub context: OutcomeContext,
    pub occurred_at_unix_ms: u128,
    pub attributes: BTreeMap<String, String>,
}

impl AuditOutcome {
    pub fn new(kind: OutcomeKind, context: OutcomeContext) -> Self {
        Self {
            sequence_id: 0,
            kind,
            context,
            occurred_at_unix_ms: now_unix_ms(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

pub fn now_unix_ms() -> u128 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis(),
        Err(_) => 0,
    }
}
