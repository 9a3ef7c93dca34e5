//! Operation records tracked by the registry.
//!
//! Two shapes exist: [`ClientOperation`] remembers which tool a token belongs
//! to while the client polls, and [`ServerOperation`] is the authoritative
//! record carrying status, outcome, and timestamps.
//!
//! Timestamps are wall-clock milliseconds since the Unix epoch (see
//! [`ClockSource`](crate::ClockSource)); keep-alive values are whole seconds.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::status::OperationStatus;

/// Default keep-alive, in seconds, for operations that do not specify one.
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 3600;

/// Tool call arguments as received from the wire.
pub type Arguments = Map<String, Value>;

/// Common view over record shapes used by the generic manager.
pub trait TrackedOperation: Clone + Send + Sync + 'static {
    /// The token identifying this record.
    fn token(&self) -> &str;

    /// Returns `true` if the record may be purged at `now_ms`.
    fn is_expired(&self, now_ms: u64) -> bool;

    /// Returns `true` if no further lifecycle transition is permitted.
    fn is_terminal(&self) -> bool;

    /// Owning session, if any.
    fn session_id(&self) -> Option<&str> {
        None
    }

    /// Creation time in millis.
    fn created_at(&self) -> u64;
}

fn secs_to_ms(secs: u64) -> u64 {
    secs.saturating_mul(1000)
}

// ---------------------------------------------------------------------------
// ClientOperation
// ---------------------------------------------------------------------------

/// Minimal client-side record: token to tool name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientOperation {
    pub token: String,
    pub tool_name: String,
    pub created_at: u64,
    pub keep_alive: u64,
}

impl ClientOperation {
    #[must_use]
    pub fn new(token: String, tool_name: String, created_at: u64, keep_alive: u64) -> Self {
        Self {
            token,
            tool_name,
            created_at,
            keep_alive,
        }
    }
}

impl TrackedOperation for ClientOperation {
    fn token(&self) -> &str {
        &self.token
    }

    /// The client cannot see when the server resolved the operation, so it
    /// waits twice the keep-alive measured from creation.
    fn is_expired(&self, now_ms: u64) -> bool {
        let grace = secs_to_ms(self.keep_alive).saturating_mul(2);
        now_ms > self.created_at.saturating_add(grace)
    }

    fn is_terminal(&self) -> bool {
        false
    }

    fn created_at(&self) -> u64 {
        self.created_at
    }
}

// ---------------------------------------------------------------------------
// ServerOperation
// ---------------------------------------------------------------------------

/// Authoritative server-side record of an async tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerOperation {
    pub token: String,
    pub tool_name: String,
    pub arguments: Arguments,
    pub status: OperationStatus,
    pub created_at: u64,
    pub keep_alive: u64,
    /// Set when the record enters `completed`, `failed`, or `canceled`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Present only when `status == completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Present only when `status == failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A requested lifecycle change for a [`ServerOperation`].
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// `submitted -> working`
    MarkWorking,
    /// `submitted | working -> input_required`
    RequireInput,
    /// `input_required -> working`
    InputReceived,
    /// `submitted | working -> completed`, storing the result.
    Complete(Value),
    /// `submitted | working -> failed`, storing the error.
    Fail(String),
    /// `submitted | working -> canceled`
    Cancel,
    /// Any non-terminal status `-> unknown`. Does not stamp a resolution time.
    MarkUnknown,
}

impl Transition {
    /// Status the record ends up in when the transition applies.
    #[must_use]
    pub fn target(&self) -> OperationStatus {
        match self {
            Self::MarkWorking | Self::InputReceived => OperationStatus::Working,
            Self::RequireInput => OperationStatus::InputRequired,
            Self::Complete(_) => OperationStatus::Completed,
            Self::Fail(_) => OperationStatus::Failed,
            Self::Cancel => OperationStatus::Canceled,
            Self::MarkUnknown => OperationStatus::Unknown,
        }
    }

    /// Returns `true` if the transition may be applied from `from`.
    #[must_use]
    pub fn allowed_from(&self, from: OperationStatus) -> bool {
        use OperationStatus::{InputRequired, Submitted, Working};
        match self {
            Self::MarkWorking => from == Submitted,
            Self::InputReceived => from == InputRequired,
            Self::RequireInput | Self::Complete(_) | Self::Fail(_) | Self::Cancel => {
                matches!(from, Submitted | Working)
            }
            Self::MarkUnknown => !from.is_terminal(),
        }
    }
}

impl ServerOperation {
    /// Creates a record in the `submitted` status.
    #[must_use]
    pub fn new(
        token: String,
        tool_name: String,
        arguments: Arguments,
        created_at: u64,
        keep_alive: u64,
        session_id: Option<String>,
    ) -> Self {
        Self {
            token,
            tool_name,
            arguments,
            status: OperationStatus::Submitted,
            created_at,
            keep_alive,
            resolved_at: None,
            session_id,
            result: None,
            error: None,
        }
    }

    /// Applies `transition` at time `now_ms`.
    ///
    /// Returns `false` and leaves the record untouched if the current status
    /// is not an allowed source for the transition.
    pub fn apply(&mut self, transition: Transition, now_ms: u64) -> bool {
        if !transition.allowed_from(self.status) {
            return false;
        }
        self.status = transition.target();
        match transition {
            Transition::Complete(result) => self.result = Some(result),
            Transition::Fail(error) => self.error = Some(error),
            _ => {}
        }
        if self.status.is_resolved() {
            self.resolved_at = Some(now_ms);
        }
        true
    }

    /// The stored result, only if the operation completed.
    #[must_use]
    pub fn completed_result(&self) -> Option<&Value> {
        if self.status == OperationStatus::Completed {
            self.result.as_ref()
        } else {
            None
        }
    }

    /// Time after which the record may be purged, if it has been resolved.
    #[must_use]
    pub fn expires_at(&self) -> Option<u64> {
        if !self.status.is_resolved() {
            return None;
        }
        self.resolved_at
            .map(|t| t.saturating_add(secs_to_ms(self.keep_alive)))
    }
}

impl TrackedOperation for ServerOperation {
    fn token(&self) -> &str {
        &self.token
    }

    /// Only resolved records expire, `keep_alive` seconds after resolution.
    /// `unknown` never expires.
    fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at().is_some_and(|deadline| now_ms > deadline)
    }

    fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    fn created_at(&self) -> u64 {
        self.created_at
    }
}
