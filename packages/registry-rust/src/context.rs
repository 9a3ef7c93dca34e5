//! Per-request context handed to tool handlers.
//!
//! A [`RequestContext`] carries the request id, the session, and the shared
//! operation manager. When the request runs inside a tracked operation the
//! context also holds its token and can drive that operation's lifecycle.

use std::fmt;
use std::sync::Arc;

use optrack_core::{ServerOperation, TrackedOperation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::manager::OperationManager;

/// Identifier of an inbound request: a string or an integer on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

/// Per-request context handed to request handlers.
///
/// Bundles the session the request arrived on, a shared handle to the
/// operation manager, and the token of the operation this request executes,
/// if any. Created per inbound request and dropped when it completes; it owns
/// none of the shared objects it refers to.
#[derive(Debug)]
pub struct RequestContext<S, R: TrackedOperation, L, Req = ()> {
    pub request_id: RequestId,
    pub operation_manager: Arc<OperationManager<R>>,
    /// Present only when this request runs inside a tracked operation.
    pub operation_token: Option<String>,
    /// Request `_meta` as received.
    pub meta: Option<Map<String, Value>>,
    pub session: Arc<S>,
    pub lifespan_context: L,
    pub request: Option<Req>,
}

impl<S, R: TrackedOperation, L, Req> RequestContext<S, R, L, Req> {
    /// Creates a context for a request that is not bound to an operation.
    pub fn new(
        request_id: RequestId,
        operation_manager: Arc<OperationManager<R>>,
        session: Arc<S>,
        lifespan_context: L,
    ) -> Self {
        Self {
            request_id,
            operation_manager,
            operation_token: None,
            meta: None,
            session,
            lifespan_context,
            request: None,
        }
    }

    /// Binds this request to the operation identified by `token`.
    #[must_use]
    pub fn with_operation(mut self, token: impl Into<String>) -> Self {
        self.operation_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_meta(mut self, meta: Map<String, Value>) -> Self {
        self.meta = Some(meta);
        self
    }

    #[must_use]
    pub fn with_request(mut self, request: Req) -> Self {
        self.request = Some(request);
        self
    }

    /// Returns `true` if this request executes inside a tracked operation.
    #[must_use]
    pub fn is_async(&self) -> bool {
        self.operation_token.is_some()
    }

    /// Snapshot of the bound operation, if any and still tracked.
    #[must_use]
    pub fn operation(&self) -> Option<R> {
        self.operation_token
            .as_deref()
            .and_then(|token| self.operation_manager.get(token))
    }
}

impl<S, L, Req> RequestContext<S, ServerOperation, L, Req> {
    fn on_bound(
        &self,
        f: impl FnOnce(&OperationManager<ServerOperation>, &str) -> bool,
    ) -> bool {
        self.operation_token
            .as_deref()
            .is_some_and(|token| f(self.operation_manager.as_ref(), token))
    }

    /// Completes the bound operation with `result`.
    #[must_use]
    pub fn complete(&self, result: Value) -> bool {
        self.on_bound(|m, t| m.complete_operation(t, result))
    }

    /// Fails the bound operation with `error`.
    #[must_use]
    pub fn fail(&self, error: impl Into<String>) -> bool {
        self.on_bound(|m, t| m.fail_operation(t, error))
    }

    /// Marks the bound operation as waiting for client input.
    #[must_use]
    pub fn require_input(&self) -> bool {
        self.on_bound(|m, t| m.mark_input_required(t))
    }

    /// Returns the bound operation to `working` after input arrived.
    #[must_use]
    pub fn input_received(&self) -> bool {
        self.on_bound(|m, t| m.mark_input_completed(t))
    }
}
