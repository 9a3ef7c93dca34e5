//! Server-side operation lifecycle.
//!
//! Every transition returns `true` when applied and `false` when the token is
//! unknown or the current status does not allow it; a rejected transition
//! never mutates the record.

use optrack_core::{Arguments, OperationStatus, ServerOperation, TrackedOperation, Transition};
use serde::Serialize;
use serde_json::Value;

use crate::context::RequestId;
use crate::error::{LookupError, RegistryError};
use crate::manager::OperationManager;

/// Manager for authoritative server-side records.
pub type ServerOperationManager = OperationManager<ServerOperation>;

/// What a poller sees when checking an operation's status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub token: String,
    pub status: OperationStatus,
    pub keep_alive: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationManager<ServerOperation> {
    /// Creates a `submitted` operation and returns a snapshot of it.
    ///
    /// `keep_alive` defaults to the configured value when `None`.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::InvalidKeepAlive`] if `keep_alive` exceeds the
    ///   configured cap.
    /// - [`RegistryError::TokenGeneration`] if no token could be minted.
    /// - [`RegistryError::DuplicateToken`] if the generator repeated a live token.
    pub fn create_operation(
        &self,
        tool_name: impl Into<String>,
        arguments: Arguments,
        keep_alive: Option<u64>,
        session_id: Option<String>,
    ) -> Result<ServerOperation, RegistryError> {
        let keep_alive = self.config().resolve_keep_alive(keep_alive)?;
        let token = self.generate_token(session_id.as_deref())?;
        let operation = ServerOperation::new(
            token,
            tool_name.into(),
            arguments,
            self.now(),
            keep_alive,
            session_id,
        );
        if !self.insert_new(operation.clone()) {
            return Err(RegistryError::DuplicateToken);
        }
        tracing::debug!(
            tool = %operation.tool_name,
            keep_alive,
            "operation submitted"
        );
        Ok(operation)
    }

    fn transition(&self, token: &str, transition: Transition) -> bool {
        let now = self.now();
        self.update(token, |op| {
            let applied = op.apply(transition, now);
            if applied {
                tracing::debug!(
                    tool = %op.tool_name,
                    status = %op.status,
                    "operation transitioned"
                );
            }
            applied
        })
        .unwrap_or(false)
    }

    /// `submitted -> working`
    #[must_use]
    pub fn mark_working(&self, token: &str) -> bool {
        self.transition(token, Transition::MarkWorking)
    }

    /// `submitted | working -> input_required`
    #[must_use]
    pub fn mark_input_required(&self, token: &str) -> bool {
        self.transition(token, Transition::RequireInput)
    }

    /// `input_required -> working`
    #[must_use]
    pub fn mark_input_completed(&self, token: &str) -> bool {
        self.transition(token, Transition::InputReceived)
    }

    /// `submitted | working -> completed`, storing `result`.
    #[must_use]
    pub fn complete_operation(&self, token: &str, result: Value) -> bool {
        self.transition(token, Transition::Complete(result))
    }

    /// `submitted | working -> failed`, storing `error`.
    #[must_use]
    pub fn fail_operation(&self, token: &str, error: impl Into<String>) -> bool {
        self.transition(token, Transition::Fail(error.into()))
    }

    /// `submitted | working -> canceled`. Stamps the resolution time so the
    /// record expires like any other resolved operation.
    #[must_use]
    pub fn cancel_operation(&self, token: &str) -> bool {
        self.transition(token, Transition::Cancel)
    }

    /// Moves a non-terminal record to `unknown`.
    ///
    /// For reconciliation by a higher layer that has lost track of the work.
    /// No resolution time is stamped, so the record is never purged by the
    /// reaper and must be removed explicitly.
    #[must_use]
    pub fn mark_unknown(&self, token: &str) -> bool {
        self.transition(token, Transition::MarkUnknown)
    }

    /// The stored result, only if the operation is `completed`.
    #[must_use]
    pub fn get_operation_result(&self, token: &str) -> Option<Value> {
        self.get(token).and_then(|op| op.completed_result().cloned())
    }

    /// All operations owned by `session_id`, ordered by creation time.
    #[must_use]
    pub fn get_session_operations(&self, session_id: &str) -> Vec<ServerOperation> {
        self.session_operations(session_id)
    }

    /// Cancels every non-terminal operation owned by `session_id`, including
    /// ones waiting for input. Returns how many were canceled.
    #[must_use]
    pub fn cancel_session_operations(&self, session_id: &str) -> usize {
        let now = self.now();
        let canceled = self.update_all(|op| {
            if op.session_id.as_deref() != Some(session_id) || op.is_terminal() {
                return false;
            }
            op.status = OperationStatus::Canceled;
            op.resolved_at = Some(now);
            true
        });
        if canceled > 0 {
            tracing::debug!(canceled, "canceled session operations");
        }
        canceled
    }

    /// Cancels the operation bound to `request_id` and drops the binding.
    ///
    /// Returns `false` for an unbound request id or an operation that can no
    /// longer be canceled; the binding is dropped either way.
    #[must_use]
    pub fn cancel_by_request(&self, request_id: &RequestId) -> bool {
        self.unbind_request(request_id)
            .is_some_and(|token| self.cancel_operation(&token))
    }

    /// Looks up a live record, treating expired-but-unpurged records as gone.
    fn live(&self, token: &str) -> Result<ServerOperation, LookupError> {
        let op = self.get(token).ok_or(LookupError::NotFound)?;
        if op.is_expired(self.now()) {
            return Err(LookupError::Expired);
        }
        Ok(op)
    }

    /// Status view for a polling client.
    ///
    /// # Errors
    ///
    /// [`LookupError::NotFound`] or [`LookupError::Expired`].
    pub fn check_status(&self, token: &str) -> Result<StatusSnapshot, LookupError> {
        let op = self.live(token)?;
        Ok(StatusSnapshot {
            token: op.token,
            status: op.status,
            keep_alive: op.keep_alive,
            error: op.error,
        })
    }

    /// The payload of a completed operation.
    ///
    /// # Errors
    ///
    /// Reports why no payload is available: missing, expired, canceled,
    /// failed (with its message), or still in progress.
    pub fn operation_payload(&self, token: &str) -> Result<Value, LookupError> {
        let op = self.live(token)?;
        match op.status {
            OperationStatus::Completed => Ok(op.result.unwrap_or(Value::Null)),
            OperationStatus::Canceled => Err(LookupError::Canceled),
            OperationStatus::Failed => Err(LookupError::Failed {
                error: op.error.unwrap_or_default(),
            }),
            status => Err(LookupError::NotReady { status }),
        }
    }

    /// Returns the record if its token may still be used by a client.
    ///
    /// # Errors
    ///
    /// [`LookupError::NotFound`], [`LookupError::Expired`], or
    /// [`LookupError::Canceled`].
    pub fn validate_token(&self, token: &str) -> Result<ServerOperation, LookupError> {
        let op = self.live(token)?;
        if op.status == OperationStatus::Canceled {
            return Err(LookupError::Canceled);
        }
        Ok(op)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use optrack_core::{ClockSource, ManualClock, TokenError};
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::config::RegistryConfig;

    fn manager() -> (ServerOperationManager, ManualClock) {
        let clock = ManualClock::new(1_700_000_000_000);
        (OperationManager::default().with_clock(clock.clone()), clock)
    }

    fn args(value: Value) -> Arguments {
        match value {
            Value::Object(map) => map,
            _ => Arguments::new(),
        }
    }

    fn create(m: &ServerOperationManager, session: &str) -> ServerOperation {
        m.create_operation(
            "test_tool",
            args(json!({"arg": "value"})),
            None,
            Some(session.into()),
        )
        .unwrap()
    }

    fn status(m: &ServerOperationManager, token: &str) -> OperationStatus {
        m.get(token).unwrap().status
    }

    #[test]
    fn create_starts_submitted() {
        let (m, clock) = manager();
        let op = create(&m, "s1");
        assert_eq!(op.status, OperationStatus::Submitted);
        assert_eq!(op.keep_alive, 3600);
        assert_eq!(op.created_at, clock.now());
        assert!(op.result.is_none() && op.error.is_none() && op.resolved_at.is_none());
        assert_eq!(m.get(&op.token), Some(op));
    }

    #[test]
    fn create_accepts_any_keep_alive_by_default() {
        let (m, _) = manager();
        let zero = m.create_operation("t", Arguments::new(), Some(0), None).unwrap();
        let week = m
            .create_operation("t", Arguments::new(), Some(604_800), None)
            .unwrap();
        assert_eq!(m.get(&zero.token).unwrap().keep_alive, 0);
        assert_eq!(m.get(&week.token).unwrap().keep_alive, 604_800);
    }

    #[test]
    fn create_rejects_keep_alive_above_configured_cap() {
        let config = RegistryConfig {
            max_keep_alive_secs: Some(7200),
            ..RegistryConfig::default()
        };
        let m = ServerOperationManager::new(config).unwrap();
        let err = m.create_operation("t", Arguments::new(), Some(7201), None);
        assert!(matches!(
            err,
            Err(RegistryError::InvalidKeepAlive {
                requested: 7201,
                max: 7200
            })
        ));
        assert!(m.is_empty());
        assert!(m.create_operation("t", Arguments::new(), Some(7200), None).is_ok());
    }

    #[test]
    fn purged_operations_release_their_request_bindings() {
        let (m, clock) = manager();
        let token = m
            .create_operation("t", Arguments::new(), Some(1), None)
            .unwrap()
            .token;
        let request = RequestId::from("r1");
        m.bind_request(request.clone(), token.as_str());
        assert!(m.complete_operation(&token, json!(1)));

        clock.advance_secs(5);
        assert_eq!(m.cleanup_expired(), 1);
        assert!(m.bound_token(&request).is_none());
        assert!(!m.cancel_by_request(&request));
    }

    #[test]
    fn generator_failure_propagates() {
        let m = ServerOperationManager::default().with_token_generator(
            |_: Option<&str>| -> Result<String, TokenError> {
                Err(TokenError::Entropy("no entropy".into()))
            },
        );
        let err = m.create_operation("t", Arguments::new(), None, None);
        assert!(matches!(
            err,
            Err(RegistryError::TokenGeneration(TokenError::Entropy(_)))
        ));
        assert!(m.is_empty());
    }

    #[test]
    fn repeated_custom_token_is_rejected() {
        let m = ServerOperationManager::default().with_token_generator(
            |sid: Option<&str>| -> Result<String, TokenError> {
                Ok(format!("custom_{}_token", sid.unwrap_or("none")))
            },
        );
        let first = m
            .create_operation("t", Arguments::new(), None, Some("test".into()))
            .unwrap();
        assert_eq!(first.token, "custom_test_token");
        assert!(matches!(
            m.create_operation("t", Arguments::new(), None, Some("test".into())),
            Err(RegistryError::DuplicateToken)
        ));
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn lifecycle_through_input_required() {
        let (m, _) = manager();
        let token = create(&m, "s1").token;

        assert!(m.mark_working(&token));
        assert!(m.mark_input_required(&token));
        assert_eq!(status(&m, &token), OperationStatus::InputRequired);
        assert!(!m.complete_operation(&token, json!(1)));
        assert!(!m.mark_working(&token));
        assert!(m.mark_input_completed(&token));
        assert_eq!(status(&m, &token), OperationStatus::Working);
        assert!(m.complete_operation(&token, json!({"ok": true})));
    }

    #[test]
    fn direct_resolution_from_submitted() {
        let (m, _) = manager();
        let done = create(&m, "s1").token;
        let failed = create(&m, "s1").token;
        let canceled = create(&m, "s1").token;

        assert!(m.complete_operation(&done, json!("success")));
        assert!(m.fail_operation(&failed, "immediate error"));
        assert!(m.cancel_operation(&canceled));

        assert_eq!(status(&m, &done), OperationStatus::Completed);
        assert_eq!(
            m.get(&failed).unwrap().error.as_deref(),
            Some("immediate error")
        );
        assert_eq!(status(&m, &canceled), OperationStatus::Canceled);
    }

    #[test]
    fn terminal_states_are_final() {
        let (m, _) = manager();
        let tokens: Vec<String> = (0..3).map(|_| create(&m, "s1").token).collect();
        assert!(m.complete_operation(&tokens[0], json!(1)));
        assert!(m.fail_operation(&tokens[1], "err"));
        assert!(m.cancel_operation(&tokens[2]));

        for token in &tokens {
            let before = m.get(token).unwrap();
            assert!(!m.mark_working(token));
            assert!(!m.mark_input_required(token));
            assert!(!m.mark_input_completed(token));
            assert!(!m.complete_operation(token, json!(2)));
            assert!(!m.fail_operation(token, "again"));
            assert!(!m.cancel_operation(token));
            assert!(!m.mark_unknown(token));
            assert_eq!(m.get(token).unwrap(), before);
        }
    }

    #[test]
    fn result_only_for_completed() {
        let (m, _) = manager();
        let token = create(&m, "s1").token;
        assert!(m.get_operation_result(&token).is_none());
        assert!(m.mark_working(&token));
        assert!(m.get_operation_result(&token).is_none());
        assert!(m.fail_operation(&token, "Something went wrong"));
        assert!(m.get_operation_result(&token).is_none());

        let token = create(&m, "s1").token;
        assert!(m.complete_operation(&token, json!({"total": 3})));
        assert_eq!(m.get_operation_result(&token), Some(json!({"total": 3})));
    }

    #[test]
    fn unknown_tokens_fail_quietly() {
        let (m, _) = manager();
        let fake = "fake_token";
        assert!(m.get(fake).is_none());
        assert!(!m.mark_working(fake));
        assert!(!m.mark_input_required(fake));
        assert!(!m.mark_input_completed(fake));
        assert!(!m.complete_operation(fake, json!(null)));
        assert!(!m.fail_operation(fake, "error"));
        assert!(!m.cancel_operation(fake));
        assert!(!m.mark_unknown(fake));
        assert!(m.get_operation_result(fake).is_none());
        assert!(!m.remove_operation(fake));
        assert!(m.is_empty());
    }

    #[test]
    fn transition_after_removal_does_not_resurrect() {
        let (m, _) = manager();
        let token = create(&m, "s1").token;
        assert!(m.remove_operation(&token));
        assert!(!m.mark_working(&token));
        assert!(!m.complete_operation(&token, json!(1)));
        assert!(m.get(&token).is_none());
    }

    #[test]
    fn unknown_status_is_never_purged() {
        let (m, clock) = manager();
        let token = create(&m, "s1").token;
        assert!(m.mark_working(&token));
        assert!(m.mark_unknown(&token));
        clock.advance_secs(1_000_000);
        assert_eq!(m.cleanup_expired(), 0);
        assert_eq!(status(&m, &token), OperationStatus::Unknown);
    }

    #[test]
    fn session_queries_and_cancellation() {
        let (m, clock) = manager();
        let ops: Vec<ServerOperation> = (0..6)
            .map(|i| {
                clock.advance(1);
                m.create_operation(
                    format!("tool{i}"),
                    Arguments::new(),
                    None,
                    Some(format!("session{}", i % 2)),
                )
                .unwrap()
            })
            .collect();

        let s0: Vec<String> = m
            .get_session_operations("session0")
            .into_iter()
            .map(|o| o.token)
            .collect();
        assert_eq!(
            s0,
            vec![
                ops[0].token.clone(),
                ops[2].token.clone(),
                ops[4].token.clone()
            ]
        );
        assert!(m.get_session_operations("nobody").is_empty());

        assert!(m.mark_working(&ops[0].token));
        assert!(m.complete_operation(&ops[2].token, json!(1)));
        assert!(m.mark_input_required(&ops[4].token));

        assert_eq!(m.cancel_session_operations("session0"), 2);
        assert_eq!(status(&m, &ops[0].token), OperationStatus::Canceled);
        assert_eq!(status(&m, &ops[2].token), OperationStatus::Completed);
        assert_eq!(status(&m, &ops[4].token), OperationStatus::Canceled);
        assert_eq!(m.get(&ops[4].token).unwrap().resolved_at, Some(clock.now()));
        for other in [&ops[1], &ops[3], &ops[5]] {
            assert_eq!(status(&m, &other.token), OperationStatus::Submitted);
        }
        assert_eq!(m.cancel_session_operations("session0"), 0);
    }

    #[test]
    fn cleanup_respects_keep_alive() {
        let (m, clock) = manager();
        let short = m
            .create_operation("tool1", Arguments::new(), Some(1), Some("s1".into()))
            .unwrap();
        let long = m
            .create_operation("tool2", Arguments::new(), Some(10), Some("s1".into()))
            .unwrap();
        let pending = m
            .create_operation("tool3", Arguments::new(), Some(1), Some("s1".into()))
            .unwrap();
        assert!(m.complete_operation(&short.token, json!(null)));
        assert!(m.complete_operation(&long.token, json!(null)));

        clock.advance_secs(2);
        assert_eq!(m.cleanup_expired(), 1);
        assert!(m.get(&short.token).is_none());
        assert!(m.get(&long.token).is_some());
        assert!(m.get(&pending.token).is_some());
    }

    #[test]
    fn canceled_operations_expire() {
        let (m, clock) = manager();
        let token = m
            .create_operation("t", Arguments::new(), Some(5), None)
            .unwrap()
            .token;
        assert!(m.cancel_operation(&token));
        clock.advance_secs(5);
        assert_eq!(m.cleanup_expired(), 0);
        clock.advance(1);
        assert_eq!(m.cleanup_expired(), 1);
    }

    #[test]
    fn bulk_expiry_removes_half() {
        let (m, clock) = manager();
        let ops: Vec<ServerOperation> = (0..50)
            .map(|i| {
                let keep_alive = if i < 25 { 1 } else { 3600 };
                m.create_operation(
                    format!("tool_{i}"),
                    args(json!({"data": "x".repeat(100)})),
                    Some(keep_alive),
                    Some(format!("session_{}", i % 3)),
                )
                .unwrap()
            })
            .collect();
        let tokens: HashSet<&str> = ops.iter().map(|o| o.token.as_str()).collect();
        assert_eq!(tokens.len(), 50);

        for op in &ops {
            assert!(m.complete_operation(&op.token, json!(null)));
        }
        clock.advance_secs(2);
        assert_eq!(m.cleanup_expired(), 25);
        assert_eq!(m.len(), 25);
    }

    #[test]
    fn end_to_end_sum() {
        let (m, clock) = manager();
        let op = m
            .create_operation("sum", args(json!({"a": 1, "b": 2})), Some(5), None)
            .unwrap();
        assert_eq!(op.status, OperationStatus::Submitted);
        assert_eq!(op.arguments.get("b"), Some(&json!(2)));

        assert!(m.mark_working(&op.token));
        assert_eq!(status(&m, &op.token), OperationStatus::Working);

        assert!(m.complete_operation(&op.token, json!({"total": 3})));
        let done = m.get(&op.token).unwrap();
        assert_eq!(done.status, OperationStatus::Completed);
        assert_eq!(done.result, Some(json!({"total": 3})));
        assert_eq!(m.get_operation_result(&op.token), Some(json!({"total": 3})));

        clock.advance_secs(6);
        assert_eq!(m.cleanup_expired(), 1);
        assert!(m.get(&op.token).is_none());
    }

    #[test]
    fn polling_views() {
        let (m, clock) = manager();
        let token = m
            .create_operation("t", Arguments::new(), Some(1), None)
            .unwrap()
            .token;

        assert_eq!(
            m.check_status(&token).unwrap().status,
            OperationStatus::Submitted
        );
        assert_eq!(
            m.operation_payload(&token),
            Err(LookupError::NotReady {
                status: OperationStatus::Submitted
            })
        );
        assert!(m.fail_operation(&token, "Something went wrong"));
        let snapshot = m.check_status(&token).unwrap();
        assert_eq!(snapshot.status, OperationStatus::Failed);
        assert_eq!(snapshot.error.as_deref(), Some("Something went wrong"));
        assert_eq!(
            m.operation_payload(&token),
            Err(LookupError::Failed {
                error: "Something went wrong".into()
            })
        );

        clock.advance_secs(2);
        assert_eq!(m.check_status(&token), Err(LookupError::Expired));
        assert_eq!(m.operation_payload(&token), Err(LookupError::Expired));
        assert_eq!(m.check_status("missing"), Err(LookupError::NotFound));
    }

    #[test]
    fn validate_token_rejects_canceled() {
        let (m, _) = manager();
        let token = create(&m, "s1").token;
        assert!(m.validate_token(&token).is_ok());
        assert!(m.cancel_operation(&token));
        let err = m.validate_token(&token).unwrap_err();
        assert_eq!(err, LookupError::Canceled);
        assert!(err.to_string().contains("cancelled"));
        assert_eq!(m.operation_payload(&token), Err(LookupError::Canceled));
    }

    #[test]
    fn cancel_by_request_cancels_and_unbinds() {
        let (m, _) = manager();
        let token = create(&m, "s1").token;
        let request = RequestId::from("req_123");
        m.bind_request(request.clone(), token.clone());

        assert!(m.cancel_by_request(&request));
        assert_eq!(status(&m, &token), OperationStatus::Canceled);
        assert!(m.bound_token(&request).is_none());
        assert!(!m.cancel_by_request(&RequestId::from("nonexistent_request")));
    }

    #[test]
    fn snapshot_wire_shape() {
        let (m, _) = manager();
        let token = create(&m, "s1").token;
        let wire = serde_json::to_value(m.check_status(&token).unwrap()).unwrap();
        assert_eq!(wire, json!({"token": token, "status": "submitted", "keepAlive": 3600}));
    }

    proptest! {
        #[test]
        fn created_tokens_are_unique(count in 1usize..500) {
            let m = ServerOperationManager::default();
            let tokens: HashSet<String> = (0..count)
                .map(|_| m.create_operation("t", Arguments::new(), None, None).unwrap().token)
                .collect();
            prop_assert_eq!(tokens.len(), count);
            prop_assert_eq!(m.len(), count);
        }

        #[test]
        fn expiry_is_monotonic(keep_alive in 1u64..10_000, offset in 0u64..20_000_000) {
            let (m, clock) = manager();
            let token = m
                .create_operation("t", Arguments::new(), Some(keep_alive), None)
                .unwrap()
                .token;
            prop_assert!(m.complete_operation(&token, json!(null)));
            let resolved_at = m.get(&token).unwrap().resolved_at.unwrap();
            clock.set(resolved_at + offset);
            let expired = m.get(&token).unwrap().is_expired(clock.now());
            prop_assert_eq!(expired, offset > keep_alive * 1000);
        }
    }

    #[test]
    fn ten_thousand_operations_have_distinct_tokens() {
        let m = ServerOperationManager::default();
        for _ in 0..10_000 {
            m.create_operation("t", Arguments::new(), None, None).unwrap();
        }
        assert_eq!(m.len(), 10_000);
    }
}
