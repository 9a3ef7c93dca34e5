//! Client-side tracking of operations started on a server.
//!
//! The server record is authoritative; the client only remembers which tool a
//! token belongs to while it polls.

use optrack_core::ClientOperation;

use crate::manager::OperationManager;

/// Manager for client-side records.
pub type ClientOperationManager = OperationManager<ClientOperation>;

impl OperationManager<ClientOperation> {
    /// Starts tracking `token` for `tool_name`, replacing any previous entry.
    ///
    /// `keep_alive` is the server's hint in seconds; the configured default
    /// applies when `None`.
    pub fn track_operation(
        &self,
        token: impl Into<String>,
        tool_name: impl Into<String>,
        keep_alive: Option<u64>,
    ) {
        let token = token.into();
        let keep_alive = keep_alive.unwrap_or(self.config().default_keep_alive_secs);
        let operation =
            ClientOperation::new(token.clone(), tool_name.into(), self.now(), keep_alive);
        self.set(token, operation);
    }

    /// Tool name recorded for `token`.
    #[must_use]
    pub fn get_tool_name(&self, token: &str) -> Option<String> {
        self.get(token).map(|op| op.tool_name)
    }

    /// Stops tracking `token`.
    pub fn untrack(&self, token: &str) -> bool {
        self.remove_operation(token)
    }
}
