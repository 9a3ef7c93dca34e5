//! Lifecycle status of a server-side operation.
//!
//! ```text
//! submitted -> working <-> input_required
//!     |           |
//!     +-----------+--> completed | failed | canceled
//! ```
//!
//! `unknown` is terminal but is never entered through the normal lifecycle;
//! it is reserved for reconciliation by a higher layer.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Status of a tracked operation. Serializes to the snake_case wire names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Accepted but not yet started.
    Submitted,
    /// Executing.
    Working,
    /// Paused waiting for input from the client.
    InputRequired,
    /// Finished successfully; a result is stored.
    Completed,
    /// Finished with an error message.
    Failed,
    /// Canceled before completion.
    Canceled,
    /// State could not be determined. Terminal, never expires.
    Unknown,
}

impl OperationStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [Self; 7] = [
        Self::Submitted,
        Self::Working,
        Self::InputRequired,
        Self::Completed,
        Self::Failed,
        Self::Canceled,
        Self::Unknown,
    ];

    /// Returns `true` if no further lifecycle transition is permitted.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Canceled | Self::Unknown
        )
    }

    /// Returns `true` for the terminal statuses that carry a resolution time
    /// and are therefore subject to keep-alive expiry.
    #[must_use]
    pub fn is_resolved(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    /// Wire name of the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Working => "working",
            Self::InputRequired => "input_required",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unrecognized status name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized operation status: {0}")]
pub struct ParseStatusError(pub String);

impl FromStr for OperationStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}
