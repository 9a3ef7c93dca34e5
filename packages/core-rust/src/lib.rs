//! `optrack` core: operation records, status lifecycle, clocks, and token generation.

pub mod clock;
pub mod operation;
pub mod status;
pub mod token;

pub use clock::{ClockSource, ManualClock, SystemClock};
pub use operation::{
    Arguments, ClientOperation, ServerOperation, TrackedOperation, Transition,
    DEFAULT_KEEP_ALIVE_SECS,
};
pub use status::{OperationStatus, ParseStatusError};
pub use token::{random_token, RandomTokenGenerator, TokenError, TokenGenerator};
