//! `optrack` registry: token-keyed tracking of long-running tool calls.
//!
//! 1. **Manager** (`manager`): generic token -> record map with a background reaper
//! 2. **Server** (`server`): full status lifecycle, session queries, polling views
//! 3. **Client** (`client`): token -> tool name tracking while polling
//! 4. **Context** (`context`): per-request handle on the manager
//! 5. **Workers** (`worker`, `reaper`): periodic purge of expired records

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod manager;
pub mod reaper;
pub mod server;
pub mod worker;

pub use client::ClientOperationManager;
pub use config::RegistryConfig;
pub use context::{RequestContext, RequestId};
pub use error::{LookupError, RegistryError};
pub use manager::OperationManager;
pub use server::{ServerOperationManager, StatusSnapshot};
pub use worker::{BackgroundRunnable, BackgroundWorker};
