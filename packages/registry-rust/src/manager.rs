//! Generic token-keyed operation manager.
//!
//! [`OperationManager<R>`] owns the token -> record map for one record shape
//! and runs the background reaper that purges expired records. The server and
//! client specializations add their own methods in `server.rs` and `client.rs`.
//!
//! # Concurrency
//!
//! Records live in a [`DashMap`]. Every mutation of a single record happens
//! inside [`OperationManager::update`], which holds the entry's shard lock for
//! the whole check-and-mutate, and the purge runs through [`DashMap::retain`].
//! A transition racing a purge of the same token therefore either finishes
//! first or finds the token gone; it never re-inserts a removed record.
//!
//! Callers only ever receive clones of records, never references into the map.

use std::fmt;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use optrack_core::{
    ClockSource, RandomTokenGenerator, SystemClock, TokenError, TokenGenerator, TrackedOperation,
};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::config::RegistryConfig;
use crate::context::RequestId;
use crate::error::RegistryError;
use crate::reaper::{Reaper, ReaperTask};
use crate::worker::BackgroundWorker;

// ---------------------------------------------------------------------------
// OperationStore
// ---------------------------------------------------------------------------

/// The maps and clock shared between a manager and its reaper.
pub struct OperationStore<R> {
    operations: DashMap<String, R>,
    /// In-flight request id -> operation token. Pruned whenever the token's
    /// record leaves `operations`.
    requests: DashMap<RequestId, String>,
    clock: Arc<dyn ClockSource>,
}

impl<R: TrackedOperation> OperationStore<R> {
    fn new(clock: Arc<dyn ClockSource>) -> Self {
        Self {
            operations: DashMap::new(),
            requests: DashMap::new(),
            clock,
        }
    }

    /// Removes the record for `token` along with any request bound to it.
    fn remove(&self, token: &str) -> Option<R> {
        let removed = self.operations.remove(token).map(|(_, r)| r);
        if removed.is_some() {
            self.requests.retain(|_, bound| bound.as_str() != token);
        }
        removed
    }

    /// Removes every record expired at the current clock reading.
    pub(crate) fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;
        self.operations.retain(|_, op| {
            if op.is_expired(now) {
                removed += 1;
                false
            } else {
                true
            }
        });
        if removed > 0 {
            self.requests.retain(|_, token| self.operations.contains_key(token.as_str()));
        }
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.operations.len()
    }
}

// ---------------------------------------------------------------------------
// OperationManager
// ---------------------------------------------------------------------------

/// Owns the records of one shape and the reaper that purges them.
///
/// Activate the reaper with [`start`](Self::start) and stop it with
/// [`shutdown`](Self::shutdown); once `shutdown` returns no further purge
/// pass runs. Records are untouched by either call.
pub struct OperationManager<R: TrackedOperation> {
    store: Arc<OperationStore<R>>,
    generator: Arc<dyn TokenGenerator>,
    config: RegistryConfig,
    reaper: Mutex<Option<BackgroundWorker<Reaper<R>>>>,
}

impl<R: TrackedOperation> OperationManager<R> {
    /// Creates a manager with the default token generator and system clock.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidConfig`] if `config` fails validation.
    pub fn new(config: RegistryConfig) -> Result<Self, RegistryError> {
        config.validate()?;
        Ok(Self::with_parts(
            config,
            Arc::new(RandomTokenGenerator),
            Arc::new(SystemClock),
        ))
    }

    fn with_parts(
        config: RegistryConfig,
        generator: Arc<dyn TokenGenerator>,
        clock: Arc<dyn ClockSource>,
    ) -> Self {
        Self {
            store: Arc::new(OperationStore::new(clock)),
            generator,
            config,
            reaper: Mutex::new(None),
        }
    }

    /// Replaces the token generator.
    #[must_use]
    pub fn with_token_generator(mut self, generator: impl TokenGenerator + 'static) -> Self {
        self.generator = Arc::new(generator);
        self
    }

    /// Replaces the clock. Intended for construction time; records already
    /// stored keep the timestamps they were created with.
    #[must_use]
    pub fn with_clock(self, clock: impl ClockSource + 'static) -> Self {
        let clock: Arc<dyn ClockSource> = Arc::new(clock);
        let store = match Arc::try_unwrap(self.store) {
            Ok(store) => OperationStore {
                operations: store.operations,
                requests: store.requests,
                clock,
            },
            Err(shared) => {
                let fresh = OperationStore::new(clock);
                for entry in &shared.operations {
                    fresh
                        .operations
                        .insert(entry.key().clone(), entry.value().clone());
                }
                for entry in &shared.requests {
                    fresh
                        .requests
                        .insert(entry.key().clone(), entry.value().clone());
                }
                fresh
            }
        };
        Self {
            store: Arc::new(store),
            generator: self.generator,
            config: self.config,
            reaper: Mutex::new(None),
        }
    }

    /// The configuration this manager was built with.
    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Current time in millis according to the manager's clock.
    #[must_use]
    pub fn now(&self) -> u64 {
        self.store.clock.now()
    }

    /// Mints a token with the configured generator.
    ///
    /// # Errors
    ///
    /// Propagates the generator's failure; an empty token is reported as
    /// [`TokenError::Empty`].
    pub fn generate_token(&self, session_id: Option<&str>) -> Result<String, TokenError> {
        let token = self.generator.generate(session_id)?;
        if token.is_empty() {
            return Err(TokenError::Empty);
        }
        Ok(token)
    }

    // -- map access ---------------------------------------------------------

    /// Snapshot of the record for `token`.
    #[must_use]
    pub fn get(&self, token: &str) -> Option<R> {
        self.store.operations.get(token).map(|r| r.value().clone())
    }

    /// Returns `true` if `token` is currently tracked.
    #[must_use]
    pub fn contains(&self, token: &str) -> bool {
        self.store.operations.contains_key(token)
    }

    /// Inserts or overwrites the record for `token`, returning the previous one.
    pub fn set(&self, token: impl Into<String>, record: R) -> Option<R> {
        self.store.operations.insert(token.into(), record)
    }

    /// Removes and returns the record for `token`, dropping any request
    /// bound to it.
    pub fn remove(&self, token: &str) -> Option<R> {
        self.store.remove(token)
    }

    /// Removes the record for `token`, reporting whether one existed.
    pub fn remove_operation(&self, token: &str) -> bool {
        self.remove(token).is_some()
    }

    /// Number of tracked records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.operations.is_empty()
    }

    /// All tracked tokens, sorted.
    #[must_use]
    pub fn tokens(&self) -> Vec<String> {
        let mut tokens: Vec<String> = self
            .store
            .operations
            .iter()
            .map(|e| e.key().clone())
            .collect();
        tokens.sort();
        tokens
    }

    /// Records belonging to `session_id`, ordered by creation time then token.
    #[must_use]
    pub fn session_operations(&self, session_id: &str) -> Vec<R> {
        let mut ops: Vec<R> = self
            .store
            .operations
            .iter()
            .filter(|e| e.value().session_id() == Some(session_id))
            .map(|e| e.value().clone())
            .collect();
        ops.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.token().cmp(b.token()))
        });
        ops
    }

    /// Removes every expired record, and the request bindings pointing at
    /// them, and returns how many records were removed.
    pub fn cleanup_expired(&self) -> usize {
        self.store.cleanup_expired()
    }

    /// Runs `f` on the record for `token` under its entry lock.
    ///
    /// Returns `None` if the token is not tracked.
    pub(crate) fn update<T>(&self, token: &str, f: impl FnOnce(&mut R) -> T) -> Option<T> {
        self.store
            .operations
            .get_mut(token)
            .map(|mut entry| f(entry.value_mut()))
    }

    /// Runs `f` on every record, one entry lock at a time, and counts how
    /// many calls returned `true`.
    pub(crate) fn update_all(&self, mut f: impl FnMut(&mut R) -> bool) -> usize {
        let mut changed = 0;
        for mut entry in self.store.operations.iter_mut() {
            if f(entry.value_mut()) {
                changed += 1;
            }
        }
        changed
    }

    /// Inserts `record` only if its token is free. Returns `false` on collision.
    pub(crate) fn insert_new(&self, record: R) -> bool {
        match self.store.operations.entry(record.token().to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(record);
                true
            }
        }
    }

    // -- request bindings ---------------------------------------------------

    /// Associates an in-flight request with the operation it executes.
    ///
    /// The binding lasts until it is unbound or the operation's record is
    /// removed or purged.
    pub fn bind_request(&self, request_id: RequestId, token: impl Into<String>) {
        self.store.requests.insert(request_id, token.into());
    }

    /// Drops a request binding, returning the token it pointed at.
    pub fn unbind_request(&self, request_id: &RequestId) -> Option<String> {
        self.store.requests.remove(request_id).map(|(_, token)| token)
    }

    /// Token bound to `request_id`, if any.
    #[must_use]
    pub fn bound_token(&self, request_id: &RequestId) -> Option<String> {
        self.store.requests.get(request_id).map(|t| t.value().clone())
    }

    // -- reaper lifecycle ---------------------------------------------------

    /// Starts the background reaper. A no-op if it is already running.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NoRuntime`] when called outside a tokio runtime.
    pub fn start(&self) -> Result<(), RegistryError> {
        let mut slot = self.reaper.lock();
        if slot.as_ref().is_some_and(BackgroundWorker::is_running) {
            return Ok(());
        }
        tokio::runtime::Handle::try_current().map_err(|_| RegistryError::NoRuntime)?;
        *slot = Some(BackgroundWorker::start(
            Reaper::new(Arc::clone(&self.store)),
            self.config.cleanup_interval(),
        ));
        tracing::info!(
            interval_ms = self.config.cleanup_interval_ms,
            "operation reaper started"
        );
        Ok(())
    }

    /// Stops the reaper and waits for it to exit.
    ///
    /// When this returns, no purge pass is running and none will run until
    /// [`start`](Self::start) is called again. Tracked records are kept.
    pub async fn shutdown(&self) {
        let worker = self.reaper.lock().take();
        if let Some(mut worker) = worker {
            worker.stop().await;
            tracing::info!("operation reaper shut down");
        }
    }

    /// Returns `true` while the reaper is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.reaper
            .lock()
            .as_ref()
            .is_some_and(BackgroundWorker::is_running)
    }

    /// Asks the running reaper for an immediate pass and waits for its count.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::ReaperStopped`] if the reaper is not running,
    /// or [`RegistryError::Internal`] if it could not accept the request.
    pub async fn sweep_now(&self) -> Result<usize, RegistryError> {
        let (reply, done) = oneshot::channel();
        {
            let slot = self.reaper.lock();
            let worker = slot.as_ref().ok_or(RegistryError::ReaperStopped)?;
            worker.try_submit(ReaperTask::SweepNow { reply })?;
        }
        done.await.map_err(|_| RegistryError::ReaperStopped)
    }
}

impl<R: TrackedOperation> fmt::Debug for OperationManager<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationManager")
            .field("operations", &self.len())
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl<R: TrackedOperation> Default for OperationManager<R> {
    fn default() -> Self {
        Self::with_parts(
            RegistryConfig::default(),
            Arc::new(RandomTokenGenerator),
            Arc::new(SystemClock),
        )
    }
}
