//! Reconciliation logic for AWSManagedControlPlane.
//!
//! - `control_plane`: the bring-up and tear-down sequence

pub mod control_plane;


use crate::backoff::ExponentialBackoff;
use crate::config::ControllerConfig;
use crate::services::Services;
use crate::store::ControlPlaneStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

/// Delay used when the backoff table cannot be read
const DEFAULT_ERROR_REQUEUE: Duration = Duration::from_secs(60);

/// Backoff state for a resource
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: ExponentialBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new() -> Self {
        Self {
            backoff: ExponentialBackoff::for_requeue(),
            error_count: 0,
        }
    }

    fn increment_error(&mut self) -> Duration {
        self.error_count += 1;
        self.backoff.next_backoff()
    }

    fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Result of a successful reconcile pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Reconcile again after this delay even without new events
    pub requeue_after: Option<Duration>,
}

impl ReconcileOutcome {
    /// Nothing further to do until the object changes
    #[must_use]
    pub fn done() -> Self {
        Self::default()
    }

    /// Reconcile again after `delay`
    #[must_use]
    pub fn requeue(delay: Duration) -> Self {
        Self {
            requeue_after: Some(delay),
        }
    }
}

/// Reconciles AWSManagedControlPlane resources.
pub struct Reconciler {
    pub(crate) store: Arc<dyn ControlPlaneStore>,
    pub(crate) services: Services,
    pub(crate) config: ControllerConfig,
    /// Error count tracking per resource (namespace/name -> BackoffState)
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(store: Arc<dyn ControlPlaneStore>, services: Services, config: ControllerConfig) -> Self {
        Self {
            store,
            services,
            config,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Record a failed pass for a resource and return how long to wait before retrying
    ///
    /// Returns (delay, error_count)
    pub fn increment_error(&self, resource_key: &str) -> (Duration, u32) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states
                    .entry(resource_key.to_string())
                    .or_insert_with(BackoffState::new);
                let delay = state.increment_error();
                (delay, state.error_count)
            }
            Err(e) => {
                warn!("Failed to lock backoff_states: {}, using default backoff", e);
                (DEFAULT_ERROR_REQUEUE, 0)
            }
        }
    }

    /// Reset error count for a resource (on successful reconciliation)
    pub fn reset_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            if let Some(state) = states.get_mut(resource_key) {
                state.reset();
            }
        }
    }
}
