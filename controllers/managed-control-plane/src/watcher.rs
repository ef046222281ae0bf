//! AWSManagedControlPlane watcher.
//!
//! Drives [`Reconciler::reconcile`] from a `kube_runtime::Controller`, which
//! handles reconnection, per-object queueing and debouncing. Failed passes are
//! requeued with per-object exponential backoff.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crds::AWSManagedControlPlane;
use futures::StreamExt;
use kube::{Api, ResourceExt};
use kube_runtime::controller::{Action, Config as RuntimeConfig};
use kube_runtime::{Controller, watcher};
use std::sync::Arc;
use tracing::{debug, error, info};

fn resource_key(control_plane: &AWSManagedControlPlane) -> String {
    format!(
        "{}/{}",
        control_plane.namespace().unwrap_or_default(),
        control_plane.name_any()
    )
}

fn action_for(outcome: ReconcileOutcome) -> Action {
    match outcome.requeue_after {
        Some(delay) => Action::requeue(delay),
        None => Action::await_change(),
    }
}

async fn reconcile(
    control_plane: Arc<AWSManagedControlPlane>,
    reconciler: Arc<Reconciler>,
) -> Result<Action, ControllerError> {
    let key = resource_key(&control_plane);
    debug!("Reconciling AWSManagedControlPlane {}", key);

    let namespace = control_plane.namespace().unwrap_or_default();
    let outcome = reconciler
        .reconcile(&namespace, &control_plane.name_any())
        .await?;
    reconciler.reset_error(&key);
    Ok(action_for(outcome))
}

fn error_policy(
    control_plane: Arc<AWSManagedControlPlane>,
    error: &ControllerError,
    reconciler: Arc<Reconciler>,
) -> Action {
    let key = resource_key(&control_plane);
    let (delay, count) = reconciler.increment_error(&key);
    error!(
        "Reconciliation error for AWSManagedControlPlane {} (attempt {}), retrying in {:?}: {}",
        key, count, delay, error
    );
    Action::requeue(delay)
}

/// Watch AWSManagedControlPlane objects and reconcile them until the stream ends.
///
/// # Errors
///
/// Currently always returns `Ok` once the watch stream terminates; stream errors
/// are logged and the watch continues.
pub async fn watch_control_planes(
    api: Api<AWSManagedControlPlane>,
    reconciler: Arc<Reconciler>,
    config: &ControllerConfig,
) -> Result<(), ControllerError> {
    info!("Starting AWSManagedControlPlane watcher");

    let runtime_config = RuntimeConfig::default()
        .debounce(config.debounce)
        .concurrency(config.concurrency);

    Controller::new(api, watcher::Config::default())
        .with_config(runtime_config)
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            match res {
                Ok((object, _)) => debug!(
                    "Reconciled {}/{}",
                    object.namespace.unwrap_or_default(),
                    object.name
                ),
                Err(e) => error!("Controller error for AWSManagedControlPlane: {}", e),
            }
        })
        .await;

    Ok(())
}
