//! Controller wiring.
//!
//! Builds the Kubernetes client, store, event recorder and security group
//! reconciler, then runs the AWSManagedControlPlane watcher until it exits or
//! the process receives Ctrl-C.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::events::KubeEventRecorder;
use crate::reconciler::Reconciler;
use crate::securitygroup::SecurityGroupReconciler;
use crate::services::{PeerServices, Services};
use crate::store::KubeControlPlaneStore;
use crate::watcher::watch_control_planes;
use crds::AWSManagedControlPlane;
use ec2_client::Ec2ClientTrait;
use kube::{Api, Client};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber, honouring `RUST_LOG` (default `info`).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if tracing_subscriber::fmt().with_env_filter(filter).try_init().is_err() {
        warn!("Tracing subscriber already installed");
    }
}

/// Runs the AWSManagedControlPlane controller.
pub struct Controller {
    watcher: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Connects to the cluster and starts watching.
    ///
    /// `ec2` backs the security group reconciler; `peers` supply the remaining
    /// sub-reconcilers.
    ///
    /// # Errors
    ///
    /// Returns `Kube` when no Kubernetes client can be configured.
    pub async fn new(
        config: ControllerConfig,
        ec2: Arc<dyn Ec2ClientTrait>,
        peers: PeerServices,
    ) -> Result<Self, ControllerError> {
        info!("Initializing AWSManagedControlPlane controller");
        info!(
            "  Namespace: {}",
            config.watch_namespace.as_deref().unwrap_or("all namespaces")
        );
        info!("  Machine pools: {}", config.machine_pool_enabled);
        info!("  Security group roles: {:?}", config.security_group_roles);

        if rustls::crypto::ring::default_provider().install_default().is_err() {
            warn!("rustls crypto provider already installed");
        }

        let client = Client::try_default().await?;

        let api: Api<AWSManagedControlPlane> = match config.watch_namespace.as_deref() {
            Some(ns) => Api::namespaced(client.clone(), ns),
            None => Api::all(client.clone()),
        };

        let recorder = Arc::new(KubeEventRecorder::new(client.clone()));
        let security_groups = Arc::new(SecurityGroupReconciler::new(
            ec2,
            recorder,
            &config.security_group_roles,
        ));
        let reconciler = Arc::new(Reconciler::new(
            Arc::new(KubeControlPlaneStore::new(client)),
            Services::new(peers, security_groups),
            config.clone(),
        ));

        let watcher = tokio::spawn(async move { watch_control_planes(api, reconciler, &config).await });

        Ok(Self { watcher })
    }

    /// Runs until the watcher exits or Ctrl-C is received.
    ///
    /// # Errors
    ///
    /// Returns `Watch` when the watcher task fails or panics.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("AWSManagedControlPlane controller running");

        tokio::select! {
            result = &mut self.watcher => {
                result
                    .map_err(|e| ControllerError::Watch(format!("AWSManagedControlPlane watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("AWSManagedControlPlane watcher error: {}", e)))?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                self.watcher.abort();
            }
        }

        info!("AWSManagedControlPlane controller stopped");
        Ok(())
    }
}
