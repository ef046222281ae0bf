//! AWSManagedControlPlane controller
//!
//! Reconciles `AWSManagedControlPlane` objects owned by a Cluster API `Cluster`:
//! - Bring-up: network, security groups, bastion, EKS control plane, CNI and
//!   IAM authenticator, in that order, stopping at the first failure
//! - Tear-down: waits for the cluster's machines and machine pools to go, then
//!   deletes in reverse order and releases the finalizer
//! - Security groups: converged against EC2 by [`SecurityGroupReconciler`]
//!
//! Network, bastion, EKS, CNI and IAM authenticator reconcilers are supplied by
//! the embedding application through [`PeerServices`].

pub mod backoff;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod reconciler;
pub mod retry;
pub mod scope;
pub mod securitygroup;
pub mod services;
pub mod store;
pub mod watcher;

#[cfg(test)]
mod test_utils;

pub use config::ControllerConfig;
pub use controller::{Controller, init_tracing};
pub use error::ControllerError;
pub use events::{EventRecorder, KubeEventRecorder};
pub use reconciler::{ReconcileOutcome, Reconciler};
pub use retry::RetryPolicy;
pub use scope::{ControlPlaneScope, NetworkScope, SecurityGroupScope};
pub use securitygroup::SecurityGroupReconciler;
pub use services::{
    BastionService, CniService, ControlPlaneService, IamAuthenticatorService, NetworkService,
    PeerServices, SecurityGroupService, Services,
};
pub use store::{ControlPlaneStore, KubeControlPlaneStore};
