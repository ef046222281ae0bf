//! Sub-reconciler contracts.
//!
//! The orchestrator drives each part of the control plane through one of these
//! traits. Only the security group service is implemented in this crate; the
//! others are supplied by the embedding application through [`PeerServices`].

use crate::error::ControllerError;
use crate::scope::ControlPlaneScope;
use async_trait::async_trait;
use std::sync::Arc;

/// VPC, subnets, gateways and route tables
#[async_trait]
pub trait NetworkService: Send + Sync {
    /// Converge the network
    async fn reconcile_network(&self, scope: &mut ControlPlaneScope) -> Result<(), ControllerError>;
    /// Tear the network down
    async fn delete_network(&self, scope: &mut ControlPlaneScope) -> Result<(), ControllerError>;
}

/// Cluster security groups
#[async_trait]
pub trait SecurityGroupService: Send + Sync {
    /// Converge security groups and their ingress rules
    async fn reconcile_security_groups(
        &self,
        scope: &mut ControlPlaneScope,
    ) -> Result<(), ControllerError>;
    /// Delete cluster-owned security groups
    async fn delete_security_groups(
        &self,
        scope: &mut ControlPlaneScope,
    ) -> Result<(), ControllerError>;
}

/// Bastion host
#[async_trait]
pub trait BastionService: Send + Sync {
    /// Converge the bastion host
    async fn reconcile_bastion(&self, scope: &mut ControlPlaneScope) -> Result<(), ControllerError>;
    /// Terminate the bastion host
    async fn delete_bastion(&self, scope: &mut ControlPlaneScope) -> Result<(), ControllerError>;
}

/// EKS control plane
#[async_trait]
pub trait ControlPlaneService: Send + Sync {
    /// Converge the EKS cluster
    async fn reconcile_control_plane(
        &self,
        scope: &mut ControlPlaneScope,
    ) -> Result<(), ControllerError>;
    /// Delete the EKS cluster
    async fn delete_control_plane(
        &self,
        scope: &mut ControlPlaneScope,
    ) -> Result<(), ControllerError>;
}

/// CNI configuration inside the workload cluster
#[async_trait]
pub trait CniService: Send + Sync {
    /// Converge the CNI
    async fn reconcile_cni(&self, scope: &mut ControlPlaneScope) -> Result<(), ControllerError>;
}

/// aws-iam-authenticator mappings
#[async_trait]
pub trait IamAuthenticatorService: Send + Sync {
    /// Converge the authenticator configuration
    async fn reconcile_iam_authenticator(
        &self,
        scope: &mut ControlPlaneScope,
    ) -> Result<(), ControllerError>;
}

/// Sub-reconcilers supplied by the embedding application.
#[derive(Clone)]
pub struct PeerServices {
    /// Network service
    pub network: Arc<dyn NetworkService>,
    /// Bastion service
    pub bastion: Arc<dyn BastionService>,
    /// EKS control plane service
    pub control_plane: Arc<dyn ControlPlaneService>,
    /// CNI service
    pub cni: Arc<dyn CniService>,
    /// IAM authenticator service
    pub iam_authenticator: Arc<dyn IamAuthenticatorService>,
}

/// The full set of sub-reconcilers the orchestrator drives.
#[derive(Clone)]
pub struct Services {
    pub(crate) network: Arc<dyn NetworkService>,
    pub(crate) security_groups: Arc<dyn SecurityGroupService>,
    pub(crate) bastion: Arc<dyn BastionService>,
    pub(crate) control_plane: Arc<dyn ControlPlaneService>,
    pub(crate) cni: Arc<dyn CniService>,
    pub(crate) iam_authenticator: Arc<dyn IamAuthenticatorService>,
}

impl Services {
    /// Combine peer services with a security group service
    pub fn new(peers: PeerServices, security_groups: Arc<dyn SecurityGroupService>) -> Self {
        Self {
            network: peers.network,
            security_groups,
            bastion: peers.bastion,
            control_plane: peers.control_plane,
            cni: peers.cni,
            iam_authenticator: peers.iam_authenticator,
        }
    }
}
