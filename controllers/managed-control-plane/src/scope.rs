//! Per-reconcile view of an AWSManagedControlPlane.
//!
//! A [`ControlPlaneScope`] owns a working copy of the object for the duration of
//! one pass. Sub-reconcilers mutate the in-memory status and network through it
//! and [`ControlPlaneScope::close`] persists whatever changed at the end.
//!
//! Services that only need part of the object depend on the narrow
//! [`NetworkScope`] and [`SecurityGroupScope`] traits instead of the concrete type.

use crate::error::ControllerError;
use crate::store::ControlPlaneStore;
use async_trait::async_trait;
use crds::{
    AWSManagedControlPlane, AWSManagedControlPlaneSpec, AWSManagedControlPlaneStatus, Bastion,
    CniIngressRule, Condition, IngressRule, NetworkSpec, SecurityGroup, SecurityGroupRole,
    SubnetSpec, Tags, VpcSpec,
};
use k8s_openapi::api::core::v1::ObjectReference;
use kube::Resource;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Read access to the cluster's network.
pub trait NetworkScope {
    /// Name of the owning cluster; used in resource names and ownership tags
    fn cluster_name(&self) -> &str;

    /// VPC the cluster lives in
    fn vpc(&self) -> &VpcSpec;

    /// Subnets of the cluster
    fn subnets(&self) -> &[SubnetSpec];

    /// Ports the CNI needs open between cluster members
    fn cni_ingress_rules(&self) -> &[CniIngressRule];

    /// User supplied tags for every created resource
    fn additional_tags(&self) -> &Tags;
}

/// What the security group reconciler reads and writes.
#[async_trait]
pub trait SecurityGroupScope: NetworkScope + Send + Sync {
    /// Externally managed groups by role
    fn security_group_overrides(&self) -> &BTreeMap<SecurityGroupRole, String>;

    /// Groups recorded so far in this pass (and by previous passes)
    fn security_groups(&self) -> &BTreeMap<SecurityGroupRole, SecurityGroup>;

    /// Record the group resolved for `role`
    fn set_security_group(&mut self, role: SecurityGroupRole, group: SecurityGroup);

    /// Bastion host configuration
    fn bastion(&self) -> &Bastion;

    /// Port the API server load balancer listens on
    fn api_server_port(&self) -> i64;

    /// Extra rules for the control plane group
    fn additional_control_plane_ingress_rules(&self) -> &[IngressRule];

    /// Sources allowed to reach node ports
    fn node_port_ingress_rule_cidr_blocks(&self) -> &[String];

    /// Status conditions
    fn conditions_mut(&mut self) -> &mut Vec<Condition>;

    /// Reference used when publishing events
    fn object_ref(&self) -> ObjectReference;

    /// Persist the in-memory status now
    async fn patch_status(&self) -> Result<(), ControllerError>;
}

/// Working copy of one AWSManagedControlPlane plus the store it is persisted to.
pub struct ControlPlaneScope {
    control_plane: AWSManagedControlPlane,
    status: AWSManagedControlPlaneStatus,
    cluster_name: String,
    namespace: String,
    name: String,
    finalizers: Vec<String>,
    persisted_finalizers: Vec<String>,
    persisted_network: NetworkSpec,
    store: Arc<dyn ControlPlaneStore>,
}

impl ControlPlaneScope {
    /// Build a scope for `control_plane`, owned by the cluster `cluster_name`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` when the object has no name or namespace.
    pub fn new(
        control_plane: AWSManagedControlPlane,
        cluster_name: impl Into<String>,
        store: Arc<dyn ControlPlaneStore>,
    ) -> Result<Self, ControllerError> {
        let name = control_plane.metadata.name.clone().ok_or_else(|| {
            ControllerError::InvalidConfig("AWSManagedControlPlane missing name".to_string())
        })?;
        let namespace = control_plane.metadata.namespace.clone().ok_or_else(|| {
            ControllerError::InvalidConfig(format!("AWSManagedControlPlane {} missing namespace", name))
        })?;
        let finalizers = control_plane.metadata.finalizers.clone().unwrap_or_default();

        Ok(Self {
            status: control_plane.status.clone().unwrap_or_default(),
            cluster_name: cluster_name.into(),
            persisted_finalizers: finalizers.clone(),
            finalizers,
            persisted_network: control_plane.spec.network.clone(),
            namespace,
            name,
            control_plane,
            store,
        })
    }

    /// Object namespace
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Object name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Desired state
    pub fn spec(&self) -> &AWSManagedControlPlaneSpec {
        &self.control_plane.spec
    }

    /// Mutable network, for sub-reconcilers that create or discover the VPC and subnets
    pub fn network_mut(&mut self) -> &mut NetworkSpec {
        &mut self.control_plane.spec.network
    }

    /// In-memory status
    pub fn status(&self) -> &AWSManagedControlPlaneStatus {
        &self.status
    }

    /// Mutable in-memory status
    pub fn status_mut(&mut self) -> &mut AWSManagedControlPlaneStatus {
        &mut self.status
    }

    /// Whether the object has a deletion timestamp
    pub fn is_deleting(&self) -> bool {
        self.control_plane.metadata.deletion_timestamp.is_some()
    }

    /// Whether the VPC is created and owned by this provider
    pub fn vpc_is_managed(&self) -> bool {
        self.vpc().is_managed(&self.cluster_name)
    }

    /// Current finalizer list, including unpersisted changes
    pub fn finalizers(&self) -> &[String] {
        &self.finalizers
    }

    /// Whether `finalizer` is present
    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    /// Add `finalizer`; returns false when it was already present
    pub fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }
        self.finalizers.push(finalizer.to_string());
        true
    }

    /// Remove `finalizer`; returns false when it was absent
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let before = self.finalizers.len();
        self.finalizers.retain(|f| f != finalizer);
        before != self.finalizers.len()
    }

    /// Persist the finalizer list if it changed since it was last persisted
    ///
    /// # Errors
    ///
    /// Returns the store error, except not-found which means the object is already gone.
    pub async fn patch_finalizers(&mut self) -> Result<(), ControllerError> {
        if self.finalizers == self.persisted_finalizers {
            return Ok(());
        }
        match self
            .store
            .patch_finalizers(&self.namespace, &self.name, &self.finalizers)
            .await
        {
            Err(e) if !e.is_not_found() => return Err(e),
            _ => {}
        }
        self.persisted_finalizers = self.finalizers.clone();
        Ok(())
    }

    /// Persist the network if a sub-reconciler changed it
    ///
    /// # Errors
    ///
    /// Returns the store error, except not-found which means the object is already gone.
    pub async fn patch_network(&mut self) -> Result<(), ControllerError> {
        let network = &self.control_plane.spec.network;
        if *network == self.persisted_network {
            return Ok(());
        }
        match self
            .store
            .patch_network(&self.namespace, &self.name, network)
            .await
        {
            Err(e) if !e.is_not_found() => return Err(e),
            _ => {}
        }
        debug!("Recorded network of {}/{}", self.namespace, self.name);
        self.persisted_network = network.clone();
        Ok(())
    }

    /// Persist the network, status and finalizers, in that order.
    ///
    /// # Errors
    ///
    /// Returns the first store error.
    pub async fn close(&mut self) -> Result<(), ControllerError> {
        debug!("Closing scope for {}/{}", self.namespace, self.name);
        self.patch_network().await?;
        self.patch_status().await?;
        self.patch_finalizers().await
    }
}

impl NetworkScope for ControlPlaneScope {
    fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    fn vpc(&self) -> &VpcSpec {
        &self.control_plane.spec.network.vpc
    }

    fn subnets(&self) -> &[SubnetSpec] {
        &self.control_plane.spec.network.subnets
    }

    fn cni_ingress_rules(&self) -> &[CniIngressRule] {
        self.control_plane
            .spec
            .network
            .cni
            .as_ref()
            .map(|cni| cni.cni_ingress_rules.as_slice())
            .unwrap_or_default()
    }

    fn additional_tags(&self) -> &Tags {
        &self.control_plane.spec.additional_tags
    }
}

#[async_trait]
impl SecurityGroupScope for ControlPlaneScope {
    fn security_group_overrides(&self) -> &BTreeMap<SecurityGroupRole, String> {
        &self.control_plane.spec.network.security_group_overrides
    }

    fn security_groups(&self) -> &BTreeMap<SecurityGroupRole, SecurityGroup> {
        &self.status.network.security_groups
    }

    fn set_security_group(&mut self, role: SecurityGroupRole, group: SecurityGroup) {
        self.status.network.security_groups.insert(role, group);
    }

    fn bastion(&self) -> &Bastion {
        &self.control_plane.spec.bastion
    }

    fn api_server_port(&self) -> i64 {
        self.control_plane.spec.api_server_port
    }

    fn additional_control_plane_ingress_rules(&self) -> &[IngressRule] {
        &self.control_plane.spec.network.additional_control_plane_ingress_rules
    }

    fn node_port_ingress_rule_cidr_blocks(&self) -> &[String] {
        &self.control_plane.spec.network.node_port_ingress_rule_cidr_blocks
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status.conditions
    }

    fn object_ref(&self) -> ObjectReference {
        self.control_plane.object_ref(&())
    }

    async fn patch_status(&self) -> Result<(), ControllerError> {
        match self
            .store
            .patch_status(&self.namespace, &self.name, &self.status)
            .await
        {
            Err(e) if e.is_not_found() => {
                debug!("{}/{} is gone, skipping status update", self.namespace, self.name);
                Ok(())
            }
            other => other,
        }
    }
}
