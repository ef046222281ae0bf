//! AWSManagedControlPlane bring-up and tear-down.
//!
//! Bring-up runs network, security groups, bastion, EKS control plane, CNI and
//! IAM authenticator in that order and stops at the first failure. Tear-down
//! waits until no machines or machine pools of the cluster remain, then deletes
//! in the reverse order and releases the finalizer.

use super::{ReconcileOutcome, Reconciler};
use crate::error::ControllerError;
use crate::scope::{ControlPlaneScope, NetworkScope, SecurityGroupScope};
use crds::conditions::{
    self, BASTION_HOST_FAILED_REASON, BASTION_HOST_READY_CONDITION,
    CLUSTER_SECURITY_GROUPS_READY_CONDITION, CLUSTER_SECURITY_GROUP_RECONCILIATION_FAILED_REASON,
    EKS_ADDONS_CONFIGURED_CONDITION, EKS_CONTROL_PLANE_READY_CONDITION,
    EKS_CONTROL_PLANE_RECONCILIATION_FAILED_REASON, IAM_AUTHENTICATOR_CONFIGURATION_FAILED_REASON,
    IAM_AUTHENTICATOR_CONFIGURED_CONDITION, IAM_CONTROL_PLANE_ROLES_READY_CONDITION,
    INTERNET_GATEWAY_READY_CONDITION, NAT_GATEWAYS_READY_CONDITION, ROUTE_TABLES_READY_CONDITION,
    SECONDARY_CIDR_RECONCILIATION_FAILED_REASON, SECONDARY_CIDRS_READY_CONDITION,
    SUBNETS_READY_CONDITION, VPC_READY_CONDITION, VPC_RECONCILIATION_FAILED_REASON,
};
use crds::{
    AWSManagedControlPlane, CLUSTER_API_GROUP, CLUSTER_KIND, ConditionSeverity, FailureDomain,
    MANAGED_CONTROL_PLANE_FINALIZER, PAUSED_ANNOTATION, dependent_kinds,
};
use tracing::{debug, error, info, warn};

/// Name of the Cluster that owns the object, from its owner references
pub(crate) fn owner_cluster_name(control_plane: &AWSManagedControlPlane) -> Option<String> {
    control_plane
        .metadata
        .owner_references
        .as_ref()?
        .iter()
        .find(|owner| {
            owner.kind == CLUSTER_KIND
                && owner.api_version.split('/').next() == Some(CLUSTER_API_GROUP)
        })
        .map(|owner| owner.name.clone())
}

fn has_paused_annotation(control_plane: &AWSManagedControlPlane) -> bool {
    control_plane
        .metadata
        .annotations
        .as_ref()
        .is_some_and(|annotations| annotations.contains_key(PAUSED_ANNOTATION))
}

/// Conditions that make up the summary Ready condition
fn summary_conditions(scope: &ControlPlaneScope) -> Vec<&'static str> {
    let mut types = vec![
        EKS_CONTROL_PLANE_READY_CONDITION,
        IAM_CONTROL_PLANE_ROLES_READY_CONDITION,
        IAM_AUTHENTICATOR_CONFIGURED_CONDITION,
        EKS_ADDONS_CONFIGURED_CONDITION,
        VPC_READY_CONDITION,
        SUBNETS_READY_CONDITION,
        CLUSTER_SECURITY_GROUPS_READY_CONDITION,
    ];
    if scope.vpc_is_managed() {
        types.extend([
            INTERNET_GATEWAY_READY_CONDITION,
            NAT_GATEWAYS_READY_CONDITION,
            ROUTE_TABLES_READY_CONDITION,
        ]);
        if scope.spec().bastion.enabled {
            types.push(BASTION_HOST_READY_CONDITION);
        }
    }
    types
}

fn fail_stage(
    scope: &mut ControlPlaneScope,
    stage: &str,
    condition: &str,
    reason: &str,
    err: ControllerError,
) -> ControllerError {
    error!(
        "Failed to reconcile {} for AWSManagedControlPlane {}/{}: {}",
        stage,
        scope.namespace(),
        scope.name(),
        err
    );
    conditions::mark_false(
        scope.conditions_mut(),
        condition,
        reason,
        ConditionSeverity::Error,
        err.to_string(),
    );
    err
}

impl Reconciler {
    /// Reconcile the AWSManagedControlPlane `namespace/name`.
    ///
    /// # Errors
    ///
    /// Returns the first failing stage's error, or the error persisting status
    /// and finalizers when the pass itself succeeded.
    pub async fn reconcile(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ReconcileOutcome, ControllerError> {
        let Some(control_plane) = self.store.get(namespace, name).await? else {
            debug!("AWSManagedControlPlane {}/{} not found, nothing to do", namespace, name);
            return Ok(ReconcileOutcome::done());
        };

        let Some(cluster_name) = owner_cluster_name(&control_plane) else {
            info!(
                "Cluster Controller has not yet set OwnerRef on AWSManagedControlPlane {}/{}",
                namespace, name
            );
            return Ok(ReconcileOutcome::done());
        };

        if has_paused_annotation(&control_plane)
            || self.store.cluster_paused(namespace, &cluster_name).await?
        {
            info!("AWSManagedControlPlane {}/{} is paused, skipping", namespace, name);
            return Ok(ReconcileOutcome::done());
        }

        let mut scope = ControlPlaneScope::new(control_plane, cluster_name, self.store.clone())?;

        let result = if scope.is_deleting() {
            self.reconcile_delete(&mut scope).await
        } else {
            self.reconcile_normal(&mut scope).await
        };

        let summary = summary_conditions(&scope);
        conditions::set_summary(scope.conditions_mut(), &summary);

        match (result, scope.close().await) {
            (Ok(outcome), Ok(())) => Ok(outcome),
            (Ok(_), Err(close_err)) => Err(close_err),
            (Err(e), Err(close_err)) => {
                warn!(
                    "Failed to persist AWSManagedControlPlane {}/{} after failed pass: {}",
                    namespace, name, close_err
                );
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
        }
    }

    async fn reconcile_normal(
        &self,
        scope: &mut ControlPlaneScope,
    ) -> Result<ReconcileOutcome, ControllerError> {
        info!(
            "Reconciling AWSManagedControlPlane {}/{} for cluster {}",
            scope.namespace(),
            scope.name(),
            scope.cluster_name()
        );

        scope.add_finalizer(MANAGED_CONTROL_PLANE_FINALIZER);
        scope.patch_finalizers().await?;

        if let Err(e) = self.services.network.reconcile_network(scope).await {
            return Err(fail_stage(
                scope,
                "network",
                VPC_READY_CONDITION,
                VPC_RECONCILIATION_FAILED_REASON,
                e,
            ));
        }

        if let Err(e) = self.services.security_groups.reconcile_security_groups(scope).await {
            return Err(fail_stage(
                scope,
                "security groups",
                CLUSTER_SECURITY_GROUPS_READY_CONDITION,
                CLUSTER_SECURITY_GROUP_RECONCILIATION_FAILED_REASON,
                e,
            ));
        }

        if let Err(e) = self.services.bastion.reconcile_bastion(scope).await {
            return Err(fail_stage(
                scope,
                "bastion host",
                BASTION_HOST_READY_CONDITION,
                BASTION_HOST_FAILED_REASON,
                e,
            ));
        }

        if let Err(e) = self.services.control_plane.reconcile_control_plane(scope).await {
            return Err(fail_stage(
                scope,
                "EKS control plane",
                EKS_CONTROL_PLANE_READY_CONDITION,
                EKS_CONTROL_PLANE_RECONCILIATION_FAILED_REASON,
                e,
            ));
        }

        if let Err(e) = self.services.cni.reconcile_cni(scope).await {
            return Err(fail_stage(
                scope,
                "CNI",
                SECONDARY_CIDRS_READY_CONDITION,
                SECONDARY_CIDR_RECONCILIATION_FAILED_REASON,
                e,
            ));
        }

        if let Err(e) = self.services.iam_authenticator.reconcile_iam_authenticator(scope).await {
            return Err(fail_stage(
                scope,
                "IAM authenticator",
                IAM_AUTHENTICATOR_CONFIGURED_CONDITION,
                IAM_AUTHENTICATOR_CONFIGURATION_FAILED_REASON,
                e,
            ));
        }
        conditions::mark_true(scope.conditions_mut(), IAM_AUTHENTICATOR_CONFIGURED_CONDITION);

        let private_zones: Vec<String> = scope
            .subnets()
            .iter()
            .filter(|subnet| !subnet.is_public && !subnet.availability_zone.is_empty())
            .map(|subnet| subnet.availability_zone.clone())
            .collect();
        for zone in private_zones {
            scope
                .status_mut()
                .failure_domains
                .insert(zone, FailureDomain { control_plane: true });
        }

        info!(
            "Reconciled AWSManagedControlPlane {}/{}",
            scope.namespace(),
            scope.name()
        );
        Ok(ReconcileOutcome::done())
    }

    async fn reconcile_delete(
        &self,
        scope: &mut ControlPlaneScope,
    ) -> Result<ReconcileOutcome, ControllerError> {
        info!(
            "Reconciling AWSManagedControlPlane {}/{} delete",
            scope.namespace(),
            scope.name()
        );

        let dependents = self.count_dependents(scope).await?;
        if dependents > 0 {
            info!(
                "{} machines or machine pools of cluster {} still exist, requeueing in {:?}",
                dependents,
                scope.cluster_name(),
                self.config.delete_requeue_after
            );
            return Ok(ReconcileOutcome::requeue(self.config.delete_requeue_after));
        }

        if let Err(e) = self.services.control_plane.delete_control_plane(scope).await {
            error!("Error deleting EKS cluster for {}/{}: {}", scope.namespace(), scope.name(), e);
            return Err(e);
        }
        if let Err(e) = self.services.bastion.delete_bastion(scope).await {
            error!("Error deleting bastion for {}/{}: {}", scope.namespace(), scope.name(), e);
            return Err(e);
        }
        if let Err(e) = self.services.security_groups.delete_security_groups(scope).await {
            error!(
                "Error deleting security groups for {}/{}: {}",
                scope.namespace(),
                scope.name(),
                e
            );
            return Err(e);
        }
        if let Err(e) = self.services.network.delete_network(scope).await {
            error!("Error deleting network for {}/{}: {}", scope.namespace(), scope.name(), e);
            return Err(e);
        }

        scope.remove_finalizer(MANAGED_CONTROL_PLANE_FINALIZER);
        info!(
            "Deleted AWSManagedControlPlane {}/{} resources",
            scope.namespace(),
            scope.name()
        );
        Ok(ReconcileOutcome::done())
    }

    async fn count_dependents(&self, scope: &ControlPlaneScope) -> Result<usize, ControllerError> {
        let mut total = 0;
        for kind in dependent_kinds(self.config.machine_pool_enabled) {
            total += self
                .store
                .count_dependents(scope.namespace(), &kind, scope.cluster_name())
                .await?;
        }
        Ok(total)
    }
}
