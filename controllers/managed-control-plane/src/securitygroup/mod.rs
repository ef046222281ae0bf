//! Security group reconciliation.
//!
//! Converges the cluster's security groups in two passes. The first pass makes
//! sure a group exists for every configured role (creating it, or adopting an
//! override) and that its tags are current. The second pass diffs each managed
//! group's ingress rules against the desired set and applies the difference,
//! revoking before authorizing.
//!
//! Groups supplied as overrides, groups EKS created and groups the in-cluster
//! cloud provider owns are never rule-mutated.

mod convert;
pub(crate) mod rules;


use crate::error::ControllerError;
use crate::events::{EventRecorder, reasons};
use crate::retry::RetryPolicy;
use crate::scope::{ControlPlaneScope, SecurityGroupScope};
use crate::services::SecurityGroupService;
use async_trait::async_trait;
use convert::{ingress_rule_to_permission, security_group_from_ec2, tags_from_ec2, tags_to_ec2};
use crds::conditions::{
    self, CLUSTER_SECURITY_GROUPS_READY_CONDITION, DELETED_REASON, DELETING_FAILED_REASON,
    DELETING_REASON,
};
use crds::tags::{self, cluster_aws_cloud_provider_tag_key, cluster_tag_key};
use crds::{
    BuildParams, ConditionSeverity, IngressRules, ResourceLifecycle, SecurityGroup,
    SecurityGroupRole, Tags, security_group_name,
};
use ec2_client::{
    CreateSecurityGroupRequest, DescribeSecurityGroupsRequest, Ec2ClientTrait, Ec2Error, Filter,
    ignore_security_group_not_found,
};
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::EventType;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

fn format_rules(rules: &IngressRules) -> String {
    rules
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Creates, tags, converges and deletes the cluster's security groups.
pub struct SecurityGroupReconciler {
    ec2: Arc<dyn Ec2ClientTrait>,
    recorder: Arc<dyn EventRecorder>,
    roles: Vec<SecurityGroupRole>,
    retry: RetryPolicy,
}

impl SecurityGroupReconciler {
    /// Create a reconciler managing groups for `roles`. The list is copied.
    pub fn new(
        ec2: Arc<dyn Ec2ClientTrait>,
        recorder: Arc<dyn EventRecorder>,
        roles: &[SecurityGroupRole],
    ) -> Self {
        Self {
            ec2,
            recorder,
            roles: roles.to_vec(),
            retry: RetryPolicy::default(),
        }
    }

    /// Replace the retry policy used for cloud mutations
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Roles this reconciler manages
    pub fn roles(&self) -> &[SecurityGroupRole] {
        &self.roles
    }

    /// Converge security groups and their ingress rules.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` before any cloud mutation when overrides are set on a
    /// managed VPC or an override does not exist. Cloud errors abort the pass.
    pub async fn reconcile<S>(&self, scope: &mut S) -> Result<(), ControllerError>
    where
        S: SecurityGroupScope + ?Sized,
    {
        let cluster = scope.cluster_name().to_string();
        let vpc_id = scope.vpc().id.clone();
        let overrides = scope.security_group_overrides().clone();

        if !overrides.is_empty() && scope.vpc().is_managed(&cluster) {
            return Err(ControllerError::InvalidConfig(format!(
                "security group overrides are not allowed for cluster {} because its VPC is managed; \
                 use an unmanaged VPC or remove the overrides",
                cluster
            )));
        }
        if vpc_id.is_empty() {
            return Err(ControllerError::InvalidConfig(format!(
                "VPC of cluster {} has not been resolved",
                cluster
            )));
        }

        let override_groups = self.describe_overrides(&overrides).await?;
        let mut existing = self.describe_cluster_groups(&cluster, &vpc_id).await?;
        for group in override_groups.values() {
            existing.insert(group.name.clone(), group.clone());
        }

        let object_ref = scope.object_ref();

        for role in &self.roles {
            let group = if let Some(group) = override_groups.get(role) {
                debug!("Using override security group {} for role {}", group.id, role);
                group.clone()
            } else {
                let name = security_group_name(&cluster, *role);
                let desired_tags = Self::tags_for_role(&*scope, *role, &name);
                match existing.get(&name) {
                    Some(group) if group.tags.is_eks_owned() => {
                        debug!("Security group {} is EKS owned, leaving tags alone", group.id);
                        group.clone()
                    }
                    Some(group) => self.ensure_tags(group.clone(), &desired_tags).await?,
                    None => {
                        self.create_group(&object_ref, &cluster, &vpc_id, *role, name, desired_tags)
                            .await?
                    }
                }
            };
            scope.set_security_group(*role, group);
        }

        for role in &self.roles {
            if overrides.contains_key(role) {
                debug!("Not reconciling ingress rules of override group for role {}", role);
                continue;
            }
            let Some(current) = scope.security_groups().get(role).cloned() else {
                continue;
            };
            if current.tags.has_aws_cloud_provider_owned(&cluster) || current.tags.is_eks_owned() {
                debug!(
                    "Security group {} for role {} is owned outside this provider, skipping rules",
                    current.id, role
                );
                continue;
            }

            let want = rules::ingress_rules_for_role(&*scope, *role)?;
            let to_revoke = current.ingress_rules.difference(&want);
            let to_authorize = want.difference(&current.ingress_rules);

            if !to_revoke.is_empty() {
                self.revoke_ingress(&object_ref, &current.id, &to_revoke).await?;
            }
            if !to_authorize.is_empty() {
                self.authorize_ingress(&object_ref, &current.id, &to_authorize)
                    .await?;
            }

            let mut updated = current;
            updated.ingress_rules = want;
            scope.set_security_group(*role, updated);
        }

        conditions::mark_true(scope.conditions_mut(), CLUSTER_SECURITY_GROUPS_READY_CONDITION);
        Ok(())
    }

    /// Delete every cluster-owned security group in the VPC.
    ///
    /// # Errors
    ///
    /// Failures of individual groups do not stop the others; they are returned
    /// together as `Aggregate`.
    pub async fn delete<S>(&self, scope: &mut S) -> Result<(), ControllerError>
    where
        S: SecurityGroupScope + ?Sized,
    {
        let cluster = scope.cluster_name().to_string();
        let vpc_id = scope.vpc().id.clone();
        if vpc_id.is_empty() {
            debug!("No VPC recorded for cluster {}, nothing to delete", cluster);
            return Ok(());
        }

        conditions::mark_false(
            scope.conditions_mut(),
            CLUSTER_SECURITY_GROUPS_READY_CONDITION,
            DELETING_REASON,
            ConditionSeverity::Info,
            "",
        );
        scope.patch_status().await?;

        let request = DescribeSecurityGroupsRequest {
            filters: vec![
                Filter::vpc_id(&vpc_id),
                Filter::tag(&cluster_tag_key(&cluster), ResourceLifecycle::Owned.as_str()),
            ],
            ..Default::default()
        };
        let groups = self.ec2.describe_all_security_groups(request).await?;
        if groups.is_empty() {
            conditions::mark_false(
                scope.conditions_mut(),
                CLUSTER_SECURITY_GROUPS_READY_CONDITION,
                DELETED_REASON,
                ConditionSeverity::Info,
                "",
            );
            return Ok(());
        }

        let overridden: BTreeSet<&String> = scope.security_group_overrides().values().collect();
        let object_ref = scope.object_ref();
        let mut errors = Vec::new();

        for group in &groups {
            if overridden.contains(&group.group_id) {
                debug!("Not deleting override security group {}", group.group_id);
                continue;
            }
            if tags_from_ec2(&group.tags).is_eks_owned() {
                debug!("Not deleting EKS owned security group {}", group.group_id);
                continue;
            }
            if let Err(e) = self.delete_group(&object_ref, &group.group_id).await {
                warn!("Failed to delete security group {}: {}", group.group_id, e);
                errors.push(e);
            }
        }

        if !errors.is_empty() {
            let err = ControllerError::Aggregate(errors);
            conditions::mark_false(
                scope.conditions_mut(),
                CLUSTER_SECURITY_GROUPS_READY_CONDITION,
                DELETING_FAILED_REASON,
                ConditionSeverity::Warning,
                err.to_string(),
            );
            return Err(err);
        }

        conditions::mark_false(
            scope.conditions_mut(),
            CLUSTER_SECURITY_GROUPS_READY_CONDITION,
            DELETED_REASON,
            ConditionSeverity::Info,
            "",
        );
        Ok(())
    }

    fn tags_for_role<S: SecurityGroupScope + ?Sized>(
        scope: &S,
        role: SecurityGroupRole,
        name: &str,
    ) -> Tags {
        let cluster = scope.cluster_name();
        let mut desired = tags::build(&BuildParams {
            cluster_name: cluster.to_string(),
            lifecycle: ResourceLifecycle::Owned,
            name: Some(name.to_string()),
            role: Some(role.as_str().to_string()),
            additional: scope.additional_tags().clone(),
        });
        // The in-cluster cloud provider manages rules on the load balancer group.
        if role == SecurityGroupRole::LB {
            desired.insert(
                cluster_aws_cloud_provider_tag_key(cluster),
                ResourceLifecycle::Owned.as_str().to_string(),
            );
        }
        desired
    }

    async fn describe_overrides(
        &self,
        overrides: &BTreeMap<SecurityGroupRole, String>,
    ) -> Result<BTreeMap<SecurityGroupRole, SecurityGroup>, ControllerError> {
        if overrides.is_empty() {
            return Ok(BTreeMap::new());
        }

        let group_ids: BTreeSet<String> = overrides.values().cloned().collect();
        let request = DescribeSecurityGroupsRequest {
            group_ids: group_ids.into_iter().collect(),
            ..Default::default()
        };
        let found = match self.ec2.describe_all_security_groups(request).await {
            Ok(found) => found,
            Err(e) if e.is_group_not_found() => {
                return Err(ControllerError::InvalidConfig(format!(
                    "security group override not found: {}",
                    e
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let mut resolved = BTreeMap::new();
        for (role, id) in overrides {
            let group = found.iter().find(|g| &g.group_id == id).ok_or_else(|| {
                ControllerError::InvalidConfig(format!(
                    "security group override {} for role {} not found",
                    id, role
                ))
            })?;
            resolved.insert(*role, security_group_from_ec2(group));
        }
        Ok(resolved)
    }

    async fn describe_cluster_groups(
        &self,
        cluster: &str,
        vpc_id: &str,
    ) -> Result<BTreeMap<String, SecurityGroup>, ControllerError> {
        let request = DescribeSecurityGroupsRequest {
            filters: vec![Filter::vpc_id(vpc_id), Filter::tag_key(&cluster_tag_key(cluster))],
            ..Default::default()
        };
        let groups = self.ec2.describe_all_security_groups(request).await?;
        debug!("Found {} security groups for cluster {}", groups.len(), cluster);

        Ok(groups
            .iter()
            .map(security_group_from_ec2)
            .map(|g| (g.name.clone(), g))
            .collect())
    }

    async fn create_group(
        &self,
        object_ref: &ObjectReference,
        cluster: &str,
        vpc_id: &str,
        role: SecurityGroupRole,
        name: String,
        tags: Tags,
    ) -> Result<SecurityGroup, ControllerError> {
        let request = CreateSecurityGroupRequest {
            vpc_id: vpc_id.to_string(),
            group_name: name.clone(),
            description: format!("Kubernetes cluster {}: {}", cluster, role),
            tags: tags_to_ec2(&tags),
        };

        match self.ec2.create_security_group(request).await {
            Ok(id) => {
                info!("Created security group {} ({}) for role {}", name, id, role);
                self.recorder
                    .publish(
                        object_ref,
                        EventType::Normal,
                        reasons::SUCCESSFUL_CREATE_SECURITY_GROUP,
                        format!("Created managed SecurityGroup {:?} for Role {:?}", id, role.as_str()),
                    )
                    .await;
                Ok(SecurityGroup {
                    id,
                    name,
                    tags,
                    ingress_rules: IngressRules::new(),
                })
            }
            Err(e) => {
                self.recorder
                    .publish(
                        object_ref,
                        EventType::Warning,
                        reasons::FAILED_CREATE_SECURITY_GROUP,
                        format!("Failed to create managed SecurityGroup for Role {:?}: {}", role.as_str(), e),
                    )
                    .await;
                Err(e.into())
            }
        }
    }

    async fn ensure_tags(
        &self,
        mut group: SecurityGroup,
        desired: &Tags,
    ) -> Result<SecurityGroup, ControllerError> {
        let missing = desired.difference(&group.tags);
        if missing.is_empty() {
            return Ok(group);
        }

        debug!("Updating {} tags on security group {}", missing.len(), group.id);
        let ec2_tags = tags_to_ec2(&missing);
        self.retry
            .run("create tags", Ec2Error::is_group_not_found, || {
                self.ec2.create_tags(&group.id, ec2_tags.clone())
            })
            .await?;

        group.tags.merge(&missing);
        Ok(group)
    }

    async fn authorize_ingress(
        &self,
        object_ref: &ObjectReference,
        group_id: &str,
        rules: &IngressRules,
    ) -> Result<(), ControllerError> {
        let permissions: Vec<_> = rules.iter().map(ingress_rule_to_permission).collect();
        let result = self
            .retry
            .run("authorize ingress", Ec2Error::is_group_not_found, || {
                self.ec2
                    .authorize_security_group_ingress(group_id, permissions.clone())
            })
            .await;

        match result {
            Ok(()) => {
                info!("Authorized {} ingress rules on security group {}", rules.len(), group_id);
                self.recorder
                    .publish(
                        object_ref,
                        EventType::Normal,
                        reasons::SUCCESSFUL_AUTHORIZE_INGRESS,
                        format!(
                            "Authorized security group ingress rules [{}] for SecurityGroup {:?}",
                            format_rules(rules),
                            group_id
                        ),
                    )
                    .await;
                Ok(())
            }
            Err(e) => {
                self.recorder
                    .publish(
                        object_ref,
                        EventType::Warning,
                        reasons::FAILED_AUTHORIZE_INGRESS,
                        format!(
                            "Failed to authorize security group ingress rules [{}] for SecurityGroup {:?}: {}",
                            format_rules(rules),
                            group_id,
                            e
                        ),
                    )
                    .await;
                Err(e.into())
            }
        }
    }

    async fn revoke_ingress(
        &self,
        object_ref: &ObjectReference,
        group_id: &str,
        rules: &IngressRules,
    ) -> Result<(), ControllerError> {
        let permissions: Vec<_> = rules.iter().map(ingress_rule_to_permission).collect();
        let result = self
            .retry
            .run("revoke ingress", Ec2Error::is_group_not_found, || {
                self.ec2.revoke_security_group_ingress(group_id, permissions.clone())
            })
            .await;

        match result {
            Ok(()) => {
                info!("Revoked {} ingress rules on security group {}", rules.len(), group_id);
                self.recorder
                    .publish(
                        object_ref,
                        EventType::Normal,
                        reasons::SUCCESSFUL_REVOKE_INGRESS,
                        format!(
                            "Revoked security group ingress rules [{}] for SecurityGroup {:?}",
                            format_rules(rules),
                            group_id
                        ),
                    )
                    .await;
                Ok(())
            }
            Err(e) => {
                self.recorder
                    .publish(
                        object_ref,
                        EventType::Warning,
                        reasons::FAILED_REVOKE_INGRESS,
                        format!(
                            "Failed to revoke security group ingress rules [{}] for SecurityGroup {:?}: {}",
                            format_rules(rules),
                            group_id,
                            e
                        ),
                    )
                    .await;
                Err(e.into())
            }
        }
    }

    /// Revoke everything on the group, then delete it. A group that is already
    /// gone counts as deleted.
    async fn delete_group(
        &self,
        object_ref: &ObjectReference,
        group_id: &str,
    ) -> Result<(), ControllerError> {
        let request = DescribeSecurityGroupsRequest {
            group_ids: vec![group_id.to_string()],
            ..Default::default()
        };
        let current = match self.ec2.describe_security_groups(request).await {
            Ok(response) => response.security_groups.into_iter().next(),
            Err(e) if e.is_group_not_found() => None,
            Err(e) => return Err(e.into()),
        };
        let Some(current) = current else {
            debug!("Security group {} already deleted", group_id);
            return Ok(());
        };

        if !current.ip_permissions.is_empty() {
            let revoked = ignore_security_group_not_found(
                self.ec2
                    .revoke_security_group_ingress(group_id, current.ip_permissions.clone())
                    .await,
            );
            if let Err(e) = revoked {
                self.recorder
                    .publish(
                        object_ref,
                        EventType::Warning,
                        reasons::FAILED_REVOKE_INGRESS,
                        format!(
                            "Failed to revoke security group ingress rules for SecurityGroup {:?}: {}",
                            group_id, e
                        ),
                    )
                    .await;
                return Err(e.into());
            }
            self.recorder
                .publish(
                    object_ref,
                    EventType::Normal,
                    reasons::SUCCESSFUL_REVOKE_INGRESS,
                    format!(
                        "Revoked {} security group ingress rules for SecurityGroup {:?}",
                        current.ip_permissions.len(),
                        group_id
                    ),
                )
                .await;
        }

        match ignore_security_group_not_found(self.ec2.delete_security_group(group_id).await) {
            Ok(()) => {
                info!("Deleted security group {}", group_id);
                self.recorder
                    .publish(
                        object_ref,
                        EventType::Normal,
                        reasons::SUCCESSFUL_DELETE_SECURITY_GROUP,
                        format!("Deleted SecurityGroup {:?}", group_id),
                    )
                    .await;
                Ok(())
            }
            Err(e) => {
                self.recorder
                    .publish(
                        object_ref,
                        EventType::Warning,
                        reasons::FAILED_DELETE_SECURITY_GROUP,
                        format!("Failed to delete SecurityGroup {:?}: {}", group_id, e),
                    )
                    .await;
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl SecurityGroupService for SecurityGroupReconciler {
    async fn reconcile_security_groups(
        &self,
        scope: &mut ControlPlaneScope,
    ) -> Result<(), ControllerError> {
        self.reconcile(scope).await
    }

    async fn delete_security_groups(
        &self,
        scope: &mut ControlPlaneScope,
    ) -> Result<(), ControllerError> {
        self.delete(scope).await
    }
}
