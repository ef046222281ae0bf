//! Status conditions
//!
//! Typed, timestamped status flags and the helpers used to set them and to
//! fold a set of them into a summary `Ready` condition.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Summary condition computed from the other conditions
pub const READY_CONDITION: &str = "Ready";

/// EKS control plane is ready
pub const EKS_CONTROL_PLANE_READY_CONDITION: &str = "EKSControlPlaneReady";
/// IAM roles for the control plane exist
pub const IAM_CONTROL_PLANE_ROLES_READY_CONDITION: &str = "IAMControlPlaneRolesReady";
/// aws-iam-authenticator mappings are applied
pub const IAM_AUTHENTICATOR_CONFIGURED_CONDITION: &str = "IAMAuthenticatorConfigured";
/// EKS addons are installed
pub const EKS_ADDONS_CONFIGURED_CONDITION: &str = "EKSAddonsConfigured";
/// Secondary CIDRs for the CNI are associated
pub const SECONDARY_CIDRS_READY_CONDITION: &str = "SecondaryCidrsReady";
/// VPC exists
pub const VPC_READY_CONDITION: &str = "VpcReady";
/// Subnets exist
pub const SUBNETS_READY_CONDITION: &str = "SubnetsReady";
/// Internet gateway exists
pub const INTERNET_GATEWAY_READY_CONDITION: &str = "InternetGatewayReady";
/// NAT gateways exist
pub const NAT_GATEWAYS_READY_CONDITION: &str = "NatGatewaysReady";
/// Route tables are configured
pub const ROUTE_TABLES_READY_CONDITION: &str = "RouteTablesReady";
/// Cluster security groups are converged
pub const CLUSTER_SECURITY_GROUPS_READY_CONDITION: &str = "ClusterSecurityGroupsReady";
/// Bastion host is running
pub const BASTION_HOST_READY_CONDITION: &str = "BastionHostReady";

/// Reason: VPC reconciliation failed
pub const VPC_RECONCILIATION_FAILED_REASON: &str = "VpcReconciliationFailed";
/// Reason: security group reconciliation failed
pub const CLUSTER_SECURITY_GROUP_RECONCILIATION_FAILED_REASON: &str =
    "ClusterSecurityGroupReconciliationFailed";
/// Reason: bastion reconciliation failed
pub const BASTION_HOST_FAILED_REASON: &str = "BastionHostFailed";
/// Reason: EKS control plane reconciliation failed
pub const EKS_CONTROL_PLANE_RECONCILIATION_FAILED_REASON: &str =
    "EKSControlPlaneReconciliationFailed";
/// Reason: secondary CIDR reconciliation failed
pub const SECONDARY_CIDR_RECONCILIATION_FAILED_REASON: &str = "SecondaryCidrReconciliationFailed";
/// Reason: IAM authenticator configuration failed
pub const IAM_AUTHENTICATOR_CONFIGURATION_FAILED_REASON: &str =
    "IAMAuthenticatorConfigurationFailed";
/// Reason: resource deletion is in progress
pub const DELETING_REASON: &str = "Deleting";
/// Reason: resource deletion failed
pub const DELETING_FAILED_REASON: &str = "DeletingFailed";
/// Reason: resource has been deleted
pub const DELETED_REASON: &str = "Deleted";

/// Condition status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub enum ConditionStatus {
    /// Condition holds
    True,
    /// Condition does not hold
    False,
    /// Not yet known
    #[default]
    Unknown,
}

/// How bad a False condition is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionSeverity {
    /// Needs intervention
    Error,
    /// May resolve by itself
    Warning,
    /// Informational only
    Info,
}

/// A status condition
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type, e.g. `VpcReady`
    #[serde(rename = "type")]
    pub type_: String,

    /// True, False or Unknown
    pub status: ConditionStatus,

    /// Only set when status is False
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<ConditionSeverity>,

    /// CamelCase reason for the last transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human readable detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// When the status last changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    /// A True condition
    #[must_use]
    pub fn true_condition(type_: &str) -> Self {
        Self {
            type_: type_.to_string(),
            status: ConditionStatus::True,
            severity: None,
            reason: None,
            message: None,
            last_transition_time: None,
        }
    }

    /// A False condition with reason, severity and message
    #[must_use]
    pub fn false_condition(
        type_: &str,
        reason: &str,
        severity: ConditionSeverity,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        Self {
            type_: type_.to_string(),
            status: ConditionStatus::False,
            severity: Some(severity),
            reason: Some(reason.to_string()),
            message: (!message.is_empty()).then_some(message),
            last_transition_time: None,
        }
    }

    fn same_state(&self, other: &Condition) -> bool {
        self.status == other.status
            && self.severity == other.severity
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// Looks up a condition by type.
#[must_use]
pub fn get<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Whether the condition exists and is True.
#[must_use]
pub fn is_true(conditions: &[Condition], type_: &str) -> bool {
    get(conditions, type_).is_some_and(|c| c.status == ConditionStatus::True)
}

/// Whether the condition exists and is False.
#[must_use]
pub fn is_false(conditions: &[Condition], type_: &str) -> bool {
    get(conditions, type_).is_some_and(|c| c.status == ConditionStatus::False)
}

/// Sets a condition, replacing any condition of the same type.
///
/// The transition time is kept when the status did not change and refreshed otherwise.
pub fn set(conditions: &mut Vec<Condition>, mut condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.same_state(&condition) {
                return;
            }
            condition.last_transition_time = if existing.status == condition.status {
                existing.last_transition_time
            } else {
                Some(Utc::now())
            };
            *existing = condition;
        }
        None => {
            condition.last_transition_time = Some(Utc::now());
            conditions.push(condition);
        }
    }
}

/// Marks a condition True.
pub fn mark_true(conditions: &mut Vec<Condition>, type_: &str) {
    set(conditions, Condition::true_condition(type_));
}

/// Marks a condition False.
pub fn mark_false(
    conditions: &mut Vec<Condition>,
    type_: &str,
    reason: &str,
    severity: ConditionSeverity,
    message: impl Into<String>,
) {
    set(conditions, Condition::false_condition(type_, reason, severity, message));
}

// Lower ranks win when picking the condition that drives the summary.
fn merge_rank(condition: &Condition) -> u8 {
    match (condition.status, condition.severity) {
        (ConditionStatus::False, Some(ConditionSeverity::Error)) => 0,
        (ConditionStatus::False, Some(ConditionSeverity::Warning)) => 1,
        (ConditionStatus::False, _) => 2,
        (ConditionStatus::Unknown, _) => 3,
        (ConditionStatus::True, _) => 4,
    }
}

/// Computes the summary `Ready` condition over `types` using a step counter.
///
/// Ready is True only when every listed condition is present and True. Otherwise it
/// mirrors the status, severity and reason of the worst listed condition and reports
/// `"<true> of <total> completed"`. Nothing is set when none of the listed conditions exist.
pub fn set_summary(conditions: &mut Vec<Condition>, types: &[&str]) {
    let present: Vec<&Condition> = types.iter().filter_map(|t| get(conditions, t)).collect();
    if present.is_empty() {
        return;
    }

    let completed = present
        .iter()
        .filter(|c| c.status == ConditionStatus::True)
        .count();

    if completed == types.len() {
        mark_true(conditions, READY_CONDITION);
        return;
    }

    let message = format!("{} of {} completed", completed, types.len());
    let summary = match present.iter().min_by_key(|c| merge_rank(c)) {
        Some(worst) if worst.status != ConditionStatus::True => Condition {
            type_: READY_CONDITION.to_string(),
            status: worst.status,
            severity: worst.severity,
            reason: worst.reason.clone(),
            message: Some(message),
            last_transition_time: None,
        },
        // Some listed conditions have not been reported yet.
        _ => Condition {
            type_: READY_CONDITION.to_string(),
            status: ConditionStatus::Unknown,
            severity: None,
            reason: None,
            message: Some(message),
            last_transition_time: None,
        },
    };
    set(conditions, summary);
}
