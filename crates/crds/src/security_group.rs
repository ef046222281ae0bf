//! Security group rule model
//!
//! Value types for security groups and their ingress rules. Rule identity is
//! the full tuple of description, protocol, ports and source sets, so a change
//! to any single source produces a whole-rule replace rather than a merge.

use crate::tags::Tags;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Logical role of a security group within a cluster.
///
/// The role determines both the group's name and the ingress rules it should carry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
pub enum SecurityGroupRole {
    /// Bastion host
    #[serde(rename = "bastion")]
    Bastion,

    /// Control plane instances
    #[serde(rename = "controlplane")]
    ControlPlane,

    /// Worker nodes
    #[serde(rename = "node")]
    Node,

    /// Load balancer in front of the API server
    #[serde(rename = "apiserver-lb")]
    APIServerLB,

    /// Load balancers created by the in-cluster cloud provider
    #[serde(rename = "lb")]
    LB,

    /// Extra group attached to EKS managed nodes
    #[serde(rename = "node-eks-additional")]
    EKSNodeAdditional,
}

/// Roles reconciled for a managed control plane when nothing else is configured.
pub const DEFAULT_MANAGED_CONTROL_PLANE_ROLES: &[SecurityGroupRole] = &[
    SecurityGroupRole::Bastion,
    SecurityGroupRole::EKSNodeAdditional,
];

impl SecurityGroupRole {
    /// Every role, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::Bastion,
        Self::ControlPlane,
        Self::Node,
        Self::APIServerLB,
        Self::LB,
        Self::EKSNodeAdditional,
    ];

    /// Wire name of the role (also used in group names and the role tag)
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bastion => "bastion",
            Self::ControlPlane => "controlplane",
            Self::Node => "node",
            Self::APIServerLB => "apiserver-lb",
            Self::LB => "lb",
            Self::EKSNodeAdditional => "node-eks-additional",
        }
    }

    /// Other roles whose groups this role's rules always reference.
    ///
    /// SSH from the bastion group depends on per-cluster settings and is not listed.
    #[must_use]
    pub fn source_roles(&self) -> &'static [SecurityGroupRole] {
        match self {
            Self::ControlPlane => &[Self::APIServerLB, Self::Node],
            Self::Node => &[Self::ControlPlane],
            Self::Bastion | Self::APIServerLB | Self::LB | Self::EKSNodeAdditional => &[],
        }
    }
}

impl fmt::Display for SecurityGroupRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string does not name a known security group role.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown security group role: {0}")]
pub struct UnknownRoleError(pub String);

impl FromStr for SecurityGroupRole {
    type Err = UnknownRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| UnknownRoleError(s.to_string()))
    }
}

/// Derives the security group name for a cluster role.
///
/// Names are prefixed with `@` when the cluster name itself looks like a group ID,
/// so that a name can never be mistaken for an `sg-` identifier.
#[must_use]
pub fn security_group_name(cluster_name: &str, role: SecurityGroupRole) -> String {
    if cluster_name.starts_with("sg-") {
        format!("@{}-{}", cluster_name, role)
    } else {
        format!("{}-{}", cluster_name, role)
    }
}

/// IP protocol of an ingress rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
pub enum SecurityGroupProtocol {
    /// All protocols
    #[serde(rename = "-1")]
    All,

    /// IP in IP
    #[serde(rename = "4")]
    IPinIP,

    /// TCP
    #[default]
    #[serde(rename = "tcp")]
    TCP,

    /// UDP
    #[serde(rename = "udp")]
    UDP,

    /// ICMP
    #[serde(rename = "icmp")]
    ICMP,

    /// ICMPv6
    #[serde(rename = "58")]
    ICMPv6,

    /// Encapsulating Security Payload
    #[serde(rename = "50")]
    ESP,
}

impl SecurityGroupProtocol {
    /// EC2 protocol string
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "-1",
            Self::IPinIP => "4",
            Self::TCP => "tcp",
            Self::UDP => "udp",
            Self::ICMP => "icmp",
            Self::ICMPv6 => "58",
            Self::ESP => "50",
        }
    }

    /// Parses an EC2 protocol string. Unknown protocols map to `None`.
    #[must_use]
    pub fn from_ec2(protocol: &str) -> Option<Self> {
        match protocol {
            "-1" | "all" => Some(Self::All),
            "4" => Some(Self::IPinIP),
            "tcp" | "6" => Some(Self::TCP),
            "udp" | "17" => Some(Self::UDP),
            "icmp" | "1" => Some(Self::ICMP),
            "58" | "icmpv6" => Some(Self::ICMPv6),
            "50" => Some(Self::ESP),
            _ => None,
        }
    }

    /// Whether the port range is meaningful for this protocol.
    ///
    /// EC2 overloads the port range for ICMP to carry type/code.
    #[must_use]
    pub fn has_ports(&self) -> bool {
        matches!(self, Self::TCP | Self::UDP | Self::ICMP | Self::ICMPv6)
    }
}

impl fmt::Display for SecurityGroupProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single allow rule for inbound traffic.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngressRule {
    /// Human readable description, part of rule identity
    #[serde(default)]
    pub description: String,

    /// IP protocol
    pub protocol: SecurityGroupProtocol,

    /// Start of the port range
    #[serde(default)]
    pub from_port: i64,

    /// End of the port range
    #[serde(default)]
    pub to_port: i64,

    /// Source IPv4 CIDR blocks
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cidr_blocks: Vec<String>,

    /// Source security group IDs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_security_group_ids: Vec<String>,

    /// Source security group roles, resolved to IDs before the rule is applied
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_security_group_roles: Vec<SecurityGroupRole>,
}

impl IngressRule {
    /// Rule from TCP port range and source groups.
    #[must_use]
    pub fn tcp_from_groups(description: &str, from_port: i64, to_port: i64, sources: Vec<String>) -> Self {
        Self {
            description: description.to_string(),
            protocol: SecurityGroupProtocol::TCP,
            from_port,
            to_port,
            source_security_group_ids: sources,
            ..Default::default()
        }
    }

    /// Rule from TCP port range and CIDR blocks.
    #[must_use]
    pub fn tcp_from_cidrs(description: &str, from_port: i64, to_port: i64, cidr_blocks: Vec<String>) -> Self {
        Self {
            description: description.to_string(),
            protocol: SecurityGroupProtocol::TCP,
            from_port,
            to_port,
            cidr_blocks,
            ..Default::default()
        }
    }
}

fn sorted(values: &[String]) -> Vec<&str> {
    let mut out: Vec<&str> = values.iter().map(String::as_str).collect();
    out.sort_unstable();
    out
}

impl PartialEq for IngressRule {
    fn eq(&self, other: &Self) -> bool {
        if self.description != other.description || self.protocol != other.protocol {
            return false;
        }

        if self.protocol.has_ports()
            && (self.from_port != other.from_port || self.to_port != other.to_port)
        {
            return false;
        }

        sorted(&self.cidr_blocks) == sorted(&other.cidr_blocks)
            && sorted(&self.source_security_group_ids) == sorted(&other.source_security_group_ids)
    }
}

impl Eq for IngressRule {}

impl fmt::Display for IngressRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}/{}-{}",
            self.description, self.protocol, self.from_port, self.to_port
        )?;
        if !self.cidr_blocks.is_empty() {
            write!(f, " from {}", self.cidr_blocks.join(","))?;
        }
        if !self.source_security_group_ids.is_empty() {
            write!(f, " from {}", self.source_security_group_ids.join(","))?;
        }
        Ok(())
    }
}

/// Unordered collection of ingress rules with set-difference semantics.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(transparent)]
pub struct IngressRules(pub Vec<IngressRule>);

impl IngressRules {
    /// Empty rule set
    #[must_use]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Rules in `self` that have no equal rule in `other`.
    #[must_use]
    pub fn difference(&self, other: &IngressRules) -> IngressRules {
        IngressRules(
            self.0
                .iter()
                .filter(|rule| !other.contains(rule))
                .cloned()
                .collect(),
        )
    }

    /// Whether an equal rule is present
    #[must_use]
    pub fn contains(&self, rule: &IngressRule) -> bool {
        self.0.iter().any(|r| r == rule)
    }

    /// Appends a rule
    pub fn push(&mut self, rule: IngressRule) {
        self.0.push(rule);
    }

    /// Appends every rule from an iterator
    pub fn extend(&mut self, rules: impl IntoIterator<Item = IngressRule>) {
        self.0.extend(rules);
    }

    /// Number of rules
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when there are no rules
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the rules
    pub fn iter(&self) -> std::slice::Iter<'_, IngressRule> {
        self.0.iter()
    }

    /// Same rules regardless of order
    #[must_use]
    pub fn set_eq(&self, other: &IngressRules) -> bool {
        self.difference(other).is_empty() && other.difference(self).is_empty()
    }
}

impl From<Vec<IngressRule>> for IngressRules {
    fn from(rules: Vec<IngressRule>) -> Self {
        Self(rules)
    }
}

impl IntoIterator for IngressRules {
    type Item = IngressRule;
    type IntoIter = std::vec::IntoIter<IngressRule>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a IngressRules {
    type Item = &'a IngressRule;
    type IntoIter = std::slice::Iter<'a, IngressRule>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<IngressRule> for IngressRules {
    fn from_iter<T: IntoIterator<Item = IngressRule>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Observed or recorded security group
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroup {
    /// EC2 group ID (sg-...)
    pub id: String,

    /// Group name
    pub name: String,

    /// Tags on the group
    #[serde(default, skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,

    /// Ingress rules currently on the group
    #[serde(default, skip_serializing_if = "IngressRules::is_empty")]
    pub ingress_rules: IngressRules,
}
