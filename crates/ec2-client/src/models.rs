//! EC2 data models
//!
//! Shapes of the EC2 security group API, limited to the fields the reconcilers use.

use serde::{Deserialize, Serialize};

/// A VPC security group as returned by `DescribeSecurityGroups`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct SecurityGroup {
    /// Group ID
    pub group_id: String,
    /// Group name
    pub group_name: String,
    /// Description given at creation
    #[serde(default)]
    pub description: String,
    /// VPC the group belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_id: Option<String>,
    /// Tags on the group
    #[serde(default)]
    pub tags: Vec<Tag>,
    /// Inbound permissions
    #[serde(default)]
    pub ip_permissions: Vec<IpPermission>,
}

/// One inbound permission
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct IpPermission {
    /// Protocol name or number; `-1` means all
    pub ip_protocol: String,
    /// Start of port range (or ICMP type)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_port: Option<i64>,
    /// End of port range (or ICMP code)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_port: Option<i64>,
    /// IPv4 sources
    #[serde(default)]
    pub ip_ranges: Vec<IpRange>,
    /// Security group sources
    #[serde(default)]
    pub user_id_group_pairs: Vec<UserIdGroupPair>,
}

/// IPv4 source range
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct IpRange {
    /// CIDR block
    pub cidr_ip: String,
    /// Description of the range
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Security group source
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct UserIdGroupPair {
    /// Source group ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// Description of the source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Key/value tag
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Tag {
    /// Tag key
    pub key: String,
    /// Tag value
    pub value: String,
}

/// Describe filter; a resource matches when the named attribute equals any of the values
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Filter {
    /// Filter name, e.g. `vpc-id` or `tag:Name`
    pub name: String,
    /// Accepted values
    pub values: Vec<String>,
}

/// `DescribeSecurityGroups` input
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeSecurityGroupsRequest {
    /// Restrict to these group IDs
    #[serde(default)]
    pub group_ids: Vec<String>,
    /// Filters, all of which must match
    #[serde(default)]
    pub filters: Vec<Filter>,
    /// Continuation token from a previous page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

/// `DescribeSecurityGroups` output page
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeSecurityGroupsResponse {
    /// Groups on this page
    #[serde(default)]
    pub security_groups: Vec<SecurityGroup>,
    /// Token for the next page, absent on the last one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

/// `CreateSecurityGroup` input
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct CreateSecurityGroupRequest {
    /// VPC to create the group in
    pub vpc_id: String,
    /// Group name
    pub group_name: String,
    /// Description
    pub description: String,
    /// Tags applied at creation
    #[serde(default)]
    pub tags: Vec<Tag>,
}
