//! AWSManagedControlPlane CRD
//!
//! Desired state of an EKS managed control plane and the network it lives in,
//! plus the status the controller reports back.

use crate::conditions::Condition;
use crate::security_group::{IngressRule, SecurityGroup, SecurityGroupProtocol, SecurityGroupRole};
use crate::tags::Tags;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Finalizer held on the object until teardown completes
pub const MANAGED_CONTROL_PLANE_FINALIZER: &str =
    "awsmanagedcontrolplane.controlplane.cluster.x-k8s.io";

/// Default port the API server load balancer listens on
pub const DEFAULT_API_SERVER_PORT: i64 = 443;

fn default_api_server_port() -> i64 {
    DEFAULT_API_SERVER_PORT
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "controlplane.cluster.x-k8s.io",
    version = "v1beta2",
    kind = "AWSManagedControlPlane",
    namespaced,
    status = "AWSManagedControlPlaneStatus",
    shortname = "awsmcp"
)]
#[serde(rename_all = "camelCase")]
pub struct AWSManagedControlPlaneSpec {
    /// Name of the EKS cluster; derived from namespace and name when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eks_cluster_name: Option<String>,

    /// AWS region
    #[serde(default)]
    pub region: String,

    /// Kubernetes version of the control plane
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Network configuration
    #[serde(default)]
    pub network: NetworkSpec,

    /// Bastion host configuration
    #[serde(default)]
    pub bastion: Bastion,

    /// Tags added to every AWS resource created for the cluster
    #[serde(default, skip_serializing_if = "Tags::is_empty")]
    pub additional_tags: Tags,

    /// IAM role assumed by the control plane
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_name: Option<String>,

    /// Port the API server load balancer listens on
    #[serde(default = "default_api_server_port")]
    pub api_server_port: i64,

    /// aws-iam-authenticator role and user mappings
    #[serde(default)]
    pub iam_authenticator_config: IamAuthenticatorConfig,
}

impl Default for AWSManagedControlPlaneSpec {
    fn default() -> Self {
        Self {
            eks_cluster_name: None,
            region: String::new(),
            version: None,
            network: NetworkSpec::default(),
            bastion: Bastion::default(),
            additional_tags: Tags::default(),
            role_name: None,
            api_server_port: DEFAULT_API_SERVER_PORT,
            iam_authenticator_config: IamAuthenticatorConfig::default(),
        }
    }
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    /// VPC to use or create
    #[serde(default)]
    pub vpc: VpcSpec,

    /// Subnets to use or create
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subnets: Vec<SubnetSpec>,

    /// CNI configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cni: Option<CniSpec>,

    /// Externally managed security groups to use instead of creating them, by role
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub security_group_overrides: BTreeMap<SecurityGroupRole, String>,

    /// Extra ingress rules for the control plane security group
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_control_plane_ingress_rules: Vec<IngressRule>,

    /// Sources allowed to reach node ports; any IPv4 address when empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_port_ingress_rule_cidr_blocks: Vec<String>,
}

/// VPC configuration
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VpcSpec {
    /// ID of an existing VPC; empty until the VPC is created
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    /// CIDR block of the VPC
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cidr_block: String,

    /// Tags observed on the VPC
    #[serde(default, skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
}

impl VpcSpec {
    /// Whether this provider manages the VPC's lifecycle.
    ///
    /// A VPC with no ID yet is going to be created here; otherwise ownership is read from tags.
    #[must_use]
    pub fn is_managed(&self, cluster_name: &str) -> bool {
        self.id.is_empty() || self.tags.has_owned(cluster_name)
    }
}

/// Subnet configuration
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubnetSpec {
    /// Subnet ID
    #[serde(default)]
    pub id: String,

    /// CIDR block
    #[serde(default)]
    pub cidr_block: String,

    /// Availability zone
    #[serde(default)]
    pub availability_zone: String,

    /// Whether the subnet routes to an internet gateway
    #[serde(default)]
    pub is_public: bool,

    /// Tags observed on the subnet
    #[serde(default, skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
}

/// CNI configuration
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CniSpec {
    /// Ports the CNI needs open between cluster members
    #[serde(default)]
    pub cni_ingress_rules: Vec<CniIngressRule>,
}

/// Port range the CNI needs open
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CniIngressRule {
    /// Description of the rule
    pub description: String,
    /// IP protocol
    pub protocol: SecurityGroupProtocol,
    /// Start of the port range
    pub from_port: i64,
    /// End of the port range
    pub to_port: i64,
}

/// Bastion host configuration
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct Bastion {
    /// Whether a bastion host should exist
    #[serde(default)]
    pub enabled: bool,

    /// CIDR blocks allowed to SSH to the bastion; any IPv4 address when empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_cidr_blocks: Vec<String>,

    /// EC2 instance type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,

    /// AMI ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ami: Option<String>,
}

/// aws-iam-authenticator mappings
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct IamAuthenticatorConfig {
    /// IAM roles mapped to Kubernetes identities
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub map_roles: Vec<KubernetesMapping>,

    /// IAM users mapped to Kubernetes identities
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub map_users: Vec<KubernetesMapping>,
}

/// Maps an IAM principal to a Kubernetes user and groups
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesMapping {
    /// ARN of the IAM role or user
    pub arn: String,
    /// Kubernetes user name
    pub username: String,
    /// Kubernetes groups
    #[serde(default)]
    pub groups: Vec<String>,
}

/// Observed state of the control plane
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct AWSManagedControlPlaneStatus {
    /// Control plane is ready to serve
    #[serde(default)]
    pub ready: bool,

    /// Control plane has been created at least once
    #[serde(default)]
    pub initialized: bool,

    /// Availability zones usable for control plane placement
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub failure_domains: BTreeMap<String, FailureDomain>,

    /// Observed network state
    #[serde(default)]
    pub network: NetworkStatus,

    /// Bastion host, when one exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bastion: Option<BastionInstance>,

    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Terminal error message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
}

/// Failure domain placement hints
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FailureDomain {
    /// Whether control plane machines may be placed here
    #[serde(default)]
    pub control_plane: bool,
}

/// Observed network state
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatus {
    /// Security groups by role
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub security_groups: BTreeMap<SecurityGroupRole, SecurityGroup>,
}

/// Bastion instance
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct BastionInstance {
    /// EC2 instance ID
    pub id: String,
    /// Private IP address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_ip: Option<String>,
}
