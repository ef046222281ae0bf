//! AWS managed control plane CRD definitions
//!
//! Kubernetes Custom Resource Definitions and the security group rule model
//! shared by the managed control plane controller.

pub mod cluster_api;
pub mod conditions;
pub mod managed_control_plane;
pub mod security_group;
pub mod tags;

pub use cluster_api::*;
pub use conditions::{Condition, ConditionSeverity, ConditionStatus};
pub use managed_control_plane::*;
pub use security_group::*;
pub use tags::{BuildParams, ResourceLifecycle, Tags};
