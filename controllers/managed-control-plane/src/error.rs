//! Controller-specific error types.
//!
//! This module defines the errors a reconcile pass can return. Upstream
//! Kubernetes and EC2 errors are wrapped so callers can still classify them.

use crds::{SecurityGroupRole, UnknownRoleError};
use ec2_client::Ec2Error;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the managed control plane controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// EC2 API error
    #[error("EC2 error: {0}")]
    Ec2(#[from] Ec2Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unknown security group role name
    #[error(transparent)]
    UnknownRole(#[from] UnknownRoleError),

    /// A rule references a role whose group has not been created or discovered
    #[error("Security group for role {0} has not been resolved")]
    SecurityGroupNotResolved(SecurityGroupRole),

    /// Several independent operations failed
    #[error("{} errors occurred: {}", .0.len(), join_errors(.0))]
    Aggregate(Vec<ControllerError>),

    /// Reconciliation failed
    #[error("Reconciliation failed: {0}")]
    Reconciliation(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

fn join_errors(errors: &[ControllerError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ControllerError {
    /// The Kubernetes object addressed by the request does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Kube(KubeError::Api(e)) if e.code == 404)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ec2_client::codes;

    #[test]
    fn test_aggregate_lists_every_error() {
        let err = ControllerError::Aggregate(vec![
            ControllerError::Ec2(Ec2Error::api(codes::DEPENDENCY_VIOLATION, "sg-1 in use")),
            ControllerError::Reconciliation("second".to_string()),
        ]);
        let msg = err.to_string();
        assert!(msg.starts_with("2 errors occurred"));
        assert!(msg.contains("sg-1 in use"));
        assert!(msg.contains("second"));
    }

    #[test]
    fn test_non_kube_errors_are_not_not_found() {
        assert!(!ControllerError::InvalidConfig("x".to_string()).is_not_found());
    }
}
