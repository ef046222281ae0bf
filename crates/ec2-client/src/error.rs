//! EC2 client errors

use thiserror::Error;

/// EC2 error codes the reconcilers branch on
pub mod codes {
    /// The security group does not exist (or is not visible yet)
    pub const GROUP_NOT_FOUND: &str = "InvalidGroup.NotFound";
    /// The ingress permission being revoked does not exist
    pub const PERMISSION_NOT_FOUND: &str = "InvalidPermission.NotFound";
    /// The ingress permission being authorized already exists
    pub const PERMISSION_DUPLICATE: &str = "InvalidPermission.Duplicate";
    /// Another resource still references the group
    pub const DEPENDENCY_VIOLATION: &str = "DependencyViolation";
}

/// Errors that can occur when calling the EC2 API
#[derive(Debug, Error)]
pub enum Ec2Error {
    /// EC2 returned an error code
    #[error("EC2 API error {code}: {message}")]
    Api {
        /// Error code, e.g. `InvalidGroup.NotFound`
        code: String,
        /// Message returned with the code
        message: String,
    },

    /// Invalid request (e.g., missing required fields)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl Ec2Error {
    /// Builds an API error from a code and message
    pub fn api(code: &str, message: impl Into<String>) -> Self {
        Self::Api {
            code: code.to_string(),
            message: message.into(),
        }
    }

    /// EC2 error code, when the error came from the API
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => Some(code),
            _ => None,
        }
    }

    /// The group does not exist, possibly only because it was created moments ago
    #[must_use]
    pub fn is_group_not_found(&self) -> bool {
        self.code() == Some(codes::GROUP_NOT_FOUND)
    }

    /// The permission does not exist
    #[must_use]
    pub fn is_permission_not_found(&self) -> bool {
        self.code() == Some(codes::PERMISSION_NOT_FOUND)
    }

    /// Errors that mean a teardown step has nothing left to do
    #[must_use]
    pub fn is_ignorable_security_group_error(&self) -> bool {
        self.is_group_not_found() || self.is_permission_not_found()
    }
}

/// Swallows errors that mean the group or permission is already gone.
///
/// # Errors
///
/// Returns every other error unchanged.
pub fn ignore_security_group_not_found(result: Result<(), Ec2Error>) -> Result<(), Ec2Error> {
    match result {
        Err(e) if e.is_ignorable_security_group_error() => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classifiers() {
        let not_found = Ec2Error::api(codes::GROUP_NOT_FOUND, "sg-1 does not exist");
        assert!(not_found.is_group_not_found());
        assert!(not_found.is_ignorable_security_group_error());

        let perm = Ec2Error::api(codes::PERMISSION_NOT_FOUND, "rule does not exist");
        assert!(!perm.is_group_not_found());
        assert!(perm.is_ignorable_security_group_error());

        let dep = Ec2Error::api(codes::DEPENDENCY_VIOLATION, "in use");
        assert!(!dep.is_ignorable_security_group_error());
        assert_eq!(dep.code(), Some(codes::DEPENDENCY_VIOLATION));

        assert_eq!(Ec2Error::InvalidRequest("x".to_string()).code(), None);
    }

    #[test]
    fn test_ignore_security_group_not_found() {
        assert!(ignore_security_group_not_found(Err(Ec2Error::api(codes::GROUP_NOT_FOUND, ""))).is_ok());
        assert!(ignore_security_group_not_found(Err(Ec2Error::api(codes::DEPENDENCY_VIOLATION, ""))).is_err());
    }
}
