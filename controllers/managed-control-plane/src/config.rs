//! Controller configuration.
//!
//! Settings are read from environment variables, matching how the controller
//! is configured in its deployment manifest.

use crate::error::ControllerError;
use crds::{DEFAULT_MANAGED_CONTROL_PLANE_ROLES, SecurityGroupRole};
use std::time::Duration;

/// Default delay before re-checking dependents of a deleting control plane
pub const DEFAULT_DELETE_REQUEUE_AFTER: Duration = Duration::from_secs(20);

/// Runtime configuration for the managed control plane controller.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    /// Namespace to watch; all namespaces when unset (`WATCH_NAMESPACE`)
    pub watch_namespace: Option<String>,
    /// Count machine pool kinds as dependents (`MACHINE_POOL_ENABLED`)
    pub machine_pool_enabled: bool,
    /// Requeue delay while dependents remain (`DELETE_REQUEUE_SECONDS`)
    pub delete_requeue_after: Duration,
    /// Maximum concurrent reconciles (`RECONCILE_CONCURRENCY`)
    pub concurrency: u16,
    /// Quiet period before a burst of events triggers a reconcile (`RECONCILE_DEBOUNCE_SECONDS`)
    pub debounce: Duration,
    /// Security group roles to reconcile (`SECURITY_GROUP_ROLES`, comma separated)
    pub security_group_roles: Vec<SecurityGroupRole>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            machine_pool_enabled: false,
            delete_requeue_after: DEFAULT_DELETE_REQUEUE_AFTER,
            concurrency: 3,
            debounce: Duration::from_secs(5),
            security_group_roles: DEFAULT_MANAGED_CONTROL_PLANE_ROLES.to_vec(),
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ControllerError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        other => Err(ControllerError::InvalidConfig(format!(
            "{} must be a boolean, got {:?}",
            key, other
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ControllerError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| {
        ControllerError::InvalidConfig(format!("{} must be a number, got {:?}: {}", key, value, e))
    })
}

/// Every role a configured role sources its rules from must be configured too.
fn check_source_roles(roles: &[SecurityGroupRole]) -> Result<(), ControllerError> {
    for role in roles {
        if let Some(missing) = role.source_roles().iter().find(|s| !roles.contains(s)) {
            return Err(ControllerError::InvalidConfig(format!(
                "SECURITY_GROUP_ROLES includes {} but not {}, which its rules reference",
                role, missing
            )));
        }
    }
    Ok(())
}

impl ControllerConfig {
    /// Loads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` or `UnknownRole` for values that do not parse.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` or `UnknownRole` for values that do not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let mut config = Self::default();

        config.watch_namespace = lookup("WATCH_NAMESPACE").filter(|ns| !ns.is_empty());

        if let Some(value) = lookup("MACHINE_POOL_ENABLED") {
            config.machine_pool_enabled = parse_bool("MACHINE_POOL_ENABLED", &value)?;
        }
        if let Some(value) = lookup("DELETE_REQUEUE_SECONDS") {
            config.delete_requeue_after =
                Duration::from_secs(parse_number("DELETE_REQUEUE_SECONDS", &value)?);
        }
        if let Some(value) = lookup("RECONCILE_CONCURRENCY") {
            config.concurrency = parse_number("RECONCILE_CONCURRENCY", &value)?;
            if config.concurrency == 0 {
                return Err(ControllerError::InvalidConfig(
                    "RECONCILE_CONCURRENCY must be at least 1".to_string(),
                ));
            }
        }
        if let Some(value) = lookup("RECONCILE_DEBOUNCE_SECONDS") {
            config.debounce = Duration::from_secs(parse_number("RECONCILE_DEBOUNCE_SECONDS", &value)?);
        }
        if let Some(value) = lookup("SECURITY_GROUP_ROLES") {
            let roles = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::parse::<SecurityGroupRole>)
                .collect::<Result<Vec<_>, _>>()?;
            if roles.is_empty() {
                return Err(ControllerError::InvalidConfig(
                    "SECURITY_GROUP_ROLES must name at least one role".to_string(),
                ));
            }
            check_source_roles(&roles)?;
            config.security_group_roles = roles;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ControllerConfig::default());
        assert_eq!(config.delete_requeue_after, Duration::from_secs(20));
        assert_eq!(
            config.security_group_roles,
            vec![SecurityGroupRole::Bastion, SecurityGroupRole::EKSNodeAdditional]
        );
    }

    #[test]
    fn test_overrides() {
        let config = ControllerConfig::from_lookup(lookup(&[
            ("WATCH_NAMESPACE", "capa-system"),
            ("MACHINE_POOL_ENABLED", "true"),
            ("DELETE_REQUEUE_SECONDS", "5"),
            ("RECONCILE_CONCURRENCY", "8"),
            ("SECURITY_GROUP_ROLES", "bastion, controlplane,node,apiserver-lb"),
        ]))
        .unwrap();

        assert_eq!(config.watch_namespace.as_deref(), Some("capa-system"));
        assert!(config.machine_pool_enabled);
        assert_eq!(config.delete_requeue_after, Duration::from_secs(5));
        assert_eq!(config.concurrency, 8);
        assert_eq!(
            config.security_group_roles,
            vec![
                SecurityGroupRole::Bastion,
                SecurityGroupRole::ControlPlane,
                SecurityGroupRole::Node,
                SecurityGroupRole::APIServerLB
            ]
        );
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            ControllerConfig::from_lookup(lookup(&[("MACHINE_POOL_ENABLED", "maybe")])),
            Err(ControllerError::InvalidConfig(_))
        ));
        assert!(matches!(
            ControllerConfig::from_lookup(lookup(&[("SECURITY_GROUP_ROLES", "bastion,worker")])),
            Err(ControllerError::UnknownRole(_))
        ));
        assert!(matches!(
            ControllerConfig::from_lookup(lookup(&[("RECONCILE_CONCURRENCY", "0")])),
            Err(ControllerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_roles_must_include_rule_sources() {
        for roles in ["controlplane", "node", "controlplane,node", "node,apiserver-lb"] {
            let result = ControllerConfig::from_lookup(lookup(&[("SECURITY_GROUP_ROLES", roles)]));
            assert!(
                matches!(result, Err(ControllerError::InvalidConfig(ref msg)) if msg.contains("SECURITY_GROUP_ROLES")),
                "{} accepted: {:?}",
                roles,
                result
            );
        }

        let config = ControllerConfig::from_lookup(lookup(&[(
            "SECURITY_GROUP_ROLES",
            "apiserver-lb,node,controlplane,lb",
        )]))
        .unwrap();
        assert_eq!(config.security_group_roles.len(), 4);
    }

    #[test]
    fn test_default_roles_are_not_shared() {
        let mut first = ControllerConfig::default();
        first.security_group_roles.push(SecurityGroupRole::Node);

        let second = ControllerConfig::default();
        assert_eq!(second.security_group_roles, DEFAULT_MANAGED_CONTROL_PLANE_ROLES.to_vec());
    }
}
