//! Kubernetes Event recording.
//!
//! Security group mutations are reported as Events on the AWSManagedControlPlane
//! so they show up in `kubectl describe`. Publishing never fails a reconcile:
//! errors are logged and dropped.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::Client;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use tracing::warn;

/// Name reported as the Event's reporting component
pub const CONTROLLER_NAME: &str = "aws-managed-control-plane-controller";

/// Publishes Kubernetes Events about a managed object.
#[async_trait]
pub trait EventRecorder: Send + Sync {
    /// Publish an Event on `object_ref`. Failures are swallowed.
    async fn publish(
        &self,
        object_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        note: String,
    );
}

/// Recorder backed by `kube::runtime::events::Recorder`.
pub struct KubeEventRecorder {
    recorder: Recorder,
}

impl KubeEventRecorder {
    /// Create a recorder reporting as [`CONTROLLER_NAME`]
    pub fn new(client: Client) -> Self {
        let reporter = Reporter {
            controller: CONTROLLER_NAME.to_string(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn publish(
        &self,
        object_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        note: String,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note: Some(note),
            action: actions::RECONCILE.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, object_ref).await {
            warn!("Failed to publish {} event: {}", reason, e);
        }
    }
}

/// Event reasons, shown in the REASON column of `kubectl get events`.
pub mod reasons {
    /// Security group created
    pub const SUCCESSFUL_CREATE_SECURITY_GROUP: &str = "SuccessfulCreateSecurityGroup";
    /// Security group creation failed
    pub const FAILED_CREATE_SECURITY_GROUP: &str = "FailedCreateSecurityGroup";
    /// Ingress rules authorized
    pub const SUCCESSFUL_AUTHORIZE_INGRESS: &str = "SuccessfulAuthorizeSecurityGroupIngressRules";
    /// Ingress rule authorization failed
    pub const FAILED_AUTHORIZE_INGRESS: &str = "FailedAuthorizeSecurityGroupIngressRules";
    /// Ingress rules revoked
    pub const SUCCESSFUL_REVOKE_INGRESS: &str = "SuccessfulRevokeSecurityGroupIngressRules";
    /// Ingress rule revocation failed
    pub const FAILED_REVOKE_INGRESS: &str = "FailedRevokeSecurityGroupIngressRules";
    /// Security group deleted
    pub const SUCCESSFUL_DELETE_SECURITY_GROUP: &str = "SuccessfulDeleteSecurityGroup";
    /// Security group deletion failed
    pub const FAILED_DELETE_SECURITY_GROUP: &str = "FailedDeleteSecurityGroup";
}

/// Event actions, shown in the ACTION column of `kubectl get events`.
pub mod actions {
    /// Standard reconciliation pass
    pub const RECONCILE: &str = "Reconcile";
}
