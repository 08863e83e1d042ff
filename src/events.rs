//! Kubernetes Event recording for tenant lifecycle transitions
//!
//! Events show up in `kubectl describe tenant` next to the status. Publishing
//! is fire-and-forget: a failed event is logged and never fails a reconcile.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Publishes Kubernetes Events about a resource
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an Event on `resource_ref`; failures are logged, not returned
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Publisher backed by `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as `controller_name`
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "failed to publish event");
        }
    }
}

/// Publisher that drops every event
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Event reasons, shown in the REASON column
pub mod reasons {
    /// Issuance sequence started
    pub const CREATING: &str = "Creating";
    /// Intermediate CA and client certificate issued
    pub const CREATED: &str = "Created";
    /// Removing the tenant from the chain
    pub const REVOKING: &str = "Revoking";
    /// Tenant removed from the chain
    pub const REVOKED: &str = "Revoked";
    /// Restoring the tenant to the chain
    pub const UNREVOKING: &str = "Unrevoking";
    /// Tenant restored to the chain
    pub const UNREVOKED: &str = "Unrevoked";
    /// Tenant entered the Failed state
    pub const FAILED: &str = "Failed";
    /// Cleanup of derived objects started
    pub const DELETING: &str = "Deleting";
    /// Failed tenant recovered
    pub const RECONCILED: &str = "Reconciled";
    /// Spec rejected before any object was created
    pub const VALIDATION_FAILED: &str = "ValidationFailed";
}

/// Event actions, shown in the ACTION column
pub mod actions {
    /// Certificate issuance
    pub const ISSUE: &str = "Issue";
    /// Chain rebuild after a revocation change
    pub const UPDATE_CHAIN: &str = "UpdateChain";
    /// Cleanup on deletion
    pub const DELETE: &str = "Delete";
    /// Periodic reconcile
    pub const RECONCILE: &str = "Reconcile";
}
