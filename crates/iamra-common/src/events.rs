//! Kubernetes Events emitted against credential definitions
//!
//! Publishing is fire-and-forget: a failed event is logged and dropped so
//! that it can never fail a reconcile pass.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Publishes Kubernetes Events on a resource
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish one event; never fails
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
    /// `controller_name` becomes the event's reporting component
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
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

/// Publisher that drops everything
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

/// Event reasons (REASON column of `kubectl get events`)
pub mod reasons {
    /// The definition has no live targets
    pub const INACTIVE: &str = "Inactive";
    /// Credentials were issued for one or more targets
    pub const CREDENTIALS_REFRESHED: &str = "CredentialsRefreshed";
    /// Issuing credentials failed for one or more targets
    pub const REFRESH_FAILED: &str = "RefreshFailed";
    /// The definition failed validation and was not acted on
    pub const VALIDATION_FAILED: &str = "ValidationFailed";
}

/// Event actions (ACTION column of `kubectl get events`)
pub mod actions {
    /// A reconcile pass
    pub const RECONCILE: &str = "Reconcile";
    /// A credential refresh in a target
    pub const REFRESH: &str = "Refresh";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_are_pascal_case() {
        for reason in [
            reasons::INACTIVE,
            reasons::CREDENTIALS_REFRESHED,
            reasons::REFRESH_FAILED,
            reasons::VALIDATION_FAILED,
        ] {
            assert!(reason.chars().next().is_some_and(|c| c.is_ascii_uppercase()));
            assert!(!reason.contains(' '));
        }
    }

    #[tokio::test]
    async fn noop_publisher_accepts_events() {
        NoopEventPublisher
            .publish(
                &ObjectReference::default(),
                EventType::Warning,
                reasons::REFRESH_FAILED,
                actions::REFRESH,
                Some("exec failed".to_string()),
            )
            .await;
    }
}
