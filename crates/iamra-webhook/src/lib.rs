//! Admission webhooks for the credential operator
//!
//! - `POST /mutate/pods` injects the credential sidecar into annotated pods
//! - `POST /mutate/{roleprofiles,sessions}` fills in definition defaults
//! - `POST /validate/{roleprofiles,sessions}` rejects malformed definitions

#![deny(missing_docs)]

pub mod definition;
pub mod pod;
pub mod resolver;
pub mod server;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use iamra_common::crd::{RoleProfile, Session};

pub use pod::SidecarConfig;
pub use resolver::{DefinitionResolver, KubeDefinitionResolver};
pub use server::{run_server, ServerConfig};

/// Shared state for webhook handlers
#[derive(Clone)]
pub struct WebhookState {
    /// Looks up the definitions pods reference
    pub resolver: Arc<dyn DefinitionResolver>,
    /// How the injected sidecar is built
    pub sidecar: SidecarConfig,
}

impl WebhookState {
    /// Create webhook state from a resolver and sidecar settings
    pub fn new(resolver: Arc<dyn DefinitionResolver>, sidecar: SidecarConfig) -> Self {
        Self { resolver, sidecar }
    }
}

/// Create the webhook router with every admission endpoint
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/mutate/pods", post(pod::mutate_handler))
        .route(
            "/mutate/roleprofiles",
            post(definition::default_handler::<RoleProfile>),
        )
        .route(
            "/validate/roleprofiles",
            post(definition::validate_handler::<RoleProfile>),
        )
        .route("/mutate/sessions", post(definition::default_handler::<Session>))
        .route(
            "/validate/sessions",
            post(definition::validate_handler::<Session>),
        )
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}
