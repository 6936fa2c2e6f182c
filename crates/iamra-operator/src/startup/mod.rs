//! Startup utilities run before the controllers and webhook server

pub mod crds;
pub mod webhooks;

pub use crds::{crd_manifests, ensure_crds_installed};
pub use webhooks::ensure_webhook_config;

/// Field manager for server-side apply of operator-owned objects
pub const FIELD_MANAGER: &str = "iamra-operator";
