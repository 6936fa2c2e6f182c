//! Common types for the IAM Roles Anywhere credential operator: CRDs, ARN
//! validation, errors and utilities shared by the controllers and webhooks.

#![deny(missing_docs)]

pub mod arn;
pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod telemetry;
pub mod validation;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group for all operator CRDs
pub const API_GROUP: &str = "iamra.dev";

/// Namespace the operator and its webhook Service run in
pub const IAMRA_SYSTEM_NAMESPACE: &str = "iamra-system";

/// Pod annotation referencing a RoleProfile by name
pub const ROLE_PROFILE_ANNOTATION: &str = "iamra.dev/role-profile";

/// Pod annotation referencing a Session by name
pub const SESSION_ANNOTATION: &str = "iamra.dev/session";

/// Pod annotation naming the Secret that holds the client certificate and key
pub const CERT_SECRET_ANNOTATION: &str = "iamra.dev/cert-secret";

/// Name of the credential sidecar container injected into workloads
pub const SIDECAR_CONTAINER_NAME: &str = "iamra-credentials";

/// Name of the volume carrying the certificate secret
pub const CERT_SECRET_VOLUME_NAME: &str = "iamra-cert-secret";

/// Mount path of the certificate secret inside the sidecar
pub const SIDECAR_CERT_MOUNT_PATH: &str = "/iamra/certs";

/// Environment variable pointing AWS SDKs at the sidecar's metadata endpoint
pub const METADATA_ENDPOINT_ENV: &str = "AWS_EC2_METADATA_SERVICE_ENDPOINT";

/// Local endpoint served by the credential sidecar
pub const METADATA_ENDPOINT: &str = "http://127.0.0.1:9911/";

/// Default session duration when a definition leaves it unset
pub const DEFAULT_DURATION_SECONDS: i32 = 3600;

/// Shortest session duration the issuing service accepts
pub const MIN_DURATION_SECONDS: i32 = 900;

/// Longest session duration the issuing service accepts
pub const MAX_DURATION_SECONDS: i32 = 43200;

/// Default HTTPS port for the admission webhook server
pub const DEFAULT_WEBHOOK_PORT: u16 = 9443;

/// Label key for resources managed by the operator
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Label value for resources managed by the operator
pub const LABEL_MANAGED_BY_IAMRA: &str = "iamra-operator";
