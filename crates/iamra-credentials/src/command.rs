//! Command lines understood by the credential sidecar

use iamra_common::crd::{CredentialSpec, TargetRef};

/// Binary that issues fresh credentials and prints their expiration
pub const REFRESH_BINARY: &str = "update-credentials";

/// Binary that runs as the long-lived sidecar serving credentials
pub const SERVE_BINARY: &str = "serve-credentials";

/// `update-credentials -t .. -p .. -r .. -d .. -n ..` for one target
///
/// The session name is the spec's override, or `<namespace>@<name>`.
pub fn refresh_command(spec: &CredentialSpec, target: &TargetRef) -> Vec<String> {
    let mut command = issuance_args(REFRESH_BINARY, spec);
    let session_name = spec
        .session_name_override()
        .map(str::to_string)
        .unwrap_or_else(|| target.default_session_name());
    command.extend(["-n".to_string(), session_name]);
    command
}

/// Sidecar command; the session name is only passed when overridden
pub fn serve_command(spec: &CredentialSpec) -> Vec<String> {
    let mut command = issuance_args(SERVE_BINARY, spec);
    if let Some(name) = spec.session_name_override() {
        command.extend(["-n".to_string(), name.to_string()]);
    }
    command
}

fn issuance_args(binary: &str, spec: &CredentialSpec) -> Vec<String> {
    vec![
        binary.to_string(),
        "-t".to_string(),
        spec.trust_anchor_arn.clone(),
        "-p".to_string(),
        spec.profile_arn.clone(),
        "-r".to_string(),
        spec.role_arn.clone(),
        "-d".to_string(),
        spec.effective_duration_seconds().to_string(),
    ]
}
