//! RoleProfile CRD
//!
//! A RoleProfile names a reusable IAM Roles Anywhere issuance configuration.
//! Pods opt in with the `iamra.dev/role-profile` annotation.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{CredentialDefinition, CredentialSpec, DefinitionKind, DefinitionStatus};

/// RoleProfile binds pods to a trust anchor, profile and role.
///
/// Example:
/// ```yaml
/// apiVersion: iamra.dev/v1
/// kind: RoleProfile
/// metadata:
///   name: s3-reader
///   namespace: default
/// spec:
///   trustAnchorArn: arn:aws:rolesanywhere:us-east-1:123456789012:trust-anchor/abc
///   profileArn: arn:aws:rolesanywhere:us-east-1:123456789012:profile/def
///   roleArn: arn:aws:iam::123456789012:role/s3-reader
///   durationSeconds: 3600
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "iamra.dev",
    version = "v1",
    kind = "RoleProfile",
    namespaced,
    status = "DefinitionStatus",
    printcolumn = r#"{"name":"Role","type":"string","jsonPath":".spec.roleArn"}"#,
    printcolumn = r#"{"name":"Duration","type":"integer","jsonPath":".spec.durationSeconds"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RoleProfileSpec {
    /// Issuance configuration
    #[serde(flatten)]
    pub credentials: CredentialSpec,
}

impl CredentialDefinition for RoleProfile {
    const KIND: DefinitionKind = DefinitionKind::RoleProfile;

    fn credential_spec(&self) -> &CredentialSpec {
        &self.spec.credentials
    }

    fn credential_spec_mut(&mut self) -> &mut CredentialSpec {
        &mut self.spec.credentials
    }

    fn definition_status(&self) -> Option<&DefinitionStatus> {
        self.status.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn role_profile_yaml() {
        let yaml = r#"
apiVersion: iamra.dev/v1
kind: RoleProfile
metadata:
  name: s3-reader
  namespace: default
spec:
  trustAnchorArn: arn:aws:rolesanywhere:us-east-1:123:trust-anchor/foo
  profileArn: arn:aws:rolesanywhere:us-east-1:123:profile/bar
  roleArn: arn:aws:iam::123:role/baz
  durationSeconds: 1800
"#;
        let profile: RoleProfile = serde_yaml::from_str(yaml).expect("parse");
        let spec = profile.credential_spec();
        assert_eq!(spec.role_arn, "arn:aws:iam::123:role/baz");
        assert_eq!(spec.duration_seconds, Some(1800));
        assert_eq!(spec.role_session_name, None);
        assert!(profile.definition_status().is_none());
    }

    #[test]
    fn status_expirations_parse() {
        let yaml = r#"
apiVersion: iamra.dev/v1
kind: RoleProfile
metadata:
  name: p
  namespace: default
spec:
  trustAnchorArn: a
  profileArn: b
  roleArn: c
status:
  expirations:
    default/web-0: "2025-01-01T00:00:00Z"
  activePods: ["default/web-0"]
"#;
        let profile: RoleProfile = serde_yaml::from_str(yaml).expect("parse");
        let status = profile.definition_status().expect("status");
        assert_eq!(
            status.expirations.get("default/web-0").map(String::as_str),
            Some("2025-01-01T00:00:00Z")
        );
        assert_eq!(status.active_pods, vec!["default/web-0".to_string()]);
    }

    #[test]
    fn crd_is_namespaced_with_status() {
        let crd = RoleProfile::crd();
        assert_eq!(crd.spec.scope, "Namespaced");
        assert_eq!(crd.spec.names.kind, "RoleProfile");
        assert_eq!(crd.spec.names.plural, "roleprofiles");
        let version = &crd.spec.versions[0];
        assert!(version.subresources.as_ref().and_then(|s| s.status.as_ref()).is_some());
    }
}
