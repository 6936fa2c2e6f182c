//! Session CRD
//!
//! A Session is a per-workload issuance session. It carries the same
//! issuance configuration as a RoleProfile; pods opt in with the
//! `iamra.dev/session` annotation.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{CredentialDefinition, CredentialSpec, DefinitionKind, DefinitionStatus};

/// Session binds annotated pods to a trust anchor, profile and role.
///
/// Example:
/// ```yaml
/// apiVersion: iamra.dev/v1
/// kind: Session
/// metadata:
///   name: batch-uploader
///   namespace: jobs
/// spec:
///   trustAnchorArn: arn:aws:rolesanywhere:eu-west-1:123456789012:trust-anchor/abc
///   profileArn: arn:aws:rolesanywhere:eu-west-1:123456789012:profile/def
///   roleArn: arn:aws:iam::123456789012:role/uploader
///   roleSessionName: batch-uploader
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "iamra.dev",
    version = "v1",
    kind = "Session",
    namespaced,
    status = "DefinitionStatus",
    printcolumn = r#"{"name":"Role","type":"string","jsonPath":".spec.roleArn"}"#,
    printcolumn = r#"{"name":"SessionName","type":"string","jsonPath":".spec.roleSessionName"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SessionSpec {
    /// Issuance configuration
    #[serde(flatten)]
    pub credentials: CredentialSpec,
}

impl CredentialDefinition for Session {
    const KIND: DefinitionKind = DefinitionKind::Session;

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
