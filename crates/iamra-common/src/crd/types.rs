//! Types shared by the RoleProfile and Session CRDs

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{DEFAULT_DURATION_SECONDS, ROLE_PROFILE_ANNOTATION, SESSION_ANNOTATION};

/// Issuance configuration shared by every definition kind
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialSpec {
    /// ARN of the Roles Anywhere trust anchor
    pub trust_anchor_arn: String,

    /// ARN of the Roles Anywhere profile
    pub profile_arn: String,

    /// ARN of the IAM role to assume
    pub role_arn: String,

    /// Session duration in seconds (900..=43200, default 3600)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 900, max = 43200))]
    pub duration_seconds: Option<i32>,

    /// Role session name override (defaults to `<namespace>@<pod>`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(length(min = 2, max = 64))]
    pub role_session_name: Option<String>,
}

impl CredentialSpec {
    /// Duration that will actually be requested from the issuing service
    ///
    /// Unset or zero means the default. Bounds are enforced by defaulting and
    /// validation, never here.
    pub fn effective_duration_seconds(&self) -> i32 {
        match self.duration_seconds {
            None | Some(0) => DEFAULT_DURATION_SECONDS,
            Some(d) => d,
        }
    }

    /// Explicitly requested duration, treating zero as unset
    pub fn requested_duration_seconds(&self) -> Option<i32> {
        self.duration_seconds.filter(|d| *d != 0)
    }

    /// Session name override, ignoring empty strings
    pub fn session_name_override(&self) -> Option<&str> {
        self.role_session_name.as_deref().filter(|s| !s.is_empty())
    }
}

/// Observed state of a definition
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionStatus {
    /// Last confirmed credential expiration per target (`namespace/name` -> RFC3339)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub expirations: BTreeMap<String, String>,

    /// Every non-terminal target referencing the definition on the last pass
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub active_pods: Vec<String>,

    /// Targets that reference this definition but have terminated
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub terminal_pods: Vec<String>,

    /// When the last pass was persisted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled: Option<String>,

    /// Failure summary of the last pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The statically known definition kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DefinitionKind {
    /// `RoleProfile`
    RoleProfile,
    /// `Session`
    Session,
}

impl DefinitionKind {
    /// CRD kind name
    pub fn kind(&self) -> &'static str {
        match self {
            DefinitionKind::RoleProfile => "RoleProfile",
            DefinitionKind::Session => "Session",
        }
    }

    /// Pod annotation whose value names a definition of this kind
    pub fn reference_annotation(&self) -> &'static str {
        match self {
            DefinitionKind::RoleProfile => ROLE_PROFILE_ANNOTATION,
            DefinitionKind::Session => SESSION_ANNOTATION,
        }
    }
}

impl fmt::Display for DefinitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// A definition resource that drives credential issuance
///
/// Implemented by each CRD kind so that controllers and admission handlers
/// get a typed entry point per kind instead of inspecting objects at runtime.
pub trait CredentialDefinition:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + DeserializeOwned
    + Serialize
    + fmt::Debug
    + Send
    + Sync
    + 'static
{
    /// Which kind this is
    const KIND: DefinitionKind;

    /// The issuance configuration
    fn credential_spec(&self) -> &CredentialSpec;

    /// Mutable access to the issuance configuration (for defaulting)
    fn credential_spec_mut(&mut self) -> &mut CredentialSpec;

    /// Observed state, if any has been written
    fn definition_status(&self) -> Option<&DefinitionStatus>;
}

/// A (namespace, name) pair identifying one managed workload
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TargetRef {
    /// Namespace of the workload
    pub namespace: String,
    /// Name of the workload
    pub name: String,
}

impl TargetRef {
    /// Create a target reference
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Session name used when a definition doesn't override it
    pub fn default_session_name(&self) -> String {
        format!("{}@{}", self.namespace, self.name)
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for TargetRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::new(ns, name))
            }
            _ => Err(format!("expected namespace/name, got {s:?}")),
        }
    }
}
