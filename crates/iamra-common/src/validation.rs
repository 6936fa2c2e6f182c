//! Defaulting and validation of credential definitions
//!
//! Shared by the admission webhooks (per-kind Defaulter/Validator pairs) and
//! the controller, which refuses to act on a definition that fails here.

use std::fmt;

use crate::arn;
use crate::crd::CredentialSpec;
use crate::{DEFAULT_DURATION_SECONDS, MAX_DURATION_SECONDS, MIN_DURATION_SECONDS};

const TRUST_ANCHOR_FIELD: &str = "spec.trustAnchorArn";
const PROFILE_FIELD: &str = "spec.profileArn";
const ROLE_FIELD: &str = "spec.roleArn";
const DURATION_FIELD: &str = "spec.durationSeconds";
const SESSION_NAME_FIELD: &str = "spec.roleSessionName";

const MIN_SESSION_NAME_LEN: usize = 2;
const MAX_SESSION_NAME_LEN: usize = 64;

/// A structured validation failure naming the offending field(s)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldError {
    /// Field paths involved, e.g. `spec.roleArn`
    pub fields: Vec<String>,
    /// The rejected value, when a single value is at fault
    pub value: Option<String>,
    /// What is wrong
    pub message: String,
}

impl FieldError {
    /// A single field holding an invalid value
    pub fn invalid(field: &str, value: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            fields: vec![field.to_string()],
            value: Some(value.into()),
            message: message.into(),
        }
    }

    /// An inconsistency between several fields
    pub fn inconsistent(fields: &[&str], message: impl Into<String>) -> Self {
        Self {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            value: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = self.fields.join(", ");
        match &self.value {
            Some(value) => write!(f, "{fields}: Invalid value {value:?}: {}", self.message),
            None => write!(f, "{fields}: {}", self.message),
        }
    }
}

/// Fill in defaults: unset/zero duration becomes 3600, other values are
/// clamped into the range the issuing service accepts.
///
/// Returns true when the spec changed.
pub fn apply_defaults(spec: &mut CredentialSpec) -> bool {
    let effective = match spec.requested_duration_seconds() {
        Some(d) => d.clamp(MIN_DURATION_SECONDS, MAX_DURATION_SECONDS),
        None => DEFAULT_DURATION_SECONDS,
    };
    if spec.duration_seconds == Some(effective) {
        return false;
    }
    spec.duration_seconds = Some(effective);
    true
}

/// Validate a credential spec, collecting every field error
pub fn validate_credential_spec(spec: &CredentialSpec) -> Result<(), Vec<FieldError>> {
    let mut errors = Vec::new();

    let trust_anchor_region = check_arn(TRUST_ANCHOR_FIELD, &spec.trust_anchor_arn, &mut errors);
    let profile_region = check_arn(PROFILE_FIELD, &spec.profile_arn, &mut errors);
    check_arn(ROLE_FIELD, &spec.role_arn, &mut errors);

    if let (Some(ta), Some(profile)) = (trust_anchor_region, profile_region) {
        if !ta.is_empty() && !profile.is_empty() && ta != profile {
            errors.push(FieldError::inconsistent(
                &[TRUST_ANCHOR_FIELD, PROFILE_FIELD],
                format!("trust anchor region {ta:?} and profile region {profile:?} must match"),
            ));
        }
    }

    if let Some(duration) = spec.requested_duration_seconds() {
        if !(MIN_DURATION_SECONDS..=MAX_DURATION_SECONDS).contains(&duration) {
            errors.push(FieldError::invalid(
                DURATION_FIELD,
                duration.to_string(),
                format!("must be between {MIN_DURATION_SECONDS} and {MAX_DURATION_SECONDS}"),
            ));
        }
    }

    if let Some(name) = &spec.role_session_name {
        let len = name.chars().count();
        if !(MIN_SESSION_NAME_LEN..=MAX_SESSION_NAME_LEN).contains(&len) {
            errors.push(FieldError::invalid(
                SESSION_NAME_FIELD,
                name.clone(),
                format!(
                    "must be between {MIN_SESSION_NAME_LEN} and {MAX_SESSION_NAME_LEN} characters"
                ),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate one ARN field, returning its region on success
fn check_arn(field: &str, value: &str, errors: &mut Vec<FieldError>) -> Option<String> {
    match arn::validate(value) {
        Ok(region) => Some(region),
        Err(e) => {
            errors.push(FieldError::invalid(
                field,
                value,
                format!("must be a valid ARN: {e}"),
            ));
            None
        }
    }
}
