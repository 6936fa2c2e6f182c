//! Defaulting and validation webhooks for credential definitions
//!
//! Each definition kind is served through its own typed route, with its own
//! [`Defaulter`] and [`Validator`] implementation.

use axum::Json;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use kube::ResourceExt;
use tracing::{debug, error, info};

use iamra_common::crd::{CredentialDefinition, RoleProfile, Session};
use iamra_common::validation::{apply_defaults, validate_credential_spec, FieldError};

/// Fills in defaults on admission
pub trait Defaulter: CredentialDefinition {
    /// Apply defaults in place, returning whether anything changed
    fn apply_defaults(&mut self) -> bool {
        apply_defaults(self.credential_spec_mut())
    }
}

/// Checks a definition before it is stored
pub trait Validator: CredentialDefinition {
    /// Collect every field error
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        validate_credential_spec(self.credential_spec())
    }
}

impl Defaulter for RoleProfile {}
impl Validator for RoleProfile {}

impl Defaulter for Session {}
impl Validator for Session {}

fn parse_request<K: CredentialDefinition>(
    body: AdmissionReview<K>,
) -> Result<AdmissionRequest<K>, AdmissionResponse> {
    body.try_into().map_err(|e: kube::core::admission::ConvertAdmissionReviewError| {
        error!(error = %e, "failed to parse admission request");
        AdmissionResponse::invalid(e.to_string())
    })
}

/// Handle mutating admission review for a definition kind
pub async fn default_handler<K: Defaulter>(
    Json(body): Json<AdmissionReview<K>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let response = match parse_request(body) {
        Ok(req) => default_definition(&req),
        Err(response) => response,
    };
    Json(response.into_review())
}

/// Handle validating admission review for a definition kind
pub async fn validate_handler<K: Validator>(
    Json(body): Json<AdmissionReview<K>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let response = match parse_request(body) {
        Ok(req) => validate_definition(&req),
        Err(response) => response,
    };
    Json(response.into_review())
}

fn default_definition<K: Defaulter>(request: &AdmissionRequest<K>) -> AdmissionResponse {
    let allow = AdmissionResponse::from(request);
    let Some(original) = &request.object else {
        return allow;
    };

    let mut defaulted = original.clone();
    if !defaulted.apply_defaults() {
        return allow;
    }

    let patch = match (serde_json::to_value(original), serde_json::to_value(&defaulted)) {
        (Ok(before), Ok(after)) => json_patch::diff(&before, &after),
        (Err(e), _) | (_, Err(e)) => {
            error!(kind = %K::KIND, error = %e, "failed to serialize definition");
            return allow.deny(format!("serialization error: {e}"));
        }
    };

    debug!(kind = %K::KIND, definition = %original.name_any(), "applying defaults");
    match allow.clone().with_patch(patch) {
        Ok(response) => response,
        Err(e) => allow.deny(format!("patch serialization error: {e}")),
    }
}

fn validate_definition<K: Validator>(request: &AdmissionRequest<K>) -> AdmissionResponse {
    let allow = AdmissionResponse::from(request);
    if request.operation == Operation::Delete {
        return allow;
    }
    let Some(definition) = &request.object else {
        return allow;
    };

    match definition.validate() {
        Ok(()) => allow,
        Err(errors) => {
            let message = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            info!(
                kind = %K::KIND,
                definition = %definition.name_any(),
                errors = errors.len(),
                "rejecting invalid definition"
            );
            allow.deny(format!("{} {} is invalid: {message}", K::KIND, definition.name_any()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn definition_json(kind: &str, spec: Value) -> Value {
        json!({
            "apiVersion": "iamra.dev/v1",
            "kind": kind,
            "metadata": {"name": "app", "namespace": "prod"},
            "spec": spec,
        })
    }

    fn valid_spec() -> Value {
        json!({
            "trustAnchorArn": "arn:aws:rolesanywhere:us-east-1:123:trust-anchor/ta",
            "profileArn": "arn:aws:rolesanywhere:us-east-1:123:profile/p",
            "roleArn": "arn:aws:iam::123:role/r",
        })
    }

    fn request<K: CredentialDefinition>(
        kind: &str,
        resource: &str,
        operation: &str,
        object: Option<Value>,
    ) -> AdmissionRequest<K> {
        let mut request = json!({
            "uid": "e911857d-c318-11e8-bbad-025000000001",
            "kind": {"group": "iamra.dev", "version": "v1", "kind": kind},
            "resource": {"group": "iamra.dev", "version": "v1", "resource": resource},
            "name": "app",
            "namespace": "prod",
            "operation": operation,
            "userInfo": {"username": "admin"},
            "dryRun": false
        });
        if let Some(object) = object {
            request["object"] = object;
        }
        let review: AdmissionReview<K> = serde_json::from_value(json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": request,
        }))
        .expect("admission review should deserialize");
        review.try_into().expect("review should carry a request")
    }

    fn has_patch(response: &AdmissionResponse) -> bool {
        let review = serde_json::to_value(response.clone().into_review()).unwrap();
        review["response"].get("patch").is_some()
    }

    // =========================================================================
    // Defaulting
    // =========================================================================

    #[test]
    fn missing_duration_is_defaulted() {
        let req = request::<RoleProfile>(
            "RoleProfile",
            "roleprofiles",
            "CREATE",
            Some(definition_json("RoleProfile", valid_spec())),
        );
        let response = default_definition(&req);
        assert!(response.allowed);
        assert!(has_patch(&response));
    }

    #[test]
    fn already_defaulted_definition_is_not_patched() {
        let mut spec = valid_spec();
        spec["durationSeconds"] = json!(7200);
        let req = request::<Session>(
            "Session",
            "sessions",
            "UPDATE",
            Some(definition_json("Session", spec)),
        );
        let response = default_definition(&req);
        assert!(response.allowed);
        assert!(!has_patch(&response));
    }

    #[test]
    fn defaulter_clamps_per_kind() {
        let mut profile: RoleProfile =
            serde_json::from_value(definition_json("RoleProfile", valid_spec())).unwrap();
        profile.spec.credentials.duration_seconds = Some(0);
        assert!(Defaulter::apply_defaults(&mut profile));
        assert_eq!(profile.spec.credentials.duration_seconds, Some(3600));

        let mut session: Session =
            serde_json::from_value(definition_json("Session", valid_spec())).unwrap();
        session.spec.credentials.duration_seconds = Some(100_000);
        assert!(Defaulter::apply_defaults(&mut session));
        assert_eq!(session.spec.credentials.duration_seconds, Some(43200));
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Story: a profile in another region than its trust anchor is rejected,
    /// naming both fields
    #[test]
    fn story_region_mismatch_rejected() {
        let mut spec = valid_spec();
        spec["profileArn"] = json!("arn:aws:rolesanywhere:us-west-2:123:profile/p");
        let req = request::<RoleProfile>(
            "RoleProfile",
            "roleprofiles",
            "CREATE",
            Some(definition_json("RoleProfile", spec)),
        );

        let response = validate_definition(&req);

        assert!(!response.allowed);
        assert!(response.result.message.contains("spec.trustAnchorArn"));
        assert!(response.result.message.contains("spec.profileArn"));
    }

    #[test]
    fn valid_session_is_allowed() {
        let req = request::<Session>(
            "Session",
            "sessions",
            "CREATE",
            Some(definition_json("Session", valid_spec())),
        );
        assert!(validate_definition(&req).allowed);
    }

    #[test]
    fn malformed_role_rejected_citing_only_role() {
        let mut spec = valid_spec();
        spec["roleArn"] = json!("baz");
        let req = request::<Session>(
            "Session",
            "sessions",
            "UPDATE",
            Some(definition_json("Session", spec)),
        );

        let response = validate_definition(&req);

        assert!(!response.allowed);
        assert!(response.result.message.contains("spec.roleArn"));
        assert!(!response.result.message.contains("spec.profileArn"));
    }

    #[test]
    fn delete_is_always_allowed() {
        let req = request::<RoleProfile>("RoleProfile", "roleprofiles", "DELETE", None);
        assert!(validate_definition(&req).allowed);
    }
}
