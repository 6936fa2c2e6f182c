//! Pod Mutation Webhook
//!
//! On pod creation, a pod annotated with a `RoleProfile` or `Session`
//! reference gets the credential sidecar: the certificate secret volume, a
//! metadata endpoint variable in every container, and a restart-always init
//! container serving credentials for the resolved definition.
//!
//! The rewrite itself is [`inject_sidecar`], a pure function of the pod, the
//! resolved spec and the annotations; the handler diffs its result against
//! the submitted pod to build the JSON patch.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use k8s_openapi::api::core::v1::{
    Container, EnvVar, Pod, SecretVolumeSource, Volume, VolumeMount,
};
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use tracing::{debug, error, info, warn};

use iamra_common::crd::{CredentialSpec, DefinitionKind};
use iamra_common::kube_utils::annotation;
use iamra_common::{
    Error, CERT_SECRET_ANNOTATION, CERT_SECRET_VOLUME_NAME, METADATA_ENDPOINT, METADATA_ENDPOINT_ENV,
    SIDECAR_CERT_MOUNT_PATH, SIDECAR_CONTAINER_NAME,
};
use iamra_credentials::command::serve_command;

use crate::WebhookState;

/// How the injected sidecar container is built
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SidecarConfig {
    /// Image providing `serve-credentials` and `update-credentials`
    pub image: String,
    /// Pull policy for the image, cluster default when unset
    pub image_pull_policy: Option<String>,
}

/// Why a pod can't be admitted
#[derive(Debug, PartialEq, Eq)]
enum Denial {
    BothReferences,
    MissingCertSecret,
}

impl std::fmt::Display for Denial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Denial::BothReferences => write!(
                f,
                "pod may reference a RoleProfile or a Session, not both ({} and {} are set)",
                DefinitionKind::RoleProfile.reference_annotation(),
                DefinitionKind::Session.reference_annotation()
            ),
            Denial::MissingCertSecret => write!(
                f,
                "annotation {CERT_SECRET_ANNOTATION} is required when referencing a credential definition"
            ),
        }
    }
}

/// What a pod's annotations ask for
#[derive(Debug, PartialEq, Eq)]
struct CredentialRequest {
    kind: DefinitionKind,
    name: String,
    cert_secret: String,
}

/// Read the reference and cert-secret annotations
///
/// `Ok(None)` means the pod doesn't ask for credentials.
fn credential_request(pod: &Pod) -> Result<Option<CredentialRequest>, Denial> {
    let profile = annotation(pod, DefinitionKind::RoleProfile.reference_annotation());
    let session = annotation(pod, DefinitionKind::Session.reference_annotation());
    let (kind, name) = match (profile, session) {
        (Some(_), Some(_)) => return Err(Denial::BothReferences),
        (Some(name), None) => (DefinitionKind::RoleProfile, name),
        (None, Some(name)) => (DefinitionKind::Session, name),
        (None, None) => return Ok(None),
    };
    let cert_secret = annotation(pod, CERT_SECRET_ANNOTATION).ok_or(Denial::MissingCertSecret)?;
    Ok(Some(CredentialRequest {
        kind,
        name: name.to_string(),
        cert_secret: cert_secret.to_string(),
    }))
}

fn has_sidecar(pod: &Pod) -> bool {
    let Some(spec) = &pod.spec else {
        return false;
    };
    spec.containers
        .iter()
        .chain(spec.init_containers.iter().flatten())
        .any(|c| c.name == SIDECAR_CONTAINER_NAME)
}

/// Rewrite `pod` to carry the credential sidecar for `credentials`
pub fn inject_sidecar(
    pod: &Pod,
    credentials: &CredentialSpec,
    cert_secret: &str,
    sidecar: &SidecarConfig,
) -> Pod {
    let mut pod = pod.clone();
    let spec = pod.spec.get_or_insert_with(Default::default);

    spec.volumes.get_or_insert_with(Vec::new).push(Volume {
        name: CERT_SECRET_VOLUME_NAME.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(cert_secret.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    });

    for container in &mut spec.containers {
        let env = container.env.get_or_insert_with(Vec::new);
        if !env.iter().any(|e| e.name == METADATA_ENDPOINT_ENV) {
            env.push(EnvVar {
                name: METADATA_ENDPOINT_ENV.to_string(),
                value: Some(METADATA_ENDPOINT.to_string()),
                ..Default::default()
            });
        }
    }

    spec.init_containers.get_or_insert_with(Vec::new).push(Container {
        name: SIDECAR_CONTAINER_NAME.to_string(),
        image: Some(sidecar.image.clone()),
        image_pull_policy: sidecar.image_pull_policy.clone(),
        command: Some(serve_command(credentials)),
        restart_policy: Some("Always".to_string()),
        volume_mounts: Some(vec![VolumeMount {
            name: CERT_SECRET_VOLUME_NAME.to_string(),
            mount_path: SIDECAR_CERT_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        }]),
        ..Default::default()
    });

    pod
}

/// JSON patch turning `original` into `mutated`
pub fn diff_patch(original: &Pod, mutated: &Pod) -> Result<json_patch::Patch, Error> {
    let to_value =
        |pod: &Pod| serde_json::to_value(pod).map_err(|e| Error::serialization(e.to_string()));
    Ok(json_patch::diff(&to_value(original)?, &to_value(mutated)?))
}

/// Handle mutating admission review for Pods
pub async fn mutate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<Pod>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<Pod> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    Json(mutate_pod(&state, &req).await.into_review())
}

async fn mutate_pod(state: &WebhookState, request: &AdmissionRequest<Pod>) -> AdmissionResponse {
    let uid = request.uid.clone();
    let allow = AdmissionResponse::from(request);

    if request.operation != Operation::Create {
        return allow;
    }
    let Some(pod) = &request.object else {
        return allow;
    };

    let credential_request = match credential_request(pod) {
        Ok(Some(r)) => r,
        Ok(None) => return allow,
        Err(denial) => {
            warn!(uid = %uid, reason = %denial, "denying pod");
            return allow.deny(denial.to_string());
        }
    };

    if has_sidecar(pod) {
        debug!(uid = %uid, "credential sidecar already present");
        return allow;
    }

    let namespace = pod
        .metadata
        .namespace
        .clone()
        .or_else(|| request.namespace.clone())
        .unwrap_or_else(|| "default".to_string());
    let CredentialRequest {
        kind,
        name,
        cert_secret,
    } = credential_request;

    let credentials = match state.resolver.resolve(kind, &namespace, &name).await {
        Ok(spec) => spec,
        Err(e) if e.is_not_found() => {
            warn!(uid = %uid, %kind, definition = %name, "definition not found, denying pod");
            return allow.deny(format!("{kind} {namespace}/{name} not found"));
        }
        Err(e) => {
            error!(uid = %uid, %kind, definition = %name, error = %e, "definition lookup failed");
            return allow.deny(e.to_string());
        }
    };

    let mutated = inject_sidecar(pod, &credentials, &cert_secret, &state.sidecar);
    let patch = match diff_patch(pod, &mutated) {
        Ok(patch) => patch,
        Err(e) => {
            error!(uid = %uid, error = %e, "failed to serialize pod");
            return allow.deny(e.to_string());
        }
    };

    info!(
        uid = %uid,
        %kind,
        definition = %name,
        namespace = %namespace,
        pod = ?pod.metadata.name.as_ref().or(pod.metadata.generate_name.as_ref()),
        "injecting credential sidecar"
    );

    match allow.clone().with_patch(patch) {
        Ok(response) => response,
        Err(e) => {
            error!(uid = %uid, error = %e, "failed to serialize patch");
            allow.deny(format!("patch serialization error: {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use kube::api::ObjectMeta;
    use kube::core::admission::AdmissionReview;
    use serde_json::json;

    use iamra_common::Error;

    use crate::resolver::MockDefinitionResolver;

    // =========================================================================
    // Fixtures
    // =========================================================================

    fn credentials() -> CredentialSpec {
        CredentialSpec {
            trust_anchor_arn: "arn:aws:rolesanywhere:us-east-1:123:trust-anchor/ta".to_string(),
            profile_arn: "arn:aws:rolesanywhere:us-east-1:123:profile/p".to_string(),
            role_arn: "arn:aws:iam::123:role/r".to_string(),
            duration_seconds: Some(0),
            role_session_name: None,
        }
    }

    fn sidecar() -> SidecarConfig {
        SidecarConfig {
            image: "ghcr.io/iamra/credentials:v1".to_string(),
            image_pull_policy: None,
        }
    }

    fn pod(annotations: &[(&str, &str)]) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("web-0".to_string()),
                namespace: Some("prod".to_string()),
                annotations: Some(
                    annotations
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect::<BTreeMap<_, _>>(),
                ),
                ..Default::default()
            },
            spec: Some(k8s_openapi::api::core::v1::PodSpec {
                containers: vec![
                    Container {
                        name: "app".to_string(),
                        image: Some("app:1".to_string()),
                        ..Default::default()
                    },
                    Container {
                        name: "proxy".to_string(),
                        image: Some("proxy:1".to_string()),
                        env: Some(vec![EnvVar {
                            name: "LOG".to_string(),
                            value: Some("debug".to_string()),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn annotated_pod() -> Pod {
        pod(&[
            ("iamra.dev/role-profile", "app"),
            ("iamra.dev/cert-secret", "app-cert"),
        ])
    }

    fn state(resolver: MockDefinitionResolver) -> WebhookState {
        WebhookState::new(Arc::new(resolver), sidecar())
    }

    fn request(pod: &Pod, operation: &str) -> AdmissionRequest<Pod> {
        let review: AdmissionReview<Pod> = serde_json::from_value(json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
                "kind": {"group": "", "version": "v1", "kind": "Pod"},
                "resource": {"group": "", "version": "v1", "resource": "pods"},
                "requestKind": {"group": "", "version": "v1", "kind": "Pod"},
                "requestResource": {"group": "", "version": "v1", "resource": "pods"},
                "name": "web-0",
                "namespace": "prod",
                "operation": operation,
                "userInfo": {"username": "system:serviceaccount:kube-system:replicaset-controller"},
                "object": pod,
                "dryRun": false
            }
        }))
        .expect("admission review should deserialize");
        review.try_into().expect("review should carry a request")
    }

    fn has_patch(response: &AdmissionResponse) -> bool {
        let review = serde_json::to_value(response.clone().into_review()).unwrap();
        review["response"].get("patch").is_some()
    }

    // =========================================================================
    // Pure Mutation
    // =========================================================================

    #[test]
    fn injects_volume_env_and_sidecar() {
        let mutated = inject_sidecar(&annotated_pod(), &credentials(), "app-cert", &sidecar());
        let spec = mutated.spec.unwrap();

        let volumes = spec.volumes.unwrap();
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].name, "iamra-cert-secret");
        assert_eq!(
            volumes[0].secret.as_ref().unwrap().secret_name.as_deref(),
            Some("app-cert")
        );

        for container in &spec.containers {
            let env = container.env.as_ref().unwrap();
            assert!(env.iter().any(|e| e.name == "AWS_EC2_METADATA_SERVICE_ENDPOINT"
                && e.value.as_deref() == Some("http://127.0.0.1:9911/")));
        }
        assert_eq!(spec.containers[1].env.as_ref().unwrap()[0].name, "LOG");

        let init = spec.init_containers.unwrap();
        assert_eq!(init.len(), 1);
        let sidecar = &init[0];
        assert_eq!(sidecar.name, "iamra-credentials");
        assert_eq!(sidecar.restart_policy.as_deref(), Some("Always"));
        assert_eq!(sidecar.image.as_deref(), Some("ghcr.io/iamra/credentials:v1"));
        let command = sidecar.command.as_ref().unwrap();
        assert_eq!(command[0], "serve-credentials");
        assert!(command.windows(2).any(|w| w[0] == "-d" && w[1] == "3600"));
        let mount = &sidecar.volume_mounts.as_ref().unwrap()[0];
        assert_eq!(mount.mount_path, "/iamra/certs");
        assert_eq!(mount.read_only, Some(true));
    }

    #[test]
    fn existing_metadata_endpoint_is_kept() {
        let mut pod = annotated_pod();
        pod.spec.as_mut().unwrap().containers[0].env = Some(vec![EnvVar {
            name: "AWS_EC2_METADATA_SERVICE_ENDPOINT".to_string(),
            value: Some("http://custom/".to_string()),
            ..Default::default()
        }]);
        let mutated = inject_sidecar(&pod, &credentials(), "app-cert", &sidecar());
        let env = mutated.spec.unwrap().containers[0].env.clone().unwrap();
        assert_eq!(env.len(), 1);
        assert_eq!(env[0].value.as_deref(), Some("http://custom/"));
    }

    #[test]
    fn appends_after_existing_init_containers_and_volumes() {
        let mut pod = annotated_pod();
        let spec = pod.spec.as_mut().unwrap();
        spec.init_containers = Some(vec![Container {
            name: "migrate".to_string(),
            ..Default::default()
        }]);
        spec.volumes = Some(vec![Volume {
            name: "data".to_string(),
            ..Default::default()
        }]);
        let spec = inject_sidecar(&pod, &credentials(), "c", &sidecar()).spec.unwrap();
        let init = spec.init_containers.unwrap();
        assert_eq!(init[0].name, "migrate");
        assert_eq!(init[1].name, "iamra-credentials");
        assert_eq!(spec.volumes.unwrap()[1].name, "iamra-cert-secret");
    }

    #[test]
    fn reads_credential_request() {
        assert_eq!(credential_request(&pod(&[])), Ok(None));
        assert_eq!(
            credential_request(&pod(&[
                ("iamra.dev/session", "nightly"),
                ("iamra.dev/cert-secret", "c"),
            ])),
            Ok(Some(CredentialRequest {
                kind: DefinitionKind::Session,
                name: "nightly".to_string(),
                cert_secret: "c".to_string(),
            }))
        );
        assert_eq!(
            credential_request(&pod(&[("iamra.dev/role-profile", "app")])),
            Err(Denial::MissingCertSecret)
        );
        assert_eq!(
            credential_request(&pod(&[
                ("iamra.dev/role-profile", "app"),
                ("iamra.dev/session", "nightly"),
                ("iamra.dev/cert-secret", "c"),
            ])),
            Err(Denial::BothReferences)
        );
    }

    #[test]
    fn diff_patch_reproduces_mutation() {
        let original = annotated_pod();
        let mutated = inject_sidecar(&original, &credentials(), "app-cert", &sidecar());
        let patch = diff_patch(&original, &mutated).unwrap();

        let mut doc = serde_json::to_value(&original).unwrap();
        json_patch::patch(&mut doc, &patch).unwrap();
        assert_eq!(doc, serde_json::to_value(&mutated).unwrap());
    }

    // =========================================================================
    // Admission Stories
    // =========================================================================

    /// Story: an annotated pod is patched with the sidecar for its profile
    #[tokio::test]
    async fn story_annotated_pod_is_patched() {
        let mut resolver = MockDefinitionResolver::new();
        resolver
            .expect_resolve()
            .withf(|kind, ns, name| {
                *kind == DefinitionKind::RoleProfile && ns == "prod" && name == "app"
            })
            .times(1)
            .returning(|_, _, _| Ok(credentials()));
        let state = state(resolver);

        let response = mutate_pod(&state, &request(&annotated_pod(), "CREATE")).await;

        assert!(response.allowed);
        assert!(has_patch(&response));
    }

    /// Story: a missing cert-secret annotation is denied before any lookup
    #[tokio::test]
    async fn story_missing_cert_secret_denied_without_lookup() {
        let mut resolver = MockDefinitionResolver::new();
        resolver.expect_resolve().never();
        let state = state(resolver);

        let pod = pod(&[("iamra.dev/role-profile", "app")]);
        let response = mutate_pod(&state, &request(&pod, "CREATE")).await;

        assert!(!response.allowed);
        assert!(response.result.message.contains("iamra.dev/cert-secret"));
    }

    /// Story: a reference to a definition that doesn't exist is denied
    #[tokio::test]
    async fn story_unknown_definition_denied() {
        let mut resolver = MockDefinitionResolver::new();
        resolver
            .expect_resolve()
            .returning(|kind, ns, name| Err(Error::not_found(kind.kind(), format!("{ns}/{name}"))));
        let state = state(resolver);

        let response = mutate_pod(&state, &request(&annotated_pod(), "CREATE")).await;

        assert!(!response.allowed);
        assert_eq!(response.result.message, "RoleProfile prod/app not found");
    }

    /// Story: pods without a reference pass through untouched
    #[tokio::test]
    async fn story_unannotated_pod_allowed_unchanged() {
        let mut resolver = MockDefinitionResolver::new();
        resolver.expect_resolve().never();
        let state = state(resolver);

        let response = mutate_pod(&state, &request(&pod(&[]), "CREATE")).await;

        assert!(response.allowed);
        assert!(!has_patch(&response));
    }

    /// Story: updates are never re-mutated
    #[tokio::test]
    async fn story_update_is_not_mutated() {
        let mut resolver = MockDefinitionResolver::new();
        resolver.expect_resolve().never();
        let state = state(resolver);

        let response = mutate_pod(&state, &request(&annotated_pod(), "UPDATE")).await;

        assert!(response.allowed);
        assert!(!has_patch(&response));
    }

    /// Story: a pod that already carries the sidecar isn't injected twice
    #[tokio::test]
    async fn story_existing_sidecar_is_left_alone() {
        let mut resolver = MockDefinitionResolver::new();
        resolver.expect_resolve().never();
        let state = state(resolver);
        let pod = inject_sidecar(&annotated_pod(), &credentials(), "app-cert", &sidecar());

        let response = mutate_pod(&state, &request(&pod, "CREATE")).await;

        assert!(response.allowed);
        assert!(!has_patch(&response));
    }

    #[tokio::test]
    async fn both_references_denied() {
        let mut resolver = MockDefinitionResolver::new();
        resolver.expect_resolve().never();
        let state = state(resolver);
        let pod = pod(&[
            ("iamra.dev/role-profile", "app"),
            ("iamra.dev/session", "nightly"),
            ("iamra.dev/cert-secret", "c"),
        ]);

        let response = mutate_pod(&state, &request(&pod, "CREATE")).await;
        assert!(!response.allowed);
    }
}
