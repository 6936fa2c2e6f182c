//! Shared Kubernetes helpers built on kube-rs

use std::path::Path;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, ResourceExt};

use crate::crd::TargetRef;
use crate::Error;

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Pod phases after which no container will run again
const TERMINAL_POD_PHASES: [&str; 2] = ["Succeeded", "Failed"];

/// Create a kube client from an optional kubeconfig path with default timeouts
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    create_client_with_timeout(kubeconfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT).await
}

/// Create a kube client with custom timeouts
///
/// Without a kubeconfig path the config is inferred (in-cluster service
/// account first, then `$KUBECONFIG`).
pub async fn create_client_with_timeout(
    kubeconfig: Option<&Path>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .map_err(|e| client_err("failed to read kubeconfig", &e))?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| client_err("failed to load kubeconfig", &e))?
        }
        None => Config::infer()
            .await
            .map_err(|e| client_err("failed to infer config", &e))?,
    };
    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    Client::try_from(config).map_err(|e| client_err("failed to create client", &e))
}

fn client_err(what: &str, e: &dyn std::fmt::Display) -> Error {
    Error::internal_with_context("create_client", format!("{what}: {e}"))
}

/// The (namespace, name) of a pod, if both are set
pub fn pod_target(pod: &Pod) -> Option<TargetRef> {
    let namespace = pod.metadata.namespace.as_deref()?;
    let name = pod.metadata.name.as_deref()?;
    Some(TargetRef::new(namespace, name))
}

/// Whether a pod has reached a phase from which it never runs again
pub fn is_pod_terminal(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .is_some_and(|phase| TERMINAL_POD_PHASES.contains(&phase))
}

/// Whether a pod is being deleted
pub fn is_pod_deleting(pod: &Pod) -> bool {
    pod.metadata.deletion_timestamp.is_some()
}

/// Value of an annotation, ignoring empty strings
pub fn annotation<'a, K: ResourceExt>(obj: &'a K, key: &str) -> Option<&'a str> {
    obj.annotations()
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}

/// Merge-patch the status sub-resource of a namespaced resource
///
/// `body` is sent as-is, so callers control optimistic concurrency by
/// including `metadata.resourceVersion` and control key removal by writing
/// explicit nulls.
pub async fn patch_resource_status<T>(
    client: &Client,
    namespace: &str,
    name: &str,
    body: &serde_json::Value,
    field_manager: &str,
) -> Result<(), kube::Error>
where
    T: kube::Resource<Scope = NamespaceResourceScope>
        + Clone
        + serde::de::DeserializeOwned
        + std::fmt::Debug,
    <T as kube::Resource>::DynamicType: Default,
{
    let api: Api<T> = Api::namespaced(client.clone(), namespace);
    let params = PatchParams {
        field_manager: Some(field_manager.to_string()),
        ..Default::default()
    };
    api.patch_status(name, &params, &Patch::Merge(body)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PodStatus;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn pod(phase: Option<&str>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("web-0".to_string()),
                namespace: Some("prod".to_string()),
                annotations: Some(BTreeMap::from([
                    ("iamra.dev/role-profile".to_string(), "app".to_string()),
                    ("iamra.dev/session".to_string(), String::new()),
                ])),
                ..Default::default()
            },
            status: phase.map(|p| PodStatus {
                phase: Some(p.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn terminal_phases() {
        assert!(is_pod_terminal(&pod(Some("Succeeded"))));
        assert!(is_pod_terminal(&pod(Some("Failed"))));
        assert!(!is_pod_terminal(&pod(Some("Running"))));
        assert!(!is_pod_terminal(&pod(Some("Pending"))));
        assert!(!is_pod_terminal(&pod(None)));
    }

    #[test]
    fn pod_target_requires_namespace_and_name() {
        assert_eq!(pod_target(&pod(None)), Some(TargetRef::new("prod", "web-0")));

        let mut unnamed = pod(None);
        unnamed.metadata.name = None;
        assert_eq!(pod_target(&unnamed), None);
    }

    #[test]
    fn empty_annotations_are_absent() {
        let p = pod(None);
        assert_eq!(annotation(&p, "iamra.dev/role-profile"), Some("app"));
        assert_eq!(annotation(&p, "iamra.dev/session"), None);
        assert_eq!(annotation(&p, "iamra.dev/cert-secret"), None);
    }
}
