//! Controller runner - builds controller futures for each definition kind
//!
//! Definitions only trigger a pass when their generation changes, so the
//! controllers' own status writes don't feed back into them. Each controller
//! also watches Pods, so a pod that starts or stops referencing a definition
//! triggers that definition's pass without waiting for the scheduled requeue.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{predicates, reflector, watcher, Controller, WatchStreamExt};
use kube::{Api, Client};

use iamra_common::crd::{CredentialDefinition, RoleProfile, Session};
use iamra_common::kube_utils::annotation;
use iamra_credentials::{error_policy, reconcile, Context};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
const WATCH_TIMEOUT_SECS: u32 = 25;

/// A boxed controller future
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Build the RoleProfile and Session controller futures
pub fn build_definition_controllers(client: Client, exec_timeout: Duration) -> Vec<ControllerFuture> {
    let ctx = Arc::new(
        Context::builder(client.clone())
            .exec_timeout(exec_timeout)
            .build(),
    );

    tracing::info!("- RoleProfile controller");
    tracing::info!("- Session controller");

    vec![
        build_controller::<RoleProfile>(client.clone(), ctx.clone()),
        build_controller::<Session>(client, ctx),
    ]
}

fn build_controller<K: CredentialDefinition>(client: Client, ctx: Arc<Context>) -> ControllerFuture {
    let definitions: Api<K> = Api::all(client.clone());
    let pods: Api<Pod> = Api::all(client);

    let (reader, writer) = reflector::store();
    let changed_definitions = watcher(
        definitions,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    )
    .default_backoff()
    .reflect(writer)
    .applied_objects()
    .predicate_filter(predicates::generation);

    Box::pin(
        Controller::for_stream(changed_definitions, reader)
            .watches(
                pods,
                WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
                |pod| referenced_definition::<K>(&pod),
            )
            .shutdown_on_signal()
            .run(reconcile::<K>, error_policy::<K>, ctx)
            .for_each(log_reconcile_result(K::KIND.kind())),
    )
}

/// The definition of kind `K` a pod references, if any
fn referenced_definition<K: CredentialDefinition>(pod: &Pod) -> Option<ObjectRef<K>> {
    let namespace = pod.metadata.namespace.as_deref()?;
    let name = annotation(pod, K::KIND.reference_annotation())?;
    Some(ObjectRef::new(name).within(namespace))
}

/// Creates a closure for logging reconciliation results.
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::warn!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use kube::api::ObjectMeta;

    fn pod(namespace: Option<&str>, annotations: &[(&str, &str)]) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("web-0".to_string()),
                namespace: namespace.map(str::to_string),
                annotations: Some(
                    annotations
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect::<BTreeMap<_, _>>(),
                ),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn pod_maps_to_its_role_profile() {
        let pod = pod(Some("prod"), &[("iamra.dev/role-profile", "s3-reader")]);

        let reference = referenced_definition::<RoleProfile>(&pod).unwrap();
        assert_eq!(reference.name, "s3-reader");
        assert_eq!(reference.namespace.as_deref(), Some("prod"));

        assert!(referenced_definition::<Session>(&pod).is_none());
    }

    #[test]
    fn pod_maps_to_its_session() {
        let pod = pod(Some("jobs"), &[("iamra.dev/session", "batch")]);
        let reference = referenced_definition::<Session>(&pod).unwrap();
        assert_eq!(reference.name, "batch");
    }

    #[test]
    fn unannotated_or_unscoped_pods_map_to_nothing() {
        assert!(referenced_definition::<RoleProfile>(&pod(Some("prod"), &[])).is_none());
        assert!(referenced_definition::<RoleProfile>(&pod(
            None,
            &[("iamra.dev/role-profile", "s3-reader")]
        ))
        .is_none());
        assert!(referenced_definition::<RoleProfile>(&pod(
            Some("prod"),
            &[("iamra.dev/role-profile", "")]
        ))
        .is_none());
    }
}
