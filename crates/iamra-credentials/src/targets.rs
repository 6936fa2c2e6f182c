//! Target enumeration
//!
//! Annotations can't be selected server-side, so pods are listed per
//! namespace and matched here by exact annotation value.

use std::collections::BTreeSet;

use k8s_openapi::api::core::v1::Pod;

use iamra_common::crd::{DefinitionKind, TargetRef};
use iamra_common::kube_utils::{annotation, is_pod_deleting, is_pod_terminal, pod_target};

/// Pods referencing one definition, split by lifecycle
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Targets {
    /// Running or pending pods that should hold fresh credentials
    pub active: BTreeSet<TargetRef>,
    /// Pods that reached `Succeeded` or `Failed`, or are being deleted;
    /// reported, never acted on
    pub terminal: BTreeSet<TargetRef>,
}

/// Select the pods whose `kind` reference annotation equals `name`
pub fn select_targets(pods: &[Pod], kind: DefinitionKind, name: &str) -> Targets {
    let mut targets = Targets::default();
    for pod in pods {
        if annotation(pod, kind.reference_annotation()) != Some(name) {
            continue;
        }
        let Some(target) = pod_target(pod) else {
            continue;
        };
        if is_pod_terminal(pod) || is_pod_deleting(pod) {
            targets.terminal.insert(target);
        } else {
            targets.active.insert(target);
        }
    }
    targets
}
