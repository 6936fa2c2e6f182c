//! Admission webhook registration
//!
//! The operator serves its own webhooks, so on startup it applies the
//! Service fronting the webhook port and the Mutating/Validating
//! configurations pointing at it.

use std::collections::BTreeMap;

use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhook, MutatingWebhookConfiguration, RuleWithOperations, ServiceReference,
    ValidatingWebhook, ValidatingWebhookConfiguration, WebhookClientConfig,
};
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use kube::api::{Api, ObjectMeta, Patch, PatchParams};
use kube::Client;

use iamra_common::{API_GROUP, LABEL_MANAGED_BY, LABEL_MANAGED_BY_IAMRA};

use super::FIELD_MANAGER;

/// Name of the Service fronting the webhook server
pub const WEBHOOK_SERVICE_NAME: &str = "iamra-webhook";
/// Name of the MutatingWebhookConfiguration
pub const MUTATING_CONFIG_NAME: &str = "iamra-mutator";
/// Name of the ValidatingWebhookConfiguration
pub const VALIDATING_CONFIG_NAME: &str = "iamra-validator";

const DEFINITION_RESOURCES: [&str; 2] = ["roleprofiles", "sessions"];

fn managed_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(
        LABEL_MANAGED_BY.to_string(),
        LABEL_MANAGED_BY_IAMRA.to_string(),
    )])
}

fn client_config(namespace: &str, path: String, ca_bundle: &[u8]) -> WebhookClientConfig {
    WebhookClientConfig {
        service: Some(ServiceReference {
            name: WEBHOOK_SERVICE_NAME.to_string(),
            namespace: namespace.to_string(),
            path: Some(path),
            port: Some(443),
        }),
        ca_bundle: Some(ByteString(ca_bundle.to_vec())),
        ..Default::default()
    }
}

fn definition_rule(resource: &str, operations: &[&str]) -> RuleWithOperations {
    RuleWithOperations {
        operations: Some(operations.iter().map(|op| op.to_string()).collect()),
        api_groups: Some(vec![API_GROUP.to_string()]),
        api_versions: Some(vec!["v1".to_string()]),
        resources: Some(vec![resource.to_string()]),
        scope: Some("Namespaced".to_string()),
    }
}

/// Service routing port 443 to the operator's webhook port
pub fn webhook_service(namespace: &str, target_port: u16) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(WEBHOOK_SERVICE_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(managed_labels()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(BTreeMap::from([(
                "app".to_string(),
                LABEL_MANAGED_BY_IAMRA.to_string(),
            )])),
            ports: Some(vec![ServicePort {
                name: Some("https".to_string()),
                port: 443,
                target_port: Some(IntOrString::Int(i32::from(target_port))),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Pod injection plus definition defaulting
///
/// Pods in the operator's own namespace are excluded so the operator can
/// always start even when its webhook is unavailable.
pub fn mutating_config(namespace: &str, ca_bundle: &[u8]) -> MutatingWebhookConfiguration {
    let pods = MutatingWebhook {
        name: "pods.iamra.dev".to_string(),
        admission_review_versions: vec!["v1".to_string()],
        side_effects: "None".to_string(),
        failure_policy: Some("Fail".to_string()),
        match_policy: Some("Equivalent".to_string()),
        reinvocation_policy: Some("Never".to_string()),
        rules: Some(vec![RuleWithOperations {
            operations: Some(vec!["CREATE".to_string()]),
            api_groups: Some(vec![String::new()]),
            api_versions: Some(vec!["v1".to_string()]),
            resources: Some(vec!["pods".to_string()]),
            scope: Some("Namespaced".to_string()),
        }]),
        client_config: client_config(namespace, "/mutate/pods".to_string(), ca_bundle),
        namespace_selector: Some(LabelSelector {
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "kubernetes.io/metadata.name".to_string(),
                operator: "NotIn".to_string(),
                values: Some(vec![namespace.to_string()]),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    };

    let definitions = DEFINITION_RESOURCES.iter().map(|resource| MutatingWebhook {
        name: format!("{resource}.mutate.{API_GROUP}"),
        admission_review_versions: vec!["v1".to_string()],
        side_effects: "None".to_string(),
        failure_policy: Some("Fail".to_string()),
        rules: Some(vec![definition_rule(resource, &["CREATE", "UPDATE"])]),
        client_config: client_config(namespace, format!("/mutate/{resource}"), ca_bundle),
        ..Default::default()
    });

    MutatingWebhookConfiguration {
        metadata: ObjectMeta {
            name: Some(MUTATING_CONFIG_NAME.to_string()),
            labels: Some(managed_labels()),
            ..Default::default()
        },
        webhooks: Some(std::iter::once(pods).chain(definitions).collect()),
    }
}

/// Definition validation
pub fn validating_config(namespace: &str, ca_bundle: &[u8]) -> ValidatingWebhookConfiguration {
    let webhooks = DEFINITION_RESOURCES
        .iter()
        .map(|resource| ValidatingWebhook {
            name: format!("{resource}.validate.{API_GROUP}"),
            admission_review_versions: vec!["v1".to_string()],
            side_effects: "None".to_string(),
            failure_policy: Some("Fail".to_string()),
            rules: Some(vec![definition_rule(resource, &["CREATE", "UPDATE"])]),
            client_config: client_config(namespace, format!("/validate/{resource}"), ca_bundle),
            ..Default::default()
        })
        .collect();

    ValidatingWebhookConfiguration {
        metadata: ObjectMeta {
            name: Some(VALIDATING_CONFIG_NAME.to_string()),
            labels: Some(managed_labels()),
            ..Default::default()
        },
        webhooks: Some(webhooks),
    }
}

/// Apply the webhook Service and both webhook configurations
pub async fn ensure_webhook_config(
    client: &Client,
    namespace: &str,
    webhook_port: u16,
    ca_bundle: &[u8],
) -> anyhow::Result<()> {
    let params = PatchParams::apply(FIELD_MANAGER).force();

    let services: Api<Service> = Api::namespaced(client.clone(), namespace);
    services
        .patch(
            WEBHOOK_SERVICE_NAME,
            &params,
            &Patch::Apply(&webhook_service(namespace, webhook_port)),
        )
        .await
        .map_err(|e| anyhow::anyhow!("Failed to apply webhook Service: {}", e))?;

    let mutating: Api<MutatingWebhookConfiguration> = Api::all(client.clone());
    mutating
        .patch(
            MUTATING_CONFIG_NAME,
            &params,
            &Patch::Apply(&mutating_config(namespace, ca_bundle)),
        )
        .await
        .map_err(|e| anyhow::anyhow!("Failed to apply MutatingWebhookConfiguration: {}", e))?;

    let validating: Api<ValidatingWebhookConfiguration> = Api::all(client.clone());
    validating
        .patch(
            VALIDATING_CONFIG_NAME,
            &params,
            &Patch::Apply(&validating_config(namespace, ca_bundle)),
        )
        .await
        .map_err(|e| anyhow::anyhow!("Failed to apply ValidatingWebhookConfiguration: {}", e))?;

    tracing::info!(namespace, "Webhook configuration installed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CA: &[u8] = b"-----BEGIN CERTIFICATE-----";

    fn paths(configs: impl Iterator<Item = WebhookClientConfig>) -> Vec<String> {
        configs
            .filter_map(|c| c.service.and_then(|s| s.path))
            .collect()
    }

    #[test]
    fn service_targets_webhook_port() {
        let service = webhook_service("iamra-system", 9443);
        let port = &service.spec.unwrap().ports.unwrap()[0];
        assert_eq!(port.port, 443);
        assert_eq!(port.target_port, Some(IntOrString::Int(9443)));
        assert_eq!(service.metadata.namespace.as_deref(), Some("iamra-system"));
    }

    #[test]
    fn mutating_config_routes_pods_and_definitions() {
        let config = mutating_config("iamra-system", CA);
        let webhooks = config.webhooks.unwrap();
        assert_eq!(
            paths(webhooks.iter().map(|w| w.client_config.clone())),
            vec!["/mutate/pods", "/mutate/roleprofiles", "/mutate/sessions"]
        );
        for webhook in &webhooks {
            assert_eq!(
                webhook.client_config.ca_bundle,
                Some(ByteString(CA.to_vec()))
            );
            assert_eq!(
                webhook
                    .client_config
                    .service
                    .as_ref()
                    .map(|s| s.namespace.as_str()),
                Some("iamra-system")
            );
        }
    }

    #[test]
    fn pod_webhook_only_intercepts_creates_outside_operator_namespace() {
        let config = mutating_config("iamra-system", CA);
        let pods = &config.webhooks.unwrap()[0];

        let rule = &pods.rules.as_ref().unwrap()[0];
        assert_eq!(rule.operations, Some(vec!["CREATE".to_string()]));
        assert_eq!(rule.resources, Some(vec!["pods".to_string()]));

        let selector = pods.namespace_selector.as_ref().unwrap();
        let requirement = &selector.match_expressions.as_ref().unwrap()[0];
        assert_eq!(requirement.operator, "NotIn");
        assert_eq!(requirement.values, Some(vec!["iamra-system".to_string()]));
    }

    #[test]
    fn validating_config_covers_both_kinds_on_create_and_update() {
        let config = validating_config("iamra-system", CA);
        let webhooks = config.webhooks.unwrap();
        assert_eq!(
            paths(webhooks.iter().map(|w| w.client_config.clone())),
            vec!["/validate/roleprofiles", "/validate/sessions"]
        );
        for webhook in &webhooks {
            let rule = &webhook.rules.as_ref().unwrap()[0];
            assert_eq!(
                rule.operations,
                Some(vec!["CREATE".to_string(), "UPDATE".to_string()])
            );
            assert_eq!(rule.api_groups, Some(vec!["iamra.dev".to_string()]));
        }
    }
}
