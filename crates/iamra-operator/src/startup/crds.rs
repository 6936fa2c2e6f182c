//! CRD installation utilities

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};

use iamra_common::crd::{RoleProfile, Session};

use super::FIELD_MANAGER;

/// CRD definition with name and resource
struct CrdDef {
    name: &'static str,
    crd: CustomResourceDefinition,
}

fn operator_crds() -> Vec<CrdDef> {
    vec![
        CrdDef {
            name: RoleProfile::crd_name(),
            crd: RoleProfile::crd(),
        },
        CrdDef {
            name: Session::crd_name(),
            crd: Session::crd(),
        },
    ]
}

/// Install the operator CRDs using server-side apply
///
/// The operator owns its CRDs so their schema always matches the binary.
pub async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for def in operator_crds() {
        tracing::info!(crd = def.name, "Installing CRD...");
        crds.patch(def.name, &params, &Patch::Apply(&def.crd))
            .await
            .map_err(|e| anyhow::anyhow!("failed to install {} CRD: {}", def.name, e))?;
    }

    tracing::info!("CRDs installed/updated");
    Ok(())
}

/// Every operator CRD as a multi-document YAML stream
pub fn crd_manifests() -> anyhow::Result<String> {
    let docs = operator_crds()
        .into_iter()
        .map(|def| {
            serde_yaml::to_string(&def.crd)
                .map_err(|e| anyhow::anyhow!("failed to serialize {} CRD: {}", def.name, e))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(docs.join("---\n"))
}
