//! Definition lookup for pod admission

use async_trait::async_trait;
use kube::api::Api;
use kube::Client;

#[cfg(test)]
use mockall::automock;

use iamra_common::crd::{CredentialDefinition, CredentialSpec, DefinitionKind, RoleProfile, Session};
use iamra_common::Error;

/// Looks up the credential spec a pod refers to
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DefinitionResolver: Send + Sync {
    /// Fetch the spec of definition `name` of `kind` in `namespace`
    ///
    /// A missing definition is `Error::NotFound`.
    async fn resolve(
        &self,
        kind: DefinitionKind,
        namespace: &str,
        name: &str,
    ) -> Result<CredentialSpec, Error>;
}

/// Resolver reading definitions from the API server
pub struct KubeDefinitionResolver {
    client: Client,
}

impl KubeDefinitionResolver {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn get<K: CredentialDefinition>(&self, namespace: &str, name: &str) -> Result<CredentialSpec, Error> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map(|definition| definition.credential_spec().clone())
            .map_err(|e| Error::from_kube(K::KIND.kind(), &format!("{namespace}/{name}"), e))
    }
}

#[async_trait]
impl DefinitionResolver for KubeDefinitionResolver {
    async fn resolve(
        &self,
        kind: DefinitionKind,
        namespace: &str,
        name: &str,
    ) -> Result<CredentialSpec, Error> {
        match kind {
            DefinitionKind::RoleProfile => self.get::<RoleProfile>(namespace, name).await,
            DefinitionKind::Session => self.get::<Session>(namespace, name).await,
        }
    }
}
