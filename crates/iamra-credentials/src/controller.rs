//! Reconciliation driver for credential definitions
//!
//! One pass per definition: enumerate referencing pods, decide per target,
//! refresh the ones that are due, persist confirmed expirations in a single
//! status patch, and requeue for the earliest next check.
//!
//! The same generic `reconcile`/`error_policy` pair drives every
//! [`CredentialDefinition`] kind.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, ResourceExt};
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use iamra_common::crd::{
    CredentialDefinition, DefinitionKind, DefinitionStatus, RoleProfile, Session, TargetRef,
};
use iamra_common::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use iamra_common::kube_utils::patch_resource_status;
use iamra_common::validation::validate_credential_spec;
use iamra_common::Error;

use crate::executor::{refresh_credentials, CommandExecutor, PodCommandExecutor, DEFAULT_EXEC_TIMEOUT};
use crate::scheduler::{evaluate, next_check, RefreshDecision, RequeueSchedule};
use crate::store::{format_expiration, ExpirationStore};
use crate::targets::{select_targets, Targets};

/// Field manager for status patches
pub const FIELD_MANAGER: &str = "iamra-credentials-controller";

/// Refreshes run concurrently within one pass, at most this many at a time
const MAX_CONCURRENT_REFRESHES: usize = 8;

/// Requeue after a status conflict; the next pass reads the winner's status
pub const REQUEUE_CONFLICT: Duration = Duration::from_secs(1);
/// Requeue after a transient failure
pub const REQUEUE_RETRYABLE: Duration = Duration::from_secs(30);
/// Requeue after a failure that needs a spec or deployment fix
pub const REQUEUE_PERMANENT: Duration = Duration::from_secs(300);

/// Kubernetes operations the driver needs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// List every pod in a namespace
    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, Error>;

    /// Merge-patch a definition's status subresource with `patch` as the body
    async fn patch_status(
        &self,
        kind: DefinitionKind,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<(), Error>;
}

/// [`KubeClient`] backed by the API server
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, Error> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(pods.list(&ListParams::default()).await?.items)
    }

    async fn patch_status(
        &self,
        kind: DefinitionKind,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<(), Error> {
        let result = match kind {
            DefinitionKind::RoleProfile => {
                patch_resource_status::<RoleProfile>(&self.client, namespace, name, patch, FIELD_MANAGER)
                    .await
            }
            DefinitionKind::Session => {
                patch_resource_status::<Session>(&self.client, namespace, name, patch, FIELD_MANAGER)
                    .await
            }
        };
        result.map_err(|e| Error::from_kube(kind.kind(), &format!("{namespace}/{name}"), e))
    }
}

/// Shared state for the definition controllers
pub struct Context {
    /// Kubernetes operations (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Remote invocation channel into targets
    pub executor: Arc<dyn CommandExecutor>,
    /// Event sink
    pub events: Arc<dyn EventPublisher>,
}

impl Context {
    /// Builder wired to a live cluster
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Context with the given collaborators and no event output
    pub fn for_testing(kube: Arc<dyn KubeClient>, executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            kube,
            executor,
            events: Arc::new(iamra_common::events::NoopEventPublisher),
        }
    }
}

/// Builder for [`Context`]
pub struct ContextBuilder {
    client: Client,
    exec_timeout: Duration,
    executor: Option<Arc<dyn CommandExecutor>>,
    events: Option<Arc<dyn EventPublisher>>,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            exec_timeout: DEFAULT_EXEC_TIMEOUT,
            executor: None,
            events: None,
        }
    }

    /// Bound on each remote invocation (ignored with a custom executor)
    pub fn exec_timeout(mut self, timeout: Duration) -> Self {
        self.exec_timeout = timeout;
        self
    }

    /// Use a custom executor instead of pod exec
    pub fn executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Use a custom event publisher
    pub fn event_publisher(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the context
    pub fn build(self) -> Context {
        let executor = self.executor.unwrap_or_else(|| {
            Arc::new(PodCommandExecutor::new(self.client.clone()).with_timeout(self.exec_timeout))
        });
        let events = self.events.unwrap_or_else(|| {
            Arc::new(KubeEventPublisher::new(self.client.clone(), FIELD_MANAGER))
        });
        Context {
            kube: Arc::new(KubeClientImpl::new(self.client)),
            executor,
            events,
        }
    }
}

/// Reconcile one definition
#[instrument(skip(definition, ctx), fields(kind = %K::KIND, definition = %definition.name_any()))]
pub async fn reconcile<K: CredentialDefinition>(
    definition: Arc<K>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    reconcile_at(definition.as_ref(), &ctx, Utc::now()).await
}

/// One reconciliation pass evaluated at `now`
pub async fn reconcile_at<K: CredentialDefinition>(
    definition: &K,
    ctx: &Context,
    now: DateTime<Utc>,
) -> Result<Action, Error> {
    let name = definition.name_any();
    let Some(namespace) = definition.namespace() else {
        return Err(Error::internal_with_context(
            "reconcile",
            format!("{} {name} has no namespace", K::KIND),
        ));
    };
    if definition.meta().deletion_timestamp.is_some() {
        debug!("definition is being deleted");
        return Ok(Action::await_change());
    }
    let object_ref = definition.object_ref(&());

    let spec = definition.credential_spec();
    if let Err(errors) = validate_credential_spec(spec) {
        let err = Error::validation(format!("{} {namespace}/{name}", K::KIND), errors);
        ctx.events
            .publish(
                &object_ref,
                EventType::Warning,
                reasons::VALIDATION_FAILED,
                actions::RECONCILE,
                Some(err.to_string()),
            )
            .await;
        return Err(err);
    }

    let pods = ctx.kube.list_pods(&namespace).await?;
    let targets = select_targets(&pods, K::KIND, &name);

    let mut store = ExpirationStore::from_status(definition.definition_status());
    store.retain_targets(&targets.active);

    let mut schedule = RequeueSchedule::default();
    let mut due = Vec::new();
    for target in &targets.active {
        match evaluate(store.get(target), now) {
            RefreshDecision::Fresh { next_check } => schedule.observe(next_check),
            RefreshDecision::NeedsRefresh => due.push(target.clone()),
        }
    }

    let executor = ctx.executor.as_ref();
    let results: Vec<(TargetRef, Result<DateTime<Utc>, Error>)> = stream::iter(due)
        .map(|target| async move {
            let result = refresh_credentials(executor, spec, &target).await;
            (target, result)
        })
        .buffer_unordered(MAX_CONCURRENT_REFRESHES)
        .collect()
        .await;

    let mut refreshed = 0usize;
    let mut failures: Vec<(TargetRef, Error)> = Vec::new();
    for (target, result) in results {
        match result {
            Ok(expiration) => {
                debug!(target = %target, expiration = %expiration, "credentials refreshed");
                schedule.observe(next_check(expiration));
                store.record(target, expiration);
                refreshed += 1;
            }
            Err(e) => {
                warn!(target = %target, error = %e, "credential refresh failed");
                failures.push((target, e));
            }
        }
    }
    failures.sort_by(|a, b| a.0.cmp(&b.0));

    for (target, e) in &failures {
        ctx.events
            .publish(
                &object_ref,
                EventType::Warning,
                reasons::REFRESH_FAILED,
                actions::REFRESH,
                Some(format!("{target}: {e}")),
            )
            .await;
    }
    if refreshed > 0 {
        ctx.events
            .publish(
                &object_ref,
                EventType::Normal,
                reasons::CREDENTIALS_REFRESHED,
                actions::REFRESH,
                Some(format!("refreshed credentials for {refreshed} pod(s)")),
            )
            .await;
    }

    let message = summarize_failures(&failures, targets.active.len());
    let observed = observed_status(&store, &targets, now, message.clone());
    let status_changed = !status_matches(definition.definition_status(), &observed);
    if status_changed {
        let patch = status_patch(definition, &store, &observed);
        match ctx
            .kube
            .patch_status(K::KIND, &namespace, &name, &patch)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!("definition deleted during pass");
                return Ok(Action::await_change());
            }
            Err(e) => return Err(e),
        }
    } else {
        debug!("status unchanged, skipping update");
    }

    if targets.active.is_empty() && status_changed {
        ctx.events
            .publish(
                &object_ref,
                EventType::Warning,
                reasons::INACTIVE,
                actions::RECONCILE,
                Some(format!("no running pods reference this {}", K::KIND)),
            )
            .await;
    }

    if let Some(message) = message {
        let failed = failures
            .iter()
            .map(|(t, _)| t.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(Error::execution(failed, message));
    }

    let requeue = schedule.requeue_after(now);
    info!(
        active = targets.active.len(),
        terminal = targets.terminal.len(),
        refreshed,
        requeue_secs = requeue.as_secs(),
        "reconciled"
    );
    Ok(Action::requeue(requeue))
}

/// Status this pass observed
fn observed_status(
    store: &ExpirationStore,
    targets: &Targets,
    now: DateTime<Utc>,
    message: Option<String>,
) -> DefinitionStatus {
    DefinitionStatus {
        expirations: store.expirations(),
        active_pods: targets.active.iter().map(ToString::to_string).collect(),
        terminal_pods: targets.terminal.iter().map(ToString::to_string).collect(),
        last_reconciled: Some(format_expiration(now)),
        message,
    }
}

/// Whether `current` already records what `observed` would write
///
/// `lastReconciled` is ignored; writing only a new timestamp would trigger
/// another watch event and another pass.
fn status_matches(current: Option<&DefinitionStatus>, observed: &DefinitionStatus) -> bool {
    current.is_some_and(|current| {
        current.expirations == observed.expirations
            && current.active_pods == observed.active_pods
            && current.terminal_pods == observed.terminal_pods
            && current.message == observed.message
    })
}

/// Status merge patch for one pass
///
/// Carries the observed `resourceVersion` so that a concurrent writer makes
/// the API server reject the patch with a conflict.
fn status_patch<K: CredentialDefinition>(
    definition: &K,
    store: &ExpirationStore,
    observed: &DefinitionStatus,
) -> Value {
    let mut patch = Map::new();
    if let Some(rv) = definition.resource_version() {
        patch.insert("metadata".to_string(), json!({ "resourceVersion": rv }));
    }
    patch.insert(
        "status".to_string(),
        json!({
            "expirations": store.to_merge_patch(),
            "activePods": observed.active_pods,
            "terminalPods": observed.terminal_pods,
            "lastReconciled": observed.last_reconciled,
            "message": observed.message,
        }),
    );
    Value::Object(patch)
}

fn summarize_failures(failures: &[(TargetRef, Error)], attempted_of: usize) -> Option<String> {
    if failures.is_empty() {
        return None;
    }
    let details = failures
        .iter()
        .map(|(_, e)| e.to_string())
        .collect::<Vec<_>>()
        .join("; ");
    Some(format!(
        "refresh failed for {} of {attempted_of} pod(s): {details}",
        failures.len()
    ))
}

/// Requeue delay after a failed pass
pub fn requeue_for(error: &Error) -> Duration {
    if error.is_conflict() {
        REQUEUE_CONFLICT
    } else if error.is_retryable() {
        REQUEUE_RETRYABLE
    } else {
        REQUEUE_PERMANENT
    }
}

/// Error policy shared by the definition controllers
pub fn error_policy<K: CredentialDefinition>(
    definition: Arc<K>,
    error: &Error,
    _ctx: Arc<Context>,
) -> Action {
    let delay = requeue_for(error);
    if error.is_conflict() {
        debug!(
            kind = %K::KIND,
            definition = %definition.name_any(),
            "status conflict, retrying"
        );
    } else {
        error!(
            ?error,
            kind = %K::KIND,
            definition = %definition.name_any(),
            retry_secs = delay.as_secs(),
            "reconciliation failed"
        );
    }
    Action::requeue(delay)
}
