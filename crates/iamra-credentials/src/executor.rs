//! Remote credential issuance
//!
//! A [`CommandExecutor`] runs a command inside a target's credential sidecar
//! and captures its output. [`refresh_credentials`] builds the refresh command,
//! runs it, and turns the final line of stdout into the new expiration.
//!
//! Two executors are provided: [`PodCommandExecutor`] uses the pod `exec`
//! subresource, and [`FakeCommandExecutor`] replays scripted responses.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams};
use kube::Client;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

use iamra_common::crd::{CredentialSpec, TargetRef};
use iamra_common::{Error, SIDECAR_CONTAINER_NAME};

use crate::command::refresh_command;

/// Format of the expiration line printed by the refresh command
pub const EXPIRATION_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Default bound on one remote invocation
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(30);

/// Captured output of a remote command
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
}

/// Runs commands inside a target workload
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run `command` in `target`'s credential sidecar
    ///
    /// Fails if the channel can't be established, the command exits
    /// non-zero, the stream aborts or the call times out.
    async fn exec(&self, target: &TargetRef, command: &[String]) -> Result<ExecOutput, Error>;
}

/// Issue fresh credentials in `target` and return their expiration
///
/// Always issues; callers decide freshness first.
pub async fn refresh_credentials(
    executor: &dyn CommandExecutor,
    spec: &CredentialSpec,
    target: &TargetRef,
) -> Result<DateTime<Utc>, Error> {
    let command = refresh_command(spec, target);
    debug!(target = %target, "issuing credentials");

    let output = executor.exec(target, &command).await?;
    parse_expiration(&output.stdout).map_err(|reason| {
        let stderr = output.stderr.trim();
        if stderr.is_empty() {
            Error::execution(target.to_string(), reason)
        } else {
            Error::execution(target.to_string(), format!("{reason} (stderr: {stderr})"))
        }
    })
}

/// Parse the last non-empty line of `stdout` as an expiration timestamp
pub fn parse_expiration(stdout: &str) -> Result<DateTime<Utc>, String> {
    let line = stdout
        .lines()
        .map(str::trim)
        .rev()
        .find(|l| !l.is_empty())
        .ok_or_else(|| "command printed no expiration".to_string())?;

    NaiveDateTime::parse_from_str(line, EXPIRATION_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| format!("unparseable expiration {line:?}: {e}"))
}

// =============================================================================
// Pod exec
// =============================================================================

/// Executes through the Kubernetes `pods/exec` subresource
pub struct PodCommandExecutor {
    client: Client,
    container: String,
    timeout: Duration,
}

impl PodCommandExecutor {
    /// Executor targeting the injected sidecar container
    pub fn new(client: Client) -> Self {
        Self {
            client,
            container: SIDECAR_CONTAINER_NAME.to_string(),
            timeout: DEFAULT_EXEC_TIMEOUT,
        }
    }

    /// Bound each invocation by `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn exec_in_pod(&self, target: &TargetRef, command: &[String]) -> Result<ExecOutput, Error> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &target.namespace);
        let params = AttachParams::default()
            .container(self.container.as_str())
            .stdin(false)
            .stdout(true)
            .stderr(true);

        let mut attached = pods
            .exec(&target.name, command.to_vec(), &params)
            .await
            .map_err(|e| Error::execution(target.to_string(), format!("exec failed: {e}")))?;

        let stdout = attached.stdout();
        let stderr = attached.stderr();
        let status = attached.take_status();

        let (stdout, stderr, status) = tokio::join!(
            read_stream(stdout),
            read_stream(stderr),
            async {
                match status {
                    Some(status) => status.await,
                    None => None,
                }
            }
        );
        let stdout =
            stdout.map_err(|e| Error::execution(target.to_string(), format!("stdout: {e}")))?;
        let stderr =
            stderr.map_err(|e| Error::execution(target.to_string(), format!("stderr: {e}")))?;

        if let Err(e) = attached.join().await {
            warn!(target = %target, error = %e, "exec session did not close cleanly");
        }

        match status {
            Some(s) if s.status.as_deref() == Some("Success") => Ok(ExecOutput { stdout, stderr }),
            Some(s) => Err(Error::execution(
                target.to_string(),
                format!(
                    "command failed: {}{}",
                    s.message.unwrap_or_else(|| "no message".to_string()),
                    if stderr.trim().is_empty() {
                        String::new()
                    } else {
                        format!(" (stderr: {})", stderr.trim())
                    }
                ),
            )),
            None => Err(Error::execution(
                target.to_string(),
                "stream closed without exit status",
            )),
        }
    }
}

#[async_trait]
impl CommandExecutor for PodCommandExecutor {
    async fn exec(&self, target: &TargetRef, command: &[String]) -> Result<ExecOutput, Error> {
        tokio::time::timeout(self.timeout, self.exec_in_pod(target, command))
            .await
            .unwrap_or_else(|_| {
                Err(Error::execution(
                    target.to_string(),
                    format!("timed out after {}s", self.timeout.as_secs()),
                ))
            })
    }
}

async fn read_stream<R: AsyncRead + Unpin>(reader: Option<R>) -> std::io::Result<String> {
    let Some(mut reader) = reader else {
        return Ok(String::new());
    };
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

// =============================================================================
// Fake
// =============================================================================

/// One recorded invocation of [`FakeCommandExecutor`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecCall {
    /// Target the command ran against
    pub target: TargetRef,
    /// Full command line
    pub command: Vec<String>,
}

#[derive(Clone, Debug)]
enum Scripted {
    Output(ExecOutput),
    Failure(String),
}

/// Deterministic executor for driving reconciliation without a cluster
///
/// Responses are queued per target and consumed in order; the last queued
/// response for a target is repeated once the queue drains. A target with
/// nothing scripted fails as unreachable. Every call is recorded.
#[derive(Default)]
pub struct FakeCommandExecutor {
    scripts: Mutex<HashMap<TargetRef, VecDeque<Scripted>>>,
    calls: Mutex<Vec<ExecCall>>,
}

impl FakeCommandExecutor {
    /// An executor with nothing scripted
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response printing `stdout`
    pub fn respond(&self, target: &TargetRef, stdout: impl Into<String>) -> &Self {
        self.push(
            target,
            Scripted::Output(ExecOutput {
                stdout: stdout.into(),
                stderr: String::new(),
            }),
        )
    }

    /// Queue a successful response printing an expiration line
    pub fn respond_with_expiration(&self, target: &TargetRef, expiration: DateTime<Utc>) -> &Self {
        self.respond(
            target,
            format!("{}\n", expiration.format(EXPIRATION_FORMAT)),
        )
    }

    /// Queue a failed invocation
    pub fn fail(&self, target: &TargetRef, message: impl Into<String>) -> &Self {
        self.push(target, Scripted::Failure(message.into()))
    }

    /// Every invocation so far, in order
    pub fn calls(&self) -> Vec<ExecCall> {
        lock(&self.calls).clone()
    }

    /// Number of invocations against `target`
    pub fn call_count(&self, target: &TargetRef) -> usize {
        lock(&self.calls).iter().filter(|c| &c.target == target).count()
    }

    fn push(&self, target: &TargetRef, scripted: Scripted) -> &Self {
        lock(&self.scripts)
            .entry(target.clone())
            .or_default()
            .push_back(scripted);
        self
    }

    fn next_response(&self, target: &TargetRef) -> Option<Scripted> {
        let mut scripts = lock(&self.scripts);
        let queue = scripts.get_mut(target)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl CommandExecutor for FakeCommandExecutor {
    async fn exec(&self, target: &TargetRef, command: &[String]) -> Result<ExecOutput, Error> {
        lock(&self.calls).push(ExecCall {
            target: target.clone(),
            command: command.to_vec(),
        });
        match self.next_response(target) {
            Some(Scripted::Output(output)) => Ok(output),
            Some(Scripted::Failure(message)) => Err(Error::execution(target.to_string(), message)),
            None => Err(Error::execution(target.to_string(), "target unreachable")),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
