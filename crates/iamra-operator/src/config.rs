use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Args;

use iamra_common::telemetry::LogFormat;
use iamra_common::{Error, DEFAULT_WEBHOOK_PORT, IAMRA_SYSTEM_NAMESPACE};
use iamra_webhook::{ServerConfig, SidecarConfig};

/// Operator settings, each with an environment fallback
#[derive(Args, Debug, Clone)]
pub struct OperatorConfig {
    /// Image providing the credential sidecar binaries
    #[arg(long, env = "IAMRA_SIDECAR_IMAGE")]
    pub sidecar_image: Option<String>,

    /// Pull policy for the sidecar image
    #[arg(long, env = "IAMRA_SIDECAR_IMAGE_PULL_POLICY")]
    pub sidecar_image_pull_policy: Option<String>,

    /// HTTPS port of the admission webhook server
    #[arg(long, env = "IAMRA_WEBHOOK_PORT", default_value_t = DEFAULT_WEBHOOK_PORT)]
    pub webhook_port: u16,

    /// PEM serving certificate for the webhook server
    #[arg(long, env = "IAMRA_WEBHOOK_CERT", default_value = "/etc/iamra/tls/tls.crt")]
    pub webhook_cert: PathBuf,

    /// PEM private key for the webhook server
    #[arg(long, env = "IAMRA_WEBHOOK_KEY", default_value = "/etc/iamra/tls/tls.key")]
    pub webhook_key: PathBuf,

    /// CA bundle registered with the API server (defaults to the serving certificate)
    #[arg(long, env = "IAMRA_WEBHOOK_CA")]
    pub webhook_ca: Option<PathBuf>,

    /// Namespace the operator and its webhook Service run in
    #[arg(long, env = "IAMRA_NAMESPACE", default_value = IAMRA_SYSTEM_NAMESPACE)]
    pub namespace: String,

    /// Bound on each credential refresh exec, in seconds
    #[arg(long, env = "IAMRA_EXEC_TIMEOUT_SECS", default_value_t = 30)]
    pub exec_timeout_secs: u64,

    /// Kubeconfig path (in-cluster config when unset)
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Log line format: json or text
    #[arg(long, env = "IAMRA_LOG_FORMAT", default_value = "json")]
    pub log_format: LogFormat,
}

impl OperatorConfig {
    /// Sidecar settings for pod injection
    pub fn sidecar(&self) -> Result<SidecarConfig, Error> {
        let image = self
            .sidecar_image
            .as_deref()
            .map(str::trim)
            .filter(|image| !image.is_empty())
            .ok_or_else(|| Error::configuration("IAMRA_SIDECAR_IMAGE must be set"))?;
        Ok(SidecarConfig {
            image: image.to_string(),
            image_pull_policy: self.sidecar_image_pull_policy.clone(),
        })
    }

    /// Per-call exec timeout for credential refreshes
    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs.max(1))
    }

    /// Listener address and certificate for the webhook server
    pub fn server(&self) -> Result<ServerConfig, Error> {
        Ok(ServerConfig {
            addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.webhook_port)),
            cert_pem: read_pem(&self.webhook_cert)?,
            key_pem: read_pem(&self.webhook_key)?,
        })
    }

    /// CA bundle the API server uses to trust the webhook
    pub fn ca_bundle(&self) -> Result<Vec<u8>, Error> {
        let path = self.webhook_ca.as_deref().unwrap_or(&self.webhook_cert);
        read_pem(path).map(String::into_bytes)
    }
}

fn read_pem(path: &Path) -> Result<String, Error> {
    std::fs::read_to_string(path)
        .map_err(|e| Error::configuration(format!("failed to read {}: {e}", path.display())))
}
