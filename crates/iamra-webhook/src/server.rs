//! HTTPS server for the admission webhooks

use std::net::SocketAddr;
use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use tracing::info;

use iamra_common::Error;

use crate::{webhook_router, WebhookState};

/// Listener and serving certificate for the webhook server
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind
    pub addr: SocketAddr,
    /// PEM-encoded serving certificate chain
    pub cert_pem: String,
    /// PEM-encoded private key
    pub key_pem: String,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

/// Serve the webhook router over TLS until the listener fails
pub async fn run_server(config: ServerConfig, state: Arc<WebhookState>) -> Result<(), Error> {
    let app = webhook_router(state);

    let tls_config =
        RustlsConfig::from_pem(config.cert_pem.into_bytes(), config.key_pem.into_bytes())
            .await
            .map_err(|e| Error::configuration(format!("webhook TLS config error: {e}")))?;

    info!(addr = %config.addr, "Starting admission webhook server");

    axum_server::bind_rustls(config.addr, tls_config)
        .serve(app.into_make_service())
        .await
        .map_err(|e| Error::internal_with_context("webhook", format!("server error: {e}")))
}
