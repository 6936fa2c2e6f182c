//! IAM Roles Anywhere credential operator

use std::sync::Arc;

use clap::{Parser, Subcommand};

use iamra_common::kube_utils::create_client;
use iamra_common::telemetry::{init_telemetry, TelemetryConfig};
use iamra_operator::config::OperatorConfig;
use iamra_operator::controller_runner::build_definition_controllers;
use iamra_operator::startup::{crd_manifests, ensure_crds_installed, ensure_webhook_config};
use iamra_webhook::{run_server, KubeDefinitionResolver, WebhookState};

/// Issues short-lived IAM Roles Anywhere credentials to annotated pods
#[derive(Parser, Debug)]
#[command(name = "iamra-operator", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    config: OperatorConfig,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controllers and admission webhooks (default mode)
    Controller,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!(
            "CRITICAL: Failed to install crypto provider: {:?}. \
             The webhook server cannot serve TLS without it.",
            e
        );
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if cli.crd {
        println!("{}", crd_manifests()?);
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        log_format: cli.config.log_format,
        ..Default::default()
    })?;

    match cli.command {
        Some(Commands::Controller) | None => run_controller(cli.config).await,
    }
}

async fn run_controller(config: OperatorConfig) -> anyhow::Result<()> {
    tracing::info!(namespace = %config.namespace, "iamra operator starting...");

    let sidecar = config.sidecar()?;
    let server = config.server()?;
    let ca_bundle = config.ca_bundle()?;

    let client = create_client(config.kubeconfig.as_deref()).await?;

    ensure_crds_installed(&client).await?;
    ensure_webhook_config(&client, &config.namespace, config.webhook_port, &ca_bundle).await?;

    let state = Arc::new(WebhookState::new(
        Arc::new(KubeDefinitionResolver::new(client.clone())),
        sidecar,
    ));

    tracing::info!("Starting controllers:");
    let controllers = build_definition_controllers(client, config.exec_timeout());

    tokio::select! {
        _ = futures::future::join_all(controllers) => {
            tracing::info!("Controllers stopped");
        }
        result = run_server(server, state) => {
            result?;
            tracing::info!("Webhook server stopped");
        }
    }

    Ok(())
}
