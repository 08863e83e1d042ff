//! mTLS operator - per-tenant certificate authorities and trust chain

use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{ListParams, Patch, PatchParams};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};

use mtls_operator::config::OperatorConfig;
use mtls_operator::controller::{error_policy, reconcile, run_chain_health_loop, Context};
use mtls_operator::crd::{Certificate, IssuerRef, Tenant};
use mtls_operator::error::is_not_found;
use mtls_operator::retry::{retry_with_backoff_if, RetryConfig};
use mtls_operator::telemetry::{init_logging, LogFormat};

/// mTLS operator - issues per-tenant intermediate CAs and client certificates
#[derive(Parser, Debug)]
#[command(name = "mtls-operator", version, about, long_about = None)]
struct Cli {
    /// Print the Tenant CRD manifest and exit
    #[arg(long)]
    crd: bool,

    /// Log output format
    #[arg(
        long,
        global = true,
        value_enum,
        env = "MTLS_LOG_FORMAT",
        default_value_t = LogFormat::Json
    )]
    log_format: LogFormat,

    #[command(flatten)]
    controller: ControllerArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    ///
    /// Installs the Tenant CRD, watches Tenants and periodically checks that
    /// the CA chain secret exists.
    Controller,
}

/// Controller mode arguments
#[derive(Args, Debug)]
struct ControllerArgs {
    /// Namespace to watch for Tenants; empty watches all namespaces
    #[arg(long, global = true, env = "MTLS_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Seconds between reconciles; Failed tenants retry at this pace
    #[arg(long, global = true, env = "MTLS_RECONCILE_INTERVAL_SECS", default_value_t = 60)]
    reconcile_interval_secs: u64,

    /// Seconds between CA chain health checks
    #[arg(long, global = true, env = "MTLS_CHAIN_CHECK_INTERVAL_SECS", default_value_t = 30)]
    chain_check_interval_secs: u64,

    /// Seconds before the first CA chain health check
    #[arg(long, global = true, env = "MTLS_CHAIN_CHECK_DELAY_SECS", default_value_t = 10)]
    chain_check_delay_secs: u64,

    /// Seconds to wait for cert-manager to issue a certificate
    #[arg(long, global = true, env = "MTLS_WAIT_TIMEOUT_SECS", default_value_t = 60)]
    wait_timeout_secs: u64,

    /// Seconds between polls while waiting for a certificate
    #[arg(long, global = true, env = "MTLS_POLL_INTERVAL_SECS", default_value_t = 2)]
    poll_interval_secs: u64,

    /// Secret holding the root CA
    #[arg(
        long,
        global = true,
        env = "MTLS_ROOT_CA_SECRET",
        default_value = mtls_operator::ROOT_CA_SECRET
    )]
    root_ca_secret: String,

    /// Secret the aggregated CA chain is written to
    #[arg(
        long,
        global = true,
        env = "MTLS_CHAIN_SECRET",
        default_value = mtls_operator::CA_CHAIN_SECRET
    )]
    chain_secret: String,

    /// ClusterIssuer signing tenant intermediate CAs
    #[arg(
        long,
        global = true,
        env = "MTLS_ROOT_ISSUER",
        default_value = mtls_operator::config::DEFAULT_ROOT_ISSUER
    )]
    root_issuer: String,

    /// Sign intermediates with a namespaced Issuer instead of a ClusterIssuer
    #[arg(long, global = true, env = "MTLS_ROOT_ISSUER_NAMESPACED")]
    root_issuer_namespaced: bool,

    /// Field manager for patches
    #[arg(
        long,
        global = true,
        env = "MTLS_FIELD_MANAGER",
        default_value = mtls_operator::FIELD_MANAGER
    )]
    field_manager: String,
}

impl ControllerArgs {
    fn into_config(self) -> OperatorConfig {
        let root_issuer = if self.root_issuer_namespaced {
            IssuerRef::issuer(self.root_issuer)
        } else {
            IssuerRef::cluster_issuer(self.root_issuer)
        };
        OperatorConfig {
            namespace: self.namespace,
            reconcile_interval: Duration::from_secs(self.reconcile_interval_secs),
            chain_check_interval: Duration::from_secs(self.chain_check_interval_secs),
            chain_check_delay: Duration::from_secs(self.chain_check_delay_secs),
            wait_timeout: Duration::from_secs(self.wait_timeout_secs),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            root_ca_secret: self.root_ca_secret,
            chain_secret: self.chain_secret,
            root_issuer,
            field_manager: self.field_manager,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&Tenant::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_logging(cli.log_format)?;

    match cli.command {
        Some(Commands::Controller) | None => run_controller(cli.controller.into_config()).await,
    }
}

/// Install the Tenant CRD with server-side apply
///
/// The operator owns its CRD so the schema always matches the binary.
async fn ensure_crds_installed(client: &Client, field_manager: &str) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(field_manager).force();
    let crd = Tenant::crd();
    let patch = Patch::Apply(&crd);
    let name = crd
        .metadata
        .name
        .clone()
        .ok_or_else(|| anyhow::anyhow!("Tenant CRD has no name"))?;

    tracing::info!(crd = %name, "Installing Tenant CRD...");
    retry_with_backoff_if(
        &RetryConfig::startup(),
        "install_tenant_crd",
        || crds.patch(&name, &params, &patch),
        |e: &kube::Error| !matches!(e, kube::Error::Api(ae) if ae.code == 403 || ae.code == 422),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install Tenant CRD: {}", e))?;

    Ok(())
}

/// Run the Tenant controller and the chain health loop until shutdown
async fn run_controller(config: OperatorConfig) -> anyhow::Result<()> {
    config.validate()?;
    tracing::info!(namespace = %config.namespace, "Starting mTLS operator");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crds_installed(&client, &config.field_manager).await?;

    let tenants: Api<Tenant> = match config.watch_namespace() {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };

    // tenants cannot be issued until cert-manager is installed
    if let Err(e) = Api::<Certificate>::all(client.clone())
        .list(&ListParams::default().limit(1))
        .await
    {
        if is_not_found(&e) {
            tracing::warn!(
                "cert-manager Certificate CRD not found, tenants will fail until it is installed"
            );
        }
    }

    let ctx = Arc::new(Context::builder(client).config(config).build());

    let controller = Controller::new(tenants, WatcherConfig::default());
    let store = controller.store();
    let health = tokio::spawn(run_chain_health_loop(ctx.clone(), store));

    tracing::info!("Starting Tenant controller");
    controller
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => tracing::debug!(?action, "Reconciliation completed"),
                Err(e) => tracing::error!(error = ?e, "Reconciliation error"),
            }
        })
        .await;

    health.abort();
    tracing::info!("mTLS operator shutting down");
    Ok(())
}
