//! Tenant lifecycle controller
//!
//! Level-triggered state machine over `Tenant` objects:
//!
//! - no state / `Creating`: run the issuance sequence, then publish the chain
//! - `Active` / `Revoked`: apply a pending `spec.revoked` flip to the chain
//! - `Failed`: withdraw trust at once when revoked, and retry the issuance
//!   sequence at the reconcile cadence
//! - deletion: drop the tenant from the chain, then clean up its objects
//!
//! Whenever a tenant's trust eligibility may change, the chain is rebuilt
//! before the tenant's own objects are touched.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use super::FailedAttempts;
use crate::certificate::CertificateService;
use crate::chain::ChainAggregator;
use crate::config::OperatorConfig;
use crate::crd::{
    resolve_client, resolve_intermediate, CertificateSpec, IssuerRef, Tenant, TenantState,
    TenantStatus,
};
use crate::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use crate::kube_client::{CertManagerClient, CertManagerClientImpl, KubeClient, KubeClientImpl};
use crate::resources::TenantResources;
use crate::waiter::SecretWaiter;
use crate::{Error, TLS_CERT_KEY};

/// Name reported as the source of published Events
pub const CONTROLLER_NAME: &str = "mtls-operator";

/// Requeue delay after a retryable error
pub const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Message recorded when a failed tenant recovers
pub const RECONCILED_MESSAGE: &str = "Reconciliation successful";

/// Shared state handed to every reconcile
pub struct Context {
    /// Secrets and Tenant objects
    pub kube: Arc<dyn KubeClient>,
    /// Certificate and Issuer declarations
    pub certificates: CertificateService,
    /// Chain secret rebuilds
    pub chain: ChainAggregator,
    /// Waits for cert-manager to issue
    pub waiter: SecretWaiter,
    /// Kubernetes Events
    pub events: Arc<dyn EventPublisher>,
    /// Last failed issuance per tenant
    pub failed_attempts: FailedAttempts,
    /// Tunables
    pub config: OperatorConfig,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Wire the services over explicit clients
    pub fn from_parts(
        kube: Arc<dyn KubeClient>,
        cert_manager: Arc<dyn CertManagerClient>,
        events: Arc<dyn EventPublisher>,
        config: OperatorConfig,
    ) -> Self {
        Self {
            certificates: CertificateService::new(cert_manager),
            chain: ChainAggregator::with_secret_names(
                kube.clone(),
                &config.root_ca_secret,
                &config.chain_secret,
            ),
            waiter: SecretWaiter::new(kube.clone(), config.wait_timeout, config.poll_interval),
            kube,
            events,
            failed_attempts: FailedAttempts::default(),
            config,
        }
    }
}

/// Builder for [`Context`]; unset clients default to the real API
pub struct ContextBuilder {
    client: Client,
    kube: Option<Arc<dyn KubeClient>>,
    cert_manager: Option<Arc<dyn CertManagerClient>>,
    events: Option<Arc<dyn EventPublisher>>,
    config: OperatorConfig,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            kube: None,
            cert_manager: None,
            events: None,
            config: OperatorConfig::default(),
        }
    }

    /// Set the operator configuration
    pub fn config(mut self, config: OperatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the Kubernetes client
    pub fn kube_client(mut self, kube: Arc<dyn KubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Override the cert-manager client
    pub fn cert_manager_client(mut self, client: Arc<dyn CertManagerClient>) -> Self {
        self.cert_manager = Some(client);
        self
    }

    /// Override the event publisher
    pub fn event_publisher(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        let field_manager = self.config.field_manager.clone();
        let kube = self.kube.unwrap_or_else(|| {
            Arc::new(KubeClientImpl::with_field_manager(
                self.client.clone(),
                &field_manager,
            ))
        });
        let cert_manager = self.cert_manager.unwrap_or_else(|| {
            Arc::new(CertManagerClientImpl::with_field_manager(
                self.client.clone(),
                &field_manager,
            ))
        });
        let events = self.events.unwrap_or_else(|| {
            Arc::new(KubeEventPublisher::new(
                self.client.clone(),
                CONTROLLER_NAME,
            ))
        });

        Context::from_parts(kube, cert_manager, events, self.config)
    }
}

/// Reconcile a Tenant
#[instrument(skip(tenant, ctx), fields(tenant = %tenant.name_any()))]
pub async fn reconcile(tenant: Arc<Tenant>, ctx: Arc<Context>) -> Result<Action, Error> {
    let namespace = tenant
        .namespace()
        .unwrap_or_else(|| ctx.config.namespace.clone());
    let r = TenantReconciler {
        tenant: &tenant,
        namespace: &namespace,
        ctx: &ctx,
    };

    if tenant.metadata.deletion_timestamp.is_some() {
        if tenant.has_finalizer() {
            r.delete().await?;
            ctx.kube
                .remove_finalizer(&tenant.name_any(), &namespace)
                .await?;
        }
        return Ok(Action::await_change());
    }

    if !tenant.has_finalizer() {
        debug!("adding finalizer");
        ctx.kube.add_finalizer(&tenant.name_any(), &namespace).await?;
    }

    let state = tenant.state();
    debug!(
        ?state,
        spec_revoked = tenant.spec.revoked,
        status_revoked = tenant.status_revoked(),
        "reconciling tenant"
    );

    match state {
        None | Some(TenantState::Creating) => r.create().await,
        Some(TenantState::Failed) => {
            if tenant.spec.revoked && !tenant.status_revoked() {
                r.withdraw_trust().await?;
            }
            r.reconcile_failed().await
        }
        Some(TenantState::Active) | Some(TenantState::Revoked) => {
            match (tenant.spec.revoked, tenant.status_revoked()) {
                (true, false) => r.revoke().await,
                (false, true) => r.unrevoke().await,
                _ => Ok(Action::requeue(ctx.config.reconcile_interval)),
            }
        }
    }
}

/// Requeue policy for failed reconciles
///
/// Terminal errors wait for the periodic reconcile instead of retrying
/// immediately; everything else retries after [`RETRY_DELAY`].
pub fn error_policy(tenant: Arc<Tenant>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(?error, tenant = %tenant.name_any(), "reconciliation failed");

    if error.is_terminal() {
        Action::requeue(ctx.config.reconcile_interval)
    } else {
        Action::requeue(RETRY_DELAY)
    }
}

/// One reconcile of one tenant
struct TenantReconciler<'a> {
    tenant: &'a Tenant,
    namespace: &'a str,
    ctx: &'a Context,
}

impl TenantReconciler<'_> {
    fn name(&self) -> &str {
        self.tenant.tenant_name()
    }

    fn attempt_key(&self) -> String {
        format!("{}/{}", self.namespace, self.tenant.name_any())
    }

    fn record_failure(&self) {
        self.ctx
            .failed_attempts
            .record(&self.attempt_key(), self.tenant.metadata.generation);
    }

    fn clear_failures(&self) {
        self.ctx.failed_attempts.clear(&self.attempt_key());
    }

    fn requeue(&self) -> Action {
        Action::requeue(self.ctx.config.reconcile_interval)
    }

    async fn publish(&self, type_: EventType, reason: &str, action: &str, note: String) {
        self.ctx
            .events
            .publish(&self.tenant.object_ref(&()), type_, reason, action, Some(note))
            .await;
    }

    async fn patch_status(&self, status: TenantStatus) -> Result<(), Error> {
        self.ctx
            .kube
            .patch_tenant_status(&self.tenant.name_any(), self.namespace, &status)
            .await
    }

    /// Declare the intermediate CA, its Issuer and the client certificate,
    /// waiting for each certificate to be issued
    async fn issue_certificates(&self) -> Result<TenantResources, Error> {
        self.tenant.spec.validate()?;

        let (ctx, namespace) = (self.ctx, self.namespace);
        let resources = TenantResources::for_tenant(self.name());
        let template = self.tenant.spec.certificate_template.as_ref();

        ctx.certificates
            .declare_certificate(
                &resources.intermediate_ca,
                namespace,
                CertificateSpec::from_template(
                    &resources.intermediate_ca,
                    &resources.intermediate_ca_secret,
                    true,
                    ctx.config.root_issuer.clone(),
                    &resolve_intermediate(template),
                ),
            )
            .await?;
        ctx.waiter
            .await_field(&resources.intermediate_ca_secret, namespace, TLS_CERT_KEY)
            .await?;

        ctx.certificates
            .declare_issuer(
                resources.issuer(),
                namespace,
                &resources.intermediate_ca_secret,
            )
            .await?;

        ctx.certificates
            .declare_certificate(
                &resources.client_cert,
                namespace,
                CertificateSpec::from_template(
                    self.name(),
                    &resources.client_cert_secret,
                    false,
                    IssuerRef::issuer(resources.issuer()),
                    &resolve_client(template),
                ),
            )
            .await?;
        ctx.waiter
            .await_field(&resources.client_cert_secret, namespace, TLS_CERT_KEY)
            .await?;

        Ok(resources)
    }

    /// Issue certificates, then publish the intermediate unless revoked
    async fn issue_and_publish(&self) -> Result<TenantResources, Error> {
        let resources = self.issue_certificates().await?;
        let name = self.name();
        // a stale isRevoked from an earlier revocation must not hide the tenant
        let (excluded, force_include) = if self.tenant.spec.revoked {
            (Some(name), None)
        } else {
            (None, Some(name))
        };
        self.ctx
            .chain
            .rebuild_chain(self.namespace, excluded, force_include)
            .await?;
        Ok(resources)
    }

    async fn create(&self) -> Result<Action, Error> {
        let name = self.name();
        info!(tenant = %name, "creating tenant");
        self.publish(
            EventType::Normal,
            reasons::CREATING,
            actions::ISSUE,
            format!("Creating tenant {name}"),
        )
        .await;

        if self.tenant.state() != Some(TenantState::Creating) {
            self.patch_status(TenantStatus::with_state(TenantState::Creating))
                .await?;
        }

        match self.issue_and_publish().await {
            Ok(resources) => {
                let revoked = self.tenant.spec.revoked;
                self.patch_status(
                    TenantStatus::settled(revoked)
                        .certificates(&resources.intermediate_ca, &resources.client_cert),
                )
                .await?;
                self.clear_failures();
                info!(tenant = %name, revoked, "tenant created");
                self.publish(
                    EventType::Normal,
                    reasons::CREATED,
                    actions::ISSUE,
                    format!("Successfully created tenant {name}"),
                )
                .await;
                Ok(self.requeue())
            }
            Err(cause) => {
                warn!(tenant = %name, error = %cause, "tenant creation failed");
                self.record_failure();
                self.patch_status(
                    TenantStatus::with_state(TenantState::Failed).message(cause.to_string()),
                )
                .await?;
                let reason = if matches!(cause, Error::Validation { .. }) {
                    reasons::VALIDATION_FAILED
                } else {
                    reasons::FAILED
                };
                self.publish(
                    EventType::Warning,
                    reason,
                    actions::ISSUE,
                    format!("Failed to create tenant: {cause}"),
                )
                .await;
                Err(Error::terminal(name, &cause))
            }
        }
    }

    async fn reconcile_failed(&self) -> Result<Action, Error> {
        let name = self.name();
        let interval = self.ctx.config.reconcile_interval;
        if let Some(wait) = self.ctx.failed_attempts.remaining(
            &self.attempt_key(),
            self.tenant.metadata.generation,
            interval,
        ) {
            debug!(tenant = %name, ?wait, "failed tenant retried recently");
            return Ok(Action::requeue(wait));
        }
        info!(tenant = %name, "reconciling failed tenant");

        match self.issue_and_publish().await {
            Ok(resources) => {
                self.patch_status(
                    TenantStatus::settled(self.tenant.spec.revoked)
                        .certificates(&resources.intermediate_ca, &resources.client_cert)
                        .message(RECONCILED_MESSAGE),
                )
                .await?;
                self.clear_failures();
                info!(tenant = %name, "failed tenant recovered");
                self.publish(
                    EventType::Normal,
                    reasons::RECONCILED,
                    actions::RECONCILE,
                    format!("Recovered tenant {name}"),
                )
                .await;
            }
            Err(cause) => {
                error!(tenant = %name, error = %cause, "reconciliation failed");
                self.record_failure();
                self.patch_status(
                    TenantStatus::default().message(format!("Reconciliation failed: {cause}")),
                )
                .await?;
            }
        }
        Ok(self.requeue())
    }

    /// Take a Failed tenant out of the chain once it is revoked.
    ///
    /// Its intermediate may already be issued. State stays `Failed` and the
    /// retried issuance settles it as `Revoked`.
    async fn withdraw_trust(&self) -> Result<(), Error> {
        let name = self.name();
        info!(tenant = %name, "revoking failed tenant");
        self.publish(
            EventType::Normal,
            reasons::REVOKING,
            actions::UPDATE_CHAIN,
            format!("Revoking failed tenant {name}"),
        )
        .await;

        self.ctx
            .chain
            .rebuild_chain(self.namespace, Some(name), None)
            .await?;
        self.patch_status(TenantStatus::default().revoked(true))
            .await?;

        self.publish(
            EventType::Normal,
            reasons::REVOKED,
            actions::UPDATE_CHAIN,
            format!("Removed failed tenant {name} from the CA chain"),
        )
        .await;
        Ok(())
    }

    async fn revoke(&self) -> Result<Action, Error> {
        let name = self.name();
        info!(tenant = %name, "revoking tenant");
        self.publish(
            EventType::Normal,
            reasons::REVOKING,
            actions::UPDATE_CHAIN,
            format!("Revoking tenant {name}"),
        )
        .await;

        self.ctx
            .chain
            .rebuild_chain(self.namespace, Some(name), None)
            .await?;
        self.patch_status(TenantStatus::settled(true)).await?;

        self.publish(
            EventType::Normal,
            reasons::REVOKED,
            actions::UPDATE_CHAIN,
            format!("Successfully revoked tenant {name}"),
        )
        .await;
        Ok(self.requeue())
    }

    async fn unrevoke(&self) -> Result<Action, Error> {
        let name = self.name();
        info!(tenant = %name, "unrevoking tenant");
        self.publish(
            EventType::Normal,
            reasons::UNREVOKING,
            actions::UPDATE_CHAIN,
            format!("Unrevoking tenant {name}"),
        )
        .await;

        // status still says revoked until the patch below lands
        self.ctx
            .chain
            .rebuild_chain(self.namespace, None, Some(name))
            .await?;
        self.patch_status(TenantStatus::settled(false)).await?;

        self.publish(
            EventType::Normal,
            reasons::UNREVOKED,
            actions::UPDATE_CHAIN,
            format!("Successfully unrevoked tenant {name}"),
        )
        .await;
        Ok(self.requeue())
    }

    async fn delete(&self) -> Result<(), Error> {
        let (ctx, namespace, name) = (self.ctx, self.namespace, self.name());
        info!(tenant = %name, "deleting tenant");
        self.publish(
            EventType::Normal,
            reasons::DELETING,
            actions::DELETE,
            format!("Deleting tenant {name}"),
        )
        .await;

        match ctx.chain.rebuild_chain(namespace, Some(name), None).await {
            Ok(_) => {}
            // without a root there is no chain left that could trust this tenant
            Err(e @ Error::RootCaMissing { .. }) => {
                warn!(tenant = %name, error = %e, "skipping chain update during deletion");
            }
            Err(e) => return Err(e),
        }

        let r = TenantResources::for_tenant(name);
        let certs = &ctx.certificates;
        log_cleanup(
            "certificate",
            &r.intermediate_ca,
            certs.delete_certificate(&r.intermediate_ca, namespace).await,
        );
        log_cleanup(
            "certificate",
            &r.client_cert,
            certs.delete_certificate(&r.client_cert, namespace).await,
        );
        log_cleanup(
            "issuer",
            r.issuer(),
            certs.delete_issuer(r.issuer(), namespace).await,
        );
        log_cleanup(
            "secret",
            &r.intermediate_ca_secret,
            ctx.kube.delete_secret(&r.intermediate_ca_secret, namespace).await,
        );
        log_cleanup(
            "secret",
            &r.client_cert_secret,
            ctx.kube.delete_secret(&r.client_cert_secret, namespace).await,
        );
        self.clear_failures();
        Ok(())
    }
}

fn log_cleanup(kind: &str, name: &str, result: Result<bool, Error>) {
    match result {
        Ok(true) => debug!(kind, name, "deleted"),
        Ok(false) => debug!(kind, name, "already absent"),
        Err(e) => error!(kind, name, error = %e, "failed to delete"),
    }
}
