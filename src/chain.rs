//! Trust chain aggregation
//!
//! Consumers trust one secret holding the root CA followed by the
//! intermediate CA of every eligible tenant, in tenant-list order. The chain
//! is always recomputed from the full tenant list and written with a full
//! overwrite, so an eligibility change can never leave a stale entry behind.
//!
//! Concurrent rebuilds race on the secret and the last writer wins. Because
//! every rebuild starts from current cluster state, the next trust-affecting
//! event or health check converges the chain.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use tracing::{debug, error, info, warn};

use crate::kube_client::KubeClient;
use crate::resources::intermediate_ca_secret_name;
use crate::{
    Error, CA_CHAIN_KEY, CA_CHAIN_SECRET, LABEL_MANAGED_BY, LABEL_MANAGED_BY_OPERATOR,
    ROOT_CA_SECRET, TLS_CERT_KEY,
};

/// Why a tenant is or is not part of the chain
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Eligibility {
    /// Named as the excluded tenant of this rebuild
    Excluded,
    /// Status reports revoked and the tenant is not force-included
    Revoked,
    /// Intermediate goes into the chain
    Included,
}

/// Decide whether a tenant's intermediate belongs in the chain.
///
/// Precedence: the excluded tenant is always skipped, even when it is also
/// force-included; otherwise a revoked status skips the tenant unless it is
/// the force-included one.
pub fn eligibility(
    tenant: &str,
    status_revoked: bool,
    excluded: Option<&str>,
    force_include: Option<&str>,
) -> Eligibility {
    if excluded == Some(tenant) {
        Eligibility::Excluded
    } else if status_revoked && force_include != Some(tenant) {
        Eligibility::Revoked
    } else {
        Eligibility::Included
    }
}

/// Concatenate root and intermediates, newline separated, dropping empty blobs
pub fn assemble_chain<'a>(
    root: &'a [u8],
    intermediates: impl IntoIterator<Item = &'a [u8]>,
) -> Vec<u8> {
    let mut chain = Vec::new();
    for pem in std::iter::once(root).chain(intermediates) {
        if pem.is_empty() {
            continue;
        }
        if !chain.is_empty() {
            chain.push(b'\n');
        }
        chain.extend_from_slice(pem);
    }
    chain
}

fn cert_field(secret: Option<Secret>) -> Option<Vec<u8>> {
    secret
        .and_then(|s| s.data)
        .and_then(|mut data| data.remove(TLS_CERT_KEY))
        .map(|b| b.0)
}

/// Outcome of a rebuild, for logging and tests
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChainSummary {
    /// Tenants whose intermediate was written, in chain order
    pub included: Vec<String>,
    /// Eligible tenants left out because their CA secret is absent or empty
    pub missing: Vec<String>,
    /// Eligible tenants left out because their CA secret could not be read
    pub unreadable: Vec<String>,
}

/// Rebuilds the aggregated chain secret
#[derive(Clone)]
pub struct ChainAggregator {
    kube: Arc<dyn KubeClient>,
    root_ca_secret: String,
    chain_secret: String,
}

impl ChainAggregator {
    /// Create an aggregator using the default secret names
    pub fn new(kube: Arc<dyn KubeClient>) -> Self {
        Self::with_secret_names(kube, ROOT_CA_SECRET, CA_CHAIN_SECRET)
    }

    /// Create an aggregator with explicit root and chain secret names
    pub fn with_secret_names(
        kube: Arc<dyn KubeClient>,
        root_ca_secret: impl Into<String>,
        chain_secret: impl Into<String>,
    ) -> Self {
        Self {
            kube,
            root_ca_secret: root_ca_secret.into(),
            chain_secret: chain_secret.into(),
        }
    }

    async fn read_root_ca(&self, namespace: &str) -> Result<Vec<u8>, Error> {
        let secret = self
            .kube
            .get_secret(&self.root_ca_secret, namespace)
            .await?
            .ok_or_else(|| {
                Error::root_ca_missing(
                    namespace,
                    format!("secret {} not found", self.root_ca_secret),
                )
            })?;

        cert_field(Some(secret)).ok_or_else(|| {
            Error::root_ca_missing(
                namespace,
                format!("secret {} has no {}", self.root_ca_secret, TLS_CERT_KEY),
            )
        })
    }

    async fn read_intermediate(
        &self,
        tenant: &str,
        namespace: &str,
    ) -> Result<Option<Vec<u8>>, Error> {
        let secret_name = intermediate_ca_secret_name(tenant);
        let secret = self.kube.get_secret(&secret_name, namespace).await?;
        if secret.is_none() {
            warn!(tenant = %tenant, secret = %secret_name, "intermediate CA secret not found");
            return Ok(None);
        }
        let cert = cert_field(secret);
        if cert.is_none() {
            warn!(
                tenant = %tenant,
                secret = %secret_name,
                "intermediate CA secret has no certificate"
            );
        }
        Ok(cert)
    }

    /// Rebuild the chain secret from the root and every eligible tenant.
    ///
    /// `excluded` is skipped unconditionally. `force_include` is admitted even
    /// if its status still reports revoked. A tenant whose CA secret is missing
    /// is logged and omitted without failing the rebuild; a missing root CA
    /// fails it.
    pub async fn rebuild_chain(
        &self,
        namespace: &str,
        excluded: Option<&str>,
        force_include: Option<&str>,
    ) -> Result<ChainSummary, Error> {
        info!(namespace = %namespace, ?excluded, ?force_include, "rebuilding CA chain");

        let root = self.read_root_ca(namespace).await?;
        let tenants = self.kube.list_tenants(namespace).await?;
        debug!(count = tenants.len(), "listed tenants");

        let mut summary = ChainSummary::default();
        let mut intermediates = Vec::new();

        for tenant in &tenants {
            let name = tenant.tenant_name();
            match eligibility(name, tenant.status_revoked(), excluded, force_include) {
                Eligibility::Excluded => {
                    debug!(tenant = %name, "excluding tenant from chain");
                    continue;
                }
                Eligibility::Revoked => {
                    debug!(tenant = %name, "skipping revoked tenant");
                    continue;
                }
                Eligibility::Included => {}
            }

            match self.read_intermediate(name, namespace).await {
                Ok(Some(cert)) => {
                    intermediates.push(cert);
                    summary.included.push(name.to_string());
                }
                Ok(None) => summary.missing.push(name.to_string()),
                // a trusted tenant drops out until the next trust-affecting rebuild
                Err(e) => {
                    error!(
                        tenant = %name,
                        error = %e,
                        "failed to read intermediate CA, leaving it out of the chain"
                    );
                    summary.unreadable.push(name.to_string());
                }
            }
        }

        let chain = assemble_chain(&root, intermediates.iter().map(Vec::as_slice));
        self.kube
            .write_secret(namespace, &self.chain_secret_object(chain))
            .await?;

        info!(
            namespace = %namespace,
            included = ?summary.included,
            missing = ?summary.missing,
            unreadable = ?summary.unreadable,
            "CA chain updated"
        );
        Ok(summary)
    }

    /// Recreate the chain secret if it is absent.
    ///
    /// Revoked tenants are left out by the status filter. Returns `true` when
    /// the chain had to be rebuilt.
    pub async fn ensure_chain(&self, namespace: &str) -> Result<bool, Error> {
        if self
            .kube
            .get_secret(&self.chain_secret, namespace)
            .await?
            .is_some()
        {
            return Ok(false);
        }

        info!(
            namespace = %namespace,
            secret = %self.chain_secret,
            "CA chain secret missing, recreating"
        );
        self.rebuild_chain(namespace, None, None).await?;
        Ok(true)
    }

    fn chain_secret_object(&self, chain: Vec<u8>) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(self.chain_secret.clone()),
                labels: Some(BTreeMap::from([(
                    LABEL_MANAGED_BY.to_string(),
                    LABEL_MANAGED_BY_OPERATOR.to_string(),
                )])),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                CA_CHAIN_KEY.to_string(),
                ByteString(chain),
            )])),
            ..Default::default()
        }
    }
}
