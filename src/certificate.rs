//! Idempotent cert-manager declarations
//!
//! Each declaration reads the object first: an existing object is patched
//! with the new spec, a missing one is created. Re-running a tenant's
//! issuance sequence therefore never fails on "already exists". Any other
//! failure is returned unchanged so the caller can decide whether it is
//! terminal.

use std::collections::BTreeMap;
use std::sync::Arc;

use kube::api::ObjectMeta;
use tracing::{debug, info};

use crate::crd::{Certificate, CertificateSpec, Issuer, IssuerSpec};
use crate::kube_client::CertManagerClient;
use crate::{Error, LABEL_MANAGED_BY, LABEL_MANAGED_BY_OPERATOR};

fn managed_metadata(name: &str, namespace: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(BTreeMap::from([(
            LABEL_MANAGED_BY.to_string(),
            LABEL_MANAGED_BY_OPERATOR.to_string(),
        )])),
        ..Default::default()
    }
}

/// Declares Certificates and Issuers for cert-manager to fulfil
#[derive(Clone)]
pub struct CertificateService {
    client: Arc<dyn CertManagerClient>,
}

impl CertificateService {
    /// Create a service over the given cert-manager client
    pub fn new(client: Arc<dyn CertManagerClient>) -> Self {
        Self { client }
    }

    /// Create the Certificate if absent, patch it to `spec` if present
    pub async fn declare_certificate(
        &self,
        name: &str,
        namespace: &str,
        spec: CertificateSpec,
    ) -> Result<(), Error> {
        let cert = Certificate {
            metadata: managed_metadata(name, namespace),
            spec,
        };

        if self.client.get_certificate(name, namespace).await?.is_some() {
            self.client.patch_certificate(name, namespace, &cert).await?;
            debug!(certificate = %name, namespace = %namespace, "patched certificate");
        } else {
            self.client.create_certificate(namespace, &cert).await?;
            info!(certificate = %name, namespace = %namespace, "created certificate");
        }
        Ok(())
    }

    /// Create the CA Issuer if absent, patch it if present
    pub async fn declare_issuer(
        &self,
        name: &str,
        namespace: &str,
        signing_secret: &str,
    ) -> Result<(), Error> {
        let issuer = Issuer {
            metadata: managed_metadata(name, namespace),
            spec: IssuerSpec::ca(signing_secret),
        };

        if self.client.get_issuer(name, namespace).await?.is_some() {
            self.client.patch_issuer(name, namespace, &issuer).await?;
            debug!(issuer = %name, namespace = %namespace, "patched issuer");
        } else {
            self.client.create_issuer(namespace, &issuer).await?;
            info!(issuer = %name, namespace = %namespace, "created issuer");
        }
        Ok(())
    }

    /// Delete a Certificate; `false` if it was already gone
    pub async fn delete_certificate(&self, name: &str, namespace: &str) -> Result<bool, Error> {
        self.client.delete_certificate(name, namespace).await
    }

    /// Delete an Issuer; `false` if it was already gone
    pub async fn delete_issuer(&self, name: &str, namespace: &str) -> Result<bool, Error> {
        self.client.delete_issuer(name, namespace).await
    }
}
