//! Client traits over the Kubernetes API
//!
//! The controller, the aggregator and the certificate service only talk to the
//! cluster through these traits, which lets tests swap in mocks or an
//! in-memory cluster. "Not found" is reported as `None`/`false`, never as an
//! error; every other API failure propagates as [`Error::Kube`].

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::crd::{Certificate, Issuer, Tenant, TenantStatus};
use crate::error::is_not_found;
use crate::{Error, TENANT_FINALIZER};

/// Core object store operations: secrets and Tenant objects
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Read a secret, `None` if it does not exist
    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Option<Secret>, Error>;

    /// Overwrite a secret in full, creating it if absent
    async fn write_secret(&self, namespace: &str, secret: &Secret) -> Result<(), Error>;

    /// Delete a secret; `false` if it was already gone
    async fn delete_secret(&self, name: &str, namespace: &str) -> Result<bool, Error>;

    /// List every Tenant in a namespace, in API order
    async fn list_tenants(&self, namespace: &str) -> Result<Vec<Tenant>, Error>;

    /// Merge-patch the status of a Tenant
    async fn patch_tenant_status(
        &self,
        name: &str,
        namespace: &str,
        status: &TenantStatus,
    ) -> Result<(), Error>;

    /// Add the cleanup finalizer to a Tenant
    async fn add_finalizer(&self, name: &str, namespace: &str) -> Result<(), Error>;

    /// Remove the cleanup finalizer from a Tenant
    async fn remove_finalizer(&self, name: &str, namespace: &str) -> Result<(), Error>;
}

/// cert-manager resource operations
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CertManagerClient: Send + Sync {
    /// Read a Certificate, `None` if it does not exist
    async fn get_certificate(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<Certificate>, Error>;

    /// Create a Certificate
    async fn create_certificate(&self, namespace: &str, cert: &Certificate) -> Result<(), Error>;

    /// Merge-patch an existing Certificate
    async fn patch_certificate(
        &self,
        name: &str,
        namespace: &str,
        cert: &Certificate,
    ) -> Result<(), Error>;

    /// Delete a Certificate; `false` if it was already gone
    async fn delete_certificate(&self, name: &str, namespace: &str) -> Result<bool, Error>;

    /// Read an Issuer, `None` if it does not exist
    async fn get_issuer(&self, name: &str, namespace: &str) -> Result<Option<Issuer>, Error>;

    /// Create an Issuer
    async fn create_issuer(&self, namespace: &str, issuer: &Issuer) -> Result<(), Error>;

    /// Merge-patch an existing Issuer
    async fn patch_issuer(&self, name: &str, namespace: &str, issuer: &Issuer)
        -> Result<(), Error>;

    /// Delete an Issuer; `false` if it was already gone
    async fn delete_issuer(&self, name: &str, namespace: &str) -> Result<bool, Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
    field_manager: String,
}

impl KubeClientImpl {
    /// Create a client that patches under `field_manager`
    pub fn with_field_manager(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn tenants(&self, namespace: &str) -> Api<Tenant> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Option<Secret>, Error> {
        Ok(self.secrets(namespace).get_opt(name).await?)
    }

    async fn write_secret(&self, namespace: &str, secret: &Secret) -> Result<(), Error> {
        let name = secret
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| Error::internal_with_context("write_secret", "secret has no name"))?;
        let api = self.secrets(namespace);

        match api.replace(name, &PostParams::default(), secret).await {
            Ok(_) => {
                debug!(secret = %name, namespace = %namespace, "replaced secret");
                Ok(())
            }
            Err(e) if is_not_found(&e) => {
                api.create(&PostParams::default(), secret).await?;
                debug!(secret = %name, namespace = %namespace, "created secret");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_secret(&self, name: &str, namespace: &str) -> Result<bool, Error> {
        match self
            .secrets(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_tenants(&self, namespace: &str) -> Result<Vec<Tenant>, Error> {
        let list = self.tenants(namespace).list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn patch_tenant_status(
        &self,
        name: &str,
        namespace: &str,
        status: &TenantStatus,
    ) -> Result<(), Error> {
        let patch = serde_json::json!({ "status": status });
        self.tenants(namespace)
            .patch_status(name, &PatchParams::apply(&self.field_manager), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn add_finalizer(&self, name: &str, namespace: &str) -> Result<(), Error> {
        let api = self.tenants(namespace);
        let tenant = api.get(name).await?;
        let mut finalizers = tenant.metadata.finalizers.unwrap_or_default();

        if finalizers.iter().any(|f| f == TENANT_FINALIZER) {
            return Ok(());
        }
        finalizers.push(TENANT_FINALIZER.to_string());

        let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn remove_finalizer(&self, name: &str, namespace: &str) -> Result<(), Error> {
        let api = self.tenants(namespace);
        let Some(tenant) = api.get_opt(name).await? else {
            return Ok(());
        };
        let finalizers: Vec<String> = tenant
            .metadata
            .finalizers
            .unwrap_or_default()
            .into_iter()
            .filter(|f| f != TENANT_FINALIZER)
            .collect();

        let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

/// Real cert-manager client implementation using the typed CRDs
pub struct CertManagerClientImpl {
    client: Client,
    field_manager: String,
}

impl CertManagerClientImpl {
    /// Create a client that patches under `field_manager`
    pub fn with_field_manager(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn certificates(&self, namespace: &str) -> Api<Certificate> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn issuers(&self, namespace: &str) -> Api<Issuer> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl CertManagerClient for CertManagerClientImpl {
    async fn get_certificate(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<Certificate>, Error> {
        Ok(self.certificates(namespace).get_opt(name).await?)
    }

    async fn create_certificate(&self, namespace: &str, cert: &Certificate) -> Result<(), Error> {
        self.certificates(namespace)
            .create(&PostParams::default(), cert)
            .await?;
        Ok(())
    }

    async fn patch_certificate(
        &self,
        name: &str,
        namespace: &str,
        cert: &Certificate,
    ) -> Result<(), Error> {
        self.certificates(namespace)
            .patch(name, &PatchParams::apply(&self.field_manager), &Patch::Merge(cert))
            .await?;
        Ok(())
    }

    async fn delete_certificate(&self, name: &str, namespace: &str) -> Result<bool, Error> {
        match self
            .certificates(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_issuer(&self, name: &str, namespace: &str) -> Result<Option<Issuer>, Error> {
        Ok(self.issuers(namespace).get_opt(name).await?)
    }

    async fn create_issuer(&self, namespace: &str, issuer: &Issuer) -> Result<(), Error> {
        self.issuers(namespace)
            .create(&PostParams::default(), issuer)
            .await?;
        Ok(())
    }

    async fn patch_issuer(
        &self,
        name: &str,
        namespace: &str,
        issuer: &Issuer,
    ) -> Result<(), Error> {
        self.issuers(namespace)
            .patch(name, &PatchParams::apply(&self.field_manager), &Patch::Merge(issuer))
            .await?;
        Ok(())
    }

    async fn delete_issuer(&self, name: &str, namespace: &str) -> Result<bool, Error> {
        match self
            .issuers(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
