//! Deterministic names of the objects derived from a tenant
//!
//! Names are a pure function of the tenant name, so two tenants can never
//! collide and a tenant's objects can be found again after a restart.

/// Names of the Certificates, Issuer and Secrets owned by one tenant
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TenantResources {
    /// Intermediate CA Certificate; also the name of the tenant Issuer
    pub intermediate_ca: String,
    /// Client Certificate
    pub client_cert: String,
    /// Secret cert-manager writes the intermediate CA into
    pub intermediate_ca_secret: String,
    /// Secret cert-manager writes the client certificate into
    pub client_cert_secret: String,
}

impl TenantResources {
    /// Derive every resource name from the tenant name
    pub fn for_tenant(tenant: &str) -> Self {
        let intermediate_ca = format!("{tenant}-intermediate-ca");
        let client_cert = format!("{tenant}-client-cert");
        Self {
            intermediate_ca_secret: format!("{intermediate_ca}-secret"),
            client_cert_secret: format!("{client_cert}-secret"),
            intermediate_ca,
            client_cert,
        }
    }

    /// Name of the Issuer backed by the intermediate CA
    pub fn issuer(&self) -> &str {
        &self.intermediate_ca
    }
}

/// Name of a tenant's intermediate CA secret without building the full set
pub fn intermediate_ca_secret_name(tenant: &str) -> String {
    format!("{tenant}-intermediate-ca-secret")
}
