//! Custom Resource Definitions
//!
//! The Tenant CRD owned by this operator, plus typed views of the two
//! cert-manager kinds it declares.

mod cert_manager;
mod tenant;
mod types;

pub use cert_manager::{
    CaIssuer, Certificate, CertificateSpec, Issuer, IssuerRef, IssuerSpec, PrivateKey,
    CERT_MANAGER_GROUP,
};
pub use tenant::{Tenant, TenantSpec, TenantStatus, MAX_TENANT_NAME_LEN};
pub use types::{
    resolve_client, resolve_intermediate, CertificateTemplate, CertificateTemplateOverride,
    KeyAlgorithm, TenantCertificateTemplate, TenantState,
};
