//! cert-manager Certificate and Issuer declarations
//!
//! Only the fields this operator sets are modelled; cert-manager owns the rest.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{CertificateTemplate, KeyAlgorithm};

/// API group of cert-manager resources
pub const CERT_MANAGER_GROUP: &str = "cert-manager.io";

/// Desired state of a cert-manager Certificate
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cert-manager.io",
    version = "v1",
    kind = "Certificate",
    plural = "certificates",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSpec {
    /// Whether the issued certificate may sign others
    #[serde(rename = "isCA", default, skip_serializing_if = "Option::is_none")]
    pub is_ca: Option<bool>,
    /// Subject common name
    pub common_name: String,
    /// Secret cert-manager writes the key pair into
    pub secret_name: String,
    /// Private key settings
    pub private_key: PrivateKey,
    /// Signer of this certificate
    pub issuer_ref: IssuerRef,
    /// Key usages
    pub usages: Vec<String>,
}

impl CertificateSpec {
    /// Build a spec from a resolved template
    pub fn from_template(
        common_name: impl Into<String>,
        secret_name: impl Into<String>,
        is_ca: bool,
        issuer_ref: IssuerRef,
        template: &CertificateTemplate,
    ) -> Self {
        Self {
            is_ca: is_ca.then_some(true),
            common_name: common_name.into(),
            secret_name: secret_name.into(),
            private_key: PrivateKey {
                algorithm: template.algorithm,
                size: template.key_size,
            },
            issuer_ref,
            usages: template.usages.clone(),
        }
    }
}

/// Private key settings of a Certificate
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct PrivateKey {
    /// Key algorithm
    pub algorithm: KeyAlgorithm,
    /// Key size in bits
    pub size: u32,
}

/// Reference to an Issuer or ClusterIssuer
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct IssuerRef {
    /// Issuer name
    pub name: String,
    /// `Issuer` or `ClusterIssuer`
    pub kind: String,
    /// API group of the issuer
    pub group: String,
}

impl IssuerRef {
    /// Reference to a namespaced cert-manager Issuer
    pub fn issuer(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: "Issuer".to_string(),
            group: CERT_MANAGER_GROUP.to_string(),
        }
    }

    /// Reference to a cert-manager ClusterIssuer
    pub fn cluster_issuer(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: "ClusterIssuer".to_string(),
            group: CERT_MANAGER_GROUP.to_string(),
        }
    }
}

/// Desired state of a cert-manager Issuer
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cert-manager.io",
    version = "v1",
    kind = "Issuer",
    plural = "issuers",
    namespaced
)]
pub struct IssuerSpec {
    /// CA issuer backed by a secret
    pub ca: CaIssuer,
}

/// CA issuer configuration
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CaIssuer {
    /// Secret holding the signing key pair
    pub secret_name: String,
}

impl IssuerSpec {
    /// Issuer signing with the key pair in `secret_name`
    pub fn ca(secret_name: impl Into<String>) -> Self {
        Self {
            ca: CaIssuer {
                secret_name: secret_name.into(),
            },
        }
    }
}
