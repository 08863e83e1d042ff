//! Supporting types for the Tenant CRD

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Tenant lifecycle state
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum TenantState {
    /// Certificates are being requested
    #[default]
    Creating,
    /// Certificates issued and the intermediate is trusted by the chain
    Active,
    /// Certificates issued but the intermediate is excluded from the chain
    Revoked,
    /// Certificate issuance could not complete
    Failed,
}

/// Private key algorithm, spelled the way cert-manager expects it
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum KeyAlgorithm {
    /// RSA keys
    #[default]
    #[serde(rename = "RSA")]
    Rsa,
    /// ECDSA keys
    #[serde(rename = "ECDSA")]
    Ecdsa,
    /// Ed25519 keys
    Ed25519,
}

impl KeyAlgorithm {
    /// Whether cert-manager accepts a private key of `size` bits
    pub fn accepts_key_size(self, size: u32) -> bool {
        match self {
            Self::Rsa => (2048..=8192).contains(&size),
            Self::Ecdsa => matches!(size, 256 | 384 | 521),
            // size is ignored for Ed25519
            Self::Ed25519 => true,
        }
    }
}

impl std::fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rsa => write!(f, "RSA"),
            Self::Ecdsa => write!(f, "ECDSA"),
            Self::Ed25519 => write!(f, "Ed25519"),
        }
    }
}

/// Fully resolved key and usage settings for one certificate
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateTemplate {
    /// Private key algorithm
    pub algorithm: KeyAlgorithm,
    /// Private key size in bits
    pub key_size: u32,
    /// Key usages, in order, without duplicates
    pub usages: Vec<String>,
}

impl CertificateTemplate {
    /// Defaults for a tenant's intermediate CA
    pub fn intermediate_default() -> Self {
        Self {
            algorithm: KeyAlgorithm::Rsa,
            key_size: 4096,
            usages: vec![
                "digital signature".to_string(),
                "key encipherment".to_string(),
                "cert sign".to_string(),
            ],
        }
    }

    /// Defaults for a tenant's client certificate
    pub fn client_default() -> Self {
        Self {
            algorithm: KeyAlgorithm::Rsa,
            key_size: 2048,
            usages: vec![
                "digital signature".to_string(),
                "key encipherment".to_string(),
                "client auth".to_string(),
            ],
        }
    }

    /// Merge an override onto this template field by field
    pub fn merged(mut self, overrides: Option<&CertificateTemplateOverride>) -> Self {
        let Some(o) = overrides else {
            return self;
        };
        if let Some(algorithm) = o.algorithm {
            self.algorithm = algorithm;
        }
        if let Some(key_size) = o.key_size {
            self.key_size = key_size;
        }
        if let Some(usages) = &o.usages {
            let mut deduped: Vec<String> = Vec::with_capacity(usages.len());
            for usage in usages {
                if !deduped.contains(usage) {
                    deduped.push(usage.clone());
                }
            }
            self.usages = deduped;
        }
        self
    }
}

/// Per-tenant override of a [`CertificateTemplate`]; unset fields keep the default
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateTemplateOverride {
    /// Private key algorithm
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<KeyAlgorithm>,
    /// Private key size in bits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_size: Option<u32>,
    /// Key usages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usages: Option<Vec<String>>,
}

impl CertificateTemplateOverride {
    fn validate(&self, tenant: &str, which: &str) -> Result<(), crate::Error> {
        if self.key_size == Some(0) {
            return Err(crate::Error::validation_for(
                tenant,
                format!("certificateTemplate.{which}.keySize must be greater than zero"),
            ));
        }
        if self.usages.as_ref().is_some_and(|u| u.is_empty()) {
            return Err(crate::Error::validation_for(
                tenant,
                format!("certificateTemplate.{which}.usages must not be empty"),
            ));
        }
        Ok(())
    }
}

/// Certificate overrides for a tenant
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TenantCertificateTemplate {
    /// Overrides for the intermediate CA
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intermediate: Option<CertificateTemplateOverride>,
    /// Overrides for the client certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<CertificateTemplateOverride>,
}

impl TenantCertificateTemplate {
    /// Validate both overrides and the templates they resolve to
    pub fn validate(&self, tenant: &str) -> Result<(), crate::Error> {
        if let Some(o) = &self.intermediate {
            o.validate(tenant, "intermediate")?;
        }
        if let Some(o) = &self.client {
            o.validate(tenant, "client")?;
        }

        let resolved = [
            ("intermediate", resolve_intermediate(Some(self))),
            ("client", resolve_client(Some(self))),
        ];
        for (which, template) in resolved {
            if !template.algorithm.accepts_key_size(template.key_size) {
                return Err(crate::Error::validation_for(
                    tenant,
                    format!(
                        "certificateTemplate.{which}: keySize {} is not valid for {}",
                        template.key_size, template.algorithm
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// Resolve the intermediate CA template for an optional tenant override set
pub fn resolve_intermediate(template: Option<&TenantCertificateTemplate>) -> CertificateTemplate {
    CertificateTemplate::intermediate_default()
        .merged(template.and_then(|t| t.intermediate.as_ref()))
}

/// Resolve the client certificate template for an optional tenant override set
pub fn resolve_client(template: Option<&TenantCertificateTemplate>) -> CertificateTemplate {
    CertificateTemplate::client_default().merged(template.and_then(|t| t.client.as_ref()))
}
