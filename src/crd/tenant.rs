//! Tenant Custom Resource Definition
//!
//! A Tenant is a logical identity owner. The operator issues it an
//! intermediate CA (signed by the shared root) and a client certificate
//! (signed by that intermediate), and tracks progress in the status.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{TenantCertificateTemplate, TenantState};

/// Longest tenant name accepted; keeps every derived object name a valid label
pub const MAX_TENANT_NAME_LEN: usize = 40;

/// Specification for a Tenant
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "mtls.invoisight.com",
    version = "v1",
    kind = "Tenant",
    plural = "tenants",
    shortname = "tn",
    status = "TenantStatus",
    namespaced,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Revoked","type":"boolean","jsonPath":".spec.revoked"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TenantSpec {
    /// Unique tenant name; every derived resource name is built from it
    pub name: String,

    /// Namespace the tenant belongs to (informational; resources live in the
    /// Tenant object's own namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Remove this tenant's intermediate CA from the trust chain
    #[serde(default)]
    pub revoked: bool,

    /// Overrides for key size, algorithm and usages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_template: Option<TenantCertificateTemplate>,
}

impl TenantSpec {
    /// Validate the tenant specification
    pub fn validate(&self) -> Result<(), crate::Error> {
        validate_tenant_name(&self.name)?;
        if let Some(template) = &self.certificate_template {
            template.validate(&self.name)?;
        }
        Ok(())
    }
}

fn validate_tenant_name(name: &str) -> Result<(), crate::Error> {
    if name.is_empty() {
        return Err(crate::Error::validation("spec.name must not be empty"));
    }
    if name.len() > MAX_TENANT_NAME_LEN {
        return Err(crate::Error::validation_for(
            name,
            format!("spec.name must be at most {MAX_TENANT_NAME_LEN} characters"),
        ));
    }
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !valid_chars || name.starts_with('-') || name.ends_with('-') {
        return Err(crate::Error::validation_for(
            name,
            "spec.name must be lowercase alphanumeric or '-', starting and ending with an alphanumeric",
        ));
    }
    Ok(())
}

/// Status for a Tenant, written only by the controller
///
/// Every field is optional so a status patch only touches what it sets.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TenantStatus {
    /// Current lifecycle state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<TenantState>,

    /// Last applied revocation decision (may lag `spec.revoked`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_revoked: Option<bool>,

    /// Name of the intermediate CA Certificate
    #[serde(rename = "intermediateCA", default, skip_serializing_if = "Option::is_none")]
    pub intermediate_ca: Option<String>,

    /// Name of the client Certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_cert: Option<String>,

    /// Last error or diagnostic
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TenantStatus {
    /// Create a new status with the given state
    pub fn with_state(state: TenantState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }

    /// Status for a settled revocation decision; keeps state and flag in step
    pub fn settled(revoked: bool) -> Self {
        let state = if revoked {
            TenantState::Revoked
        } else {
            TenantState::Active
        };
        Self::with_state(state).revoked(revoked)
    }

    /// Set the revocation flag and return self for chaining
    pub fn revoked(mut self, revoked: bool) -> Self {
        self.is_revoked = Some(revoked);
        self
    }

    /// Set the message and return self for chaining
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Record the derived certificate names
    pub fn certificates(
        mut self,
        intermediate_ca: impl Into<String>,
        client_cert: impl Into<String>,
    ) -> Self {
        self.intermediate_ca = Some(intermediate_ca.into());
        self.client_cert = Some(client_cert.into());
        self
    }

    /// Overlay the fields set in `patch`, the way a JSON merge patch does
    pub fn merge(&mut self, patch: &TenantStatus) {
        if patch.state.is_some() {
            self.state = patch.state;
        }
        if patch.is_revoked.is_some() {
            self.is_revoked = patch.is_revoked;
        }
        if patch.intermediate_ca.is_some() {
            self.intermediate_ca.clone_from(&patch.intermediate_ca);
        }
        if patch.client_cert.is_some() {
            self.client_cert.clone_from(&patch.client_cert);
        }
        if patch.message.is_some() {
            self.message.clone_from(&patch.message);
        }
    }
}

impl Tenant {
    /// The tenant name from the spec
    pub fn tenant_name(&self) -> &str {
        &self.spec.name
    }

    /// Current state, if the controller has written one
    pub fn state(&self) -> Option<TenantState> {
        self.status.as_ref().and_then(|s| s.state)
    }

    /// Whether the status reports the tenant as revoked
    pub fn status_revoked(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.is_revoked)
            .unwrap_or(false)
    }

    /// Whether the finalizer is present
    pub fn has_finalizer(&self) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|s| s == crate::TENANT_FINALIZER))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::types::CertificateTemplateOverride;

    fn spec(name: &str) -> TenantSpec {
        TenantSpec {
            name: name.to_string(),
            namespace: None,
            revoked: false,
            certificate_template: None,
        }
    }

    #[test]
    fn valid_names_pass() {
        assert!(spec("acme").validate().is_ok());
        assert!(spec("acme-2").validate().is_ok());
    }

    #[test]
    fn invalid_names_are_rejected() {
        for name in ["", "Acme", "acme_corp", "-acme", "acme-", "a.b"] {
            assert!(spec(name).validate().is_err(), "{name:?} should be invalid");
        }
        let long = "a".repeat(MAX_TENANT_NAME_LEN + 1);
        assert!(spec(&long).validate().is_err());
    }

    #[test]
    fn template_validation_is_applied() {
        let mut s = spec("acme");
        s.certificate_template = Some(TenantCertificateTemplate {
            intermediate: Some(CertificateTemplateOverride {
                key_size: Some(0),
                ..Default::default()
            }),
            client: None,
        });
        assert!(s.validate().is_err());
    }

    #[test]
    fn spec_deserializes_camel_case_with_defaults() {
        let s: TenantSpec = serde_json::from_value(serde_json::json!({
            "name": "acme",
            "certificateTemplate": { "client": { "keySize": 3072 } }
        }))
        .unwrap();
        assert!(!s.revoked);
        let client = s.certificate_template.unwrap().client.unwrap();
        assert_eq!(client.key_size, Some(3072));
    }

    /// Story: the state and the revocation flag always move together.
    #[test]
    fn story_settled_status_keeps_state_and_flag_in_step() {
        let revoked = TenantStatus::settled(true);
        assert_eq!(revoked.state, Some(TenantState::Revoked));
        assert_eq!(revoked.is_revoked, Some(true));

        let active = TenantStatus::settled(false);
        assert_eq!(active.state, Some(TenantState::Active));
        assert_eq!(active.is_revoked, Some(false));
    }

    #[test]
    fn merge_only_overwrites_set_fields() {
        let mut status = TenantStatus::settled(false)
            .certificates("acme-intermediate-ca", "acme-client-cert")
            .message("ok");
        status.merge(&TenantStatus::default().message("Reconciliation failed: boom"));

        assert_eq!(status.state, Some(TenantState::Active));
        assert_eq!(status.intermediate_ca.as_deref(), Some("acme-intermediate-ca"));
        assert_eq!(status.message.as_deref(), Some("Reconciliation failed: boom"));
    }

    #[test]
    fn status_serializes_intermediate_ca_field_name() {
        let status = TenantStatus::default().certificates("a", "b");
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["intermediateCA"], "a");
        assert_eq!(json["clientCert"], "b");
        assert!(json.get("state").is_none());
    }
}
