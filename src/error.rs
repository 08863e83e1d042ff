//! Error types for the mTLS operator
//!
//! Errors are structured with fields so a failed tenant's status message and
//! the controller logs both say which object was involved. Absent objects are
//! not errors: client traits return `Option`/`bool` for those and
//! [`is_not_found`] classifies raw API responses.

use std::time::Duration;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for operator operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API call failed for a reason other than "not found"
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A secret did not carry the expected field before the deadline
    #[error("wait timeout: secret {namespace}/{name} has no field {field} after {timeout:?}")]
    WaitTimeout {
        /// Secret name
        name: String,
        /// Secret namespace
        namespace: String,
        /// Data key that never appeared
        field: String,
        /// How long we waited
        timeout: Duration,
    },

    /// Tenant issuance could not complete; not retried until the next
    /// failed-tenant reconcile
    #[error("terminal error for tenant {tenant}: {message}")]
    Terminal {
        /// Tenant name
        tenant: String,
        /// Cause, already rendered
        message: String,
    },

    /// The root CA secret is missing or has no certificate
    #[error("root CA unavailable in namespace {namespace}: {message}")]
    RootCaMissing {
        /// Namespace that was searched
        namespace: String,
        /// What was wrong with the secret
        message: String,
    },

    /// Tenant spec is invalid
    #[error("validation error for {tenant}: {message}")]
    Validation {
        /// Tenant name (or `unknown`)
        tenant: String,
        /// Description of what's invalid
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Where the error occurred
        context: String,
    },
}

impl Error {
    /// Create a wait timeout error for a secret field
    pub fn wait_timeout(
        name: impl Into<String>,
        namespace: impl Into<String>,
        field: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self::WaitTimeout {
            name: name.into(),
            namespace: namespace.into(),
            field: field.into(),
            timeout,
        }
    }

    /// Wrap any failure of the issuance sequence into a terminal outcome
    pub fn terminal(tenant: impl Into<String>, cause: &Error) -> Self {
        Self::Terminal {
            tenant: tenant.into(),
            message: cause.to_string(),
        }
    }

    /// Create a root CA error
    pub fn root_ca_missing(namespace: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::RootCaMissing {
            namespace: namespace.into(),
            message: msg.into(),
        }
    }

    /// Create a validation error with tenant context
    pub fn validation_for(tenant: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            tenant: tenant.into(),
            message: msg.into(),
        }
    }

    /// Create a validation error without tenant context
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::validation_for(UNKNOWN_CONTEXT, msg)
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Terminal errors are not retried by the controller's error policy;
    /// recovery goes through the periodic failed-tenant reconcile instead.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Error::Terminal { .. } | Error::Validation { .. } | Error::RootCaMissing { .. }
        )
    }

    /// Whether this error is a secret wait timeout
    pub fn is_wait_timeout(&self) -> bool {
        matches!(self, Error::WaitTimeout { .. })
    }
}

/// True when the API server answered 404 for the object
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}
