//! mTLS operator - per-tenant certificate authorities for a multi-tenant cluster
//!
//! Every `Tenant` gets an intermediate CA signed by a shared root and a client
//! certificate signed by that intermediate. Consumers trust one aggregated
//! chain secret holding the root plus every currently valid intermediate.
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (Tenant, cert-manager Certificate/Issuer)
//! - [`controller`] - Tenant lifecycle state machine and chain health loop
//! - [`chain`] - Trust chain aggregation into the shared chain secret
//! - [`certificate`] - Idempotent Certificate/Issuer declarations
//! - [`waiter`] - Bounded polling for secrets issued by cert-manager
//! - [`kube_client`] - Client traits over the Kubernetes API
//! - [`resources`] - Deterministic names of a tenant's derived objects
//! - [`events`] - Kubernetes Event publishing
//! - [`config`] - Operator configuration
//! - [`telemetry`] - Logging setup
//! - [`retry`] - Exponential backoff for startup calls
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod certificate;
pub mod chain;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod events;
pub mod kube_client;
pub mod resources;
pub mod retry;
pub mod telemetry;
pub mod waiter;

#[cfg(test)]
pub(crate) mod testing;

pub use error::Error;

// =============================================================================
// Well-known names
// =============================================================================

/// Finalizer guarding tenant cleanup
pub const TENANT_FINALIZER: &str = "mtls-operator/finalizer";

/// Field manager used for server-side apply and status patches
pub const FIELD_MANAGER: &str = "mtls-operator";

/// Secret holding the pre-provisioned root CA
pub const ROOT_CA_SECRET: &str = "root-ca-secret";

/// Secret holding the aggregated trust chain
pub const CA_CHAIN_SECRET: &str = "ca-chain-secret";

/// Data key of a certificate in cert-manager issued secrets
pub const TLS_CERT_KEY: &str = "tls.crt";

/// Data key of the aggregated chain in the chain secret
pub const CA_CHAIN_KEY: &str = "ca.crt";

/// Label key marking objects this operator owns
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Label value for [`LABEL_MANAGED_BY`]
pub const LABEL_MANAGED_BY_OPERATOR: &str = "mtls-operator";
