//! Controllers for mTLS operator resources
//!
//! The Tenant controller drives the certificate lifecycle; the health loop
//! runs beside it and keeps the chain secret present.

mod attempts;
mod health;
mod tenant;

pub use attempts::FailedAttempts;
pub use health::{check_chains, run_chain_health_loop, tenant_namespaces};
pub use tenant::{
    error_policy, reconcile, Context, ContextBuilder, CONTROLLER_NAME, RECONCILED_MESSAGE,
    RETRY_DELAY,
};
