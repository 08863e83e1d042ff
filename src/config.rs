//! Operator configuration
//!
//! Every tunable lives in [`OperatorConfig`]. The binary fills it from CLI
//! flags and `MTLS_*` environment variables; tests build it directly and
//! shrink the timings.

use std::time::Duration;

use crate::crd::IssuerRef;
use crate::waiter::{DEFAULT_POLL_INTERVAL, DEFAULT_WAIT_TIMEOUT};
use crate::{CA_CHAIN_SECRET, FIELD_MANAGER, ROOT_CA_SECRET};

/// Default namespace watched for Tenants
pub const DEFAULT_NAMESPACE: &str = "default";

/// Default cadence of the failed-tenant reconcile
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(60);

/// Default cadence of the chain health check
pub const DEFAULT_CHAIN_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Default delay before the first chain health check
pub const DEFAULT_CHAIN_CHECK_DELAY: Duration = Duration::from_secs(10);

/// Default issuer signing every intermediate CA
pub const DEFAULT_ROOT_ISSUER: &str = "root-ca-issuer";

/// Runtime configuration shared by the controller and the health loop
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Namespace watched for Tenants; empty watches all namespaces
    pub namespace: String,
    /// How often every Tenant is requeued; Failed tenants retry at this pace
    pub reconcile_interval: Duration,
    /// How often the chain secret's existence is checked
    pub chain_check_interval: Duration,
    /// Delay before the first chain check
    pub chain_check_delay: Duration,
    /// Budget for an issued secret to appear
    pub wait_timeout: Duration,
    /// Interval between secret polls
    pub poll_interval: Duration,
    /// Pre-provisioned root CA secret
    pub root_ca_secret: String,
    /// Aggregated chain secret
    pub chain_secret: String,
    /// Issuer that signs tenant intermediate CAs
    pub root_issuer: IssuerRef,
    /// Field manager for patches
    pub field_manager: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
            chain_check_interval: DEFAULT_CHAIN_CHECK_INTERVAL,
            chain_check_delay: DEFAULT_CHAIN_CHECK_DELAY,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            root_ca_secret: ROOT_CA_SECRET.to_string(),
            chain_secret: CA_CHAIN_SECRET.to_string(),
            root_issuer: IssuerRef::cluster_issuer(DEFAULT_ROOT_ISSUER),
            field_manager: FIELD_MANAGER.to_string(),
        }
    }
}

impl OperatorConfig {
    /// Namespace for the health loop, `None` when watching all namespaces
    pub fn watch_namespace(&self) -> Option<&str> {
        if self.namespace.is_empty() {
            None
        } else {
            Some(&self.namespace)
        }
    }

    /// Reject configurations that would busy-loop or never finish
    pub fn validate(&self) -> Result<(), crate::Error> {
        let positive = [
            ("reconcile interval", self.reconcile_interval),
            ("chain check interval", self.chain_check_interval),
            ("wait timeout", self.wait_timeout),
            ("poll interval", self.poll_interval),
        ];
        for (what, value) in positive {
            if value.is_zero() {
                return Err(crate::Error::validation(format!("{what} must be positive")));
            }
        }
        if self.root_ca_secret.is_empty() || self.chain_secret.is_empty() {
            return Err(crate::Error::validation("secret names must not be empty"));
        }
        if self.root_issuer.name.is_empty() {
            return Err(crate::Error::validation("root issuer name must not be empty"));
        }
        Ok(())
    }
}
