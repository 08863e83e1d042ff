//! Periodic chain health check
//!
//! Recreates the chain secret in every namespace that holds Tenants when it
//! has gone missing, e.g. after a manual delete.

use std::collections::BTreeSet;
use std::sync::Arc;

use kube::runtime::reflector::Store;
use kube::ResourceExt;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use super::Context;
use crate::crd::Tenant;

/// Check each namespace once. Failures are logged; a namespace never stops
/// the others from being checked.
pub async fn check_chains<'a>(ctx: &Context, namespaces: impl IntoIterator<Item = &'a str>) {
    for namespace in namespaces {
        match ctx.chain.ensure_chain(namespace).await {
            Ok(true) => info!(namespace = %namespace, "recreated CA chain secret"),
            Ok(false) => debug!(namespace = %namespace, "CA chain secret present"),
            Err(e) => error!(namespace = %namespace, error = %e, "failed to check CA chain secret"),
        }
    }
}

/// Namespaces currently holding at least one Tenant, restricted to the
/// watched namespace when one is configured
pub fn tenant_namespaces(ctx: &Context, tenants: &[Arc<Tenant>]) -> BTreeSet<String> {
    tenants
        .iter()
        .filter_map(|t| t.namespace())
        .filter(|ns| {
            ctx.config
                .watch_namespace()
                .is_none_or(|watched| watched == ns.as_str())
        })
        .collect()
}

/// Run the health check forever on the configured cadence
pub async fn run_chain_health_loop(ctx: Arc<Context>, tenants: Store<Tenant>) {
    tokio::time::sleep(ctx.config.chain_check_delay).await;

    let mut ticker = tokio::time::interval(ctx.config.chain_check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let namespaces = tenant_namespaces(&ctx, &tenants.state());
        check_chains(&ctx, namespaces.iter().map(String::as_str)).await;
    }
}
