//! Bounded polling for secrets produced by the signing authority
//!
//! cert-manager issues certificates asynchronously. The controller blocks on
//! [`SecretWaiter::await_field`] until the issued secret carries its
//! certificate, polling at a fixed interval until a deadline. Read errors while
//! polling mean "not ready yet"; running out of time is [`Error::WaitTimeout`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::kube_client::KubeClient;
use crate::Error;

/// Default time to wait for an issued secret
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default interval between polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Poll `check_fn` every `poll_interval` until it returns `Ok(true)` or
/// `timeout` elapses.
///
/// Errors from `check_fn` are treated like `Ok(false)`. The check runs one last
/// time at the deadline before giving up, so a budget that is an exact
/// multiple of the interval gets every poll it paid for.
///
/// # Returns
/// `true` if the condition was met, `false` on timeout
pub async fn poll_until<F, Fut>(
    timeout: Duration,
    poll_interval: Duration,
    mut check_fn: F,
) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
{
    let deadline = Instant::now() + timeout;

    loop {
        match check_fn().await {
            Ok(true) => return true,
            Ok(false) => trace!("polling condition not yet met"),
            Err(e) => trace!(error = %e, "polling check returned error, treating as not ready"),
        }

        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        tokio::time::sleep(poll_interval.min(deadline - now)).await;
    }
}

/// Waits for named secrets to carry an expected data field
#[derive(Clone)]
pub struct SecretWaiter {
    kube: Arc<dyn KubeClient>,
    timeout: Duration,
    poll_interval: Duration,
}

impl SecretWaiter {
    /// Create a waiter with the given default budget
    pub fn new(kube: Arc<dyn KubeClient>, timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            kube,
            timeout,
            poll_interval,
        }
    }

    /// Wait with the configured timeout and poll interval
    pub async fn await_field(&self, name: &str, namespace: &str, field: &str) -> Result<(), Error> {
        self.await_field_with(name, namespace, field, self.timeout, self.poll_interval)
            .await
    }

    /// Wait until secret `namespace/name` exists and has `field` in its data
    pub async fn await_field_with(
        &self,
        name: &str,
        namespace: &str,
        field: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<(), Error> {
        debug!(secret = %name, namespace = %namespace, field = %field, ?timeout, "waiting for secret");

        let ready = poll_until(timeout, poll_interval, || async move {
            let secret = self.kube.get_secret(name, namespace).await?;
            Ok(secret
                .and_then(|s| s.data)
                .is_some_and(|data| data.contains_key(field)))
        })
        .await;

        if ready {
            debug!(secret = %name, namespace = %namespace, "secret ready");
            Ok(())
        } else {
            Err(Error::wait_timeout(name, namespace, field, timeout))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kube_client::MockKubeClient;
    use crate::testing::{secret_with, unavailable};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn waiter(mock: MockKubeClient) -> SecretWaiter {
        SecretWaiter::new(
            Arc::new(mock),
            Duration::from_secs(10),
            Duration::from_secs(2),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn returns_immediately_when_field_present() {
        let mut mock = MockKubeClient::new();
        mock.expect_get_secret()
            .times(1)
            .returning(|name, _| Ok(Some(secret_with(name, "tls.crt", b"pem"))));

        let started = Instant::now();
        waiter(mock)
            .await_field("acme-intermediate-ca-secret", "default", "tls.crt")
            .await
            .expect("secret is ready");
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    /// Story: cert-manager takes a few polls to issue. Read errors and a
    /// secret without the certificate both count as "not yet".
    #[tokio::test(start_paused = true)]
    async fn story_swallows_transient_errors_until_ready() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let mut mock = MockKubeClient::new();
        mock.expect_get_secret().returning(move |name, _| {
            match c.fetch_add(1, Ordering::SeqCst) {
                0 => Err(unavailable()),
                1 => Ok(None),
                2 => Ok(Some(secret_with(name, "ca.crt", b"other"))),
                _ => Ok(Some(secret_with(name, "tls.crt", b"pem"))),
            }
        });

        let started = Instant::now();
        waiter(mock)
            .await_field("acme-client-cert-secret", "default", "tls.crt")
            .await
            .expect("secret becomes ready");

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }

    /// Story: the secret never appears. The waiter gives up at the deadline
    /// with a distinguishable timeout instead of hanging.
    #[tokio::test(start_paused = true)]
    async fn story_times_out_with_wait_timeout() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let mut mock = MockKubeClient::new();
        mock.expect_get_secret().returning(move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        });

        let started = Instant::now();
        let err = waiter(mock)
            .await_field("acme-intermediate-ca-secret", "default", "tls.crt")
            .await
            .unwrap_err();

        assert!(err.is_wait_timeout());
        assert!(err.to_string().contains("acme-intermediate-ca-secret"));
        assert_eq!(started.elapsed(), Duration::from_secs(10));
        // polls at 0, 2, 4, 6, 8 and the final one at the deadline
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_budget_overrides_default() {
        let mut mock = MockKubeClient::new();
        mock.expect_get_secret().returning(|_, _| Ok(None));

        let started = Instant::now();
        let err = waiter(mock)
            .await_field_with(
                "s",
                "default",
                "tls.crt",
                Duration::from_secs(3),
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();

        assert!(err.is_wait_timeout());
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_until_sleeps_only_up_to_deadline() {
        let started = Instant::now();
        let met = poll_until(Duration::from_secs(5), Duration::from_secs(4), || async {
            Ok(false)
        })
        .await;
        assert!(!met);
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }
}
