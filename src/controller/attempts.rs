//! Pacing of retries for Failed tenants
//!
//! Every status patch the controller makes wakes it up again. A Failed
//! tenant would otherwise re-run issuance on its own `Failed` patch and
//! block on the secret waiter each time.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

#[derive(Clone, Copy, Debug)]
struct Attempt {
    at: Instant,
    generation: Option<i64>,
}

/// When each tenant last failed issuance, keyed by `namespace/name`
#[derive(Debug, Default)]
pub struct FailedAttempts {
    attempts: DashMap<String, Attempt>,
}

impl FailedAttempts {
    /// Note a failed attempt against the tenant's current generation
    pub fn record(&self, key: &str, generation: Option<i64>) {
        self.attempts.insert(
            key.to_string(),
            Attempt {
                at: Instant::now(),
                generation,
            },
        );
    }

    /// Forget the tenant after it recovers or is deleted
    pub fn clear(&self, key: &str) {
        self.attempts.remove(key);
    }

    /// Time left before the tenant may be retried.
    ///
    /// `None` when it never failed, when `period` has passed, or when its
    /// spec changed since the failure.
    pub fn remaining(
        &self,
        key: &str,
        generation: Option<i64>,
        period: Duration,
    ) -> Option<Duration> {
        let attempt = *self.attempts.get(key)?;
        if attempt.generation != generation {
            return None;
        }
        period
            .checked_sub(attempt.at.elapsed())
            .filter(|left| !left.is_zero())
    }
}
