//! Poll until a predicate holds or attempts run out.
//!
//! Used above the execution engine for "is the app up yet" style checks:
//!
//! ```ignore
//! let outcome = poll_until(10, POLL_INTERVAL, |_| async {
//!     executor.run(&endpoint, "curl -sf localhost:3000").await
//!         .is_ok_and(|out| out.success())
//! }).await;
//! ```

use std::future::Future;
use std::time::Duration;

/// How a poll ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The probe returned true on this (1-based) attempt.
    Satisfied {
        /// Attempt number that succeeded.
        attempt: u32,
    },
    /// Every attempt returned false.
    Exhausted {
        /// Number of attempts made.
        attempts: u32,
    },
}

impl PollOutcome {
    /// True if the predicate was satisfied.
    #[must_use]
    pub fn is_satisfied(self) -> bool {
        matches!(self, Self::Satisfied { .. })
    }
}

/// Call `probe` up to `attempts` times, sleeping `interval` between calls.
///
/// The probe receives the 1-based attempt number. No sleep follows the
/// final attempt.
pub async fn poll_until<F, Fut>(attempts: u32, interval: Duration, mut probe: F) -> PollOutcome
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = bool>,
{
    for attempt in 1..=attempts {
        if probe(attempt).await {
            return PollOutcome::Satisfied { attempt };
        }
        log::debug!("poll attempt {attempt}/{attempts} not satisfied");
        if attempt < attempts {
            tokio::time::sleep(interval).await;
        }
    }
    PollOutcome::Exhausted { attempts }
}
