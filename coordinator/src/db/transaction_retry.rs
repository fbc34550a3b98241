// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Helper types for performing automatic transaction retries

use chrono::Utc;
use rand::{thread_rng, Rng};
use slog::Logger;
use std::sync::Mutex;
use std::time::Duration;

struct RetryHelperInner {
    start: chrono::DateTime<Utc>,
    attempts: u32,
}

impl RetryHelperInner {
    fn new() -> Self {
        Self { start: Utc::now(), attempts: 1 }
    }

    fn tick(&mut self) -> Self {
        let start = self.start;
        let attempts = self.attempts;

        self.start = Utc::now();
        self.attempts += 1;

        Self { start, attempts }
    }
}

/// Helper utility for tracking retry attempts and latency.
/// Intended to be used from within "transaction_with_retry".
pub(crate) struct RetryHelper {
    log: Logger,
    name: &'static str,
    max_attempts: u32,
    max_backoff: Duration,
    inner: Mutex<RetryHelperInner>,
}

const MIN_RETRY_BACKOFF: Duration = Duration::from_millis(0);

impl RetryHelper {
    /// Creates a new RetryHelper, and starts a timer tracking the transaction
    /// duration.
    pub(crate) fn new(
        log: &Logger,
        name: &'static str,
        max_attempts: u32,
        max_backoff: Duration,
    ) -> Self {
        Self {
            log: log.new(slog::o!("transaction" => name)),
            name,
            max_attempts,
            max_backoff,
            inner: Mutex::new(RetryHelperInner::new()),
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn attempt(&self) -> u32 {
        self.inner.lock().unwrap().attempts
    }

    // Called when a transaction aborted because one of its preconditions no
    // longer held.
    //
    // This function:
    // - Logs the duration of the failed attempt
    // - Performs a random (uniform) backoff, less than `max_backoff`
    // - Returns "true" if the transaction should be rebuilt and attempted
    //   again
    pub(crate) async fn retry_callback(&self) -> bool {
        let (start, attempt) = {
            let inner = self.inner.lock().unwrap();
            (inner.start, inner.attempts)
        };

        let latency = (Utc::now() - start)
            .to_std()
            .unwrap_or(Duration::ZERO)
            .as_secs_f64();
        slog::debug!(
            self.log,
            "transaction attempt aborted";
            "attempt" => attempt,
            "latency_secs" => latency,
        );

        if attempt >= self.max_attempts {
            return false;
        }

        let duration = if self.max_backoff > MIN_RETRY_BACKOFF {
            let mut rng = thread_rng();
            rng.gen_range(MIN_RETRY_BACKOFF..self.max_backoff)
        } else {
            MIN_RETRY_BACKOFF
        };
        tokio::time::sleep(duration).await;

        // Now that we've finished sleeping, reset the timer and bump the number
        // of attempts we've tried.
        self.inner.lock().unwrap().tick();
        true
    }
}
