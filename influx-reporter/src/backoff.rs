// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Reconnect pacing.
//!
//! Every write error makes the reporter rebuild its client. Against a database that is down,
//! that would otherwise turn into a rebuild per failed flush, so rebuilds are delayed with
//! exponential backoff and capped per time window.

use std::{collections::VecDeque, time::Duration};

use rand::Rng;
use tokio::time::Instant;

/// How reconnects are paced.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect after a healthy period
    pub initial_delay: Duration,
    /// Upper bound of the (pre-jitter) delay
    pub max_delay: Duration,
    /// Growth factor of the delay per consecutive failure
    pub multiplier: f64,
    /// Fraction of the delay that is randomized, in `[0, 1]`
    pub jitter: f64,
    /// Reconnect attempts allowed per `window`
    pub max_attempts: usize,
    /// Length of the sliding window `max_attempts` applies to
    pub window: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.1,
            max_attempts: 10,
            window: Duration::from_secs(60),
        }
    }
}

/// When the next reconnect may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NextAttempt {
    pub(crate) delay: Duration,
    /// The window cap pushed the attempt out further than the backoff alone would have
    pub(crate) throttled: bool,
}

/// Backoff state of one reporter.
#[derive(Debug)]
pub(crate) struct Backoff {
    policy: ReconnectPolicy,
    failures: u32,
    // start times of the attempts still inside the window, oldest first
    attempts: VecDeque<Instant>,
}

impl Backoff {
    pub(crate) fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            failures: 0,
            attempts: VecDeque::new(),
        }
    }

    /// Schedule the next attempt, counting it against the window.
    pub(crate) fn next_attempt(&mut self, now: Instant) -> NextAttempt {
        let mut delay = self.jittered(self.base_delay());
        self.failures = self.failures.saturating_add(1);

        let window = self.policy.window;
        while self
            .attempts
            .front()
            .is_some_and(|&start| start + window <= now)
        {
            self.attempts.pop_front();
        }

        let mut throttled = false;
        let max_attempts = self.policy.max_attempts.max(1);
        if self.attempts.len() >= max_attempts {
            // the oldest attempt that has to leave the window before this one fits
            let idx = self.attempts.len() - max_attempts;
            let frees_at = self.attempts[idx] + window;
            let wait = frees_at.saturating_duration_since(now);
            if wait > delay {
                delay = wait;
                throttled = true;
            }
        }
        self.attempts.push_back(now + delay);
        NextAttempt { delay, throttled }
    }

    /// Forget consecutive failures after a healthy pass. The window is kept.
    pub(crate) fn reset(&mut self) {
        self.failures = 0;
    }

    pub(crate) fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    fn base_delay(&self) -> Duration {
        let factor = self.policy.multiplier.max(1.0).powi(self.failures.min(64) as i32);
        let max = self.policy.max_delay.max(self.policy.initial_delay);
        let secs = self.policy.initial_delay.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= max.as_secs_f64() {
            max
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let jitter = self.policy.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return delay;
        }
        // uniformly in [delay * (1 - jitter), delay]
        let scale = 1.0 - jitter * rand::rng().random::<f64>();
        delay.mul_f64(scale)
    }
}
