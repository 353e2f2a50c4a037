// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{
    sync::OnceLock,
    time::{Duration, Instant},
};

#[doc(hidden)]
pub(crate) fn secs_since_process_epoch() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    Instant::now()
        .duration_since(*EPOCH.get_or_init(Instant::now))
        .as_secs()
}

#[doc(hidden)]
pub(crate) fn interval_secs(interval: Duration) -> u64 {
    interval.as_secs().max(1)
}

/// `rate_limited!(duration, expr)` evaluates `expr` at most once every `duration` (rounded up
/// to a whole second) per call site, across all threads.
///
/// Used for warnings raised from hot or retrying paths, so that a stuck database shows up in
/// the logs without drowning them.
macro_rules! rate_limited {
    ($interval:expr, $call:expr) => {{
        use std::sync::atomic::{AtomicU64, Ordering};
        static NEXT_CALL: AtomicU64 = AtomicU64::new(0);
        let now = $crate::rate_limit::secs_since_process_epoch();
        let next = NEXT_CALL.load(Ordering::Relaxed);
        if next <= now
            && NEXT_CALL
                .compare_exchange(
                    next,
                    now.saturating_add($crate::rate_limit::interval_secs($interval)),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                )
                .is_ok()
        {
            $call;
        }
    }};
}
pub(crate) use rate_limited;

#[cfg(test)]
mod tests {
    use std::{cell::Cell, time::Duration};

    #[test]
    fn first_call_goes_through_then_is_suppressed() {
        let counter = Cell::new(0u64);
        let incr = || rate_limited!(Duration::from_secs(3600), counter.set(counter.get() + 1));
        incr();
        assert_eq!(counter.get(), 1);
        for _ in 0..1000 {
            incr();
        }
        assert_eq!(counter.get(), 1);
    }
}
