// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Where the reporter reads "now" from.
//!
//! Production code uses the system clock. Tests can swap in a fixed clock, or one that follows
//! tokio's paused time so that point timestamps line up with `tokio::time::advance`.

use std::{
    fmt::Debug,
    sync::{Arc, Mutex},
    time::SystemTime,
};

/// A custom clock.
pub trait Time: Send + Sync + Debug {
    /// Current wall-clock time
    fn now(&self) -> SystemTime;
}

/// Source of timestamps for exported points. Defaults to the system clock.
#[derive(Clone, Debug, Default)]
pub struct TimeSource(Inner);

#[derive(Clone, Debug, Default)]
enum Inner {
    #[default]
    System,
    Custom(Arc<dyn Time>),
}

impl TimeSource {
    /// The system clock
    pub fn system() -> Self {
        Self(Inner::System)
    }

    /// A custom clock
    pub fn custom(time: impl Time + 'static) -> Self {
        Self(Inner::Custom(Arc::new(time)))
    }

    /// A clock that starts at `starting_timestamp` and then advances with tokio's clock,
    /// including when it is paused and advanced manually.
    pub fn tokio(starting_timestamp: SystemTime) -> Self {
        Self::custom(TokioTime {
            start: tokio::time::Instant::now(),
            start_system_time: starting_timestamp,
        })
    }

    /// Current wall-clock time according to this source
    pub fn system_time(&self) -> SystemTime {
        match &self.0 {
            Inner::System => SystemTime::now(),
            Inner::Custom(time) => time.now(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TokioTime {
    start: tokio::time::Instant,
    start_system_time: SystemTime,
}

impl Time for TokioTime {
    fn now(&self) -> SystemTime {
        self.start_system_time + self.start.elapsed()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualTime(Arc<Mutex<SystemTime>>);

impl ManualTime {
    /// Create a clock stopped at `time`
    pub fn at_time(time: SystemTime) -> Self {
        Self(Arc::new(Mutex::new(time)))
    }

    /// Move the clock to `time`
    pub fn update_time(&self, time: SystemTime) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = time;
    }
}

impl Time for ManualTime {
    fn now(&self) -> SystemTime {
        *self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}
