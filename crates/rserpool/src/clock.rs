// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Microsecond clocks.
//!
//! Handlespace timers, registrar expiry and request deadlines are all absolute
//! microsecond timestamps. The engine reads time through [`Clock`] so tests can
//! drive expiry deterministically with [`ManualClock`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of monotonic microsecond timestamps.
pub trait Clock: Send + Sync {
    /// Current time in microseconds.
    fn now(&self) -> u64;
}

/// Monotonic clock anchored at construction time.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        // Offset by one second so that zero never denotes a valid timestamp.
        let elapsed = self.origin.elapsed().as_micros();
        u64::try_from(elapsed).unwrap_or(u64::MAX - 1_000_000) + 1_000_000
    }
}

/// Manually advanced clock for deterministic tests.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start)),
        }
    }

    /// Set the absolute time.
    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Advance by `micros`.
    pub fn advance(&self, micros: u64) {
        self.now.fetch_add(micros, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Convert a microsecond count into a [`Duration`].
pub fn micros(us: u64) -> Duration {
    Duration::from_micros(us)
}
