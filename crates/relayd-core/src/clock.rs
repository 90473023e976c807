//! Wrap-safe monotonic time.
//!
//! All scheduling decisions compare [`Millis`] values produced by a [`Clock`].
//! The counter is 32 bits wide and wraps roughly every 49.7 days; comparisons
//! go through [`Millis::reached`], which looks at the signed difference so
//! they stay correct across the rollover as long as the two instants are less
//! than [`MAX_SPAN_MS`] apart.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Largest span, in milliseconds, that can be compared without ambiguity.
pub const MAX_SPAN_MS: u32 = i32::MAX as u32;

/// A point on the wrapping millisecond counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Millis(u32);

impl Millis {
    pub const ZERO: Millis = Millis(0);

    pub const fn from_raw(ms: u32) -> Self {
        Self(ms)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// The instant `ms` milliseconds after `self`, wrapping.
    ///
    /// Spans above [`MAX_SPAN_MS`] are clamped so the result still compares
    /// as "in the future" relative to `self`.
    pub fn after(self, ms: u32) -> Self {
        Self(self.0.wrapping_add(ms.min(MAX_SPAN_MS)))
    }

    /// `true` once `self` is at or past `target`.
    pub fn reached(self, target: Millis) -> bool {
        (self.0.wrapping_sub(target.0) as i32) >= 0
    }

    /// Milliseconds elapsed from `earlier` to `self`, wrapping.
    pub fn since(self, earlier: Millis) -> u32 {
        self.0.wrapping_sub(earlier.0)
    }
}

/// Source of "now" for the control loop.
pub trait Clock {
    fn now(&self) -> Millis;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Millis {
        (**self).now()
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Millis {
        (**self).now()
    }
}

/// Process-local monotonic clock backed by [`std::time::Instant`].
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Millis {
        // Truncation to 32 bits is the wrap.
        Millis(self.origin.elapsed().as_millis() as u32)
    }
}

/// Hand-driven clock for deterministic tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU32,
}

impl ManualClock {
    pub fn starting_at(ms: u32) -> Self {
        Self {
            now: AtomicU32::new(ms),
        }
    }

    pub fn advance(&self, ms: u32) {
        // fetch_add wraps on overflow.
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u32) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Millis {
        Millis(self.now.load(Ordering::SeqCst))
    }
}
