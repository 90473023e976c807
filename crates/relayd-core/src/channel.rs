//! Round-robin relay arbiter.
//!
//! `ChannelPool` is the only thing allowed to drive a relay output. A fire
//! starts a fixed-width pulse and, at the same instant, arms a cooldown window
//! measured from the trigger time. When the pulse ends the channel rests in
//! `Cooling` until that window has passed, then becomes `Idle` again.

use crate::clock::Millis;
use crate::output::RelayOutput;
use serde::Serialize;

pub const DEFAULT_PULSE_WIDTH_MS: u32 = 1_000;
pub const DEFAULT_CHANNEL_COUNT: usize = 4;

// ---------------------------------------------------------------------------
// ChannelState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ChannelState {
    Idle,
    /// Output on until `ends_at`; the cooldown window closes at `cool_until`.
    Firing { ends_at: Millis, cool_until: Millis },
    /// Output off, not eligible until `until`.
    Cooling { until: Millis },
}

impl ChannelState {
    pub fn is_idle(&self) -> bool {
        matches!(self, ChannelState::Idle)
    }
}

// ---------------------------------------------------------------------------
// ChannelPool
// ---------------------------------------------------------------------------

pub struct ChannelPool {
    states: Vec<ChannelState>,
    /// Index handed out by the most recent `fire`; `pick` scans from the next one.
    last: Option<usize>,
    pulse_width_ms: u32,
    output: Box<dyn RelayOutput>,
}

impl std::fmt::Debug for ChannelPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelPool")
            .field("states", &self.states)
            .field("last", &self.last)
            .field("pulse_width_ms", &self.pulse_width_ms)
            .finish_non_exhaustive()
    }
}

impl ChannelPool {
    /// Create `count` idle channels and switch every output off.
    pub fn new(count: usize, pulse_width_ms: u32, mut output: Box<dyn RelayOutput>) -> Self {
        for ch in 0..count {
            output.set(ch, false);
        }
        Self {
            states: vec![ChannelState::Idle; count],
            last: None,
            pulse_width_ms,
            output,
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn pulse_width_ms(&self) -> u32 {
        self.pulse_width_ms
    }

    pub fn state(&self, channel: usize) -> Option<ChannelState> {
        self.states.get(channel).copied()
    }

    pub fn states(&self) -> &[ChannelState] {
        &self.states
    }

    pub fn is_available(&self, channel: usize) -> bool {
        self.states.get(channel).is_some_and(ChannelState::is_idle)
    }

    pub fn has_available(&self) -> bool {
        self.states.iter().any(ChannelState::is_idle)
    }

    /// Next available channel after the last allocation, wrapping.
    pub fn pick(&self) -> Option<usize> {
        let n = self.states.len();
        if n == 0 {
            return None;
        }
        let start = self.last.map(|l| (l + 1) % n).unwrap_or(0);
        (0..n)
            .map(|offset| (start + offset) % n)
            .find(|&ch| self.is_available(ch))
    }

    /// Start a pulse on `channel` and arm a `cooldown_ms` window from `now`.
    /// The channel becomes the rotation point for the next [`pick`](Self::pick).
    ///
    /// Returns `false` (and leaves everything untouched) when the channel does
    /// not exist or is not idle.
    pub fn fire(&mut self, channel: usize, cooldown_ms: u32, now: Millis) -> bool {
        if !self.start_pulse(channel, cooldown_ms, now) {
            return false;
        }
        self.last = Some(channel);
        true
    }

    /// Like [`fire`](Self::fire) but leaves the rotation point alone, for
    /// pulses that were not handed out by `pick`.
    pub fn fire_out_of_turn(&mut self, channel: usize, cooldown_ms: u32, now: Millis) -> bool {
        self.start_pulse(channel, cooldown_ms, now)
    }

    fn start_pulse(&mut self, channel: usize, cooldown_ms: u32, now: Millis) -> bool {
        if !self.is_available(channel) {
            tracing::warn!(channel, "fire ignored: channel missing or busy");
            return false;
        }
        self.states[channel] = ChannelState::Firing {
            ends_at: now.after(self.pulse_width_ms),
            cool_until: now.after(cooldown_ms),
        };
        self.output.set(channel, true);
        tracing::debug!(channel, cooldown_ms, "channel firing");
        true
    }

    /// End pulses and expire cooldowns that are due at `now`.
    pub fn tick(&mut self, now: Millis) {
        for channel in 0..self.states.len() {
            match self.states[channel] {
                ChannelState::Firing {
                    ends_at,
                    cool_until,
                } if now.reached(ends_at) => {
                    self.output.set(channel, false);
                    self.states[channel] = if now.reached(cool_until) {
                        ChannelState::Idle
                    } else {
                        ChannelState::Cooling { until: cool_until }
                    };
                    tracing::debug!(channel, "pulse ended");
                }
                ChannelState::Cooling { until } if now.reached(until) => {
                    self.states[channel] = ChannelState::Idle;
                    tracing::debug!(channel, "cooldown expired");
                }
                _ => {}
            }
        }
    }

    /// Switch every output off and forget pulses in progress.
    pub fn shutdown(&mut self) {
        for channel in 0..self.states.len() {
            self.output.set(channel, false);
            self.states[channel] = ChannelState::Idle;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
