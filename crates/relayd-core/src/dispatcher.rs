//! Poll cadence, source rotation and the single pending-trigger slot.
//!
//! A poll is started only when all of these hold:
//!
//! 1. no trigger is waiting for a channel,
//! 2. the pool has at least one idle channel,
//! 3. `poll_interval_ms` has passed since the previous attempt (any source),
//! 4. no earlier poll is still in flight.
//!
//! The cursor stays on a source whose poll was actionable and moves to the
//! next source otherwise, so a device with real work is drained first.

use crate::body::{Command, PollResponse};
use crate::channel::ChannelPool;
use crate::clock::Millis;
use crate::source::{SourceId, SourceTable};
use serde::Serialize;

pub const DEFAULT_POLL_INTERVAL_MS: u32 = 5_000;

/// Result of one poll as seen by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Response(PollResponse),
    /// Transport error or non-2xx status.
    Failed(String),
}

/// A trigger accepted from a source and waiting for an idle channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PendingTrigger {
    /// Originating source; cleared if that source is reset before the
    /// trigger is consumed.
    pub source: Option<SourceId>,
    pub cooldown_ms: u32,
}

/// What a poll result did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Failed,
    Cleared,
    NoChange,
    /// Source updated and a new pending trigger created.
    Queued,
    /// Source updated; a trigger was already outstanding.
    Accepted,
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    poll_interval_ms: u32,
    cursor: SourceId,
    last_poll: Option<Millis>,
    in_flight: Option<SourceId>,
    pending: Option<PendingTrigger>,
}

impl Dispatcher {
    pub fn new(poll_interval_ms: u32) -> Self {
        Self {
            poll_interval_ms,
            cursor: 0,
            last_poll: None,
            in_flight: None,
            pending: None,
        }
    }

    pub fn cursor(&self) -> SourceId {
        self.cursor
    }

    pub fn pending(&self) -> Option<PendingTrigger> {
        self.pending
    }

    pub fn poll_in_flight(&self) -> Option<SourceId> {
        self.in_flight
    }

    pub fn should_poll(&self, pool: &ChannelPool, now: Millis) -> bool {
        if self.in_flight.is_some() || self.pending.is_some() || !pool.has_available() {
            return false;
        }
        match self.last_poll {
            None => true,
            // Elapsed time, not `reached`: the stamp is not refreshed while the
            // other gates are closed and may be older than the comparable span.
            Some(last) => now.since(last) >= self.poll_interval_ms,
        }
    }

    /// Record a poll attempt against the cursor source and return it.
    pub fn begin_poll(&mut self, now: Millis) -> SourceId {
        self.last_poll = Some(now);
        self.in_flight = Some(self.cursor);
        self.cursor
    }

    /// Apply a finished poll of `source` to the source table.
    pub fn apply(
        &mut self,
        sources: &mut SourceTable,
        source: SourceId,
        outcome: PollOutcome,
        now: Millis,
    ) -> Applied {
        if self.in_flight == Some(source) {
            self.in_flight = None;
        }
        let count = sources.len();
        let Some(record) = sources.get_mut(source) else {
            tracing::warn!(source, "poll result for unknown source ignored");
            return Applied::NoChange;
        };
        let device = record.device_id().to_string();

        let response = match outcome {
            PollOutcome::Response(r) => r,
            PollOutcome::Failed(reason) => {
                tracing::warn!(device = %device, reason = %reason, "poll failed");
                self.advance_past(source, count);
                return Applied::Failed;
            }
        };

        match response.command() {
            Command::Clear => {
                if record.reset() {
                    tracing::info!(device = %device, "command cleared by server");
                }
                if let Some(p) = self.pending.as_mut() {
                    if p.source == Some(source) {
                        p.source = None;
                    }
                }
                self.advance_past(source, count);
                Applied::Cleared
            }
            Command::Nothing => {
                self.advance_past(source, count);
                Applied::NoChange
            }
            Command::Trigger(trigger) => {
                record.accept(trigger.deadline_extension_secs, now);
                tracing::info!(
                    device = %device,
                    duration_sec = trigger.deadline_extension_secs,
                    total_sec = record.accepted_secs(),
                    "command accepted"
                );
                self.cursor = source;
                if self.pending.is_some() {
                    tracing::debug!(device = %device, "trigger already outstanding");
                    return Applied::Accepted;
                }
                self.pending = Some(PendingTrigger {
                    source: Some(source),
                    cooldown_ms: trigger.pulse_cooldown_ms,
                });
                Applied::Queued
            }
        }
    }

    /// Hand the pending trigger to the pool. Consumed exactly once.
    pub fn take_pending(&mut self) -> Option<PendingTrigger> {
        self.pending.take()
    }

    fn advance_past(&mut self, source: SourceId, count: usize) {
        if count > 0 {
            self.cursor = (source + 1) % count;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
