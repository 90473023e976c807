//! The single owner of all scheduling state.
//!
//! `Controller::tick` is one pass of the control loop. It never blocks: work
//! that needs the network comes back as [`Request`] values, and the caller
//! feeds the answers in later through [`Controller::complete_poll`] and
//! [`Controller::complete_report`].
//!
//! Order within a tick:
//!
//! 1. end pulses and expire cooldowns,
//! 2. hand the pending trigger to an idle channel,
//! 3. run the service pulse policy,
//! 4. flip sources whose deadline has passed,
//! 5. emit due completion reports,
//! 6. emit a poll if the dispatcher's gates are all open.
//!
//! Steps 4 and 5 do not depend on channel availability or poll cadence.

use crate::channel::{ChannelPool, ChannelState};
use crate::clock::Millis;
use crate::config::Config;
use crate::dispatcher::{Applied, Dispatcher, PendingTrigger, PollOutcome};
use crate::notifier::{CompletionNotifier, InvoiceReport, ReportOutcome};
use crate::output::RelayOutput;
use crate::service::{InputSource, ServicePolicy};
use crate::source::{SourceId, SourcePhase, SourceTable};
use serde::Serialize;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Network work produced by a tick.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Poll {
        source: SourceId,
        device_id: String,
    },
    Report {
        source: SourceId,
        device_id: String,
        generation: u64,
        report: InvoiceReport,
    },
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct SourceSnapshot {
    pub device_id: String,
    pub phase: SourcePhase,
    pub accepted_secs: u64,
    pub deadline: Option<Millis>,
    pub report_failures: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub channels: Vec<ChannelState>,
    pub sources: Vec<SourceSnapshot>,
    pub pending: Option<PendingTrigger>,
    pub poll_cursor: SourceId,
    pub poll_in_flight: Option<SourceId>,
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct Controller {
    pool: ChannelPool,
    sources: SourceTable,
    dispatcher: Dispatcher,
    notifier: CompletionNotifier,
    service: ServicePolicy,
    inputs: Box<dyn InputSource>,
}

impl Controller {
    pub fn new(config: &Config, output: Box<dyn RelayOutput>, inputs: Box<dyn InputSource>) -> Self {
        let pool = ChannelPool::new(config.channels, config.timing.pulse_width_ms, output);
        let sources = SourceTable::new(config.devices.iter().cloned());
        let notifier =
            CompletionNotifier::new(config.invoice.clone(), config.retry.clone(), sources.len());
        Self {
            pool,
            dispatcher: Dispatcher::new(config.timing.poll_interval_ms),
            notifier,
            service: ServicePolicy::new(config.service.clone(), config.channels),
            sources,
            inputs,
        }
    }

    pub fn pool(&self) -> &ChannelPool {
        &self.pool
    }

    pub fn sources(&self) -> &SourceTable {
        &self.sources
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn notifier(&self) -> &CompletionNotifier {
        &self.notifier
    }

    pub fn tick(&mut self, now: Millis) -> Vec<Request> {
        self.pool.tick(now);

        if self.dispatcher.pending().is_some() {
            if let Some(channel) = self.pool.pick() {
                if let Some(trigger) = self.dispatcher.take_pending() {
                    self.pool.fire(channel, trigger.cooldown_ms, now);
                    tracing::info!(
                        channel,
                        cooldown_ms = trigger.cooldown_ms,
                        source = ?trigger.source,
                        "trigger fired"
                    );
                }
            }
        }

        if !self.service.is_empty() {
            self.service.tick(&mut self.pool, self.inputs.as_ref(), now);
        }

        for id in self.sources.check_deadlines(now) {
            if let Some(s) = self.sources.get(id) {
                tracing::info!(device = %s.device_id(), accepted_sec = s.accepted_secs(), "command complete");
            }
        }

        let mut requests: Vec<Request> = self
            .notifier
            .due_reports(&self.sources, now)
            .into_iter()
            .map(|r| Request::Report {
                source: r.source,
                device_id: self.device_id(r.source),
                generation: r.generation,
                report: r.report,
            })
            .collect();

        if !self.sources.is_empty() && self.dispatcher.should_poll(&self.pool, now) {
            let source = self.dispatcher.begin_poll(now);
            requests.push(Request::Poll {
                source,
                device_id: self.device_id(source),
            });
        }

        requests
    }

    pub fn complete_poll(&mut self, source: SourceId, outcome: PollOutcome, now: Millis) -> Applied {
        self.dispatcher.apply(&mut self.sources, source, outcome, now)
    }

    /// Returns `true` when the acknowledgement reset the source.
    pub fn complete_report(
        &mut self,
        source: SourceId,
        generation: u64,
        outcome: ReportOutcome,
        now: Millis,
    ) -> bool {
        self.notifier
            .acknowledge(&mut self.sources, source, generation, outcome, now)
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            channels: self.pool.states().to_vec(),
            sources: self
                .sources
                .iter()
                .map(|(id, s)| SourceSnapshot {
                    device_id: s.device_id().to_string(),
                    phase: s.phase(),
                    accepted_secs: s.accepted_secs(),
                    deadline: s.deadline(),
                    report_failures: self.notifier.failures(id),
                })
                .collect(),
            pending: self.dispatcher.pending(),
            poll_cursor: self.dispatcher.cursor(),
            poll_in_flight: self.dispatcher.poll_in_flight(),
        }
    }

    /// Switch all outputs off.
    pub fn shutdown(&mut self) {
        self.pool.shutdown();
    }

    fn device_id(&self, source: SourceId) -> String {
        self.sources
            .get(source)
            .map(|s| s.device_id().to_string())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
