//! Completion reports ("invoices").
//!
//! Every source that is both active and completed gets a report. A 2xx
//! acknowledgement resets the source; any other outcome leaves it complete
//! and schedules another attempt under the [`RetryPolicy`].

use crate::clock::Millis;
use crate::source::{SourceId, SourceTable};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Exponential backoff between failed report attempts.
///
/// The delay after the n-th consecutive failure is
/// `initial_delay_ms * multiplier^(n-1)`, capped at `max_delay_ms`. Once
/// `max_attempts` failures pile up the failure is logged at error level and
/// attempts continue at the capped delay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryPolicy {
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u32,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u32,
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_initial_delay() -> u32 {
    1_000
}

fn default_max_delay() -> u32 {
    60_000
}

fn default_multiplier() -> u32 {
    2
}

fn default_max_attempts() -> u32 {
    10
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            multiplier: default_multiplier(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl RetryPolicy {
    /// Retry on the very next tick, forever.
    pub fn immediate() -> Self {
        Self {
            initial_delay_ms: 0,
            max_delay_ms: 0,
            multiplier: 1,
            max_attempts: u32::MAX,
        }
    }

    pub fn delay_after(&self, failures: u32) -> u32 {
        if failures == 0 {
            return 0;
        }
        let mut delay = u64::from(self.initial_delay_ms);
        for _ in 1..failures {
            delay = delay.saturating_mul(u64::from(self.multiplier));
            if delay >= u64::from(self.max_delay_ms) {
                break;
            }
        }
        delay.min(u64::from(self.max_delay_ms)) as u32
    }
}

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

/// Body of `POST /api/device/{id}/request-invoice/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceReport {
    pub amount: f64,
    pub description: String,
    /// Configured constant; unrelated to the accumulated command duration.
    pub duration_sec: i64,
}

/// A report the loop should send now.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRequest {
    pub source: SourceId,
    /// Source generation the report was built for.
    pub generation: u64,
    pub report: InvoiceReport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    /// The server answered with this status.
    Status(u16),
    /// No response at all.
    Failed(String),
}

impl ReportOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ReportOutcome::Status(s) if (200..300).contains(s))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Attempts {
    failures: u32,
    next_at: Option<Millis>,
    in_flight: bool,
    escalated: bool,
}

// ---------------------------------------------------------------------------
// CompletionNotifier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CompletionNotifier {
    invoice: InvoiceReport,
    policy: RetryPolicy,
    attempts: Vec<Attempts>,
}

impl CompletionNotifier {
    pub fn new(invoice: InvoiceReport, policy: RetryPolicy, source_count: usize) -> Self {
        Self {
            invoice,
            policy,
            attempts: vec![Attempts::default(); source_count],
        }
    }

    pub fn failures(&self, source: SourceId) -> u32 {
        self.attempts.get(source).map_or(0, |a| a.failures)
    }

    pub fn in_flight(&self, source: SourceId) -> bool {
        self.attempts.get(source).is_some_and(|a| a.in_flight)
    }

    /// Reports due at `now`. Each returned request is marked in flight until
    /// [`acknowledge`](Self::acknowledge) is called for it.
    pub fn due_reports(&mut self, sources: &SourceTable, now: Millis) -> Vec<ReportRequest> {
        let mut due = Vec::new();
        for (id, source) in sources.iter() {
            let Some(attempt) = self.attempts.get_mut(id) else {
                continue;
            };
            if attempt.in_flight {
                continue;
            }
            if !(source.is_active() && source.is_completed()) {
                *attempt = Attempts::default();
                continue;
            }
            if attempt.next_at.is_some_and(|t| !now.reached(t)) {
                continue;
            }
            attempt.in_flight = true;
            due.push(ReportRequest {
                source: id,
                generation: source.generation(),
                report: self.invoice.clone(),
            });
        }
        due
    }

    /// Apply the server's answer to a report sent for `generation`.
    ///
    /// Returns `true` when the source was reset.
    pub fn acknowledge(
        &mut self,
        sources: &mut SourceTable,
        source: SourceId,
        generation: u64,
        outcome: ReportOutcome,
        now: Millis,
    ) -> bool {
        let Some(attempt) = self.attempts.get_mut(source) else {
            return false;
        };
        attempt.in_flight = false;
        let Some(record) = sources.get_mut(source) else {
            return false;
        };
        let device = record.device_id().to_string();

        if outcome.is_success() {
            *attempt = Attempts::default();
            if record.generation() != generation {
                // A new command arrived while the report was in flight.
                tracing::info!(device = %device, "report acknowledged for superseded command");
                return false;
            }
            record.reset();
            tracing::info!(device = %device, "completion report acknowledged");
            return true;
        }

        attempt.failures = attempt.failures.saturating_add(1);
        let delay = self.policy.delay_after(attempt.failures);
        attempt.next_at = Some(now.after(delay));

        let failure = match &outcome {
            ReportOutcome::Status(s) => format!("status {s}"),
            ReportOutcome::Failed(reason) => reason.clone(),
        };
        if attempt.failures >= self.policy.max_attempts && !attempt.escalated {
            attempt.escalated = true;
            tracing::error!(
                device = %device,
                attempt = attempt.failures,
                failure = %failure,
                "completion report keeps failing; retrying every {}ms",
                self.policy.max_delay_ms
            );
        } else {
            tracing::warn!(
                device = %device,
                attempt = attempt.failures,
                retry_in_ms = delay,
                failure = %failure,
                "completion report failed"
            );
        }
        false
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: u32) -> Millis {
        Millis::from_raw(ms)
    }

    fn invoice() -> InvoiceReport {
        InvoiceReport {
            amount: 2.5,
            description: "wash cycle".into(),
            duration_sec: 300,
        }
    }

    fn completed_table() -> SourceTable {
        let mut table = SourceTable::new(["DEV001"]);
        let s = table.get_mut(0).unwrap();
        s.accept(10, at(0));
        s.check_deadline(at(10_000));
        table
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            initial_delay_ms: 500,
            max_delay_ms: 4_000,
            multiplier: 2,
            max_attempts: 5,
        };
        let delays: Vec<u32> = (0..7).map(|n| policy.delay_after(n)).collect();
        assert_eq!(delays, vec![0, 500, 1_000, 2_000, 4_000, 4_000, 4_000]);
    }

    #[test]
    fn immediate_policy_never_waits() {
        let policy = RetryPolicy::immediate();
        assert_eq!(policy.delay_after(1), 0);
        assert_eq!(policy.delay_after(1_000), 0);
    }

    #[test]
    fn report_carries_configured_invoice() {
        let mut table = completed_table();
        let mut n = CompletionNotifier::new(invoice(), RetryPolicy::default(), 1);
        let due = n.due_reports(&table, at(10_000));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].report.duration_sec, 300);
        assert!(n.in_flight(0));
        assert!(n.due_reports(&table, at(10_010)).is_empty());

        let generation = due[0].generation;
        assert!(n.acknowledge(&mut table, 0, generation, ReportOutcome::Status(201), at(10_050)));
        assert!(!table.get(0).unwrap().is_active());
        assert!(n.due_reports(&table, at(10_060)).is_empty());
    }

    #[test]
    fn failure_keeps_state_and_backs_off() {
        let mut table = completed_table();
        let mut n = CompletionNotifier::new(invoice(), RetryPolicy::default(), 1);
        let due = n.due_reports(&table, at(10_000));
        n.acknowledge(&mut table, 0, due[0].generation, ReportOutcome::Status(500), at(10_000));

        assert!(table.get(0).unwrap().is_completed());
        assert_eq!(n.failures(0), 1);
        assert!(n.due_reports(&table, at(10_999)).is_empty());
        assert_eq!(n.due_reports(&table, at(11_000)).len(), 1);
    }

    #[test]
    fn transport_error_counts_as_failure() {
        let mut table = completed_table();
        let mut n = CompletionNotifier::new(invoice(), RetryPolicy::immediate(), 1);
        let due = n.due_reports(&table, at(10_000));
        let reset = n.acknowledge(
            &mut table,
            0,
            due[0].generation,
            ReportOutcome::Failed("connection refused".into()),
            at(10_000),
        );
        assert!(!reset);
        assert_eq!(n.due_reports(&table, at(10_000)).len(), 1);
    }

    #[test]
    fn stale_acknowledgement_does_not_reset_new_command() {
        let mut table = completed_table();
        let mut n = CompletionNotifier::new(invoice(), RetryPolicy::default(), 1);
        let due = n.due_reports(&table, at(10_000));
        table.get_mut(0).unwrap().accept(5, at(10_020));

        let reset = n.acknowledge(&mut table, 0, due[0].generation, ReportOutcome::Status(200), at(10_040));
        assert!(!reset);
        let s = table.get(0).unwrap();
        assert!(s.is_active());
        assert_eq!(s.accepted_secs(), 15);
    }

    #[test]
    fn only_2xx_counts_as_success() {
        assert!(ReportOutcome::Status(200).is_success());
        assert!(ReportOutcome::Status(299).is_success());
        assert!(!ReportOutcome::Status(300).is_success());
        assert!(!ReportOutcome::Status(199).is_success());
        assert!(!ReportOutcome::Failed("x".into()).is_success());
    }

    #[test]
    fn invoice_body_shape() {
        let json = serde_json::to_value(invoice()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"amount": 2.5, "description": "wash cycle", "duration_sec": 300})
        );
    }
}
