//! Per-device command lifecycle.
//!
//! Transitions: `Idle → Waiting(deadline) → Complete → Idle`
//!
//! An actionable poll moves a source to `Waiting`, re-arming the deadline at
//! `now + running total` on every acceptance. The tick loop flips it to
//! `Complete` once the deadline is reached; an acknowledged completion report
//! or an explicit "no command" response returns it to `Idle`.

use crate::clock::{Millis, MAX_SPAN_MS};
use serde::Serialize;

/// Index of a source in its [`SourceTable`].
pub type SourceId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourcePhase {
    Idle,
    Waiting,
    Complete,
}

// ---------------------------------------------------------------------------
// CommandSource
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandSource {
    device_id: String,
    accepted_secs: u64,
    active: bool,
    deadline: Option<Millis>,
    completed: bool,
    /// Bumped on every accept and reset so late report acknowledgements can
    /// tell whether they still refer to the current command.
    #[serde(skip)]
    generation: u64,
}

impl CommandSource {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            accepted_secs: 0,
            active: false,
            deadline: None,
            completed: false,
            generation: 0,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn accepted_secs(&self) -> u64 {
        self.accepted_secs
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn deadline(&self) -> Option<Millis> {
        self.deadline
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn phase(&self) -> SourcePhase {
        match (self.active, self.completed) {
            (false, _) => SourcePhase::Idle,
            (true, false) => SourcePhase::Waiting,
            (true, true) => SourcePhase::Complete,
        }
    }

    /// Accept an actionable command and re-arm the deadline from `now`.
    ///
    /// The deadline is `now + accepted total`, not the previous deadline plus
    /// `extension_secs`.
    pub fn accept(&mut self, extension_secs: u32, now: Millis) {
        self.accepted_secs = self.accepted_secs.saturating_add(u64::from(extension_secs));
        self.active = true;
        self.completed = false;
        let span_ms = self
            .accepted_secs
            .saturating_mul(1_000)
            .min(u64::from(MAX_SPAN_MS)) as u32;
        self.deadline = Some(now.after(span_ms));
        self.generation += 1;
    }

    /// Return to `Idle`. Returns `false` when already idle, in which case
    /// nothing changes.
    pub fn reset(&mut self) -> bool {
        if self.is_idle() {
            return false;
        }
        self.accepted_secs = 0;
        self.active = false;
        self.deadline = None;
        self.completed = false;
        self.generation += 1;
        true
    }

    /// Mark complete once the deadline is reached. Returns `true` on the
    /// tick that flips `completed`.
    pub fn check_deadline(&mut self, now: Millis) -> bool {
        if !self.active || self.completed {
            return false;
        }
        match self.deadline {
            Some(deadline) if now.reached(deadline) => {
                self.completed = true;
                true
            }
            _ => false,
        }
    }

    fn is_idle(&self) -> bool {
        !self.active && !self.completed && self.accepted_secs == 0 && self.deadline.is_none()
    }
}

// ---------------------------------------------------------------------------
// SourceTable
// ---------------------------------------------------------------------------

/// The fixed set of sources, one per configured device id.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct SourceTable {
    sources: Vec<CommandSource>,
}

impl SourceTable {
    pub fn new<I, S>(device_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sources: device_ids.into_iter().map(CommandSource::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn get(&self, id: SourceId) -> Option<&CommandSource> {
        self.sources.get(id)
    }

    pub fn get_mut(&mut self, id: SourceId) -> Option<&mut CommandSource> {
        self.sources.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SourceId, &CommandSource)> {
        self.sources.iter().enumerate()
    }

    /// Run the deadline check on every source; returns the ones that just
    /// completed.
    pub fn check_deadlines(&mut self, now: Millis) -> Vec<SourceId> {
        self.sources
            .iter_mut()
            .enumerate()
            .filter_map(|(id, s)| s.check_deadline(now).then_some(id))
            .collect()
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

    #[test]
    fn accept_sets_deadline_from_now() {
        let mut s = CommandSource::new("DEV001");
        s.accept(10, at(2_000));
        assert!(s.is_active());
        assert!(!s.is_completed());
        assert_eq!(s.deadline(), Some(at(12_000)));
        assert_eq!(s.phase(), SourcePhase::Waiting);
    }

    #[test]
    fn each_acceptance_rearms_with_running_total() {
        let mut s = CommandSource::new("DEV001");
        let acceptances = [(0, 10), (4_000, 5), (7_500, 20)];
        let mut total = 0;
        for (t, d) in acceptances {
            s.accept(d, at(t));
            total += d;
            assert_eq!(s.deadline(), Some(at(t + total * 1_000)));
        }
        assert_eq!(s.accepted_secs(), 35);
    }

    #[test]
    fn deadline_flips_completed_once() {
        let mut s = CommandSource::new("DEV001");
        s.accept(10, at(0));
        assert!(!s.check_deadline(at(9_999)));
        assert!(s.check_deadline(at(10_000)));
        assert!(s.is_completed());
        assert!(!s.check_deadline(at(11_000)));
        assert_eq!(s.phase(), SourcePhase::Complete);
    }

    #[test]
    fn reacceptance_clears_completed() {
        let mut s = CommandSource::new("DEV001");
        s.accept(1, at(0));
        s.check_deadline(at(1_000));
        s.accept(1, at(1_500));
        assert!(!s.is_completed());
        assert_eq!(s.deadline(), Some(at(3_500)));
    }

    #[test]
    fn reset_clears_every_field_together() {
        let mut s = CommandSource::new("DEV001");
        s.accept(10, at(0));
        s.check_deadline(at(10_000));
        assert!(s.reset());
        assert_eq!(s.accepted_secs(), 0);
        assert!(!s.is_active());
        assert!(!s.is_completed());
        assert_eq!(s.deadline(), None);
        assert_eq!(s.phase(), SourcePhase::Idle);
    }

    #[test]
    fn reset_on_idle_source_changes_nothing() {
        let mut s = CommandSource::new("DEV002");
        let before = s.clone();
        assert!(!s.reset());
        assert_eq!(s, before);
        assert_eq!(s.generation(), before.generation());
    }

    #[test]
    fn idle_source_never_completes() {
        let mut s = CommandSource::new("DEV001");
        assert!(!s.check_deadline(at(1_000_000)));
    }

    #[test]
    fn table_reports_newly_completed_sources() {
        let mut table = SourceTable::new(["DEV001", "DEV002"]);
        table.get_mut(0).unwrap().accept(5, at(0));
        table.get_mut(1).unwrap().accept(20, at(0));
        assert_eq!(table.check_deadlines(at(5_000)), vec![0]);
        assert!(table.check_deadlines(at(6_000)).is_empty());
        assert_eq!(table.check_deadlines(at(20_000)), vec![1]);
    }
}
