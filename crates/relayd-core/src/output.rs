//! Physical relay outputs.
//!
//! The pool talks to hardware only through [`RelayOutput`]. Polarity (active
//! low vs. active high) belongs to the implementation, not the scheduler.

use std::sync::{Arc, Mutex};

pub trait RelayOutput: Send {
    /// Drive `channel` on or off.
    fn set(&mut self, channel: usize, on: bool);
}

/// Logs every transition instead of touching hardware.
#[derive(Debug, Default)]
pub struct TracingOutput;

impl RelayOutput for TracingOutput {
    fn set(&mut self, channel: usize, on: bool) {
        tracing::info!(channel, on, "relay output");
    }
}

/// Records every `set` call; clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingOutput {
    log: Arc<Mutex<Vec<(usize, bool)>>>,
}

impl RecordingOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(usize, bool)> {
        match self.log.lock() {
            Ok(log) => log.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Last level written to `channel`, if any.
    pub fn level(&self, channel: usize) -> Option<bool> {
        self.events()
            .iter()
            .rev()
            .find(|(ch, _)| *ch == channel)
            .map(|(_, on)| *on)
    }

    pub fn clear(&self) {
        if let Ok(mut log) = self.log.lock() {
            log.clear();
        }
    }
}

impl RelayOutput for RecordingOutput {
    fn set(&mut self, channel: usize, on: bool) {
        if let Ok(mut log) = self.log.lock() {
            log.push((channel, on));
        }
    }
}
