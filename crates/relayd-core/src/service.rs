//! Optional periodic "service" pulse.
//!
//! While enabled, a service channel pulses once, stays off for `interval_ms`
//! and pulses again. A triggered opto input on that channel suppresses the
//! pulse. Firing goes through the pool like any dispatched trigger, so the
//! cooldown is `pulse width + interval` counted from the trigger, but it does
//! not move the pool's round-robin rotation point.

use crate::channel::ChannelPool;
use crate::clock::Millis;
use serde::{Deserialize, Serialize};

/// Reads the opto-isolated inputs. Polarity is the implementation's concern.
pub trait InputSource: Send {
    fn triggered(&self, channel: usize) -> bool;
}

/// Inputs fixed at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticInputs {
    triggered: Vec<bool>,
}

impl StaticInputs {
    pub fn new(triggered: Vec<bool>) -> Self {
        Self { triggered }
    }

    /// One flag per channel, set from each service entry's `opto_active`.
    pub fn from_services(services: &[ServiceConfig], channels: usize) -> Self {
        let mut triggered = vec![false; channels];
        for s in services {
            if let Some(slot) = triggered.get_mut(s.channel) {
                *slot = s.opto_active;
            }
        }
        Self { triggered }
    }
}

impl InputSource for StaticInputs {
    fn triggered(&self, channel: usize) -> bool {
        self.triggered.get(channel).copied().unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// ServiceConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    pub channel: usize,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Off time between pulses.
    pub interval_ms: u32,
    /// Initial state of the channel's opto input.
    #[serde(default)]
    pub opto_active: bool,
}

fn default_enabled() -> bool {
    true
}

// ---------------------------------------------------------------------------
// ServicePolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ServicePolicy {
    entries: Vec<ServiceConfig>,
    /// Opto state seen on the previous tick, per entry, for edge logging.
    suppressed: Vec<bool>,
}

impl ServicePolicy {
    /// Keep the entries that address a real channel; the rest are dropped
    /// with a warning.
    pub fn new(entries: Vec<ServiceConfig>, channel_count: usize) -> Self {
        let entries: Vec<ServiceConfig> = entries
            .into_iter()
            .filter(|e| {
                let ok = e.channel < channel_count;
                if !ok {
                    tracing::warn!(channel = e.channel, "service entry ignored: no such channel");
                }
                ok
            })
            .collect();
        let suppressed = vec![false; entries.len()];
        Self {
            entries,
            suppressed,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn channels(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries.iter().map(|e| e.channel)
    }

    /// Fire every enabled, unsuppressed service channel that is idle.
    /// Returns the channels fired.
    pub fn tick(
        &mut self,
        pool: &mut ChannelPool,
        inputs: &dyn InputSource,
        now: Millis,
    ) -> Vec<usize> {
        let mut fired = Vec::new();
        for (entry, was_suppressed) in self.entries.iter().zip(self.suppressed.iter_mut()) {
            if !entry.enabled {
                continue;
            }
            let suppressed = inputs.triggered(entry.channel);
            if suppressed != *was_suppressed {
                tracing::info!(channel = entry.channel, suppressed, "service opto input changed");
                *was_suppressed = suppressed;
            }
            if suppressed || !pool.is_available(entry.channel) {
                continue;
            }
            let cooldown = pool.pulse_width_ms().saturating_add(entry.interval_ms);
            if pool.fire_out_of_turn(entry.channel, cooldown, now) {
                fired.push(entry.channel);
            }
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::RecordingOutput;

    fn at(ms: u32) -> Millis {
        Millis::from_raw(ms)
    }

    fn entry(channel: usize, interval_ms: u32) -> ServiceConfig {
        ServiceConfig {
            channel,
            enabled: true,
            interval_ms,
            opto_active: false,
        }
    }

    #[test]
    fn pulses_then_rests_for_interval() {
        let mut pool = ChannelPool::new(4, 1_000, Box::new(RecordingOutput::new()));
        let mut policy = ServicePolicy::new(vec![entry(2, 3_000)], 4);
        let inputs = StaticInputs::default();

        assert_eq!(policy.tick(&mut pool, &inputs, at(0)), vec![2]);
        let mut fires = vec![0];
        for ms in (100..=12_000).step_by(100) {
            pool.tick(at(ms));
            if !policy.tick(&mut pool, &inputs, at(ms)).is_empty() {
                fires.push(ms);
            }
        }
        assert_eq!(fires, vec![0, 4_000, 8_000, 12_000]);
    }

    #[test]
    fn service_pulse_leaves_rotation_alone() {
        let mut pool = ChannelPool::new(4, 1_000, Box::new(RecordingOutput::new()));
        let mut policy = ServicePolicy::new(vec![entry(0, 0)], 4);
        let inputs = StaticInputs::default();

        assert_eq!(policy.tick(&mut pool, &inputs, at(0)), vec![0]);
        assert_eq!(pool.pick(), Some(1));
        pool.fire(1, 0, at(0));

        pool.tick(at(1_000));
        assert_eq!(policy.tick(&mut pool, &inputs, at(1_000)), vec![0]);
        assert_eq!(pool.pick(), Some(2));
    }

    #[test]
    fn opto_input_suppresses_pulse() {
        let mut pool = ChannelPool::new(2, 1_000, Box::new(RecordingOutput::new()));
        let mut policy = ServicePolicy::new(vec![entry(1, 500)], 2);
        let inputs = StaticInputs::new(vec![false, true]);
        assert!(policy.tick(&mut pool, &inputs, at(0)).is_empty());
        assert!(pool.is_available(1));
    }

    #[test]
    fn disabled_entry_never_fires() {
        let mut pool = ChannelPool::new(1, 1_000, Box::new(RecordingOutput::new()));
        let mut e = entry(0, 500);
        e.enabled = false;
        let mut policy = ServicePolicy::new(vec![e], 1);
        assert!(policy
            .tick(&mut pool, &StaticInputs::default(), at(0))
            .is_empty());
    }

    #[test]
    fn out_of_range_channel_is_dropped() {
        let policy = ServicePolicy::new(vec![entry(9, 500), entry(0, 500)], 4);
        assert_eq!(policy.channels().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn static_inputs_from_services() {
        let mut e = entry(3, 100);
        e.opto_active = true;
        let inputs = StaticInputs::from_services(&[e, entry(7, 100)], 4);
        assert!(inputs.triggered(3));
        assert!(!inputs.triggered(0));
        assert!(!inputs.triggered(7));
    }
}
