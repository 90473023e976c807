//! Fail-open reading of dispatcher response bodies.
//!
//! Deployed servers send loosely-shaped JSON. A missing key, a wrong type or
//! a body that is not JSON at all reads as `false` / `0` rather than an error.

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct Body {
    value: Value,
}

impl Body {
    pub fn parse(raw: &str) -> Self {
        let value = serde_json::from_str(raw).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "response body is not JSON, reading as empty");
            Value::Null
        });
        Self { value }
    }

    /// `true` only for a JSON `true` at `key`.
    pub fn get_bool(&self, key: &str) -> bool {
        self.value.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Integer at `key`; floats are truncated, anything else reads as `0`.
    pub fn get_int(&self, key: &str) -> i64 {
        match self.value.get(key) {
            Some(v) => v
                .as_i64()
                .or_else(|| v.as_f64().map(|f| f as i64))
                .unwrap_or(0),
            None => 0,
        }
    }
}

// ---------------------------------------------------------------------------
// PollResponse
// ---------------------------------------------------------------------------

/// Decoded `GET /api/device/{id}/next/` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PollResponse {
    pub has_command: bool,
    pub action: i64,
    pub duration_sec: i64,
}

impl PollResponse {
    pub fn parse(raw: &str) -> Self {
        let body = Body::parse(raw);
        Self {
            has_command: body.get_bool("has_command"),
            action: body.get_int("action"),
            duration_sec: body.get_int("duration_sec"),
        }
    }

    /// What this response asks the controller to do.
    pub fn command(&self) -> Command {
        if !self.has_command {
            return Command::Clear;
        }
        if self.action == 0 {
            return Command::Nothing;
        }
        let secs = u32::try_from(self.duration_sec.max(0)).unwrap_or(u32::MAX);
        Command::Trigger(Trigger {
            pulse_cooldown_ms: secs.saturating_mul(1_000),
            deadline_extension_secs: secs,
        })
    }
}

/// A response's meaning, independent of wire shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `has_command = false`: the source has nothing; reset it.
    Clear,
    /// `has_command = true` but `action = 0`: leave everything as it is.
    Nothing,
    Trigger(Trigger),
}

/// The one `duration_sec` field, split into its two uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trigger {
    /// Minimum rest for the relay, counted from the moment it fires.
    pub pulse_cooldown_ms: u32,
    /// Added to the source's running total before the deadline is re-armed.
    pub deadline_extension_secs: u32,
}
