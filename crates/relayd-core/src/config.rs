use crate::channel::{DEFAULT_CHANNEL_COUNT, DEFAULT_PULSE_WIDTH_MS};
use crate::dispatcher::DEFAULT_POLL_INTERVAL_MS;
use crate::error::{RelayError, Result};
use crate::notifier::{InvoiceReport, RetryPolicy};
use crate::service::ServiceConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "relayd.yaml";

/// More sources than this are not polled.
pub const MAX_DEVICES: usize = 2;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_host() -> String {
    "192.168.0.50".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_timeout_ms() -> u64 {
    5_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// TimingConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u32,
    #[serde(default = "default_pulse_width")]
    pub pulse_width_ms: u32,
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
}

fn default_poll_interval() -> u32 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_pulse_width() -> u32 {
    DEFAULT_PULSE_WIDTH_MS
}

fn default_tick_interval() -> u64 {
    10
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            pulse_width_ms: default_pulse_width(),
            tick_interval_ms: default_tick_interval(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default = "default_devices")]
    pub devices: Vec<String>,
    #[serde(default = "default_channels")]
    pub channels: usize,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default = "default_invoice")]
    pub invoice: InvoiceReport,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service: Vec<ServiceConfig>,
}

fn default_devices() -> Vec<String> {
    vec!["DEV001".to_string()]
}

fn default_channels() -> usize {
    DEFAULT_CHANNEL_COUNT
}

fn default_invoice() -> InvoiceReport {
    InvoiceReport {
        amount: 1.0,
        description: "relay session".to_string(),
        duration_sec: 60,
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            devices: default_devices(),
            channels: default_channels(),
            timing: TimingConfig::default(),
            invoice: default_invoice(),
            retry: RetryPolicy::default(),
            service: Vec::new(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RelayError::ConfigNotFound(path.to_path_buf()));
        }
        let data = std::fs::read_to_string(path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    /// Write the default config unless one already exists (or `force`).
    pub fn init(path: &Path, force: bool) -> Result<Self> {
        if path.exists() && !force {
            return Err(RelayError::ConfigExists(path.to_path_buf()));
        }
        let cfg = Config::default();
        cfg.save(path)?;
        Ok(cfg)
    }

    /// `http://host:port`, keeping an explicit scheme in `host`.
    pub fn base_url(&self) -> String {
        let host = self.server.host.trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            format!("{host}:{}", self.server.port)
        } else {
            format!("http://{host}:{}", self.server.port)
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut error = |message: String| {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message,
            })
        };

        if self.devices.is_empty() {
            error("no devices configured".to_string());
        }
        if self.devices.len() > MAX_DEVICES {
            error(format!(
                "{} devices configured; at most {MAX_DEVICES} are supported",
                self.devices.len()
            ));
        }
        if self.devices.iter().any(|d| d.trim().is_empty()) {
            error("device ids must not be empty".to_string());
        }
        if self.channels == 0 {
            error("channels must be at least 1".to_string());
        }
        if self.timing.pulse_width_ms == 0 {
            error("timing.pulse_width_ms must be positive".to_string());
        }
        if self.timing.tick_interval_ms == 0 {
            error("timing.tick_interval_ms must be positive".to_string());
        }
        if self.server.timeout_ms == 0 {
            error("server.timeout_ms must be positive".to_string());
        }
        if self.server.host.trim().is_empty() {
            error("server.host must not be empty".to_string());
        }

        let mut warn = |message: String| {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message,
            })
        };

        let mut seen = std::collections::HashSet::new();
        for d in &self.devices {
            if !seen.insert(d) {
                warn(format!("device '{d}' is listed more than once"));
            }
        }
        if self.timing.poll_interval_ms < DEFAULT_POLL_INTERVAL_MS {
            warn(format!(
                "timing.poll_interval_ms={} is below the {DEFAULT_POLL_INTERVAL_MS}ms server cadence",
                self.timing.poll_interval_ms
            ));
        }
        if self.retry.multiplier == 0 {
            warn("retry.multiplier=0 retries immediately after the first backoff".to_string());
        }
        if self.retry.max_delay_ms < self.retry.initial_delay_ms {
            warn(format!(
                "retry.max_delay_ms={} is below retry.initial_delay_ms={}",
                self.retry.max_delay_ms, self.retry.initial_delay_ms
            ));
        }
        if self.invoice.duration_sec <= 0 {
            warn(format!(
                "invoice.duration_sec={} is not positive",
                self.invoice.duration_sec
            ));
        }
        for s in &self.service {
            if s.channel >= self.channels {
                warn(format!(
                    "service channel {} does not exist (channels: {}); it will be ignored",
                    s.channel, self.channels
                ));
            }
        }

        warnings
    }

    pub fn has_errors(warnings: &[ConfigWarning]) -> bool {
        warnings.iter().any(|w| w.level == WarnLevel::Error)
    }
}

// ---------------------------------------------------------------------------
// Path resolution
// ---------------------------------------------------------------------------

/// Resolve the config file.
///
/// Priority:
/// 1. `--config` flag / `RELAYD_CONFIG` env var (passed in as `explicit`)
/// 2. Walk upward from `cwd` looking for `relayd.yaml`
/// 3. Fall back to `cwd/relayd.yaml`
pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    let mut dir = cwd.clone();
    loop {
        let candidate = dir.join(CONFIG_FILE);
        if candidate.is_file() {
            return candidate;
        }
        match dir.parent() {
            Some(p) => dir = p.to_path_buf(),
            None => break,
        }
    }

    cwd.join(CONFIG_FILE)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
