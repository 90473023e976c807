use crate::output::{print_fields, print_json};
use anyhow::Context;
use relayd_client::DispatchClient;
use relayd_core::body::Command;
use relayd_core::config::Config;
use std::path::Path;

/// One `GET .../next/` for `device`. Diagnostic only: no relay is touched and
/// no source state exists to change.
pub fn run(path: &Path, device: &str, json: bool) -> anyhow::Result<()> {
    let config = Config::load(path).context("failed to load config")?;
    let client = DispatchClient::from_config(&config)?;

    let rt = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    let response = rt
        .block_on(client.fetch_next(device))
        .with_context(|| format!("poll of {} failed", client.next_url(device)))?;

    let command = match response.command() {
        Command::Clear => "clear".to_string(),
        Command::Nothing => "nothing".to_string(),
        Command::Trigger(t) => format!(
            "trigger (cooldown {} ms, +{} s)",
            t.pulse_cooldown_ms, t.deadline_extension_secs
        ),
    };

    if json {
        print_json(&serde_json::json!({
            "device": device,
            "response": response,
            "command": command,
        }))?;
    } else {
        print_fields(&[
            ("device", device.to_string()),
            ("has_command", response.has_command.to_string()),
            ("action", response.action.to_string()),
            ("duration_sec", response.duration_sec.to_string()),
            ("command", command),
        ]);
    }
    Ok(())
}
