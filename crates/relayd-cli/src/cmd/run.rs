use anyhow::Context;
use relayd_client::DispatchClient;
use relayd_core::config::{Config, WarnLevel};
use relayd_core::output::TracingOutput;
use relayd_core::service::StaticInputs;
use relayd_core::{Controller, MonotonicClock};
use std::path::Path;
use std::time::Duration;

pub fn run(path: &Path) -> anyhow::Result<()> {
    let config = Config::load(path).context("failed to load config")?;

    let warnings = config.validate();
    for w in &warnings {
        match w.level {
            WarnLevel::Warning => tracing::warn!("{}", w.message),
            WarnLevel::Error => tracing::error!("{}", w.message),
        }
    }
    if Config::has_errors(&warnings) {
        anyhow::bail!(
            "refusing to start: {} has errors (see 'relayd config validate')",
            path.display()
        );
    }

    let client = DispatchClient::from_config(&config)?;
    let inputs = StaticInputs::from_services(&config.service, config.channels);
    let controller = Controller::new(&config, Box::new(TracingOutput), Box::new(inputs));
    let tick = Duration::from_millis(config.timing.tick_interval_ms);

    tracing::info!(
        config = %path.display(),
        devices = ?config.devices,
        channels = config.channels,
        "starting relayd"
    );

    let rt = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    let controller = rt.block_on(relayd_client::run(
        controller,
        client,
        MonotonicClock::new(),
        tick,
        async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for Ctrl-C");
            }
        },
    ));

    let snapshot = controller.snapshot();
    for s in &snapshot.sources {
        tracing::info!(
            device = %s.device_id,
            phase = ?s.phase,
            accepted_sec = s.accepted_secs,
            "final source state"
        );
    }
    Ok(())
}
