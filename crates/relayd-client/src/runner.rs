//! The async control loop.
//!
//! One task owns the [`Controller`]. Each interval tick calls
//! `Controller::tick`; every resulting request runs in its own spawned task
//! and reports back over an mpsc channel, so a slow server never stalls pulse
//! ends, cooldowns or deadline checks. Results are applied on the owning task
//! as they arrive.

use std::future::Future;
use std::time::Duration;

use relayd_core::dispatcher::PollOutcome;
use relayd_core::notifier::ReportOutcome;
use relayd_core::source::SourceId;
use relayd_core::{Clock, Controller, Request};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::client::DispatchClient;

#[derive(Debug)]
enum Completion {
    Poll {
        source: SourceId,
        outcome: PollOutcome,
    },
    Report {
        source: SourceId,
        generation: u64,
        outcome: ReportOutcome,
    },
}

/// Drive `controller` until `shutdown` resolves, then switch every output
/// off and hand the controller back.
pub async fn run<C, F>(
    mut controller: Controller,
    client: DispatchClient,
    clock: C,
    tick: Duration,
    shutdown: F,
) -> Controller
where
    C: Clock,
    F: Future<Output = ()>,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Completion>();
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    tracing::info!(
        base_url = %client.base_url(),
        sources = controller.sources().len(),
        channels = controller.pool().len(),
        "control loop started"
    );

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = interval.tick() => {
                for request in controller.tick(clock.now()) {
                    dispatch(&client, &tx, request);
                }
            }
            Some(done) = rx.recv() => {
                apply(&mut controller, done, &clock);
            }
        }
    }

    controller.shutdown();
    tracing::info!("control loop stopped; outputs off");
    controller
}

fn dispatch(client: &DispatchClient, tx: &mpsc::UnboundedSender<Completion>, request: Request) {
    let client = client.clone();
    let tx = tx.clone();
    match request {
        Request::Poll { source, device_id } => {
            tracing::debug!(device = %device_id, "polling");
            tokio::spawn(async move {
                let outcome = client.poll(&device_id).await;
                // The loop only drops the receiver on shutdown.
                let _ = tx.send(Completion::Poll { source, outcome });
            });
        }
        Request::Report {
            source,
            device_id,
            generation,
            report,
        } => {
            tracing::info!(device = %device_id, amount = report.amount, "sending completion report");
            tokio::spawn(async move {
                let outcome = client.report(&device_id, &report).await;
                let _ = tx.send(Completion::Report {
                    source,
                    generation,
                    outcome,
                });
            });
        }
    }
}

fn apply<C: Clock>(controller: &mut Controller, done: Completion, clock: &C) {
    let now = clock.now();
    match done {
        Completion::Poll { source, outcome } => {
            let applied = controller.complete_poll(source, outcome, now);
            tracing::debug!(source, ?applied, "poll applied");
        }
        Completion::Report {
            source,
            generation,
            outcome,
        } => {
            controller.complete_report(source, generation, outcome, now);
        }
    }
}
