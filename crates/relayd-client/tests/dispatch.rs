use std::time::Duration;

use mockito::Matcher;
use relayd_client::{ClientError, DispatchClient};
use relayd_core::body::Command;
use relayd_core::config::Config;
use relayd_core::dispatcher::PollOutcome;
use relayd_core::notifier::{InvoiceReport, ReportOutcome, RetryPolicy};
use relayd_core::output::RecordingOutput;
use relayd_core::service::StaticInputs;
use relayd_core::source::SourcePhase;
use relayd_core::{Controller, MonotonicClock};
use serde_json::json;

fn client(url: &str) -> DispatchClient {
    DispatchClient::new(url, Duration::from_secs(2)).unwrap()
}

fn invoice() -> InvoiceReport {
    InvoiceReport {
        amount: 2.5,
        description: "wash".into(),
        duration_sec: 900,
    }
}

#[tokio::test]
async fn fetch_next_parses_command_body() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/api/device/DEV001/next/")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"has_command": true, "action": 1, "duration_sec": 30}"#)
        .create_async()
        .await;

    let resp = client(&server.url()).fetch_next("DEV001").await.unwrap();
    mock.assert_async().await;
    assert!(resp.has_command);
    assert!(matches!(resp.command(), Command::Trigger(t) if t.pulse_cooldown_ms == 30_000));
}

#[tokio::test]
async fn garbage_body_reads_as_no_command() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/device/DEV001/next/")
        .with_status(200)
        .with_body("<html>maintenance</html>")
        .create_async()
        .await;

    let resp = client(&server.url()).fetch_next("DEV001").await.unwrap();
    assert_eq!(resp.command(), Command::Clear);
}

#[tokio::test]
async fn server_error_is_a_failed_poll() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/device/DEV002/next/")
        .with_status(503)
        .create_async()
        .await;

    let c = client(&server.url());
    let err = c.fetch_next("DEV002").await.unwrap_err();
    assert!(matches!(err, ClientError::Status(503)));
    assert!(matches!(c.poll("DEV002").await, PollOutcome::Failed(_)));
}

#[tokio::test]
async fn unreachable_server_is_a_failed_report() {
    // Nothing listens on port 9 of the loopback in test environments.
    let c = DispatchClient::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
    assert!(matches!(c.report("DEV001", &invoice()).await, ReportOutcome::Failed(_)));
}

#[tokio::test]
async fn request_invoice_posts_json_report() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/device/DEV001/request-invoice/")
        .match_header("content-type", "application/json")
        .match_body(Matcher::Json(json!({
            "amount": 2.5,
            "description": "wash",
            "duration_sec": 900
        })))
        .with_status(201)
        .create_async()
        .await;

    let c = client(&server.url());
    assert_eq!(c.request_invoice("DEV001", &invoice()).await.unwrap(), 201);
    mock.assert_async().await;
}

#[tokio::test]
async fn non_success_status_is_not_an_acknowledgement() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/api/device/DEV001/request-invoice/")
        .with_status(400)
        .create_async()
        .await;

    let outcome = client(&server.url()).report("DEV001", &invoice()).await;
    assert_eq!(outcome, ReportOutcome::Status(400));
    assert!(!outcome.is_success());
}

#[tokio::test]
async fn control_loop_runs_a_command_through_to_invoice() {
    let mut server = mockito::Server::new_async().await;
    let next = server
        .mock("GET", "/api/device/DEV001/next/")
        .with_status(200)
        .with_body(r#"{"has_command": true, "action": 1, "duration_sec": 1}"#)
        .expect(1)
        .create_async()
        .await;
    let invoice_mock = server
        .mock("POST", "/api/device/DEV001/request-invoice/")
        .match_body(Matcher::PartialJson(json!({ "description": "wash" })))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let mut cfg = Config {
        devices: vec!["DEV001".into()],
        invoice: invoice(),
        retry: RetryPolicy::immediate(),
        ..Config::default()
    };
    cfg.timing.poll_interval_ms = 60_000;

    let out = RecordingOutput::new();
    let controller = Controller::new(&cfg, Box::new(out.clone()), Box::new(StaticInputs::default()));

    let controller = relayd_client::run(
        controller,
        client(&server.url()),
        MonotonicClock::new(),
        Duration::from_millis(10),
        tokio::time::sleep(Duration::from_millis(2_500)),
    )
    .await;

    next.assert_async().await;
    invoice_mock.assert_async().await;
    assert_eq!(controller.snapshot().sources[0].phase, SourcePhase::Idle);
    assert!(out.events().contains(&(0, true)));
    assert_eq!(out.level(0), Some(false));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_report_does_not_hold_up_pulse_end() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/device/DEV001/next/")
        .with_status(200)
        .with_body(r#"{"has_command": true, "action": 1, "duration_sec": 1}"#)
        .create_async()
        .await;
    // Holds every invoice request well past the pulse width.
    server
        .mock("POST", "/api/device/DEV001/request-invoice/")
        .with_status(200)
        .with_body_from_request(|_| {
            std::thread::sleep(Duration::from_millis(4_000));
            Vec::new()
        })
        .create_async()
        .await;

    let mut cfg = Config {
        devices: vec!["DEV001".into()],
        invoice: invoice(),
        retry: RetryPolicy::immediate(),
        ..Config::default()
    };
    cfg.timing.poll_interval_ms = 60_000;

    let out = RecordingOutput::new();
    let controller = Controller::new(&cfg, Box::new(out.clone()), Box::new(StaticInputs::default()));
    out.clear();

    let controller = relayd_client::run(
        controller,
        DispatchClient::new(server.url(), Duration::from_secs(10)).unwrap(),
        MonotonicClock::new(),
        Duration::from_millis(10),
        tokio::time::sleep(Duration::from_millis(2_500)),
    )
    .await;

    // Report sent at the deadline and still unanswered at shutdown.
    assert!(controller.notifier().in_flight(0));
    assert_eq!(controller.snapshot().sources[0].phase, SourcePhase::Complete);

    // On, off at the end of the pulse, then off again from shutdown. Were the
    // loop waiting on the report, the pulse-end transition would be missing.
    let channel0: Vec<bool> = out
        .events()
        .into_iter()
        .filter(|(ch, _)| *ch == 0)
        .map(|(_, on)| on)
        .collect();
    assert_eq!(channel0, vec![true, false, false]);
}
