use std::sync::Arc;
use std::time::Duration;

use robot_console::console::Console;
use robot_console::harness::{ScriptedReply, ScriptedTransport};
use robot_console::journal::LogLevel;
use robot_console::queue::EMERGENCY_SENTINEL;
use robot_console::reconcile::PollOutcome;
use robot_console::snapshot::{PositionMode, Snapshot};
use robot_console::{ConsoleConfig, DeviceState, Position, Session};

fn console() -> (Console<ScriptedTransport>, Arc<ScriptedTransport>) {
    let transport = Arc::new(ScriptedTransport::new());
    let console = Console::with_transport(
        ConsoleConfig::default(),
        Session::default(),
        Arc::clone(&transport),
    );
    (console, transport)
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..2000 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    false
}

#[tokio::test(flavor = "current_thread")]
async fn poll_document_is_applied_to_state() {
    let (console, transport) = console();
    transport.set_reply(
        "getEstado",
        ScriptedReply::members(&[
            ("x", "10.5"),
            ("y", "0"),
            ("z", "-3.2"),
            ("modo", "ABS"),
            ("motores", "ON"),
            ("garra", "OFF"),
            ("emergencia", "NO"),
            ("remoto", "ON"),
        ]),
    );

    let outcome = console.refresh_status().await;

    assert_eq!(
        outcome,
        PollOutcome::Applied(Snapshot {
            position: Position::new(10.5, 0.0, -3.2),
            mode: PositionMode::Absolute,
            motors: true,
            gripper: false,
            emergency: false,
            remote: true,
        })
    );
    assert_eq!(
        console.state(),
        DeviceState {
            emergency: false,
            motors_on: true,
            gripper_on: false,
            remote_enabled: true,
            absolute_mode: true,
            position: Position::new(10.5, 0.0, -3.2),
            connected: true,
        }
    );
}

#[tokio::test(flavor = "current_thread")]
async fn absent_members_take_defaults() {
    let (console, transport) = console();
    transport.set_reply("getEstado", ScriptedReply::members(&[("emergencia", "SI")]));

    assert!(console.refresh_status().await.is_applied());
    let state = console.state();
    assert!(state.emergency);
    assert!(!state.remote_enabled);
    assert!(state.absolute_mode);
    assert_eq!(state.position, Position::default());
}

#[tokio::test(flavor = "current_thread")]
async fn controller_reported_emergency_clears_queue() {
    let (console, transport) = console();
    console.send_command("home").await.unwrap();
    console.toggle_motors().await.unwrap();
    assert_eq!(console.queue_texts(), vec!["M17", "home"]);

    transport.set_reply(
        "getEstado",
        ScriptedReply::members(&[("emergencia", "SI"), ("remoto", "ON")]),
    );
    assert!(console.refresh_status().await.is_applied());

    assert!(console.state().emergency);
    assert_eq!(console.queue_texts(), vec![EMERGENCY_SENTINEL]);
    let entries = console.queue();
    assert!(console.refresh_status().await.is_applied());
    assert_eq!(console.queue(), entries);

    let errors: Vec<_> = console
        .journal()
        .log()
        .lines()
        .into_iter()
        .filter(|line| line.level == LogLevel::Error)
        .map(|line| line.message)
        .collect();
    assert_eq!(errors, vec!["emergency stop reported by controller"]);
    assert!(transport.calls_for("emergencyStop").is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn failed_poll_leaves_state_untouched() {
    let (console, transport) = console();
    assert!(console.refresh_status().await.is_applied());
    let before = console.state();
    assert!(before.connected);

    transport.set_reply("getEstado", ScriptedReply::Unreachable("no route".into()));
    assert!(matches!(
        console.refresh_status().await,
        PollOutcome::Unreachable(_)
    ));
    assert_eq!(console.state(), before);
}

#[tokio::test(flavor = "current_thread")]
async fn malformed_document_yields_no_snapshot() {
    let (console, transport) = console();
    let before = console.state();

    transport.set_reply(
        "getEstado",
        ScriptedReply::Body("<methodResponse><struct><member>".into()),
    );
    assert!(matches!(
        console.refresh_status().await,
        PollOutcome::Malformed(_)
    ));

    transport.set_reply(
        "getEstado",
        ScriptedReply::members(&[("x", "ten"), ("motores", "ON")]),
    );
    assert!(matches!(
        console.refresh_status().await,
        PollOutcome::Malformed(_)
    ));
    assert_eq!(console.state(), before);
}

#[tokio::test(flavor = "current_thread")]
async fn loop_survives_failures_and_stops_on_request() {
    let (console, transport) = console();
    transport.set_reply("getEstado", ScriptedReply::Unreachable("down".into()));

    assert!(console.start_polling_every(Duration::from_millis(5)));
    assert!(!console.start_polling_every(Duration::from_millis(5)));
    assert!(transport.wait_for_calls("getEstado", 3).await);
    assert!(!console.state().connected);

    transport.clear_reply("getEstado");
    assert!(wait_until(|| console.state().connected).await);

    let polls = console.stop_polling().await.unwrap();
    assert!(polls >= 4, "{polls}");
    assert!(!console.is_polling());
    let calls = transport.calls_for("getEstado").len();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(transport.calls_for("getEstado").len(), calls);
}

#[tokio::test(flavor = "current_thread")]
async fn background_polls_are_silent() {
    let (console, transport) = console();
    console.start_polling_every(Duration::from_millis(5));
    assert!(transport.wait_for_calls("getEstado", 2).await);
    console.stop_polling().await;

    assert!(console.journal().log().lines().is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn stop_cancels_in_flight_poll() {
    let (console, transport) = console();
    let _hold = transport.hold("getEstado");
    console.start_polling_every(Duration::from_millis(5));
    assert!(transport.wait_for_calls("getEstado", 1).await);

    assert_eq!(console.stop_polling().await, Some(0));
    assert!(!console.state().connected);
}

#[tokio::test(flavor = "current_thread")]
async fn initialize_polls_loudly_then_starts_loop() {
    let (console, transport) = console();

    assert!(console.initialize().await.is_applied());

    assert!(console.is_polling());
    assert_eq!(transport.calls_for("getEstado").len(), 1);
    let messages: Vec<_> = console
        .journal()
        .log()
        .lines()
        .into_iter()
        .map(|line| line.message)
        .collect();
    assert!(messages.iter().any(|m| m == "refreshing system state"));
    assert!(messages.iter().any(|m| m == "system state updated"));
    console.shutdown().await;
    assert!(!console.is_polling());
}
