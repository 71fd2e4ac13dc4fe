use std::sync::Arc;
use std::time::Duration;

use robot_console::console::Console;
use robot_console::harness::{ScriptedReply, ScriptedTransport};
use robot_console::interlock::InterlockViolation;
use robot_console::relay::ToggleOutcome;
use robot_console::snapshot::Snapshot;
use robot_console::{ConsoleConfig, ConsoleError, Session};

fn console() -> (Console<ScriptedTransport>, Arc<ScriptedTransport>) {
    let transport = Arc::new(ScriptedTransport::new());
    let mut config = ConsoleConfig::default();
    config.program.line_delay = Duration::ZERO;
    let console = Console::with_transport(config, Session::default(), Arc::clone(&transport));
    (console, transport)
}

#[tokio::test(flavor = "current_thread")]
async fn confirmed_toggle_keeps_new_value() {
    let (console, transport) = console();

    let outcome = console.toggle_motors().await.unwrap();
    assert_eq!(outcome, ToggleOutcome::Confirmed { value: true });
    assert!(console.state().motors_on);
    assert!(transport.device().motors);
    assert_eq!(console.queue_texts(), vec!["M17"]);

    let outcome = console.toggle_motors().await.unwrap();
    assert_eq!(outcome, ToggleOutcome::Confirmed { value: false });
    assert_eq!(console.queue_texts(), vec!["M18", "M17"]);
}

#[tokio::test(flavor = "current_thread")]
async fn failed_toggle_restores_previous_value() {
    let (console, transport) = console();
    let failures = [
        ScriptedReply::Unreachable("connection refused".into()),
        ScriptedReply::Status(500, "internal error".into()),
        ScriptedReply::Status(503, "closing".into()),
        ScriptedReply::Closing,
        ScriptedReply::fault("relay jammed"),
    ];

    for failure in failures {
        for method in ["motors", "gripper", "disableRemote"] {
            transport.push_reply(method, failure.clone());
        }
        let before = console.state();

        let motors = console.toggle_motors().await.unwrap();
        assert!(matches!(motors, ToggleOutcome::RolledBack { value: false, .. }));
        let gripper = console.toggle_gripper().await.unwrap();
        assert!(matches!(gripper, ToggleOutcome::RolledBack { value: false, .. }));
        let remote = console.toggle_remote().await.unwrap();
        assert!(matches!(remote, ToggleOutcome::RolledBack { value: true, .. }));

        assert_eq!(console.state(), before);
    }
}

#[tokio::test(flavor = "current_thread")]
async fn optimistic_value_is_visible_while_call_is_in_flight() {
    let (console, transport) = console();
    transport.push_reply("gripper", ScriptedReply::Unreachable("timeout".into()));
    let hold = transport.hold("gripper");

    let toggle = console.toggle_gripper();
    let observer = async {
        assert!(transport.wait_for_calls("gripper", 1).await);
        let in_flight = console.state().gripper_on;
        hold.release();
        in_flight
    };
    let (outcome, in_flight) = tokio::join!(toggle, observer);

    assert!(in_flight);
    assert!(matches!(
        outcome.unwrap(),
        ToggleOutcome::RolledBack { value: false, .. }
    ));
    assert!(!console.state().gripper_on);
}

#[tokio::test(flavor = "current_thread")]
async fn tripped_interlock_refuses_gripper_off() {
    let (console, transport) = console();
    console.toggle_gripper().await.unwrap();
    assert!(console.state().gripper_on);

    console.emergency_stop().await;
    let err = console.toggle_gripper().await.unwrap_err();

    assert_eq!(
        err,
        ConsoleError::Interlock(InterlockViolation::EmergencyActive)
    );
    assert!(console.state().gripper_on);
    assert_eq!(transport.calls_for("gripper").len(), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn remote_disabled_blocks_relays_but_not_remote_toggle() {
    let (console, transport) = console();
    console.toggle_remote().await.unwrap();
    assert!(!console.state().remote_enabled);

    let err = console.toggle_motors().await.unwrap_err();
    assert_eq!(
        err,
        ConsoleError::Interlock(InterlockViolation::RemoteDisabled)
    );
    assert!(transport.calls_for("motors").is_empty());
    assert!(!console.state().motors_on);

    console.emergency_stop().await;
    let outcome = console.toggle_remote().await.unwrap();
    assert_eq!(outcome, ToggleOutcome::Confirmed { value: true });
    assert_eq!(transport.methods().last().map(|m| m.as_str()), Some("enableRemote"));
}

#[tokio::test(flavor = "current_thread")]
async fn poll_overwrites_toggle_resolving_after_it() {
    let (console, transport) = console();
    transport.set_reply(
        "getEstado",
        ScriptedReply::state(&Snapshot {
            remote: true,
            ..Snapshot::default()
        }),
    );
    let hold = transport.hold("motors");

    let toggle = console.toggle_motors();
    let poller = async {
        assert!(transport.wait_for_calls("motors", 1).await);
        assert!(console.state().motors_on);
        assert!(console.refresh_status().await.is_applied());
        hold.release();
    };
    let (outcome, ()) = tokio::join!(toggle, poller);

    assert_eq!(outcome.unwrap(), ToggleOutcome::Confirmed { value: true });
    assert!(!console.state().motors_on);
}

#[tokio::test(flavor = "current_thread")]
async fn poll_overwrites_toggle_resolving_before_it() {
    let (console, transport) = console();
    transport.set_reply(
        "getEstado",
        ScriptedReply::state(&Snapshot {
            remote: true,
            ..Snapshot::default()
        }),
    );
    let hold = transport.hold("getEstado");

    let poll = console.refresh_status();
    let toggler = async {
        assert!(transport.wait_for_calls("getEstado", 1).await);
        let outcome = console.toggle_motors().await.unwrap();
        assert!(console.state().motors_on);
        hold.release();
        outcome
    };
    let (poll, outcome) = tokio::join!(poll, toggler);

    assert!(poll.is_applied());
    assert_eq!(outcome, ToggleOutcome::Confirmed { value: true });
    assert!(!console.state().motors_on);
}
