use std::sync::Arc;
use std::time::Duration;

use robot_console::console::Console;
use robot_console::harness::{ScriptedReply, ScriptedTransport};
use robot_console::interlock::InterlockViolation;
use robot_console::program::Artifact;
use robot_console::transport::HttpMethod;
use robot_console::{ConsoleConfig, ConsoleError, Session};
use tokio::time::Instant;

const FIVE_LINES: &str = "G28\nG1 X10\nG1 X20\nG1 X30\nM5\n";

fn console() -> (Console<ScriptedTransport>, Arc<ScriptedTransport>) {
    let transport = Arc::new(ScriptedTransport::new());
    let mut config = ConsoleConfig::default();
    config.program.line_delay = Duration::ZERO;
    let console = Console::with_transport(config, Session::default(), Arc::clone(&transport));
    (console, transport)
}

fn sent_lines(transport: &ScriptedTransport) -> Vec<String> {
    transport
        .calls_for("sendGcode")
        .into_iter()
        .map(|call| call.params["line"].as_str().unwrap_or_default().to_string())
        .collect()
}

#[tokio::test(flavor = "current_thread")]
async fn streams_every_line_in_order() {
    let (console, transport) = console();
    transport.serve_file("jobs/pick v2.gcode", "  G28 \r\n\r\nG1 X10\rM3\n\n   \nM5");

    let report = console
        .upload_and_run(&Artifact::new("pick v2.csv", b"10,0,5\n".to_vec()))
        .await
        .unwrap();

    assert_eq!(report.path, "jobs/pick v2.gcode");
    assert_eq!(report.lines_sent, 4);
    assert_eq!(sent_lines(&transport), vec!["G28", "G1 X10", "M3", "M5"]);
    assert_eq!(console.queue_texts(), vec!["M5", "M3", "G1 X10", "G28"]);
    assert_eq!(console.uploaded_jobs(), vec!["jobs/pick v2.gcode"]);
}

#[tokio::test(flavor = "current_thread")]
async fn upload_and_fetch_use_controller_endpoints() {
    let (console, transport) = console();
    transport.serve_file("jobs/pick v2.gcode", "G28\n");

    console
        .upload_and_run(&Artifact::new("pick v2.csv", b"10,0,5\n".to_vec()))
        .await
        .unwrap();

    let requests = transport.requests();
    let upload = &requests[0];
    assert_eq!(upload.method, HttpMethod::Post);
    assert_eq!(upload.url, "http://localhost:8080/upload?name=pick%20v2.csv");
    assert_eq!(upload.content_type.as_deref(), Some("text/csv"));
    assert_eq!(upload.body, b"10,0,5\n");
    let fetch = &requests[1];
    assert_eq!(fetch.method, HttpMethod::Get);
    assert_eq!(fetch.url, "http://localhost:8080/jobs/pick%20v2.gcode");

    let uploads = transport.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].name, "pick v2.csv");
}

#[tokio::test(flavor = "current_thread")]
async fn first_failed_line_aborts_the_rest() {
    let (console, transport) = console();
    transport.serve_file("jobs/part.gcode", FIVE_LINES);
    transport.push_reply("sendGcode", ScriptedReply::ok());
    transport.push_reply("sendGcode", ScriptedReply::ok());
    transport.push_reply("sendGcode", ScriptedReply::fault("buffer full"));

    let err = console
        .upload_and_run(&Artifact::new("part.csv", Vec::new()))
        .await
        .unwrap_err();

    match err {
        ConsoleError::SequenceAbort { line_no, line, .. } => {
            assert_eq!(line_no, 3);
            assert_eq!(line, "G1 X20");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(sent_lines(&transport), vec!["G28", "G1 X10", "G1 X20"]);
}

#[tokio::test(flavor = "current_thread")]
async fn trip_mid_stream_stops_before_next_line() {
    let (console, transport) = console();
    transport.serve_file("jobs/part.gcode", FIVE_LINES);
    let hold = transport.hold("sendGcode");
    let artifact = Artifact::new("part.csv", Vec::new());

    let run = console.upload_and_run(&artifact);
    let operator = async {
        assert!(transport.wait_for_calls("sendGcode", 1).await);
        console.emergency_stop().await;
        hold.release();
    };
    let (result, ()) = tokio::join!(run, operator);

    assert_eq!(
        result.unwrap_err(),
        ConsoleError::SequenceAbort {
            line_no: 2,
            line: "G1 X10".into(),
            reason: "emergency stop active".into(),
        }
    );
    assert_eq!(sent_lines(&transport), vec!["G28"]);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn lines_are_spaced_by_the_configured_delay() {
    let transport = Arc::new(ScriptedTransport::new());
    let config = ConsoleConfig::default();
    let delay = config.program.line_delay;
    assert_eq!(delay, Duration::from_millis(50));
    let console = Console::with_transport(config, Session::default(), Arc::clone(&transport));
    transport.serve_file("jobs/part.gcode", FIVE_LINES);

    let report = console
        .upload_and_run(&Artifact::new("part.csv", Vec::new()))
        .await
        .unwrap();
    let finished = Instant::now();

    assert_eq!(report.lines_sent, 5);
    let sent = transport.call_instants("sendGcode");
    assert_eq!(sent.len(), 5);
    let gaps: Vec<_> = sent.windows(2).map(|pair| pair[1] - pair[0]).collect();
    assert_eq!(gaps, vec![delay; 4]);
    assert_eq!(finished - sent[4], Duration::ZERO);
}

#[tokio::test(flavor = "current_thread")]
async fn failed_upload_sends_nothing() {
    let (console, transport) = console();
    transport.set_upload_reply(ScriptedReply::Status(413, "too large".into()));

    let err = console
        .upload_and_run(&Artifact::new("big.csv", vec![0; 16]))
        .await
        .unwrap_err();

    assert_eq!(err, ConsoleError::Upload("HTTP 413: too large".into()));
    assert!(sent_lines(&transport).is_empty());
    assert!(console.uploaded_jobs().is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn missing_program_is_a_protocol_failure() {
    let (console, transport) = console();

    let err = console
        .upload_and_run(&Artifact::new("ghost.csv", Vec::new()))
        .await
        .unwrap_err();

    assert!(matches!(err, ConsoleError::Protocol(_)), "{err}");
    assert_eq!(console.uploaded_jobs(), vec!["jobs/ghost.gcode"]);
    assert!(sent_lines(&transport).is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn upload_is_refused_while_tripped() {
    let (console, transport) = console();
    console.emergency_stop().await;

    let err = console
        .upload_and_run(&Artifact::new("part.csv", Vec::new()))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ConsoleError::Interlock(InterlockViolation::EmergencyActive)
    );
    assert!(transport.uploads().is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn run_file_re_resolves_non_program_paths() {
    let (console, transport) = console();

    let path = console.run_file("jobs/pick.csv").await.unwrap();
    assert_eq!(path, "jobs/pick.gcode");
    let path = console.run_file("jobs/drill.gcode").await.unwrap();
    assert_eq!(path, "jobs/drill.gcode");

    let calls = transport.calls_for("runFile");
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].params["path"], "jobs/pick.gcode");
    assert_eq!(
        console.queue_texts(),
        vec!["Run: jobs/drill.gcode", "Run: jobs/pick.gcode"]
    );
    assert!(sent_lines(&transport).is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn upload_file_reads_local_artifact() {
    let (console, transport) = console();
    let dir = std::env::temp_dir().join(format!("robot-console-upload-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("square.csv");
    std::fs::write(&path, "0,0,0\n10,0,0\n").unwrap();
    transport.serve_file("jobs/square.gcode", "G1 X0\nG1 X10\n");

    let report = console.upload_file(&path).await.unwrap();

    assert_eq!(report.lines_sent, 2);
    assert_eq!(transport.uploads()[0].bytes, b"0,0,0\n10,0,0\n");
    std::fs::remove_dir_all(&dir).ok();
}
