//! Command dispatch for robot-console.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use robot_console::console::Console;
use robot_console::harness::ScriptedTransport;
use robot_console::journal::ConsoleEvent;
use robot_console::reconcile::PollOutcome;
use robot_console::relay::ToggleOutcome;
use robot_console::transport::Transport;
use robot_console::{ConsoleConfig, DeviceState, Position, Session};
use smol_str::SmolStr;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, LearnAction};
use crate::shell;

const DEFAULT_CONFIG: &str = "console.toml";

pub fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    init_tracing(&config, cli.verbose);
    let session = session_from(&cli);
    let command = cli.command.unwrap_or(Command::Shell);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;
    if cli.dry_run {
        debug!("using simulated controller");
        let console =
            Console::with_transport(config, session, Arc::new(ScriptedTransport::new()));
        runtime.block_on(execute(console, command))
    } else {
        let console = Console::connect(config, session);
        runtime.block_on(execute(console, command))
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ConsoleConfig> {
    match path {
        Some(path) => ConsoleConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display())),
        None if Path::new(DEFAULT_CONFIG).is_file() => {
            ConsoleConfig::load(DEFAULT_CONFIG).context("failed to load console.toml")
        }
        None => Ok(ConsoleConfig::default()),
    }
}

fn init_tracing(config: &ConsoleConfig, verbose: bool) {
    let level = if verbose {
        "debug"
    } else {
        config.log_level.as_str()
    };
    let directive = level
        .parse::<Directive>()
        .unwrap_or_else(|_| tracing::Level::INFO.into());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive))
        .with_writer(std::io::stderr)
        .init();
}

fn session_from(cli: &Cli) -> Session {
    let env = Session::from_env();
    let flag = |value: &Option<String>| value.as_deref().map(SmolStr::new);
    Session {
        auth_token: flag(&cli.token).or(env.auth_token),
        username: flag(&cli.user).or(env.username),
        user_privilege: flag(&cli.privilege).or(env.user_privilege),
        server_ip: flag(&cli.server).or(env.server_ip),
    }
}

async fn execute<T: Transport>(console: Console<T>, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Status => {
            report_poll(&console.refresh_status().await)?;
            println!("{}", render_state(&console.state()));
        }
        Command::Watch { interval_ms } => watch(&console, interval_ms).await?,
        Command::Shell => shell::run(&console).await?,
        other => {
            // Pick up the controller's interlock and remote flags before acting.
            if let Err(err) = report_poll(&console.refresh_status().await) {
                warn!("{err:#}");
            }
            one_shot(&console, other).await?;
            println!("{}", render_state(&console.state()));
        }
    }
    Ok(())
}

async fn one_shot<T: Transport>(console: &Console<T>, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Motors => report_toggle("motors", console.toggle_motors().await?)?,
        Command::Gripper => report_toggle("gripper", console.toggle_gripper().await?)?,
        Command::Remote => report_toggle("remote control", console.toggle_remote().await?)?,
        Command::Mode => {
            let absolute = console.toggle_mode().await?;
            println!("mode: {}", if absolute { "absolute" } else { "relative" });
        }
        Command::Move { x, y, z, feed } => {
            console.move_to(Position::new(x, y, z), feed).await?;
        }
        Command::Send { command } => console.send_command(&command).await?,
        Command::Gcode { line } => console.send_line(&line).await?,
        Command::Estop => {
            console.emergency_stop().await;
            println!("emergency stop active");
        }
        Command::Reset => {
            console.reset_emergency().await;
            println!("emergency stop cleared");
        }
        Command::Upload { file } => {
            let report = console.upload_file(&file).await?;
            println!("{}: {} lines sent", report.path, report.lines_sent);
        }
        Command::Run { path } => {
            let path = console.run_file(&path).await?;
            println!("running {path}");
        }
        Command::Learn { action } => match action {
            LearnAction::Start { file } => console.start_learning(file.as_deref()).await?,
            LearnAction::Stop => console.stop_learning().await?,
        },
        Command::Status | Command::Watch { .. } | Command::Shell => {}
    }
    Ok(())
}

async fn watch<T: Transport>(console: &Console<T>, interval_ms: Option<u64>) -> anyhow::Result<()> {
    let period = interval_ms.map_or(console.config().poll_interval, Duration::from_millis);
    if period.is_zero() {
        bail!("poll interval must be non-zero");
    }
    let mut events = console.subscribe();
    if let Err(err) = report_poll(&console.refresh_status().await) {
        warn!("{err:#}");
    }
    println!("{}", render_state(&console.state()));
    console.start_polling_every(period);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            event = events.recv() => match event {
                Ok(ConsoleEvent::State(state)) => println!("{}", render_state_line(&state)),
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }
    if console.shutdown().await {
        eprintln!("warning: motors or gripper are still on");
    }
    Ok(())
}

fn report_poll(outcome: &PollOutcome) -> anyhow::Result<()> {
    match outcome {
        PollOutcome::Applied(_) => Ok(()),
        PollOutcome::Unreachable(failure) => bail!("controller unreachable: {failure}"),
        PollOutcome::Malformed(err) => bail!("{err}"),
    }
}

fn report_toggle(label: &str, outcome: ToggleOutcome) -> anyhow::Result<()> {
    match outcome {
        ToggleOutcome::Confirmed { value } => {
            println!("{label}: {}", on_off(value));
            Ok(())
        }
        ToggleOutcome::RolledBack { value, reason } => {
            bail!("{label} not switched ({reason}); still {}", on_off(value))
        }
    }
}

pub(crate) fn on_off(value: bool) -> &'static str {
    if value {
        "ON"
    } else {
        "OFF"
    }
}

pub(crate) fn render_state(state: &DeviceState) -> String {
    format!(
        "connected  {}\nemergency  {}\nremote     {}\nmotors     {}\ngripper    {}\nmode       {}\nposition   {}",
        if state.connected { "yes" } else { "no" },
        if state.emergency { "ACTIVE" } else { "clear" },
        on_off(state.remote_enabled),
        on_off(state.motors_on),
        on_off(state.gripper_on),
        if state.absolute_mode { "ABS" } else { "REL" },
        state.position,
    )
}

fn render_state_line(state: &DeviceState) -> String {
    format!(
        "{} | motors {} | gripper {} | remote {} | {}{}",
        state.position,
        on_off(state.motors_on),
        on_off(state.gripper_on),
        on_off(state.remote_enabled),
        if state.absolute_mode { "ABS" } else { "REL" },
        if state.emergency { " | EMERGENCY" } else { "" },
    )
}
