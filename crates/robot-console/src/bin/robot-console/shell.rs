//! Interactive operator shell.
//!
//! Reads one command per line from stdin while the reconciliation loop
//! polls in the background. A failed command is reported and the shell
//! keeps going.

use std::io::Write as _;
use std::path::PathBuf;

use robot_console::console::Console;
use robot_console::error::ConsoleError;
use robot_console::relay::ToggleOutcome;
use robot_console::transport::Transport;
use robot_console::Position;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::run::{on_off, render_state};

const HELP: &str = "\
commands:
  status                  show device state
  refresh                 poll the controller now
  motors | gripper        toggle a relay
  remote                  toggle remote control
  mode                    toggle absolute/relative positioning
  move X Y Z [F]          linear move (feed defaults to 1200)
  send NAME               named controller command (e.g. home)
  gcode LINE              raw G-code line
  estop | reset           trip or reset the emergency stop
  upload FILE             upload and stream a program
  run PATH                run a stored program
  jobs                    programs uploaded this session
  learn start [FILE] | learn stop
  queue                   recent commands
  log | log export PATH | log clear
  session                 show session details
  quit";

#[derive(Debug, Clone, PartialEq)]
pub enum ShellCommand {
    Help,
    Status,
    Refresh,
    Motors,
    Gripper,
    Remote,
    Mode,
    Move { target: Position, feed: Option<f64> },
    Send(String),
    Gcode(String),
    Estop,
    Reset,
    Upload(PathBuf),
    Run(String),
    Jobs,
    LearnStart(Option<String>),
    LearnStop,
    Queue,
    Log,
    ExportLog(PathBuf),
    ClearLog,
    Session,
    Quit,
}

impl ShellCommand {
    /// Parse one input line; blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        let Some((word, rest)) = split_word(line) else {
            return Ok(None);
        };
        let command = match word.to_ascii_lowercase().as_str() {
            "help" | "?" => Self::Help,
            "status" => Self::Status,
            "refresh" => Self::Refresh,
            "motors" => Self::Motors,
            "gripper" => Self::Gripper,
            "remote" => Self::Remote,
            "mode" => Self::Mode,
            "move" => parse_move(rest)?,
            "send" => Self::Send(required(rest, "send NAME")?),
            "gcode" => Self::Gcode(required(rest, "gcode LINE")?),
            "estop" | "stop" => Self::Estop,
            "reset" => Self::Reset,
            "upload" => Self::Upload(PathBuf::from(required(rest, "upload FILE")?)),
            "run" => Self::Run(required(rest, "run PATH")?),
            "jobs" => Self::Jobs,
            "learn" => match split_word(rest) {
                Some(("start", file)) => {
                    Self::LearnStart(Some(file.to_string()).filter(|file| !file.is_empty()))
                }
                Some(("stop", _)) => Self::LearnStop,
                _ => return Err("usage: learn start [FILE] | learn stop".into()),
            },
            "queue" => Self::Queue,
            "log" => match split_word(rest) {
                None => Self::Log,
                Some(("export", path)) => {
                    Self::ExportLog(PathBuf::from(required(path, "log export PATH")?))
                }
                Some(("clear", _)) => Self::ClearLog,
                _ => return Err("usage: log | log export PATH | log clear".into()),
            },
            "session" => Self::Session,
            "quit" | "exit" => Self::Quit,
            other => return Err(format!("unknown command '{other}' (try `help`)")),
        };
        Ok(Some(command))
    }
}

fn split_word(text: &str) -> Option<(&str, &str)> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    Some(match text.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (text, ""),
    })
}

fn required(rest: &str, usage: &str) -> Result<String, String> {
    if rest.is_empty() {
        Err(format!("usage: {usage}"))
    } else {
        Ok(rest.to_string())
    }
}

fn parse_move(rest: &str) -> Result<ShellCommand, String> {
    let values = rest
        .split_whitespace()
        .map(str::parse::<f64>)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| format!("move: {err}"))?;
    match values.as_slice() {
        [x, y, z] => Ok(ShellCommand::Move {
            target: Position::new(*x, *y, *z),
            feed: None,
        }),
        [x, y, z, feed] => Ok(ShellCommand::Move {
            target: Position::new(*x, *y, *z),
            feed: Some(*feed),
        }),
        _ => Err("usage: move X Y Z [F]".into()),
    }
}

pub async fn run<T: Transport>(console: &Console<T>) -> anyhow::Result<()> {
    console.initialize().await;
    println!("{}", render_state(&console.state()));
    println!("type `help` for commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut quit_warned = false;
    loop {
        print!("robot> ");
        std::io::stdout().flush()?;
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => None,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };
        let command = match ShellCommand::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                println!("{message}");
                continue;
            }
        };
        if command == ShellCommand::Quit {
            if console.outputs_active() && !quit_warned {
                println!("motors or gripper are still on; `quit` again to leave anyway");
                quit_warned = true;
                continue;
            }
            break;
        }
        quit_warned = false;
        if let Err(err) = apply(console, command).await {
            println!("error: {err}");
        }
    }

    if console.shutdown().await {
        eprintln!("warning: leaving with motors or gripper still on");
    }
    Ok(())
}

async fn apply<T: Transport>(console: &Console<T>, command: ShellCommand) -> Result<(), ConsoleError> {
    match command {
        ShellCommand::Help => println!("{HELP}"),
        ShellCommand::Status => println!("{}", render_state(&console.state())),
        ShellCommand::Refresh => {
            console.refresh_status().await;
            println!("{}", render_state(&console.state()));
        }
        ShellCommand::Motors => print_toggle("motors", console.toggle_motors().await?),
        ShellCommand::Gripper => print_toggle("gripper", console.toggle_gripper().await?),
        ShellCommand::Remote => print_toggle("remote control", console.toggle_remote().await?),
        ShellCommand::Mode => {
            let absolute = console.toggle_mode().await?;
            println!("mode: {}", if absolute { "ABS" } else { "REL" });
        }
        ShellCommand::Move { target, feed } => console.move_to(target, feed).await?,
        ShellCommand::Send(name) => console.send_command(&name).await?,
        ShellCommand::Gcode(line) => console.send_line(&line).await?,
        ShellCommand::Estop => {
            console.emergency_stop().await;
        }
        ShellCommand::Reset => {
            console.reset_emergency().await;
        }
        ShellCommand::Upload(path) => {
            let report = console.upload_file(&path).await?;
            println!("{}: {} lines sent", report.path, report.lines_sent);
        }
        ShellCommand::Run(path) => {
            console.run_file(&path).await?;
        }
        ShellCommand::Jobs => {
            for job in console.uploaded_jobs() {
                println!("{job}");
            }
        }
        ShellCommand::LearnStart(file) => console.start_learning(file.as_deref()).await?,
        ShellCommand::LearnStop => console.stop_learning().await?,
        ShellCommand::Queue => {
            for entry in console.queue_texts() {
                println!("{entry}");
            }
        }
        ShellCommand::Log => print!("{}", console.journal().log().render()),
        ShellCommand::ExportLog(path) => console.export_log(path)?,
        ShellCommand::ClearLog => console.clear_log(),
        ShellCommand::Session => console.show_session(),
        ShellCommand::Quit => {}
    }
    Ok(())
}

fn print_toggle(label: &str, outcome: ToggleOutcome) {
    match outcome {
        ToggleOutcome::Confirmed { value } => println!("{label}: {}", on_off(value)),
        ToggleOutcome::RolledBack { value, reason } => {
            println!("{label} not switched ({reason}); still {}", on_off(value));
        }
    }
}
