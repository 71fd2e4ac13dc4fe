//! CLI definitions for robot-console.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "robot-console",
    version,
    about = "Operator console for a networked robot controller",
    infer_subcommands = true,
    after_help = "Examples:\n  robot-console                         # interactive shell\n  robot-console status --server 10.0.0.12\n  robot-console move 10 0 -3.5 --feed 900\n  robot-console upload ./pick.csv\n  robot-console --dry-run shell         # simulated controller"
)]
pub struct Cli {
    /// Show debug output.
    #[arg(long, short, global = true)]
    pub verbose: bool,
    /// Console configuration file (defaults to ./console.toml when present).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Session token (falls back to ROBOT_AUTH_TOKEN).
    #[arg(long, global = true)]
    pub token: Option<String>,
    /// Session user (falls back to ROBOT_USERNAME).
    #[arg(long, global = true)]
    pub user: Option<String>,
    /// Session privilege (falls back to ROBOT_USER_PRIVILEGE).
    #[arg(long, global = true)]
    pub privilege: Option<String>,
    /// Controller address (falls back to ROBOT_SERVER_IP, then the config host).
    #[arg(long, global = true)]
    pub server: Option<String>,
    /// Talk to an in-memory simulated controller instead of the network.
    #[arg(long, global = true)]
    pub dry_run: bool,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Poll the controller once and print the device state.
    Status,
    /// Keep polling and print every state change until Ctrl-C.
    Watch {
        /// Poll interval in milliseconds (overrides the config).
        #[arg(long)]
        interval_ms: Option<u64>,
    },
    /// Toggle the motors relay.
    Motors,
    /// Toggle the gripper relay.
    Gripper,
    /// Toggle remote control (never blocked).
    Remote,
    /// Toggle absolute/relative positioning.
    Mode,
    /// Linear move to X Y Z.
    #[command(allow_negative_numbers = true)]
    Move {
        x: f64,
        y: f64,
        z: f64,
        /// Feed rate in mm/min.
        #[arg(long, short)]
        feed: Option<f64>,
    },
    /// Issue a named controller command (e.g. `home`).
    Send { command: String },
    /// Send one raw G-code line.
    Gcode { line: String },
    /// Trip the emergency stop.
    Estop,
    /// Reset the emergency stop.
    Reset,
    /// Upload a file, then stream the converted program line by line.
    Upload { file: PathBuf },
    /// Run a program stored on the controller.
    Run { path: String },
    /// Position teaching.
    Learn {
        #[command(subcommand)]
        action: LearnAction,
    },
    /// Interactive console with background reconciliation.
    Shell,
}

#[derive(Debug, Clone, Subcommand)]
pub enum LearnAction {
    /// Start recording positions.
    Start {
        /// Target file on the controller.
        file: Option<String>,
    },
    /// Stop recording.
    Stop,
}
