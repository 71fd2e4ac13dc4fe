//! CLI entrypoint for the robot operator console.

#[path = "robot-console/cli.rs"]
mod cli;
#[path = "robot-console/run.rs"]
mod run;
#[path = "robot-console/shell.rs"]
mod shell;

use clap::Parser;

use cli::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if let Err(err) = run::run(cli) {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
    Ok(())
}
