// CLI definitions using clap

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "joykeys")]
#[command(author, version, about = "Arduino joystick shield to keyboard bridge")]
pub struct Cli {
    /// Serial port (auto-detected if omitted)
    #[arg(short, long, value_name = "PORT")]
    pub port: Option<String>,

    /// Baud rate of the serial connection
    #[arg(short, long)]
    pub baud: Option<u32>,

    /// Profile to start with
    #[arg(long, value_name = "NAME")]
    pub profile: Option<String>,

    /// Config file instead of the default location
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log key presses instead of injecting them
    #[arg(long)]
    pub dry_run: bool,

    /// Feed lines from a captured serial log instead of a port
    #[arg(long, value_name = "FILE")]
    pub replay: Option<PathBuf>,

    /// Delay between replayed lines (ms)
    #[arg(long, value_name = "MS", requires = "replay")]
    pub replay_interval: Option<u64>,

    /// List serial ports and exit
    #[arg(long)]
    pub list_ports: bool,

    /// List profiles with their bindings and exit
    #[arg(long)]
    pub list_profiles: bool,

    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Commands typed on stdin while running
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Profile(String),
    Profiles,
    Release,
    Help,
    Quit,
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let command = words.next()?;
        let argument = words.next();

        match (command.to_ascii_lowercase().as_str(), argument) {
            ("profile" | "p", Some(name)) => Some(Self::Profile(name.to_string())),
            ("profile" | "p", None) | ("profiles" | "list", _) => Some(Self::Profiles),
            ("release" | "r", _) => Some(Self::Release),
            ("help" | "h" | "?", _) => Some(Self::Help),
            ("quit" | "q" | "exit", _) => Some(Self::Quit),
            _ => None,
        }
    }
}

pub const CONSOLE_HELP: &str = "\
Commands:
  profile <name>  switch to another profile
  profiles        list available profiles
  release         release all held keys
  quit            release keys and exit";
