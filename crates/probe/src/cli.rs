//! Command-line interface for waylink-probe.
//!
//! Provides commands for inspecting a running display server.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// waylink probe - query a Wayland-style display server from the command line
#[derive(Debug, Parser)]
#[command(name = "waylink-probe")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "WAYLINK_PROBE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Display socket name or absolute path (overrides WAYLAND_DISPLAY)
    #[arg(short, long, global = true)]
    pub display: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List the globals the server advertises
    Globals,

    /// Measure round-trip latency to the server
    Roundtrip {
        /// Number of round-trips
        #[arg(short = 'n', long, default_value = "1")]
        count: u32,
    },

    /// Print globals as they appear and disappear until interrupted
    Monitor,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_globals() {
        let cli = Cli::parse_from(["waylink-probe", "globals"]);
        assert!(matches!(cli.command, Command::Globals));
        assert!(cli.display.is_none());
    }

    #[test]
    fn test_cli_parse_roundtrip_with_count() {
        let cli = Cli::parse_from(["waylink-probe", "roundtrip", "--count", "10"]);
        match cli.command {
            Command::Roundtrip { count } => assert_eq!(count, 10),
            _ => panic!("expected Roundtrip command"),
        }
    }

    #[test]
    fn test_cli_roundtrip_defaults_to_one() {
        let cli = Cli::parse_from(["waylink-probe", "roundtrip"]);
        assert!(matches!(cli.command, Command::Roundtrip { count: 1 }));
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "waylink-probe",
            "monitor",
            "--display",
            "wayland-1",
            "--log-level",
            "debug",
        ]);
        assert!(matches!(cli.command, Command::Monitor));
        assert_eq!(cli.display.as_deref(), Some("wayland-1"));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }
}
