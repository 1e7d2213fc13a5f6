//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Folding client monitor.
///
/// Reads each client's log, queue and unit info files, reconciles them into
/// one record per queue slot and keeps a history of completed work.
#[derive(Debug, Parser)]
#[command(name = "fw", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show the reconciled queue of each client.
    Status {
        /// Only show this client.
        #[arg(long)]
        client: Option<String>,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Reconcile every client and record its units in the history.
    Sync,

    /// List recorded units.
    History {
        /// Only show this client.
        #[arg(long)]
        client: Option<String>,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Compute production for a frame time.
    Ppd(PpdArgs),
}

/// Inputs to the production calculator.
#[derive(Debug, Clone, Args)]
pub struct PpdArgs {
    /// Seconds per frame.
    #[arg(long)]
    pub frame_time: u32,

    /// Frames per unit.
    #[arg(long, default_value_t = 100)]
    pub frames: u32,

    /// Base credit.
    #[arg(long)]
    pub credit: f64,

    /// Preferred deadline in days.
    #[arg(long)]
    pub preferred_days: f64,

    /// Final deadline in days.
    #[arg(long)]
    pub maximum_days: f64,

    /// Bonus factor (0 disables the bonus).
    #[arg(long, default_value_t = 0.0)]
    pub k_factor: f64,

    /// Seconds since the unit was downloaded.
    #[arg(long)]
    pub elapsed: Option<u32>,

    /// Percent of the unit already complete.
    #[arg(long, default_value_t = 0)]
    pub percent: u8,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_ppd_arguments() {
        let cli = Cli::parse_from([
            "fw",
            "ppd",
            "--frame-time",
            "452",
            "--credit",
            "3355",
            "--preferred-days",
            "3",
            "--maximum-days",
            "4",
            "--k-factor",
            "26.4",
        ]);
        let Some(Commands::Ppd(args)) = cli.command else {
            panic!("expected ppd command");
        };
        assert_eq!(args.frame_time, 452);
        assert_eq!(args.frames, 100);
        assert_eq!(args.elapsed, None);
    }
}
