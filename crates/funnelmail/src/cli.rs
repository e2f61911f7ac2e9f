//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use funnelmail_core::Cadence;

/// Scheduled drip-sequence email sender.
#[derive(Debug, Parser)]
#[command(name = "funnelmail", version, about)]
pub struct Cli {
    /// Path to the JSON config file.
    #[arg(long, global = true, env = "FUNNELMAIL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Send the next sequence email to every due subscriber.
    Run(RunArgs),
    /// Send a named template once to a list of recipients.
    Send(SendArgs),
    /// Add a subscriber at the start of the sequence.
    Subscribe {
        /// Email address.
        email: String,
        /// Display name used for personalization.
        #[arg(long, default_value = "")]
        name: String,
    },
    /// Stop sending to a subscriber.
    Unsubscribe {
        /// Email address.
        email: String,
    },
    /// List subscribers with their progress and sent history.
    List,
    /// Print a health report.
    Health,
}

/// Options for a batch run.
#[derive(Debug, clap::Args)]
pub struct RunArgs {
    /// Only run if this cadence is due, and record the run afterwards.
    #[arg(long, value_enum)]
    pub cadence: Option<CadenceArg>,

    /// Report what would be sent without sending, recording or advancing anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Ignore the weekend and cadence checks.
    #[arg(long)]
    pub force: bool,
}

/// Options for a named-template broadcast.
#[derive(Debug, clap::Args)]
pub struct SendArgs {
    /// Template name (file stem in the template directory, e.g. `welcome`).
    pub template: String,

    /// Recipient address; may be repeated.
    #[arg(long = "to")]
    pub to: Vec<String>,

    /// File with one recipient per line; blank lines and `#` comments are ignored.
    #[arg(long)]
    pub to_file: Option<PathBuf>,

    /// Report what would be sent without sending or recording anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Cadence names accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CadenceArg {
    /// Once per day.
    Daily,
    /// Once per week on the configured weekday.
    Weekly,
    /// On the last day of each month.
    Monthly,
}

impl CadenceArg {
    /// Resolves to a concrete cadence.
    pub const fn to_cadence(self, weekly_weekday: chrono::Weekday) -> Cadence {
        match self {
            Self::Daily => Cadence::Daily,
            Self::Weekly => Cadence::Weekly(weekly_weekday),
            Self::Monthly => Cadence::MonthlyLastDay,
        }
    }
}
