//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Field tracker.
///
/// Records what state each tracked field was in and when, and checks the
/// resulting timelines for contradictions.
#[derive(Debug, Parser)]
#[command(name = "ft", version, about, long_about = None)]
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
    /// Record an event against a field.
    Add {
        /// The field the event belongs to (e.g., sleep).
        #[arg(long)]
        field: String,

        /// When the event occurred, or when its block ended.
        #[arg(long)]
        at: String,

        /// Event ID (defaults to `<at>_<random>`). Reusing an ID replaces that event.
        #[arg(long)]
        id: Option<String>,

        /// New state as JSON (`true`, `null`, `{"id": "nap"}`); bare words are names.
        #[arg(long)]
        state: Option<String>,

        /// State before the event, as JSON (defaults to the field's state at that time).
        #[arg(long)]
        last_state: Option<String>,

        /// Signed ISO 8601 duration ending at `--at` (e.g., PT8H, -PT10M).
        #[arg(long, allow_hyphen_values = true)]
        duration: Option<String>,
    },

    /// Check field timelines for continuity breaks and overlapping blocks.
    Check {
        /// Field to check.
        #[arg(long, required_unless_present = "all", conflicts_with = "all")]
        field: Option<String>,

        /// Check every known field in parallel.
        #[arg(long)]
        all: bool,

        /// Only check from this time (ISO 8601 or e.g. '2 days ago').
        #[arg(long)]
        start: Option<String>,

        /// Only check before this time.
        #[arg(long)]
        end: Option<String>,

        /// Rewrite `lastState` values to heal continuity breaks.
        #[arg(long)]
        fix: bool,

        /// Stop at the first problem.
        #[arg(long, conflicts_with = "accumulate")]
        fail_on_error: bool,

        /// Collect every problem instead of stopping at the first.
        #[arg(long)]
        accumulate: bool,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show a field's state changes.
    Timeline {
        /// Field to show.
        #[arg(long)]
        field: String,

        /// Only show changes from this time.
        #[arg(long)]
        start: Option<String>,

        /// Only show changes before this time.
        #[arg(long)]
        end: Option<String>,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List known fields.
    Fields,
}
