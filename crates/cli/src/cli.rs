use clap::{Parser, Subcommand};

/// Thin wiring/demo binary over the Data Hub core.
///
/// This is not the admin/query/client API spec.md §1 places out of scope —
/// it's a minimal REPL and scripted demo sufficient to drive the Resource
/// Tree and Observation pipeline from a terminal.
#[derive(Parser, Debug)]
#[command(name = "hub-cli", about = "Drive an in-process Data Hub from a terminal")]
pub struct CliArgs {
    /// Directory backup files are written under. Overrides `HUB_BACKUP_ROOT`.
    #[arg(long)]
    pub backup_root: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the scripted walkthrough of spec.md §8's end-to-end scenarios
    /// (S1-S6) and print each step's observable result.
    Demo,
    /// Read and execute commands from stdin, one per line (default if no
    /// subcommand is given).
    Repl,
}
