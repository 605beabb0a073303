mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "logloom",
    version,
    about = "Logloom — learn regex templates from raw logs with an LM in the loop"
)]
pub(crate) struct Cli {
    /// Print pipeline stage events to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Learn templates from a log file and write the match report
    Run {
        /// Input log file
        #[arg(long)]
        input: PathBuf,
        /// Output directory (holds libraries/ and reports/)
        #[arg(long)]
        output: PathBuf,
        /// Lines per batch (default: 50000)
        #[arg(long)]
        batch_size: Option<usize>,
        /// Log-source slug, bypasses LM routing
        #[arg(long)]
        source_hint: Option<String>,
        /// Library id to use directly (required with --match-only)
        #[arg(long)]
        library: Option<String>,
        /// Replay against an existing library only — no LM, no learning
        #[arg(long)]
        match_only: bool,
        /// Leave this many trailing pending lines unresolved instead of
        /// spending LM calls on them (default: 0)
        #[arg(long)]
        skip_threshold: Option<usize>,
        /// Process at most this many lines
        #[arg(long)]
        limit: Option<usize>,
        /// Match-engine worker threads (default: auto)
        #[arg(long)]
        workers: Option<usize>,
    },
    /// List libraries with template and sample counts
    Ls {
        /// Output directory of a previous run (default: LOGLOOM_HOME)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Show a library's head pattern and templates
    Show {
        /// Library id
        library: String,
        /// Output directory of a previous run (default: LOGLOOM_HOME)
        #[arg(long)]
        output: Option<PathBuf>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    use commands::{cmd_ls, cmd_run, cmd_show, or_exit};

    let cli = Cli::parse();
    let exit_code = match &cli.command {
        Commands::Run {
            input,
            output,
            batch_size,
            source_hint,
            library,
            match_only,
            skip_threshold,
            limit,
            workers,
        } => or_exit(cmd_run(&commands::RunArgs {
            input: input.clone(),
            output: output.clone(),
            batch_size: *batch_size,
            source_hint: source_hint.clone(),
            library: library.clone(),
            match_only: *match_only,
            skip_threshold: *skip_threshold,
            limit: *limit,
            workers: *workers,
            verbose: cli.verbose,
        })),
        Commands::Ls { output } => or_exit(cmd_ls(output.as_deref())),
        Commands::Show {
            library,
            output,
            json,
        } => or_exit(cmd_show(library, output.as_deref(), *json)),
    };
    std::process::exit(exit_code);
}
