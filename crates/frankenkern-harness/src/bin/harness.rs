//! CLI entrypoint for the FrankenKern workload harness.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

use frankenkern_harness::structured_log::{LogEmitter, LogEntry, LogLevel};
use frankenkern_harness::{detach_leak, join_storm, spawn_tree};

/// Workload tooling for the thread-lifecycle subsystem.
#[derive(Debug, Parser)]
#[command(name = "frankenkern-harness")]
#[command(about = "Lifecycle workload harness for FrankenKern")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one workload scenario and emit JSONL evidence.
    Run {
        /// Scenario to run.
        #[arg(long, value_enum)]
        scenario: Scenario,
        /// Scale factor: processes, joiners, or detached threads,
        /// depending on the scenario.
        #[arg(long, default_value_t = 8)]
        scale: usize,
        /// JSONL output path (stdout if omitted).
        #[arg(long)]
        log: Option<PathBuf>,
    },
    /// List the available scenarios.
    List,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Scenario {
    /// Fan-out process/thread tree, joined and reaped.
    SpawnTree,
    /// Many joiners blocked on one handle.
    JoinStorm,
    /// Mass detach; pins the inherited slot leak.
    DetachLeak,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Command::List => {
            println!("spawn-tree   fan-out joins across processes");
            println!("join-storm   many joiners on one handle");
            println!("detach-leak  mass detach, leak pinned");
            ExitCode::SUCCESS
        }
        Command::Run {
            scenario,
            scale,
            log,
        } => {
            let mut emitter = match log {
                Some(path) => match LogEmitter::to_file(&path) {
                    Ok(emitter) => emitter,
                    Err(err) => {
                        eprintln!("cannot open {}: {err}", path.display());
                        return ExitCode::FAILURE;
                    }
                },
                None => LogEmitter::stdout(),
            };

            let report = match scenario {
                Scenario::SpawnTree => spawn_tree(scale, 4),
                Scenario::JoinStorm => join_storm(scale),
                Scenario::DetachLeak => detach_leak(scale),
            };

            let mut start = LogEntry::new(LogLevel::Info, "scenario_start");
            start.scenario = Some(report.scenario.clone());
            start.detail = Some(format!("scale {scale}"));
            let mut entries = vec![start];
            entries.extend(report.to_log_entries());
            for entry in &entries {
                if let Err(err) = emitter.emit(entry) {
                    eprintln!("log emission failed: {err}");
                    return ExitCode::FAILURE;
                }
            }

            if report.passed() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
