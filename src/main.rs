//! # Pipewright Command Line
//!
//! ```text
//! main()
//!   │
//!   ├─> Parse CLI arguments (clap)
//!   ├─> Initialize logging (stderr + rolling files)
//!   ├─> Create Tokio runtime
//!   └─> Execute command, map the outcome to an exit code
//! ```
//!
//! ```bash
//! pipewright compile pipeline.json -o pipeline.py
//! pipewright validate pipeline.json --strict-branch-refs
//! pipewright run pipeline.json --threads 4
//! ```
//!
//! Exit codes: `0` success, `1` other failure, `2` the document did not
//! compile, `3` the generated program failed.

#![warn(clippy::all, rust_2018_idioms)]
#![expect(clippy::print_stderr)] // Final error report goes to stderr

mod cli;

use clap::Parser as _;
use pipewright::error::PipelineError;
use std::process::ExitCode;

const EXIT_FAILURE: u8 = 1;
const EXIT_COMPILE_ERROR: u8 = 2;
const EXIT_EXECUTION_ERROR: u8 = 3;

fn main() -> ExitCode {
    let cli = cli::Cli::parse();

    if let Err(err) = pipewright::logging::init(cli.verbose) {
        // File logging is optional; keep console output.
        let console = tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(if cli.verbose { "debug" } else { "warn" })
            .try_init();
        if console.is_ok() {
            tracing::warn!("File logging unavailable: {err:#}");
        }
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error: failed to start runtime: {err}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    match runtime.block_on(cli::run_command(cli.command)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err:#}");
            eprintln!("Error: {err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<PipelineError>() {
        Some(e) if e.is_compile_error() => EXIT_COMPILE_ERROR,
        Some(PipelineError::Execution(_)) => EXIT_EXECUTION_ERROR,
        _ => EXIT_FAILURE,
    }
}
