use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use pipewright::config::{BranchRefPolicy, CompileOptions, Settings};
use pipewright::pipeline::{CompiledArtifact, Compiler, EmitterRegistry, PipelineSpec};
use pipewright::runner::PythonRunner;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "pipewright",
    version,
    about = "Compile declarative ETL pipelines into polars programs"
)]
pub struct Cli {
    /// Show debug logs on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compile a pipeline document into a Python program
    Compile {
        #[command(flatten)]
        pipeline: PipelineArgs,

        /// Write the program here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check a pipeline document without writing a program
    Validate {
        #[command(flatten)]
        pipeline: PipelineArgs,
    },
    /// Compile a pipeline document and execute it
    Run {
        #[command(flatten)]
        pipeline: PipelineArgs,

        /// Python interpreter (defaults to settings, then python3)
        #[arg(long, env = "PIPEWRIGHT_PYTHON")]
        python: Option<String>,

        /// Abort the run after this many seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Working directory for relative paths in the pipeline
        #[arg(long)]
        workdir: Option<PathBuf>,

        /// Also save the compiled program to this path
        #[arg(long)]
        emit: Option<PathBuf>,
    },
}

#[derive(Args)]
pub struct PipelineArgs {
    /// Pipeline document (JSON)
    pub document: PathBuf,

    /// Worker pool size, overriding the document and settings
    #[arg(long)]
    pub threads: Option<usize>,

    /// Require an explicit `branch` on every write directly after a split
    #[arg(long)]
    pub strict_branch_refs: bool,

    /// Settings file (defaults to the platform config directory)
    #[arg(long)]
    pub settings: Option<PathBuf>,
}

impl PipelineArgs {
    fn load_settings(&self) -> Result<Settings> {
        let path = self.settings.clone().or_else(Settings::default_path);
        Settings::load(path.as_deref())
    }

    /// Flags win over settings, settings over the document.
    fn compile_options(&self, settings: &Settings) -> CompileOptions {
        let mut options = settings.compile_options();
        if self.threads.is_some() {
            options.threads = self.threads;
        }
        if self.strict_branch_refs {
            options.branch_refs = BranchRefPolicy::Explicit;
        }
        options
    }
}

pub async fn run_command(command: Commands) -> Result<()> {
    match command {
        Commands::Compile { pipeline, output } => handle_compile(&pipeline, output.as_deref()),
        Commands::Validate { pipeline } => handle_validate(&pipeline),
        Commands::Run {
            pipeline,
            python,
            timeout,
            workdir,
            emit,
        } => handle_run(&pipeline, python, timeout, workdir, emit).await,
    }
}

fn compile(args: &PipelineArgs, settings: &Settings) -> Result<CompiledArtifact> {
    let spec = PipelineSpec::from_file(&args.document)?;
    let compiler = Compiler::new(EmitterRegistry::polars(), args.compile_options(settings));
    Ok(compiler.compile(&spec)?)
}

fn handle_compile(args: &PipelineArgs, output: Option<&Path>) -> Result<()> {
    let settings = args.load_settings()?;
    let program = compile(args, &settings)?.render();

    if let Some(path) = output {
        std::fs::write(path, &program)
            .with_context(|| format!("Failed to write program to {}", path.display()))?;
        tracing::info!("Wrote {}", path.display());
    } else {
        let mut stdout = std::io::stdout().lock();
        stdout
            .write_all(program.as_bytes())
            .context("Failed to write program to stdout")?;
        stdout.flush()?;
    }
    Ok(())
}

fn handle_validate(args: &PipelineArgs) -> Result<()> {
    let settings = args.load_settings()?;
    let artifact = compile(args, &settings)?;

    let mut stdout = std::io::stdout().lock();
    writeln!(
        stdout,
        "{}: valid ({} units)",
        args.document.display(),
        artifact.unit_names.len()
    )?;
    Ok(())
}

async fn handle_run(
    args: &PipelineArgs,
    python: Option<String>,
    timeout: Option<u64>,
    workdir: Option<PathBuf>,
    emit: Option<PathBuf>,
) -> Result<()> {
    let mut settings = args.load_settings()?;
    if let Some(python) = python {
        settings.python = python;
    }
    if let Some(secs) = timeout {
        settings.timeout_secs = secs;
    }

    let program = compile(args, &settings)?.render();
    if let Some(path) = &emit {
        std::fs::write(path, &program)
            .with_context(|| format!("Failed to write program to {}", path.display()))?;
    }

    let runner = PythonRunner::from_settings(&settings);
    tracing::info!(
        "Running {} with {} (timeout {:?})",
        args.document.display(),
        runner.python(),
        Duration::from_secs(settings.timeout_secs)
    );

    let output = runner.run(&program, workdir.as_deref()).await?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(output.stdout.as_bytes())?;
    if !output.stderr.trim().is_empty() {
        tracing::debug!("Program stderr:\n{}", output.stderr);
    }
    tracing::info!("Pipeline completed");
    Ok(())
}
