use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use workflow_director::stages::progress::DEFAULT_COMPLETION_KEY;
use workflow_director::{
    ComponentRegistry, Director, DirectorError, DirectorResult, ErrorKind, ReportFormat, Role, Stage,
    StateReport, WorkflowConfig,
};

/// Workflow Director CLI: supervise an iterative coding-assistant workflow
#[derive(Parser, Debug)]
#[command(name = "workflow-director")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Project directory holding the workflow state
    #[arg(short, long, global = true)]
    project: Option<PathBuf>,

    /// Path to a JSON or YAML workflow configuration
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the run deadline in seconds
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    /// Fail once this many iterations ran without completion
    #[arg(long, global = true)]
    max_iterations: Option<u32>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the workflow until completion, failure, or deadline (default)
    Run,

    /// Print a summary of the persisted workflow state
    Report {
        #[arg(long, value_enum, default_value_t = ReportFormat::Plain)]
        format: ReportFormat,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match handle(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            exit_code(e.kind())
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    // Logs go to stderr so reports on stdout stay clean
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn exit_code(kind: ErrorKind) -> ExitCode {
    match kind {
        ErrorKind::RunFailure => ExitCode::from(1),
        ErrorKind::Configuration => ExitCode::from(2),
        ErrorKind::Timeout => ExitCode::from(3),
    }
}

fn resolve_project(project: Option<PathBuf>) -> DirectorResult<PathBuf> {
    let project = project.ok_or_else(|| DirectorError::Configuration("project path is required".to_string()))?;
    if !project.is_dir() {
        return Err(DirectorError::Configuration(format!(
            "project path {:?} is not a directory",
            project
        )));
    }
    Ok(project)
}

fn load_config(cli: &Cli) -> DirectorResult<WorkflowConfig> {
    let mut config = WorkflowConfig::load_or_default(cli.config.as_deref())?;

    // Apply CLI overrides
    if let Some(secs) = cli.timeout_secs {
        config.director.deadline_secs = secs;
    }
    if let Some(limit) = cli.max_iterations {
        config.director.max_iterations = Some(limit);
    }
    config.validate()?;
    Ok(config)
}

async fn handle(cli: Cli) -> DirectorResult<()> {
    let project = resolve_project(cli.project.clone())?;
    let config = load_config(&cli)?;

    match cli.command {
        None | Some(Command::Run) => handle_run(&project, &config).await,
        Some(Command::Report { format }) => handle_report(&project, &config, format).await,
    }
}

async fn handle_run(project: &Path, config: &WorkflowConfig) -> DirectorResult<()> {
    info!("Workflow Director starting for {:?}", project);

    let registry = ComponentRegistry::new(project);
    let director = Arc::new(Director::from_config(config, &registry)?);
    let summary = director.run_with_deadline().await?;

    println!("Workflow completed after {} iterations", summary.iterations);
    let report = StateReport::with_completion_key(&summary.final_state, completion_key(config))
        .with_history(summary.progress, summary.interactions);
    print!("{}", report.render(ReportFormat::Plain));
    Ok(())
}

/// Completion flag configured on the progress tracker, if any.
fn completion_key(config: &WorkflowConfig) -> &str {
    config
        .components
        .iter()
        .find(|d| Role::from_type_tag(&d.kind) == Some(Role::ProgressTracker))
        .and_then(|d| d.options.get("completion_key"))
        .and_then(|v| v.as_str())
        .unwrap_or(DEFAULT_COMPLETION_KEY)
}

async fn handle_report(project: &Path, config: &WorkflowConfig, format: ReportFormat) -> DirectorResult<()> {
    let registry = ComponentRegistry::new(project);
    let stages = registry.assemble(config)?;

    let state_manager = stages
        .into_iter()
        .find_map(|stage| match stage {
            Stage::StateManager(sm) => Some(sm),
            _ => None,
        })
        .ok_or_else(|| DirectorError::Configuration("report requires a stateManager component".to_string()))?;

    let state = state_manager
        .load_state()
        .await
        .map_err(|e| DirectorError::state_io(state_manager.name(), e))?;
    print!("{}", StateReport::with_completion_key(&state, completion_key(config)).render(format));
    Ok(())
}
