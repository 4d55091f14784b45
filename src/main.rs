use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use tracing_subscriber::EnvFilter;

use autopilot::client::BackendClient;
use autopilot::launch::{self, LaunchRequest};
use autopilot::supervisor::Supervisor;

#[derive(Parser)]
#[command(name = "autopilot")]
#[command(version, about = "Autonomous agent run loop for sprint boards")]
pub struct Cli {
    /// Base URL of the backend API
    #[arg(long, global = true, env = "AUTOPILOT_BACKEND_URL")]
    pub backend_url: Option<String>,

    /// Project id scoping every backend request
    #[arg(long, global = true, env = "AUTOPILOT_PROJECT")]
    pub project: Option<String>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Launch a new run against a sprint
    Launch {
        /// Sprint to run against (defaults to the latest non-archived sprint)
        #[arg(long)]
        sprint: Option<String>,

        /// Legacy alias for --sprint
        #[arg(long, conflicts_with = "sprint")]
        board: Option<String>,

        /// Branch the agent works on inside the sandbox
        #[arg(long)]
        branch: String,

        /// Iteration cap (defaults to the project's automation settings)
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Sandbox checkout directory
        #[arg(long, env = "AUTOPILOT_SANDBOX")]
        sandbox: Option<String>,
    },
    /// Run the supervisor loop for an existing run (spawned by launch)
    #[command(hide = true)]
    Supervise {
        #[arg(long)]
        run_id: String,
    },
    /// Request cancellation of a run; repeat to force-kill
    Cancel { run_id: String },
    /// Retry a terminal run as a fresh run against the same sprint
    Retry { run_id: String },
    /// Show the current state of a run
    Status { run_id: String },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("AUTOPILOT_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn make_client(cli: &Cli) -> Result<BackendClient> {
    let base_url = cli
        .backend_url
        .clone()
        .context("No backend URL: pass --backend-url or set AUTOPILOT_BACKEND_URL")?;
    let project = cli
        .project
        .clone()
        .context("No project id: pass --project or set AUTOPILOT_PROJECT")?;
    Ok(BackendClient::new(base_url, project))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let client = make_client(&cli)?;

    match &cli.command {
        Commands::Launch {
            sprint,
            board,
            branch,
            max_iterations,
            sandbox,
        } => {
            let request = LaunchRequest {
                sprint_id: sprint.clone(),
                board_id: board.clone(),
                branch_name: branch.clone(),
                max_iterations: *max_iterations,
                sandbox_path: sandbox.clone(),
                triggered_by: None,
            };
            let run = launch::launch_run(&client, &request).await?;
            println!(
                "{} run {} on sprint {} (pid {})",
                style("Launched").green().bold(),
                run.run_id,
                run.sprint_id,
                run.pid.map_or_else(|| "?".to_string(), |p| p.to_string()),
            );
        }
        Commands::Supervise { run_id } => {
            let supervisor = Supervisor::new(client);
            let status = supervisor.run(run_id).await?;
            println!("Run {} finished: {}", run_id, status);
        }
        Commands::Cancel { run_id } => {
            let run = launch::cancel_run(&client, run_id).await?;
            if run.status.is_terminal() {
                println!(
                    "{} run {} ({})",
                    style("Terminal").yellow().bold(),
                    run.run_id,
                    run.status,
                );
            } else {
                println!(
                    "{} cancellation of run {}; repeat to force-kill",
                    style("Requested").yellow().bold(),
                    run.run_id,
                );
            }
        }
        Commands::Retry { run_id } => {
            let run = launch::retry_run(&client, run_id).await?;
            println!(
                "{} {} as new run {}",
                style("Retrying").green().bold(),
                run_id,
                run.run_id,
            );
        }
        Commands::Status { run_id } => {
            let run = client.get_run(run_id).await?;
            let status = match run.status {
                s if s.is_terminal() => style(s.as_str()).red(),
                s => style(s.as_str()).green(),
            };
            println!("Run:        {}", run.run_id);
            println!("Status:     {}", status);
            if let Some(reason) = run.reason {
                println!("Reason:     {}", reason);
            }
            println!(
                "Iteration:  {}/{}",
                run.current_iteration, run.max_iterations
            );
            println!("Sprint:     {}", run.sprint_id);
            println!("Branch:     {}", run.sandbox_branch);
            if let Some(task) = &run.last_task_id {
                println!("Last task:  {}", task);
            }
            if let Some(message) = &run.last_message {
                println!("Message:    {}", message);
            }
            for error in &run.errors {
                println!("{}      {}", style("Error:").red(), error);
            }
        }
    }

    Ok(())
}
