//! Operator CLI for lane maintenance.
//!
//! # Environment Variables
//!
//! - `DATABASE_URL`: `PostgreSQL` connection URL (required)
//! - `RUST_LOG`: Logging filter (default: `kanban_reorder=info`)
//! - See [`kanban_reorder::config`] for the remaining settings.

use anyhow::Context;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use kanban_reorder::application::{RenormalizeRequest, ReorderCoordinator};
use kanban_reorder::config::ReorderConfig;
use kanban_reorder::domain::{ActorId, WorkspaceId};
use kanban_reorder::infrastructure::{
    PostgresAuditSink, PostgresAuthorizationResolver, PostgresTaskStore, connect, ensure_schema,
};
use kanban_reorder::telemetry::init_tracing;

#[derive(Parser)]
#[command(name = "kanban-reorder")]
#[command(about = "Maintenance commands for Kanban lane ordering")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the tables and indexes if they do not exist
    Migrate,
    /// Re-space every key of one lane
    Renormalize {
        /// Workspace id
        #[arg(long)]
        workspace: Uuid,
        /// Acting user id; must be allowed to modify the workspace
        #[arg(long)]
        actor: Uuid,
        /// Lane name (todo, in_progress, done, cancelled)
        #[arg(long)]
        lane: String,
    },
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = ReorderConfig::from_env().context("invalid configuration")?;
    if let Err(error) = init_tracing(config.log_format) {
        eprintln!("Warning: tracing already initialized: {error}");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;
    runtime.block_on(run(cli.command, config))
}

async fn run(command: Commands, config: ReorderConfig) -> anyhow::Result<()> {
    let pool = connect(&config).await.context("failed to connect to PostgreSQL")?;

    match command {
        Commands::Migrate => {
            ensure_schema(&pool).await.context("schema migration failed")?;
        }
        Commands::Renormalize {
            workspace,
            actor,
            lane,
        } => {
            let coordinator = ReorderCoordinator::new(
                PostgresTaskStore::new(pool.clone(), config.lock_timeout()),
                PostgresAuthorizationResolver::new(pool.clone()),
                PostgresAuditSink::new(pool),
                config.allocator(),
            );
            let outcome = coordinator
                .renormalize_lane(RenormalizeRequest {
                    workspace_id: WorkspaceId::from_uuid(workspace),
                    actor_id: ActorId::from_uuid(actor),
                    status: lane,
                })
                .await?;

            for task in &outcome.tasks {
                println!("{}\t{}\t{}", task.position, task.task_id, task.title);
            }
            tracing::info!(
                lane = outcome.lane.as_str(),
                task_count = outcome.tasks.len(),
                "Renormalization complete"
            );
        }
    }
    Ok(())
}
