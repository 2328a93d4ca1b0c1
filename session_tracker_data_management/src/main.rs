use clap::{Parser, Subcommand};
use session_tracker_data_management::DataManager;
use session_tracker_lib::session::SessionId;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// CLI for manual data operations
#[derive(Parser)]
#[command(name = "SessionCLI")]
#[command(about = "A CLI to inspect and update tracking sessions", long_about = None)]
struct Cli {
    /// SQLite url, defaults to the database in the project data dir
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List all sessions
    List,
    /// Create a new, active session
    Create { name: String },
    /// Rename a session
    Rename { session_id: SessionId, name: String },
    /// Stop accepting samples for a session
    Deactivate { session_id: SessionId },
    /// Start accepting samples for a session again
    Activate { session_id: SessionId },
    /// Delete a session and all of its samples. BE CAREFUL
    Delete { session_id: SessionId },
    /// Print the samples of a session, most recent first
    Samples { session_id: SessionId },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=info", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let data_manager = DataManager::start(cli.database_url.as_deref()).await?;

    match cli.command {
        Commands::List => {
            for session in data_manager.list_sessions().await? {
                let aggregate = match session.last_aggregate() {
                    Some((distance, Some(speed))) => format!("{distance:.3} km, {speed:.1} km/h"),
                    Some((distance, None)) => format!("{distance:.3} km"),
                    None => "-".to_string(),
                };
                println!(
                    "{}  {:<30} {:<8} {:>6} samples  {}",
                    session.id,
                    session.name,
                    if session.active { "active" } else { "inactive" },
                    session.counter,
                    aggregate
                );
            }
        }
        Commands::Create { name } => {
            let session = data_manager.create_session(&name).await?;
            println!("{}", session.id);
        }
        Commands::Rename { session_id, name } => {
            let session = data_manager.get_session(session_id).await?;
            data_manager.update_session(session_id, &name, session.active).await?;
        }
        Commands::Deactivate { session_id } => set_active(&data_manager, session_id, false).await?,
        Commands::Activate { session_id } => set_active(&data_manager, session_id, true).await?,
        Commands::Delete { session_id } => data_manager.delete_session(session_id).await?,
        Commands::Samples { session_id } => {
            for sample in data_manager.list_samples(session_id).await? {
                println!(
                    "{}  {}  {:>11.6} {:>11.6}",
                    sample.id,
                    sample.created_at().to_rfc3339(),
                    sample.position.latitude,
                    sample.position.longitude
                );
            }
        }
    }

    Ok(())
}

async fn set_active(data_manager: &DataManager, session_id: SessionId, active: bool) -> anyhow::Result<()> {
    let session = data_manager.get_session(session_id).await?;
    data_manager.update_session(session_id, &session.name, active).await?;
    Ok(())
}
