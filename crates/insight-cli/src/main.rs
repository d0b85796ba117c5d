use anyhow::Result;
use clap::{Parser, Subcommand};
use insight_infrastructure::InsightPaths;
use std::path::PathBuf;

mod app;
mod commands;
mod logging;

#[derive(Parser)]
#[command(name = "insight")]
#[command(version, about = "Insight - ask questions about your data in plain language", long_about = None)]
struct Cli {
    /// Path to config.toml (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a question about the dataset
    Ask(commands::ask::AskArgs),
    /// Manage conversation sessions
    Sessions {
        #[command(subcommand)]
        action: SessionsAction,
    },
    /// Show the dataset schema
    Schema {
        /// Print the raw descriptor as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum SessionsAction {
    /// List sessions, most recent first
    List,
    /// Print the turns of a session
    Show {
        id: String,
        /// Include the execution trace of each answer
        #[arg(long)]
        trace: bool,
    },
    /// Change a session's title
    Rename { id: String, title: String },
    /// Delete a session
    Delete { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = logging::init(InsightPaths::logs_dir().ok().as_deref());

    let sessions = app::build(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Ask(args) => commands::ask::run(&sessions, args).await?,
        Commands::Sessions { action } => match action {
            SessionsAction::List => commands::sessions::list(&sessions).await?,
            SessionsAction::Show { id, trace } => {
                commands::sessions::show(&sessions, &id, trace).await?
            }
            SessionsAction::Rename { id, title } => {
                commands::sessions::rename(&sessions, &id, &title).await?
            }
            SessionsAction::Delete { id } => commands::sessions::delete(&sessions, &id).await?,
        },
        Commands::Schema { json } => commands::schema::show(&sessions, json)?,
    }

    Ok(())
}
