use clap::{Parser, Subcommand};
use pcapi_sync::config::SyncConfig;
use pcapi_sync::runtime::SyncRuntime;
use pcapi_sync::sync::engine::SyncEvent;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(
    name = "pcapi-sync",
    version,
    about = "Sync field records and editors with a PCAPI server"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
enum Command {
    /// List the storage providers offered by the server
    Providers,
    /// Log in to a storage provider
    Login {
        provider: Option<String>,
        /// User name for the server's local storage
        #[arg(long)]
        username: Option<String>,
    },
    /// Forget the stored user and sync cursor
    Logout,
    /// Show the stored session and local record counts
    Status,
    /// Download cloud changes, then upload local records
    Sync,
    /// Upload local records only
    Upload,
    /// Replace local editors with the cloud copies
    DownloadEditors,
    /// List the editors a user published
    Editors { user: Option<String> },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pcapi_sync=info,pcapi_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let runtime = SyncRuntime::bootstrap(SyncConfig::from_env()?).await?;

    match cli.command {
        Command::Providers => {
            for provider in runtime.providers().await? {
                println!("{provider}");
            }
        }
        Command::Login { provider, username } => {
            let user_id = runtime.login(provider, username).await?;
            println!("logged in as {user_id}");
        }
        Command::Logout => {
            runtime.logout().await?;
            println!("logged out");
        }
        Command::Status => {
            let status = runtime.status().await?;
            let provider = status.session.provider.as_deref().unwrap_or("-");
            match &status.active_user {
                Some(user) => println!("logged in to {provider} as {user}"),
                None => println!("not logged in (provider: {provider})"),
            }
            println!(
                "cursor: {}",
                status.session.cursor.as_deref().unwrap_or("none")
            );
            println!(
                "records: {} ({} to upload, {} incomplete)",
                status.records, status.pending_uploads, status.incomplete
            );
        }
        Command::Sync => {
            let report = runtime.sync().await?;
            for event in &report.events {
                match event {
                    SyncEvent::Added { name, .. } => println!("+ {name}"),
                    SyncEvent::Removed { name, .. } => println!("- {name}"),
                }
            }
            println!(
                "{} sync: {} editors, {} record changes, {} uploaded, {} incomplete, {} failed",
                if report.full { "full" } else { "cursor" },
                report.editors.len(),
                report.events.len(),
                report.upload.synced.len(),
                report.upload.incomplete.len(),
                report.upload.failed.len()
            );
        }
        Command::Upload => {
            let report = runtime.upload().await?;
            println!(
                "{} uploaded, {} incomplete, {} failed",
                report.synced.len(),
                report.incomplete.len(),
                report.failed.len()
            );
        }
        Command::DownloadEditors => {
            for editor in runtime.download_editors().await? {
                println!("{editor}");
            }
        }
        Command::Editors { user } => {
            for editor in runtime.editors(user).await? {
                println!("{editor}");
            }
        }
    }
    Ok(())
}
