use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use image_vault::{
    config::Config, create_app, database::init_db, service::ImageStore, state::AppState,
    storage::init_storage,
};

#[derive(Parser)]
#[command(name = "image-vault", version, about = "Content-addressed image store")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Import every image in a folder into an existing type
    Import {
        #[arg(long)]
        type_id: i64,
        #[arg(long)]
        folder: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("image_vault=info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();

    let config = Config::from_env().context("Failed to load configuration")?;

    let pool = init_db(&config.database_url)
        .await
        .context("Failed to connect to db")?;

    let storage = init_storage(&config.upload_folder)
        .await
        .context("Failed to initialize storage")?;

    let store = ImageStore::new(pool, storage, config);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(store).await,
        Command::Import { type_id, folder } => {
            let report = store.import_folder(type_id, &folder).await?;
            println!(
                "Imported {} new, {} duplicate, {} failed",
                report.imported, report.duplicates, report.failed
            );
            Ok(())
        }
    }
}

async fn serve(store: ImageStore) -> Result<(), anyhow::Error> {
    let addr = store.config().bind_addr.clone();
    let app = create_app(AppState::new(store));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
