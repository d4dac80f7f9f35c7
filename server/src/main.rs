//! Harvest Chat Server binary: admin commands and the HTTP/WebSocket listener.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use harvest_chat_core::UserRole;
use harvest_chat_server::{config::Config, crypto, router, spawn_typing_sweeper, storage::Storage, AppState};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Harvest Chat Server CLI
#[derive(Parser)]
#[command(name = "harvest-chat-server")]
#[command(about = "Buyer/seller messaging server for the Harvest marketplace")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a user and print their access token
    CreateUser {
        /// Admin master key for authorization
        #[arg(long)]
        admin_key: String,

        /// Optional user ID (will be generated if not provided)
        #[arg(long)]
        user_id: Option<String>,

        /// Name shown to the other side of a conversation
        #[arg(long)]
        display_name: String,

        /// buyer, seller or admin
        #[arg(long, default_value = "buyer")]
        role: UserRole,
    },

    /// List all registered users
    ListUsers {
        /// Admin master key
        #[arg(long)]
        admin_key: String,
    },

    /// Revoke a user's access token
    DeactivateUser {
        /// Admin master key
        #[arg(long)]
        admin_key: String,

        /// User ID to deactivate
        #[arg(long)]
        user_id: String,
    },

    /// Print store statistics
    Stats {
        /// Admin master key
        #[arg(long)]
        admin_key: String,
    },

    /// Run the server
    Run,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "harvest_chat_server=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Load config
    let config = Config::load(&cli.config).await?;
    let config = Arc::new(config);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::CreateUser {
            admin_key,
            user_id,
            display_name,
            role,
        } => {
            create_user(&config, &admin_key, user_id, &display_name, role).await?;
        }
        Commands::ListUsers { admin_key } => {
            list_users(&config, &admin_key).await?;
        }
        Commands::DeactivateUser { admin_key, user_id } => {
            deactivate_user(&config, &admin_key, &user_id).await?;
        }
        Commands::Stats { admin_key } => {
            print_stats(&config, &admin_key).await?;
        }
        Commands::Run => {
            run_server(config).await?;
        }
    }

    Ok(())
}

fn verify_admin_key(config: &Config, admin_key: &str) -> anyhow::Result<()> {
    if admin_key != config.admin.master_key {
        anyhow::bail!("Invalid admin key");
    }
    Ok(())
}

async fn create_user(
    config: &Config,
    admin_key: &str,
    user_id: Option<String>,
    display_name: &str,
    role: UserRole,
) -> anyhow::Result<()> {
    verify_admin_key(config, admin_key)?;

    let storage = Storage::new(&config.storage.database_path).await?;

    let user_id = user_id.unwrap_or_else(crypto::generate_id);
    if storage.get_user(&user_id).await?.is_some() {
        anyhow::bail!("User {} already exists", user_id);
    }

    let token = crypto::generate_access_token()?;
    storage
        .create_user(&user_id, display_name, role.as_str(), &crypto::hash_token(&token))
        .await?;

    println!("=== New User Registered ===");
    println!("User ID: {}", user_id);
    println!("Name: {} ({})", display_name, role.as_str());
    println!("Access Token: {}", token);
    println!("===========================");
    println!("The access token will NOT be shown again!");

    Ok(())
}

async fn list_users(config: &Config, admin_key: &str) -> anyhow::Result<()> {
    verify_admin_key(config, admin_key)?;

    let storage = Storage::new(&config.storage.database_path).await?;
    let users = storage.list_users().await?;

    println!("=== Registered Users ===");
    for user in users {
        println!(
            "User ID: {} | Name: {} | Role: {} | Created: {} | Active: {}",
            user.user_id, user.display_name, user.role, user.created_at, user.is_active
        );
    }

    Ok(())
}

async fn deactivate_user(config: &Config, admin_key: &str, user_id: &str) -> anyhow::Result<()> {
    verify_admin_key(config, admin_key)?;

    let storage = Storage::new(&config.storage.database_path).await?;
    storage.deactivate_user(user_id).await?;

    println!("User {} has been deactivated", user_id);

    Ok(())
}

async fn print_stats(config: &Config, admin_key: &str) -> anyhow::Result<()> {
    verify_admin_key(config, admin_key)?;

    let storage = Storage::new(&config.storage.database_path).await?;
    let stats = storage.get_stats().await?;

    println!("{}", serde_json::to_string_pretty(&stats)?);

    Ok(())
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("Starting Harvest Chat Server v{}", env!("CARGO_PKG_VERSION"));

    // Initialize storage
    let storage = Arc::new(Storage::new(&config.storage.database_path).await?);

    let state = AppState::new(Arc::clone(&config), storage);

    // Expire typing signals whose client went quiet
    spawn_typing_sweeper(
        Arc::clone(&state.service),
        Duration::from_millis(config.typing.sweep_interval_ms),
    );

    let app = router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
