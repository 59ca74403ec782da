//! SoHoLINK node binary.
//!
//! `soholink` is a sovereign, offline-first AAA (authentication,
//! authorization, accounting) node for SOHO and community networks:
//! RADIUS authentication backed by Ed25519 credential verification, local
//! policy evaluation, and a tamper-evident accounting trail.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use soholink_core::Config;

mod app;
mod commands;
mod radius;

#[derive(Parser)]
#[command(name = "soholink")]
#[command(author, version, about = "SoHoLINK: sovereign offline-first AAA node", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: platform-specific)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory (default: platform-specific)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bootstrap the node: directories, node key, default policy
    Init,

    /// Run the RADIUS listeners and background maintenance
    Serve,

    /// Manage users
    Users {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Manage authorization policies
    Policy {
        #[command(subcommand)]
        action: PolicyAction,
    },

    /// Show node status
    Status,
}

#[derive(Subcommand)]
enum UserAction {
    /// Add a new user and generate their keypair
    Add {
        username: String,

        /// User role (basic, premium, admin)
        #[arg(long, default_value = "basic")]
        role: String,
    },

    /// List all users
    List,

    /// Revoke a user's access
    Revoke {
        username: String,

        /// Reason for revocation
        #[arg(long, default_value = "manual revocation")]
        reason: String,
    },
}

#[derive(Subcommand)]
enum PolicyAction {
    /// List compiled policy files
    List,

    /// Evaluate the policy with a synthetic input
    Test {
        #[arg(long, default_value = "testuser")]
        user: String,

        #[arg(long, default_value = "did:key:zTestUser")]
        identifier: String,

        #[arg(long, default_value = "basic")]
        role: String,

        #[arg(long, default_value = "network_access")]
        resource: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("soholink={log_level}")),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(data_dir) = cli.data_dir {
        config.storage.base_path = data_dir;
    }

    match cli.command {
        Commands::Init => commands::init::run(&config).await?,
        Commands::Serve => app::App::build(config).await?.run().await?,
        Commands::Users { action } => match action {
            UserAction::Add { username, role } => {
                commands::users::add(&config, &username, &role).await?
            }
            UserAction::List => commands::users::list(&config).await?,
            UserAction::Revoke { username, reason } => {
                commands::users::revoke(&config, &username, &reason).await?
            }
        },
        Commands::Policy { action } => match action {
            PolicyAction::List => commands::policy::list(&config)?,
            PolicyAction::Test {
                user,
                identifier,
                role,
                resource,
            } => commands::policy::test(&config, &user, &identifier, &role, &resource)?,
        },
        Commands::Status => commands::status::run(&config).await?,
    }

    Ok(())
}
