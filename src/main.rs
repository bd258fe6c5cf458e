mod api;

use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use zapmux_core::config;
use zapmux_core::traits::{CredentialStore, GroupStore, ProtocolConnector};
use zapmux_session::{GroupSync, ReconnectPolicy, SessionRegistry, VersionResolver};
use zapmux_store::SqlxStore;

#[derive(Parser)]
#[command(
    name = "zapmux",
    version,
    about = "zapmux: WhatsApp connection session manager"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the session manager and its HTTP control surface.
    Serve,
    /// Print the effective configuration and database reachability.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Commands::Serve => {
            let cfg = config::load(&cli.config)?;

            let store = Arc::new(SqlxStore::connect(&cfg.database.url).await?);
            let credentials: Arc<dyn CredentialStore> = store.clone();
            let groups: Arc<dyn GroupStore> = store.clone();

            let registry = Arc::new(SessionRegistry::new(
                build_connector(credentials.clone())?,
                credentials,
                Arc::new(VersionResolver::new(&cfg.whatsapp)),
                ReconnectPolicy::from_millis(cfg.reconnect.floor_ms, cfg.reconnect.cap_ms),
            ));
            let group_sync = Arc::new(GroupSync::new(
                groups,
                Duration::from_secs(cfg.whatsapp.group_sync_timeout_secs),
            ));

            let state = api::ApiState {
                registry: registry.clone(),
                group_sync,
            };

            api::serve(state, &cfg.server.host, cfg.server.port, shutdown_signal()).await?;

            // Sockets close, credentials stay: every session resumes on the
            // next boot without re-pairing.
            registry.shutdown().await;
            info!("shutdown complete");
        }
        Commands::Status => {
            let cfg = config::load(&cli.config)?;
            println!("zapmux: Status Check\n");
            println!("Config: {}", cli.config);
            println!("Listen: {}:{}", cfg.server.host, cfg.server.port);
            println!("Database: {}", cfg.database.url);
            println!(
                "Version fallback: {}.{}.{}",
                cfg.whatsapp.version_fallback.0,
                cfg.whatsapp.version_fallback.1,
                cfg.whatsapp.version_fallback.2
            );
            println!(
                "Reconnect: {}ms floor, {}ms cap",
                cfg.reconnect.floor_ms, cfg.reconnect.cap_ms
            );

            match SqlxStore::connect(&cfg.database.url).await {
                Ok(_) => println!("\n  database: reachable"),
                Err(e) => println!("\n  database: unreachable ({e})"),
            }

            #[cfg(feature = "whatsapp-live")]
            println!("  protocol: whatsapp-live enabled");
            #[cfg(not(feature = "whatsapp-live"))]
            println!("  protocol: whatsapp-live disabled (serve will refuse to start)");
        }
    }

    Ok(())
}

#[cfg(feature = "whatsapp-live")]
fn build_connector(
    credentials: Arc<dyn CredentialStore>,
) -> anyhow::Result<Arc<dyn ProtocolConnector>> {
    Ok(Arc::new(zapmux_session::live::WhatsAppConnector::new(
        credentials,
    )))
}

#[cfg(not(feature = "whatsapp-live"))]
fn build_connector(
    _credentials: Arc<dyn CredentialStore>,
) -> anyhow::Result<Arc<dyn ProtocolConnector>> {
    anyhow::bail!(
        "this build has no protocol stack. Rebuild with `--features whatsapp-live` \
         to open real WhatsApp connections."
    )
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
