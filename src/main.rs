use prep_explorer::config::Config;
use prep_explorer::session::Session;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,prep_explorer=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("PREP Data Explorer starting...");

    // Load configuration
    let config = Config::load("config/config.yaml").map_err(|e| {
        anyhow::anyhow!(
            "Failed to load configuration: {}\n\n\
             Make sure:\n\
             1. config/config.yaml exists\n\
             2. All required environment variables are set (check .env.example)\n\
             3. Create a .env file if needed",
            e
        )
    })?;
    info!("Configuration loaded");

    let mut session = Session::new(config)?;

    tokio::select! {
        outcome = session.run() => match outcome {
            Ok(report) => {
                info!(
                    "Session complete: {} results, {} visible stations",
                    report.filtered_results, report.visible_stations
                );
                if let Some(path) = report.export_path {
                    info!("Export written to {}", path.display());
                }
            }
            Err(e) if e.is_fetch_error() => {
                error!("Data source unavailable: {}", e);
            }
            Err(e) => {
                error!("Session error: {}", e);
            }
        },
        _ = shutdown_signal() => {
            info!("Abandoning in-flight requests");
        }
    }

    info!("PREP Data Explorer shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
