//! Employee service binary.

use anyhow::Context;
use employee_store::service::{self, AppState};
use employee_store::{Backend, Connection, DocumentStore, MemoryBackend, Settings};
use tokio::net::TcpListener;
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = dotenvy::dotenv();
    let settings = Settings::from_env().context("invalid configuration")?;
    init_logging(&settings.log_level);
    if let Ok(path) = dotenv {
        tracing::debug!(path = %path.display(), "loaded .env file");
    }

    let options = settings.client_options();

    if settings.uses_memory_backend() {
        tracing::warn!("using the in-memory backend; data is lost on exit");
        let connection = Connection::open(MemoryBackend::new(), options).await?;
        serve(connection, &settings).await
    } else {
        let connection = Connection::with_options(&settings.mongo_uri, options)
            .await
            .context("could not connect to MongoDB")?;
        serve(connection, &settings).await
    }
}

fn init_logging(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init()
        .ok();
}

async fn serve<B: Backend>(connection: Connection<B>, settings: &Settings) -> anyhow::Result<()> {
    let database = settings.database_name(connection.default_database());
    let store = DocumentStore::new(connection.clone());
    let app = service::router(AppState::new(store, &database, &settings.collection));

    let address = settings.bind_address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("could not bind {}", address))?;
    tracing::info!(
        address = %listener.local_addr()?,
        database = %database,
        collection = %settings.collection,
        "employee service listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    connection.close().await;
    tracing::info!("employee service stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
