//! encore-server — remote event store HTTP service.
//!
//! Usage: encore-server <listen_addr> <db_path>

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use encore::server::router;
use encore::store::EventStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: encore-server <listen_addr> <db_path>");
        std::process::exit(1);
    }

    let store = EventStore::create(Path::new(&args[2]))
        .with_context(|| format!("Failed to open event store at {}", args[2]))?;
    let app = router(Arc::new(store));

    let listener = tokio::net::TcpListener::bind(&args[1])
        .await
        .with_context(|| format!("Failed to bind {}", args[1]))?;
    tracing::info!("Event store listening on {}", args[1]);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
