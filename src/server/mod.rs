//! HTTP surface: webhook intake and health check.

mod error;
mod handlers;
mod router;

pub use error::ApiError;
pub use router::{create_router, AppState};

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(addr: &str, state: Arc<AppState>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Webhook listening on http://{}/webhook", addr);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}
