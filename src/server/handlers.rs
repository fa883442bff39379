use axum::{body::Bytes, extract::State, Json};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use super::{ApiError, AppState};
use crate::signal::IntakeOutcome;

/// POST /webhook
pub async fn webhook(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    info!(body = %String::from_utf8_lossy(&body), "Received signal");

    let outcome = state.intake.handle(&body).await.map_err(|e| {
        warn!(error = %e, "Signal not executed");
        ApiError::from(e)
    })?;

    let response = match outcome {
        IntakeOutcome::Executed(opened) => json!({
            "status": "success",
            "symbol": opened.symbol,
            "side": opened.side,
            "amount": opened.amount.to_string(),
            "price": opened.price.to_string(),
            "order_id": opened.order.id,
        }),
        IntakeOutcome::Ignored { message, .. } => json!({
            "status": "ignored",
            "message": message,
        }),
    };

    Ok(Json(response))
}

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "time": Utc::now().to_rfc3339(),
    }))
}
