use axum::body::Bytes;
use axum::extract::Extension;
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use tracing::{error, info, warn};

use crate::config;
use crate::error::{AppError, AppResult};
use super::events::parse_event;
use super::service::BillingService;
use super::signature::verify_signature;

/// key: billing-webhook -> inbound provider event dispatch
///
/// Signature failures are the only 400s; once a delivery is authenticated we
/// acknowledge it even when we drop it, so the provider stops retrying.
pub async fn billing_webhook(
    Extension(pool): Extension<PgPool>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<WebhookAck>> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::BadRequest("Missing Stripe-Signature header".into()))?;

    verify_signature(
        &body,
        signature,
        config::STRIPE_WEBHOOK_SECRET.as_str(),
        *config::WEBHOOK_TOLERANCE_SECS,
        Utc::now().timestamp(),
    )
    .map_err(|e| {
        warn!(%e, "rejected webhook delivery");
        AppError::BadRequest("Invalid webhook signature".into())
    })?;

    let payload: Value = serde_json::from_slice(&body).map_err(|e| {
        warn!(%e, "webhook payload is not valid JSON");
        AppError::BadRequest("Unreadable webhook payload".into())
    })?;
    let event_type = payload
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();

    match parse_event(&payload) {
        Ok(event) => {
            let outcome = BillingService::new(pool).apply_event(event).await.map_err(|e| {
                error!(?e, %event_type, "billing event processing failed");
                AppError::Message("Webhook processing failed".into())
            })?;
            info!(%event_type, outcome = outcome.describe(), "billing event handled");
        }
        // a known shape missing required fields will never parse on retry
        Err(e) => warn!(%e, %event_type, "dropped malformed billing event"),
    }

    Ok(Json(WebhookAck { received: true }))
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}
