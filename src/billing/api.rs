use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::error;

use crate::config;
use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;
use crate::organizations::{require_manager, require_member};
use super::models::{LedgerEntry, OrganizationBilling, SubscriptionStatus};
use super::plans::{self, ImageLimit, PlanEntitlements, PlanTier};
use super::provider::{BillingProvider, CheckoutSessionRequest};
use super::service::BillingService;

/// key: billing-api -> rest endpoints
pub async fn list_plans() -> Json<Vec<&'static PlanEntitlements>> {
    Json(plans::plan_catalog())
}

pub async fn subscription_overview(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
    Path(organization_id): Path<i32>,
) -> AppResult<Json<SubscriptionOverview>> {
    require_member(&pool, organization_id, user_id).await?;
    let org = fetch_billing_row(&pool, organization_id).await?;

    let image_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM menu_images WHERE organization_id = $1")
            .bind(organization_id)
            .fetch_one(&pool)
            .await
            .map_err(|e| {
                error!(?e, "DB error counting menu images");
                AppError::Db(e)
            })?;

    let tier = PlanTier::from_key(&org.plan);
    let entitlements = plans::entitlements(tier);
    let stored = u32::try_from(image_count).unwrap_or(u32::MAX);
    Ok(Json(SubscriptionOverview {
        plan: tier,
        status: SubscriptionStatus::from_str(&org.subscription_status),
        current_period_end: org.current_period_end,
        entitlements,
        image_count,
        remaining_images: entitlements.max_images.remaining(stored),
    }))
}

pub async fn list_billing_events(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
    Path(organization_id): Path<i32>,
) -> AppResult<Json<Vec<LedgerEntry>>> {
    require_member(&pool, organization_id, user_id).await?;
    let entries = sqlx::query_as::<_, LedgerEntry>(
        r#"
        SELECT id, provider_ref, organization_id, plan, amount_cents, status,
               period_start, period_end, created_at
        FROM billing_events
        WHERE organization_id = $1
        ORDER BY created_at DESC
        LIMIT 50
        "#,
    )
    .bind(organization_id)
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        error!(?e, "DB error listing billing events");
        AppError::Db(e)
    })?;
    Ok(Json(entries))
}

pub async fn create_checkout(
    Extension(pool): Extension<PgPool>,
    Extension(provider): Extension<Arc<dyn BillingProvider>>,
    AuthUser { user_id, .. }: AuthUser,
    Path(organization_id): Path<i32>,
    Json(payload): Json<CheckoutRequest>,
) -> AppResult<Json<CheckoutResponse>> {
    require_manager(&pool, organization_id, user_id).await?;

    let tier = PlanTier::from_key(&payload.plan);
    let price_ref = plan_price_ref(tier)
        .ok_or_else(|| AppError::BadRequest("Plan cannot be checked out".into()))?;

    let org = fetch_billing_row(&pool, organization_id).await?;
    let organization_name: String =
        sqlx::query_scalar("SELECT name FROM organizations WHERE id = $1")
            .bind(organization_id)
            .fetch_one(&pool)
            .await
            .map_err(AppError::Db)?;
    let email: String = sqlx::query_scalar("SELECT email FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_one(&pool)
        .await
        .map_err(AppError::Db)?;

    // customers are created lazily on first checkout and reused afterwards
    let customer_ref = match org.stripe_customer_id {
        Some(existing) => existing,
        None => {
            let created = provider
                .create_customer(&email, organization_id, &organization_name)
                .await
                .map_err(|e| {
                    error!(?e, "provider customer creation failed");
                    AppError::BadGateway("billing provider unavailable".into())
                })?;
            sqlx::query("UPDATE organizations SET stripe_customer_id = $2 WHERE id = $1")
                .bind(organization_id)
                .bind(&created)
                .execute(&pool)
                .await
                .map_err(|e| {
                    error!(?e, "DB error storing customer reference");
                    AppError::Db(e)
                })?;
            created
        }
    };

    let base = config::APP_BASE_URL.as_str().trim_end_matches('/').to_string();
    let success_url = format!("{base}/dashboard?checkout=success");
    let cancel_url = format!("{base}/dashboard?checkout=canceled");
    let url = provider
        .create_checkout_session(CheckoutSessionRequest {
            customer_ref: &customer_ref,
            organization_id,
            plan: tier,
            price_ref: &price_ref,
            success_url: &success_url,
            cancel_url: &cancel_url,
        })
        .await
        .map_err(|e| {
            error!(?e, "provider checkout session failed");
            AppError::BadGateway("billing provider unavailable".into())
        })?;

    Ok(Json(CheckoutResponse { url }))
}

/// Provider first, then the local downgrade; a webhook confirming the provider
/// side later rewrites the same values.
pub async fn cancel_subscription(
    Extension(pool): Extension<PgPool>,
    Extension(provider): Extension<Arc<dyn BillingProvider>>,
    AuthUser { user_id, .. }: AuthUser,
    Path(organization_id): Path<i32>,
) -> AppResult<Json<CancelResponse>> {
    require_manager(&pool, organization_id, user_id).await?;
    let org = fetch_billing_row(&pool, organization_id).await?;
    let subscription_ref = org
        .stripe_subscription_id
        .ok_or_else(|| AppError::BadRequest("Organization has no active subscription".into()))?;

    provider
        .cancel_at_period_end(&subscription_ref)
        .await
        .map_err(|e| {
            error!(?e, "provider cancellation failed");
            AppError::BadGateway("billing provider unavailable".into())
        })?;

    let service = BillingService::new(pool);
    service.user_cancel(organization_id).await.map_err(|e| {
        error!(?e, "DB error recording cancellation");
        AppError::Message("Failed to record cancellation".into())
    })?;

    Ok(Json(CancelResponse {
        plan: PlanTier::Free,
        status: SubscriptionStatus::Canceled,
    }))
}

async fn fetch_billing_row(pool: &PgPool, organization_id: i32) -> AppResult<OrganizationBilling> {
    let row = sqlx::query_as::<_, OrganizationBilling>(
        r#"
        SELECT id, plan, subscription_status, stripe_customer_id,
               stripe_subscription_id, current_period_end
        FROM organizations
        WHERE id = $1
        "#,
    )
    .bind(organization_id)
    .fetch_optional(pool)
    .await
    .map_err(|e| {
        error!(?e, "DB error fetching organization billing state");
        AppError::Db(e)
    })?;
    row.ok_or(AppError::NotFound)
}

fn plan_price_ref(tier: PlanTier) -> Option<String> {
    match tier {
        PlanTier::Free => None,
        PlanTier::Plus => Some(config::STRIPE_PLUS_PRICE_ID.as_str().to_string()),
        PlanTier::Pro => Some(config::STRIPE_PRO_PRICE_ID.as_str().to_string()),
    }
}

#[derive(Debug, Serialize)]
pub struct SubscriptionOverview {
    pub plan: PlanTier,
    pub status: SubscriptionStatus,
    pub current_period_end: Option<DateTime<Utc>>,
    pub entitlements: &'static PlanEntitlements,
    pub image_count: i64,
    pub remaining_images: ImageLimit,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub plan: String,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub plan: PlanTier,
    pub status: SubscriptionStatus,
}
