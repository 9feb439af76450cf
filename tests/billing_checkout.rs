use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::extract::Path;
use axum::{Extension, Json};
use menuhost::billing::api::{cancel_subscription, create_checkout, CheckoutRequest};
use menuhost::billing::{BillingProvider, CheckoutSessionRequest, PlanTier, SubscriptionStatus};
use menuhost::error::AppError;
use menuhost::extractor::AuthUser;
use sqlx::PgPool;

#[derive(Default)]
struct RecordingProvider {
    calls: Mutex<Vec<String>>,
}

impl RecordingProvider {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BillingProvider for RecordingProvider {
    async fn create_customer(
        &self,
        email: &str,
        organization_id: i32,
        _organization_name: &str,
    ) -> anyhow::Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("customer:{email}:{organization_id}"));
        Ok("cus_test".into())
    }

    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest<'_>,
    ) -> anyhow::Result<String> {
        self.calls.lock().unwrap().push(format!(
            "checkout:{}:{}:{}",
            request.customer_ref,
            request.plan.as_str(),
            request.price_ref
        ));
        Ok("https://checkout.example/session_1".into())
    }

    async fn cancel_at_period_end(&self, subscription_ref: &str) -> anyhow::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("cancel:{subscription_ref}"));
        Ok(())
    }
}

async fn seed_owner(pool: &PgPool, email: &str, org: &str, slug: &str) -> (i32, i32) {
    let user_id: i32 = sqlx::query_scalar(
        "INSERT INTO users (email, password_hash) VALUES ($1, 'hash') RETURNING id",
    )
    .bind(email)
    .fetch_one(pool)
    .await
    .unwrap();
    let organization_id: i32 =
        sqlx::query_scalar("INSERT INTO organizations (name, slug) VALUES ($1, $2) RETURNING id")
            .bind(org)
            .bind(slug)
            .fetch_one(pool)
            .await
            .unwrap();
    sqlx::query(
        "INSERT INTO organization_members (organization_id, user_id, role) VALUES ($1, $2, 'owner')",
    )
    .bind(organization_id)
    .bind(user_id)
    .execute(pool)
    .await
    .unwrap();
    (user_id, organization_id)
}

// key: checkout-tests -> lazy customers,provider seam
#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn checkout_creates_the_customer_once(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let (user_id, organization_id) =
        seed_owner(&pool, "owner@example.com", "Checkout Org", "checkout-org").await;
    let recorder = Arc::new(RecordingProvider::default());
    let provider: Arc<dyn BillingProvider> = recorder.clone();

    let Json(response) = create_checkout(
        Extension(pool.clone()),
        Extension(provider.clone()),
        AuthUser {
            user_id,
            role: "user".into(),
        },
        Path(organization_id),
        Json(CheckoutRequest {
            plan: "plus".into(),
        }),
    )
    .await
    .expect("checkout succeeds");
    assert_eq!(response.url, "https://checkout.example/session_1");

    let stored: Option<String> =
        sqlx::query_scalar("SELECT stripe_customer_id FROM organizations WHERE id = $1")
            .bind(organization_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(stored.as_deref(), Some("cus_test"));

    let calls = recorder.calls();
    assert_eq!(
        calls,
        vec![
            format!("customer:owner@example.com:{organization_id}"),
            "checkout:cus_test:plus:price_plus_monthly".to_string(),
        ]
    );

    // the second checkout reuses the stored customer reference
    create_checkout(
        Extension(pool.clone()),
        Extension(provider.clone()),
        AuthUser {
            user_id,
            role: "user".into(),
        },
        Path(organization_id),
        Json(CheckoutRequest { plan: "pro".into() }),
    )
    .await
    .expect("second checkout succeeds");

    let calls = recorder.calls();
    assert_eq!(
        calls.iter().filter(|c| c.starts_with("customer:")).count(),
        1
    );
    assert_eq!(calls.last().unwrap(), "checkout:cus_test:pro:price_pro_monthly");
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn free_tier_cannot_be_checked_out(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let (user_id, organization_id) =
        seed_owner(&pool, "free@example.com", "Free Org", "free-org").await;
    let provider: Arc<dyn BillingProvider> = Arc::new(RecordingProvider::default());

    let err = create_checkout(
        Extension(pool.clone()),
        Extension(provider),
        AuthUser {
            user_id,
            role: "user".into(),
        },
        Path(organization_id),
        Json(CheckoutRequest {
            plan: "free".into(),
        }),
    )
    .await
    .expect_err("free tier has no price");
    assert!(matches!(err, AppError::BadRequest(_)));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn cancel_notifies_the_provider_and_downgrades(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let (user_id, organization_id) =
        seed_owner(&pool, "cancel@example.com", "Cancel Org", "cancel-org").await;
    sqlx::query(
        "UPDATE organizations SET plan = 'plus', subscription_status = 'active', stripe_subscription_id = 'sub_1' WHERE id = $1",
    )
    .bind(organization_id)
    .execute(&pool)
    .await
    .unwrap();

    let recorder = Arc::new(RecordingProvider::default());
    let provider: Arc<dyn BillingProvider> = recorder.clone();

    let Json(response) = cancel_subscription(
        Extension(pool.clone()),
        Extension(provider.clone()),
        AuthUser {
            user_id,
            role: "user".into(),
        },
        Path(organization_id),
    )
    .await
    .expect("cancellation succeeds");
    assert_eq!(response.plan, PlanTier::Free);
    assert_eq!(response.status, SubscriptionStatus::Canceled);
    assert_eq!(recorder.calls(), vec!["cancel:sub_1".to_string()]);

    let (plan, status, subscription_ref): (String, String, Option<String>) = sqlx::query_as(
        "SELECT plan, subscription_status, stripe_subscription_id FROM organizations WHERE id = $1",
    )
    .bind(organization_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(plan, "free");
    assert_eq!(status, "canceled");
    assert_eq!(subscription_ref, None);

    // a second cancel has nothing left to cancel
    let err = cancel_subscription(
        Extension(pool.clone()),
        Extension(provider),
        AuthUser {
            user_id,
            role: "user".into(),
        },
        Path(organization_id),
    )
    .await
    .expect_err("no active subscription remains");
    assert!(matches!(err, AppError::BadRequest(_)));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn members_cannot_start_checkouts(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let (_, organization_id) =
        seed_owner(&pool, "boss@example.com", "Member Org", "member-org").await;
    let member_id: i32 = sqlx::query_scalar(
        "INSERT INTO users (email, password_hash) VALUES ('member@example.com', 'hash') RETURNING id",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO organization_members (organization_id, user_id, role) VALUES ($1, $2, 'member')",
    )
    .bind(organization_id)
    .bind(member_id)
    .execute(&pool)
    .await
    .unwrap();

    let provider: Arc<dyn BillingProvider> = Arc::new(RecordingProvider::default());
    let err = create_checkout(
        Extension(pool.clone()),
        Extension(provider),
        AuthUser {
            user_id: member_id,
            role: "user".into(),
        },
        Path(organization_id),
        Json(CheckoutRequest {
            plan: "plus".into(),
        }),
    )
    .await
    .expect_err("plain members cannot manage billing");
    assert!(matches!(err, AppError::Forbidden));
}
