use chrono::{DateTime, TimeZone, Utc};
use menuhost::billing::{parse_event, BillingService, EventOutcome};
use serde_json::{json, Value};
use sqlx::PgPool;

async fn seed_organization(pool: &PgPool, name: &str, slug: &str) -> i32 {
    sqlx::query_scalar("INSERT INTO organizations (name, slug) VALUES ($1, $2) RETURNING id")
        .bind(name)
        .bind(slug)
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn billing_row(pool: &PgPool, organization_id: i32) -> (String, String, Option<String>) {
    sqlx::query_as(
        "SELECT plan, subscription_status, stripe_subscription_id FROM organizations WHERE id = $1",
    )
    .bind(organization_id)
    .fetch_one(pool)
    .await
    .unwrap()
}

fn checkout_payload(organization_id: i32, plan: &str, subscription: &str, invoice: &str) -> Value {
    json!({
        "id": "evt_checkout",
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "id": "cs_1",
                "subscription": subscription,
                "invoice": invoice,
                "amount_total": 1200,
                "metadata": {"organization_id": organization_id.to_string(), "plan": plan}
            }
        }
    })
}

// key: billing-tests -> lifecycle,replay,ledger
#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn checkout_activates_and_delete_reverts(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let organization_id = seed_organization(&pool, "Lifecycle Org", "lifecycle-org").await;
    let service = BillingService::new(pool.clone());

    let event = parse_event(&checkout_payload(organization_id, "plus", "sub_42", "in_1")).unwrap();
    assert_eq!(service.apply_event(event).await.unwrap(), EventOutcome::Applied);

    let (plan, status, subscription_ref) = billing_row(&pool, organization_id).await;
    assert_eq!(plan, "plus");
    assert_eq!(status, "active");
    assert_eq!(subscription_ref.as_deref(), Some("sub_42"));

    // the session's invoice landed in the ledger alongside the activation
    let ledger_status: String =
        sqlx::query_scalar("SELECT status FROM billing_events WHERE provider_ref = 'in_1'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(ledger_status, "paid");

    // past_due forfeits the paid tier but keeps the reference for recovery
    let event = parse_event(&json!({
        "type": "customer.subscription.updated",
        "data": {"object": {"id": "sub_42", "status": "past_due", "metadata": {"plan": "plus"}}}
    }))
    .unwrap();
    assert_eq!(service.apply_event(event).await.unwrap(), EventOutcome::Applied);
    let (plan, status, subscription_ref) = billing_row(&pool, organization_id).await;
    assert_eq!(plan, "free");
    assert_eq!(status, "past_due");
    assert_eq!(subscription_ref.as_deref(), Some("sub_42"));

    // recovery flows back through the same update event
    let event = parse_event(&json!({
        "type": "customer.subscription.updated",
        "data": {
            "object": {
                "id": "sub_42",
                "status": "active",
                "current_period_end": 1700000000,
                "metadata": {"plan": "plus"}
            }
        }
    }))
    .unwrap();
    assert_eq!(service.apply_event(event).await.unwrap(), EventOutcome::Applied);
    let (plan, status, period_end): (String, String, Option<DateTime<Utc>>) = sqlx::query_as(
        "SELECT plan, subscription_status, current_period_end FROM organizations WHERE id = $1",
    )
    .bind(organization_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(plan, "plus");
    assert_eq!(status, "active");
    assert_eq!(period_end, Utc.timestamp_opt(1700000000, 0).single());

    let event = parse_event(&json!({
        "type": "customer.subscription.deleted",
        "data": {"object": {"id": "sub_42"}}
    }))
    .unwrap();
    assert_eq!(service.apply_event(event).await.unwrap(), EventOutcome::Applied);
    let (plan, status, subscription_ref) = billing_row(&pool, organization_id).await;
    assert_eq!(plan, "free");
    assert_eq!(status, "canceled");
    assert_eq!(subscription_ref, None);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn replayed_invoices_hit_the_ledger_once(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let organization_id = seed_organization(&pool, "Replay Org", "replay-org").await;
    sqlx::query(
        "UPDATE organizations SET stripe_subscription_id = 'sub_9', plan = 'plus', subscription_status = 'active' WHERE id = $1",
    )
    .bind(organization_id)
    .execute(&pool)
    .await
    .unwrap();

    let service = BillingService::new(pool.clone());
    let payload = json!({
        "type": "invoice.paid",
        "data": {
            "object": {
                "id": "in_77",
                "subscription": "sub_9",
                "amount_paid": 1200,
                "period_start": 1700000000,
                "period_end": 1702592000
            }
        }
    });

    let first = service
        .apply_event(parse_event(&payload).unwrap())
        .await
        .unwrap();
    assert_eq!(first, EventOutcome::Recorded);

    let second = service
        .apply_event(parse_event(&payload).unwrap())
        .await
        .unwrap();
    assert_eq!(second, EventOutcome::Duplicate);

    let rows: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM billing_events WHERE provider_ref = 'in_77'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(rows, 1);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn failed_invoice_never_touches_the_plan(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let organization_id = seed_organization(&pool, "Dunning Org", "dunning-org").await;
    sqlx::query(
        "UPDATE organizations SET stripe_subscription_id = 'sub_5', plan = 'plus', subscription_status = 'active' WHERE id = $1",
    )
    .bind(organization_id)
    .execute(&pool)
    .await
    .unwrap();

    let service = BillingService::new(pool.clone());
    let event = parse_event(&json!({
        "type": "invoice.payment_failed",
        "data": {"object": {"id": "in_88", "subscription": "sub_5", "amount_due": 1200}}
    }))
    .unwrap();
    assert_eq!(service.apply_event(event).await.unwrap(), EventOutcome::Recorded);

    // the plan only moves when the provider gives up via a subscription update
    let (plan, status, _) = billing_row(&pool, organization_id).await;
    assert_eq!(plan, "plus");
    assert_eq!(status, "active");

    let (ledger_status, amount_cents): (String, i64) = sqlx::query_as(
        "SELECT status, amount_cents FROM billing_events WHERE provider_ref = 'in_88'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(ledger_status, "failed");
    assert_eq!(amount_cents, 1200);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn failure_before_checkout_resolves_through_metadata(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    // no checkout has happened, so the org carries no subscription reference
    let organization_id = seed_organization(&pool, "Early Dunning Org", "early-dunning-org").await;

    let service = BillingService::new(pool.clone());
    let event = parse_event(&json!({
        "type": "invoice.payment_failed",
        "data": {
            "object": {
                "id": "in_early",
                "amount_due": 1200,
                "metadata": {"organization_id": organization_id.to_string()}
            }
        }
    }))
    .unwrap();
    assert_eq!(service.apply_event(event).await.unwrap(), EventOutcome::Recorded);

    let (ledger_org, ledger_status): (i32, String) = sqlx::query_as(
        "SELECT organization_id, status FROM billing_events WHERE provider_ref = 'in_early'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(ledger_org, organization_id);
    assert_eq!(ledger_status, "failed");
    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM billing_events")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, 1);

    // subscription state stays where onboarding left it
    let (plan, status, subscription_ref) = billing_row(&pool, organization_id).await;
    assert_eq!(plan, "free");
    assert_eq!(status, "inactive");
    assert_eq!(subscription_ref, None);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn events_for_unknown_organizations_are_flagged(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let service = BillingService::new(pool.clone());

    let checkout = parse_event(&checkout_payload(4242, "plus", "sub_nope", "in_nope")).unwrap();
    assert_eq!(
        service.apply_event(checkout).await.unwrap(),
        EventOutcome::UnknownOrganization
    );

    let update = parse_event(&json!({
        "type": "customer.subscription.updated",
        "data": {"object": {"id": "sub_nope", "status": "active"}}
    }))
    .unwrap();
    assert_eq!(
        service.apply_event(update).await.unwrap(),
        EventOutcome::UnknownOrganization
    );

    let invoice = parse_event(&json!({
        "type": "invoice.paid",
        "data": {"object": {"id": "in_void", "subscription": "sub_nope", "amount_paid": 500}}
    }))
    .unwrap();
    assert_eq!(
        service.apply_event(invoice).await.unwrap(),
        EventOutcome::UnknownOrganization
    );

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM billing_events")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, 0);
}
