use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, warn};
use uuid::Uuid;

use super::events::BillingEvent;
use super::models::SubscriptionStatus;
use super::plans::PlanTier;

/// key: billing-service -> subscription lifecycle
///
/// All writes to an organization's plan, subscription status and provider
/// references go through this service, whether triggered by a webhook event
/// or a user-initiated cancellation.
#[derive(Clone)]
pub struct BillingService {
    pool: PgPool,
}

/// What applying a single provider event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Subscription state on the organization row changed.
    Applied,
    /// A ledger row was written; subscription state untouched.
    Recorded,
    /// The ledger already held this provider event, nothing changed.
    Duplicate,
    /// The event did not resolve to any organization we know.
    UnknownOrganization,
    /// Recognized but deliberately not handled.
    Ignored,
}

impl EventOutcome {
    pub fn describe(&self) -> &'static str {
        match self {
            EventOutcome::Applied => "applied",
            EventOutcome::Recorded => "ledger-recorded",
            EventOutcome::Duplicate => "duplicate-ignored",
            EventOutcome::UnknownOrganization => "unknown-organization",
            EventOutcome::Ignored => "ignored",
        }
    }
}

impl BillingService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn apply_event(&self, event: BillingEvent) -> Result<EventOutcome> {
        match event {
            BillingEvent::CheckoutCompleted {
                organization_id,
                plan,
                subscription_ref,
                invoice_ref,
                amount_cents,
                period_end,
            } => {
                self.apply_checkout(
                    organization_id,
                    plan,
                    &subscription_ref,
                    invoice_ref.as_deref(),
                    amount_cents,
                    period_end,
                )
                .await
            }
            BillingEvent::SubscriptionUpdated {
                subscription_ref,
                provider_status,
                plan,
                period_end,
            } => {
                self.apply_subscription_update(&subscription_ref, &provider_status, plan, period_end)
                    .await
            }
            BillingEvent::SubscriptionDeleted { subscription_ref } => {
                self.apply_subscription_delete(&subscription_ref).await
            }
            BillingEvent::InvoicePaid {
                invoice_ref,
                subscription_ref,
                organization_id,
                amount_cents,
                period_start,
                period_end,
            } => {
                self.record_invoice(
                    &invoice_ref,
                    organization_id,
                    subscription_ref.as_deref(),
                    amount_cents,
                    "paid",
                    period_start,
                    period_end,
                )
                .await
            }
            BillingEvent::InvoicePaymentFailed {
                invoice_ref,
                subscription_ref,
                organization_id,
                amount_cents,
            } => {
                self.record_invoice(
                    &invoice_ref,
                    organization_id,
                    subscription_ref.as_deref(),
                    amount_cents,
                    "failed",
                    None,
                    None,
                )
                .await
            }
            BillingEvent::Unrecognized { event_type } => {
                debug!(%event_type, "ignoring unrecognized billing event");
                Ok(EventOutcome::Ignored)
            }
        }
    }

    /// Valid from any prior state: a completed checkout always activates.
    async fn apply_checkout(
        &self,
        organization_id: i32,
        plan: PlanTier,
        subscription_ref: &str,
        invoice_ref: Option<&str>,
        amount_cents: Option<i64>,
        period_end: Option<DateTime<Utc>>,
    ) -> Result<EventOutcome> {
        let updated = sqlx::query(
            r#"
            UPDATE organizations
            SET plan = $2,
                subscription_status = $3,
                stripe_subscription_id = $4,
                current_period_end = $5
            WHERE id = $1
            "#,
        )
        .bind(organization_id)
        .bind(plan.as_str())
        .bind(SubscriptionStatus::Active.as_str())
        .bind(subscription_ref)
        .bind(period_end)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            warn!(organization_id, "checkout completion for unknown organization");
            return Ok(EventOutcome::UnknownOrganization);
        }

        // the session's invoice lands in the ledger too; a replayed checkout
        // re-runs the idempotent update and the insert deduplicates itself
        if let Some(invoice_ref) = invoice_ref {
            self.insert_ledger(
                invoice_ref,
                organization_id,
                plan.as_str(),
                amount_cents.unwrap_or(0),
                "paid",
                None,
                period_end,
            )
            .await?;
        }

        Ok(EventOutcome::Applied)
    }

    async fn apply_subscription_update(
        &self,
        subscription_ref: &str,
        provider_status: &str,
        plan: Option<PlanTier>,
        period_end: Option<DateTime<Utc>>,
    ) -> Result<EventOutcome> {
        let row = sqlx::query("SELECT id, plan FROM organizations WHERE stripe_subscription_id = $1")
            .bind(subscription_ref)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            warn!(%subscription_ref, "subscription update for unknown organization");
            return Ok(EventOutcome::UnknownOrganization);
        };
        let organization_id: i32 = row.get("id");
        let current_plan = PlanTier::from_key(row.get::<String, _>("plan").as_str());

        let status = SubscriptionStatus::from_provider(provider_status);
        // any non-active status forfeits the paid tier immediately
        let effective_plan = if status.is_active() {
            plan.unwrap_or(current_plan)
        } else {
            PlanTier::Free
        };

        sqlx::query(
            r#"
            UPDATE organizations
            SET plan = $2,
                subscription_status = $3,
                current_period_end = $4
            WHERE id = $1
            "#,
        )
        .bind(organization_id)
        .bind(effective_plan.as_str())
        .bind(status.as_str())
        .bind(period_end)
        .execute(&self.pool)
        .await?;

        Ok(EventOutcome::Applied)
    }

    async fn apply_subscription_delete(&self, subscription_ref: &str) -> Result<EventOutcome> {
        let updated = sqlx::query(
            r#"
            UPDATE organizations
            SET plan = $2,
                subscription_status = $3,
                stripe_subscription_id = NULL
            WHERE stripe_subscription_id = $1
            "#,
        )
        .bind(subscription_ref)
        .bind(PlanTier::Free.as_str())
        .bind(SubscriptionStatus::Canceled.as_str())
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            warn!(%subscription_ref, "subscription deletion for unknown organization");
            return Ok(EventOutcome::UnknownOrganization);
        }
        Ok(EventOutcome::Applied)
    }

    /// Invoice events only append to the ledger. A failed invoice never mutates
    /// the organization's plan; the provider follows up with a subscription
    /// update when the retry cycle gives up.
    async fn record_invoice(
        &self,
        invoice_ref: &str,
        organization_id: Option<i32>,
        subscription_ref: Option<&str>,
        amount_cents: i64,
        status: &str,
        period_start: Option<DateTime<Utc>>,
        period_end: Option<DateTime<Utc>>,
    ) -> Result<EventOutcome> {
        let Some((organization_id, plan)) = self
            .locate_organization(organization_id, subscription_ref)
            .await?
        else {
            warn!(%invoice_ref, "invoice for unknown organization");
            return Ok(EventOutcome::UnknownOrganization);
        };

        let inserted = self
            .insert_ledger(
                invoice_ref,
                organization_id,
                &plan,
                amount_cents,
                status,
                period_start,
                period_end,
            )
            .await?;
        if !inserted {
            debug!(%invoice_ref, "replayed invoice event ignored");
            return Ok(EventOutcome::Duplicate);
        }
        Ok(EventOutcome::Recorded)
    }

    /// Immediate local downgrade after the caller has asked the provider to
    /// cancel at period end. Webhook confirmation later is a no-op rewrite.
    pub async fn user_cancel(&self, organization_id: i32) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE organizations
            SET plan = $2,
                subscription_status = $3,
                stripe_subscription_id = NULL
            WHERE id = $1
            "#,
        )
        .bind(organization_id)
        .bind(PlanTier::Free.as_str())
        .bind(SubscriptionStatus::Canceled.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn locate_organization(
        &self,
        organization_id: Option<i32>,
        subscription_ref: Option<&str>,
    ) -> Result<Option<(i32, String)>> {
        if let Some(id) = organization_id {
            let row = sqlx::query("SELECT id, plan FROM organizations WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            if let Some(row) = row {
                return Ok(Some((row.get("id"), row.get("plan"))));
            }
        }
        if let Some(reference) = subscription_ref {
            let row =
                sqlx::query("SELECT id, plan FROM organizations WHERE stripe_subscription_id = $1")
                    .bind(reference)
                    .fetch_optional(&self.pool)
                    .await?;
            if let Some(row) = row {
                return Ok(Some((row.get("id"), row.get("plan"))));
            }
        }
        Ok(None)
    }

    async fn insert_ledger(
        &self,
        provider_ref: &str,
        organization_id: i32,
        plan: &str,
        amount_cents: i64,
        status: &str,
        period_start: Option<DateTime<Utc>>,
        period_end: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO billing_events (
                id,
                provider_ref,
                organization_id,
                plan,
                amount_cents,
                status,
                period_start,
                period_end
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (provider_ref) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(provider_ref)
        .bind(organization_id)
        .bind(plan)
        .bind(amount_cents)
        .bind(status)
        .bind(period_start)
        .bind(period_end)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
