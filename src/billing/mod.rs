pub mod api;
pub mod entitlements;
pub mod events;
pub mod models;
pub mod plans;
pub mod provider;
pub mod service;
pub mod signature;
pub mod webhook;

pub use api::{
    cancel_subscription as billing_cancel_subscription, create_checkout as billing_create_checkout,
    list_billing_events as billing_list_events, list_plans as billing_list_plans,
    subscription_overview as billing_subscription_overview, CheckoutRequest, CheckoutResponse,
    SubscriptionOverview,
};
pub use entitlements::{check_upload, UploadCheck};
pub use events::{parse_event, BillingEvent, EventError};
pub use models::{LedgerEntry, OrganizationBilling, SubscriptionStatus};
pub use plans::{entitlements, plan_catalog, ImageLimit, PlanEntitlements, PlanTier};
pub use provider::{BillingProvider, CheckoutSessionRequest, StripeHttpClient};
pub use service::{BillingService, EventOutcome};
pub use signature::{sign_payload, verify_signature, SignatureError};
pub use webhook::{billing_webhook, WebhookAck};
