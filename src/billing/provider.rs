use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::config;
use super::plans::PlanTier;

/// key: billing-provider -> outbound provider calls
///
/// Handlers hold this behind an `Arc<dyn BillingProvider>` extension, so tests
/// swap in recording fakes without touching the HTTP client.
#[async_trait]
pub trait BillingProvider: Send + Sync {
    /// Creates a provider-side customer and returns its reference.
    async fn create_customer(
        &self,
        email: &str,
        organization_id: i32,
        organization_name: &str,
    ) -> Result<String>;

    /// Opens a hosted checkout session and returns the redirect URL.
    async fn create_checkout_session(&self, request: CheckoutSessionRequest<'_>) -> Result<String>;

    /// Flags the subscription to lapse at period end instead of renewing.
    async fn cancel_at_period_end(&self, subscription_ref: &str) -> Result<()>;
}

pub struct CheckoutSessionRequest<'a> {
    pub customer_ref: &'a str,
    pub organization_id: i32,
    pub plan: PlanTier,
    pub price_ref: &'a str,
    pub success_url: &'a str,
    pub cancel_url: &'a str,
}

/// Stateless client for the Stripe REST API. Holds no session data; every
/// request carries the secret key and everything else arrives as arguments.
pub struct StripeHttpClient {
    http: reqwest::Client,
    api_base: String,
    secret_key: String,
}

impl StripeHttpClient {
    pub fn new(api_base: impl Into<String>, secret_key: impl Into<String>) -> Self {
        let api_base: String = api_base.into();
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(
            config::STRIPE_API_BASE.as_str(),
            config::STRIPE_SECRET_KEY.as_str(),
        )
    }

    async fn post_form(&self, path: &str, params: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}{}", self.api_base, path);
        let response = self
            .http
            .post(&url)
            .basic_auth(&self.secret_key, None::<&str>)
            .form(params)
            .send()
            .await
            .with_context(|| format!("request to {path} failed"))?;
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .with_context(|| format!("response from {path} was not JSON"))?;
        if !status.is_success() {
            let message = body
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(anyhow!("provider rejected {path}: {status}: {message}"));
        }
        Ok(body)
    }
}

#[async_trait]
impl BillingProvider for StripeHttpClient {
    async fn create_customer(
        &self,
        email: &str,
        organization_id: i32,
        organization_name: &str,
    ) -> Result<String> {
        let params = [
            ("email", email.to_string()),
            ("name", organization_name.to_string()),
            ("metadata[organization_id]", organization_id.to_string()),
        ];
        let body = self.post_form("/v1/customers", &params).await?;
        body.get("id")
            .and_then(Value::as_str)
            .map(|id| id.to_string())
            .ok_or_else(|| anyhow!("customer response missing id"))
    }

    async fn create_checkout_session(&self, request: CheckoutSessionRequest<'_>) -> Result<String> {
        // metadata rides on both the session and the subscription it creates,
        // so later webhook events resolve back to the organization
        let params = [
            ("mode", "subscription".to_string()),
            ("customer", request.customer_ref.to_string()),
            ("line_items[0][price]", request.price_ref.to_string()),
            ("line_items[0][quantity]", "1".to_string()),
            ("success_url", request.success_url.to_string()),
            ("cancel_url", request.cancel_url.to_string()),
            (
                "metadata[organization_id]",
                request.organization_id.to_string(),
            ),
            ("metadata[plan]", request.plan.as_str().to_string()),
            (
                "subscription_data[metadata][organization_id]",
                request.organization_id.to_string(),
            ),
            (
                "subscription_data[metadata][plan]",
                request.plan.as_str().to_string(),
            ),
        ];
        let body = self.post_form("/v1/checkout/sessions", &params).await?;
        body.get("url")
            .and_then(Value::as_str)
            .map(|url| url.to_string())
            .ok_or_else(|| anyhow!("checkout session response missing url"))
    }

    async fn cancel_at_period_end(&self, subscription_ref: &str) -> Result<()> {
        let params = [("cancel_at_period_end", "true".to_string())];
        self.post_form(&format!("/v1/subscriptions/{subscription_ref}"), &params)
            .await?;
        Ok(())
    }
}
