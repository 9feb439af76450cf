use once_cell::sync::Lazy;
use url::Url;

/// Secret used for JWT signing. Must be set via the `JWT_SECRET` env variable.
pub static JWT_SECRET: Lazy<String> =
    Lazy::new(|| std::env::var("JWT_SECRET").expect("JWT_SECRET must be set"));

/// Address the HTTP server should bind to. Defaults to `0.0.0.0`.
pub static BIND_ADDRESS: Lazy<String> =
    Lazy::new(|| std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string()));

/// Port the HTTP server should listen on. Defaults to `3000`.
pub static BIND_PORT: Lazy<u16> = Lazy::new(|| {
    std::env::var("BIND_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(3000)
});

/// When set to a truthy value, allows the application to continue running even if database
/// migrations fail. Defaults to `false`.
pub static ALLOW_MIGRATION_FAILURE: Lazy<bool> = Lazy::new(|| {
    std::env::var("ALLOW_MIGRATION_FAILURE")
        .ok()
        .map(|value| {
            let normalized = value.trim().to_ascii_lowercase();
            matches!(normalized.as_str(), "1" | "true" | "yes")
        })
        .unwrap_or(false)
});

/// Public base URL of this deployment. Checkout redirects and media links are built from it.
pub static APP_BASE_URL: Lazy<Url> = Lazy::new(|| {
    let raw = read_optional_env("APP_BASE_URL").unwrap_or_else(|| "http://localhost:3000".to_string());
    Url::parse(&raw).expect("APP_BASE_URL must be an absolute URL")
});

/// Directory the local image store writes menu uploads into. Defaults to `storage`.
pub static STORAGE_ROOT: Lazy<String> =
    Lazy::new(|| read_optional_env("STORAGE_ROOT").unwrap_or_else(|| "storage".to_string()));

/// key: billing-config -> provider API credentials
pub static STRIPE_SECRET_KEY: Lazy<String> =
    Lazy::new(|| std::env::var("STRIPE_SECRET_KEY").expect("STRIPE_SECRET_KEY must be set"));

/// key: billing-config -> webhook signing secret
pub static STRIPE_WEBHOOK_SECRET: Lazy<String> =
    Lazy::new(|| std::env::var("STRIPE_WEBHOOK_SECRET").expect("STRIPE_WEBHOOK_SECRET must be set"));

/// key: billing-config -> provider API endpoint, tests point this at a mock server
pub static STRIPE_API_BASE: Lazy<String> = Lazy::new(|| {
    read_optional_env("STRIPE_API_BASE").unwrap_or_else(|| "https://api.stripe.com".to_string())
});

/// key: billing-config -> price reference for the plus tier
pub static STRIPE_PLUS_PRICE_ID: Lazy<String> = Lazy::new(|| {
    read_optional_env("STRIPE_PLUS_PRICE_ID").unwrap_or_else(|| "price_plus_monthly".to_string())
});

/// key: billing-config -> price reference for the pro tier
pub static STRIPE_PRO_PRICE_ID: Lazy<String> = Lazy::new(|| {
    read_optional_env("STRIPE_PRO_PRICE_ID").unwrap_or_else(|| "price_pro_monthly".to_string())
});

/// Maximum age (seconds) of a webhook signature timestamp before the delivery is rejected as stale.
pub static WEBHOOK_TOLERANCE_SECS: Lazy<i64> = Lazy::new(|| {
    std::env::var("WEBHOOK_TOLERANCE_SECS")
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(300)
});

fn read_optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
