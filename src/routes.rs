use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::{admin, auth, billing, images, menu, organizations, storage};

pub fn api_routes() -> Router {
    Router::new()
        .route("/api/auth/register", post(auth::register_user))
        .route("/api/auth/login", post(auth::login_user))
        .route("/api/auth/logout", post(auth::logout_user))
        .route("/api/auth/me", get(auth::current_user))
        .route("/api/menu/:slug", get(menu::public_menu))
        .route("/media/*path", get(storage::serve_media))
        .route("/api/billing/plans", get(billing::billing_list_plans))
        .route("/api/billing/webhook", post(billing::billing_webhook))
        .route(
            "/api/organizations/:id/subscription",
            get(billing::billing_subscription_overview),
        )
        .route(
            "/api/organizations/:id/subscription/cancel",
            post(billing::billing_cancel_subscription),
        )
        .route(
            "/api/organizations/:id/billing/checkout",
            post(billing::billing_create_checkout),
        )
        .route(
            "/api/organizations/:id/billing/events",
            get(billing::billing_list_events),
        )
        .route(
            "/api/organizations/:id/images",
            get(images::list_images).post(images::upload_image),
        )
        .route(
            "/api/organizations/:id/images/:image_id",
            delete(images::delete_image),
        )
        .route("/api/admin/stats", get(admin::platform_stats))
        .route("/api/admin/users", get(admin::list_users))
        .merge(organizations::routes())
}
