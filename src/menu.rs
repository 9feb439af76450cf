use axum::extract::{Extension, Path};
use axum::Json;
use serde::Serialize;
use sqlx::{FromRow, PgPool, Row};
use tracing::error;

use crate::error::{AppError, AppResult};

/// Public menu page data, addressed by slug. No auth and no billing details;
/// this is what a customer scanning the QR code sees.
pub async fn public_menu(
    Extension(pool): Extension<PgPool>,
    Path(slug): Path<String>,
) -> AppResult<Json<PublicMenu>> {
    let org = sqlx::query(
        "SELECT id, name, slug, whatsapp, instagram, address FROM organizations WHERE slug = $1",
    )
    .bind(&slug)
    .fetch_optional(&pool)
    .await
    .map_err(|e| {
        error!(?e, "DB error fetching menu by slug");
        AppError::Db(e)
    })?;
    let Some(org) = org else {
        return Err(AppError::NotFound);
    };
    let organization_id: i32 = org.get("id");

    let images = sqlx::query_as::<_, PublicMenuImage>(
        r#"
        SELECT id, url, display_order
        FROM menu_images
        WHERE organization_id = $1
        ORDER BY display_order ASC, created_at ASC
        "#,
    )
    .bind(organization_id)
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        error!(?e, "DB error fetching menu images");
        AppError::Db(e)
    })?;

    Ok(Json(PublicMenu {
        name: org.get("name"),
        slug: org.get("slug"),
        whatsapp: org.get("whatsapp"),
        instagram: org.get("instagram"),
        address: org.get("address"),
        images,
    }))
}

#[derive(Debug, Serialize)]
pub struct PublicMenu {
    pub name: String,
    pub slug: String,
    pub whatsapp: Option<String>,
    pub instagram: Option<String>,
    pub address: Option<String>,
    pub images: Vec<PublicMenuImage>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PublicMenuImage {
    pub id: i32,
    pub url: String,
    pub display_order: i32,
}
