use std::sync::Arc;

use axum::extract::{Extension, Multipart, Path};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool, Row};
use tracing::{error, warn};
use uuid::Uuid;

use crate::billing::{check_upload, plans, ImageLimit, PlanTier, UploadCheck};
use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;
use crate::organizations::require_member;
use crate::storage::ImageStore;

pub async fn list_images(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
    Path(organization_id): Path<i32>,
) -> AppResult<Json<Vec<MenuImageInfo>>> {
    require_member(&pool, organization_id, user_id).await?;
    let images = sqlx::query_as::<_, MenuImageInfo>(
        r#"
        SELECT id, url, filename, byte_size, display_order, created_at
        FROM menu_images
        WHERE organization_id = $1
        ORDER BY display_order ASC, created_at ASC
        "#,
    )
    .bind(organization_id)
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        error!(?e, "DB error listing menu images");
        AppError::Db(e)
    })?;
    Ok(Json(images))
}

/// Upload is gated by the organization's plan. The count check and the insert
/// are not atomic; a concurrent pair of uploads can land one image over the
/// limit, which the plan gate tolerates.
pub async fn upload_image(
    Extension(pool): Extension<PgPool>,
    Extension(store): Extension<Arc<dyn ImageStore>>,
    AuthUser { user_id, .. }: AuthUser,
    Path(organization_id): Path<i32>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<MenuImageInfo>)> {
    require_member(&pool, organization_id, user_id).await?;

    let plan: Option<String> = sqlx::query_scalar("SELECT plan FROM organizations WHERE id = $1")
        .bind(organization_id)
        .fetch_optional(&pool)
        .await
        .map_err(|e| {
            error!(?e, "DB error fetching organization plan");
            AppError::Db(e)
        })?;
    let Some(plan) = plan else {
        return Err(AppError::NotFound);
    };

    let mut upload: Option<(String, axum::body::Bytes)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart payload: {e}")))?
    {
        if !matches!(field.name(), Some("image") | Some("file")) {
            continue;
        }
        let filename = field
            .file_name()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "image.bin".into());
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("Failed to read upload: {e}")))?;
        upload = Some((filename, data));
        break;
    }
    let Some((filename, data)) = upload else {
        return Err(AppError::BadRequest("No image file supplied".into()));
    };
    if data.is_empty() {
        return Err(AppError::BadRequest("Uploaded file is empty".into()));
    }

    let current_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM menu_images WHERE organization_id = $1")
            .bind(organization_id)
            .fetch_one(&pool)
            .await
            .map_err(|e| {
                error!(?e, "DB error counting menu images");
                AppError::Db(e)
            })?;

    let tier = PlanTier::from_key(&plan);
    let stored = u32::try_from(current_count).unwrap_or(u32::MAX);
    // only bounded plans deny uploads
    if let UploadCheck {
        allowed: false,
        limit: ImageLimit::Limited(limit),
        ..
    } = check_upload(stored, tier)
    {
        return Err(AppError::BadRequest(format!(
            "Plan {} allows at most {limit} menu image(s); delete an image or upgrade to add more",
            plans::entitlements(tier).display_name
        )));
    }

    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "bin".into());
    let storage_path = format!(
        "{}/{}-{}.{}",
        organization_id,
        Utc::now().timestamp_millis(),
        Uuid::new_v4().simple(),
        extension
    );

    let url = store.put(&storage_path, &data).await.map_err(|e| {
        error!(?e, "storage write failed");
        AppError::Message("Failed to store image".into())
    })?;

    let next_order: i32 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(display_order) + 1, 0) FROM menu_images WHERE organization_id = $1",
    )
    .bind(organization_id)
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        error!(?e, "DB error computing display order");
        AppError::Db(e)
    })?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO menu_images (organization_id, url, storage_path, filename, byte_size, display_order)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id, created_at
        "#,
    )
    .bind(organization_id)
    .bind(&url)
    .bind(&storage_path)
    .bind(&filename)
    .bind(data.len() as i64)
    .bind(next_order)
    .fetch_one(&pool)
    .await;
    let row = match inserted {
        Ok(row) => row,
        Err(e) => {
            error!(?e, "DB error recording menu image");
            // the blob is orphaned otherwise; losing it only wastes disk
            if let Err(cleanup) = store.delete(&storage_path).await {
                warn!(?cleanup, path = %storage_path, "failed to remove orphaned blob");
            }
            return Err(AppError::Db(e));
        }
    };

    Ok((
        StatusCode::CREATED,
        Json(MenuImageInfo {
            id: row.get("id"),
            url,
            filename,
            byte_size: data.len() as i64,
            display_order: next_order,
            created_at: row.get("created_at"),
        }),
    ))
}

/// Row first, then the blob. A blob that outlives its row is invisible waste;
/// a row that outlives its blob would 404 on the public menu.
pub async fn delete_image(
    Extension(pool): Extension<PgPool>,
    Extension(store): Extension<Arc<dyn ImageStore>>,
    AuthUser { user_id, .. }: AuthUser,
    Path((organization_id, image_id)): Path<(i32, i32)>,
) -> AppResult<StatusCode> {
    require_member(&pool, organization_id, user_id).await?;

    let storage_path: Option<String> = sqlx::query_scalar(
        "SELECT storage_path FROM menu_images WHERE id = $1 AND organization_id = $2",
    )
    .bind(image_id)
    .bind(organization_id)
    .fetch_optional(&pool)
    .await
    .map_err(|e| {
        error!(?e, "DB error fetching image");
        AppError::Db(e)
    })?;
    let Some(storage_path) = storage_path else {
        return Err(AppError::NotFound);
    };

    sqlx::query("DELETE FROM menu_images WHERE id = $1 AND organization_id = $2")
        .bind(image_id)
        .bind(organization_id)
        .execute(&pool)
        .await
        .map_err(|e| {
            error!(?e, "DB error deleting image");
            AppError::Db(e)
        })?;

    if let Err(e) = store.delete(&storage_path).await {
        warn!(?e, path = %storage_path, "failed to remove stored image");
    }

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MenuImageInfo {
    pub id: i32,
    pub url: String,
    pub filename: String,
    pub byte_size: i64,
    pub display_order: i32,
    pub created_at: DateTime<Utc>,
}
