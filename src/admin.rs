use axum::extract::Extension;
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::{PgPool, Row};
use tracing::error;

use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;

fn require_master(auth: &AuthUser) -> AppResult<()> {
    if !auth.is_master() {
        return Err(AppError::Forbidden);
    }
    Ok(())
}

pub async fn platform_stats(
    Extension(pool): Extension<PgPool>,
    auth: AuthUser,
) -> AppResult<Json<PlatformStats>> {
    require_master(&auth)?;

    let total_users: i64 = count(&pool, "SELECT COUNT(*) FROM users").await?;
    let total_organizations: i64 = count(&pool, "SELECT COUNT(*) FROM organizations").await?;
    let total_images: i64 = count(&pool, "SELECT COUNT(*) FROM menu_images").await?;
    let active_organizations: i64 = count(
        &pool,
        "SELECT COUNT(*) FROM organizations WHERE subscription_status = 'active'",
    )
    .await?;

    let week_ago = Utc::now() - Duration::days(7);
    let recent_signups: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE created_at >= $1")
            .bind(week_ago)
            .fetch_one(&pool)
            .await
            .map_err(|e| {
                error!(?e, "DB error counting recent signups");
                AppError::Db(e)
            })?;

    Ok(Json(PlatformStats {
        total_users,
        total_organizations,
        total_images,
        active_organizations,
        recent_signups,
    }))
}

pub async fn list_users(
    Extension(pool): Extension<PgPool>,
    auth: AuthUser,
) -> AppResult<Json<Vec<AdminUser>>> {
    require_master(&auth)?;

    let rows = sqlx::query(
        r#"
        SELECT u.id, u.email, u.name, u.role, u.is_active, u.created_at,
               o.id AS organization_id, o.name AS organization_name, o.slug, o.plan,
               m.role AS member_role
        FROM users u
        LEFT JOIN organization_members m ON m.user_id = u.id
        LEFT JOIN organizations o ON o.id = m.organization_id
        ORDER BY u.created_at DESC, u.id ASC, o.id ASC
        "#,
    )
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        error!(?e, "DB error listing users");
        AppError::Db(e)
    })?;

    // rows for the same user are adjacent thanks to the ordering
    let mut users: Vec<AdminUser> = Vec::new();
    for row in rows {
        let id: i32 = row.get("id");
        if users.last().map(|user| user.id) != Some(id) {
            users.push(AdminUser {
                id,
                email: row.get("email"),
                name: row.get("name"),
                role: row.get("role"),
                is_active: row.get("is_active"),
                created_at: row.get("created_at"),
                organizations: Vec::new(),
            });
        }
        if let Some(organization_id) = row.get::<Option<i32>, _>("organization_id") {
            if let Some(user) = users.last_mut() {
                user.organizations.push(AdminUserOrganization {
                    id: organization_id,
                    name: row.get("organization_name"),
                    slug: row.get("slug"),
                    plan: row.get("plan"),
                    role: row.get("member_role"),
                });
            }
        }
    }

    Ok(Json(users))
}

async fn count(pool: &PgPool, sql: &str) -> AppResult<i64> {
    sqlx::query_scalar(sql).fetch_one(pool).await.map_err(|e| {
        error!(?e, "DB error running platform count");
        AppError::Db(e)
    })
}

#[derive(Debug, Serialize)]
pub struct PlatformStats {
    pub total_users: i64,
    pub total_organizations: i64,
    pub total_images: i64,
    pub active_organizations: i64,
    pub recent_signups: i64,
}

#[derive(Debug, Serialize)]
pub struct AdminUser {
    pub id: i32,
    pub email: String,
    pub name: String,
    pub role: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub organizations: Vec<AdminUserOrganization>,
}

#[derive(Debug, Serialize)]
pub struct AdminUserOrganization {
    pub id: i32,
    pub name: String,
    pub slug: String,
    pub plan: String,
    pub role: String,
}
