use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::{
    routing::{get, put},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Row};
use uuid::Uuid;

pub fn routes() -> Router {
    Router::new()
        .route(
            "/api/organizations/:id",
            get(get_organization).put(update_organization),
        )
        .route(
            "/api/organizations/:id/members",
            get(list_members).post(add_member),
        )
        .route(
            "/api/organizations/:id/members/:member_id",
            put(update_member_role).delete(remove_member),
        )
}

/// Role of `user_id` inside the organization, or `None` for non-members.
pub async fn membership_role(
    pool: &PgPool,
    organization_id: i32,
    user_id: i32,
) -> AppResult<Option<String>> {
    let rec = sqlx::query(
        "SELECT role FROM organization_members WHERE organization_id = $1 AND user_id = $2",
    )
    .bind(organization_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .map_err(|e| {
        tracing::error!(?e, "DB error checking membership");
        AppError::Db(e)
    })?;
    Ok(rec.map(|row| row.get("role")))
}

pub async fn require_member(pool: &PgPool, organization_id: i32, user_id: i32) -> AppResult<String> {
    membership_role(pool, organization_id, user_id)
        .await?
        .ok_or(AppError::Forbidden)
}

/// Owners and admins manage settings, members and billing.
pub async fn require_manager(
    pool: &PgPool,
    organization_id: i32,
    user_id: i32,
) -> AppResult<String> {
    let role = require_member(pool, organization_id, user_id).await?;
    if role != "owner" && role != "admin" {
        return Err(AppError::Forbidden);
    }
    Ok(role)
}

pub async fn get_organization(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
    Path(organization_id): Path<i32>,
) -> AppResult<Json<OrganizationDetail>> {
    require_member(&pool, organization_id, user_id).await?;
    let org = fetch_detail(&pool, organization_id).await?;
    Ok(Json(org))
}

pub async fn update_organization(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
    Path(organization_id): Path<i32>,
    Json(payload): Json<UpdateOrganization>,
) -> AppResult<Json<OrganizationDetail>> {
    require_manager(&pool, organization_id, user_id).await?;
    if matches!(&payload.name, Some(name) if name.trim().is_empty()) {
        return Err(AppError::BadRequest("Name cannot be empty".into()));
    }

    // slug is deliberately absent here: it is fixed at signup
    let row = sqlx::query_as::<_, OrganizationDetail>(
        r#"
        UPDATE organizations
        SET name = COALESCE($2, name),
            whatsapp = COALESCE($3, whatsapp),
            instagram = COALESCE($4, instagram),
            address = COALESCE($5, address)
        WHERE id = $1
        RETURNING id, name, slug, plan, subscription_status, whatsapp, instagram, address, created_at
        "#,
    )
    .bind(organization_id)
    .bind(payload.name.as_ref().map(|name| name.trim().to_string()))
    .bind(payload.whatsapp)
    .bind(payload.instagram)
    .bind(payload.address)
    .fetch_optional(&pool)
    .await
    .map_err(|e| {
        tracing::error!(?e, "DB error updating organization");
        AppError::Db(e)
    })?;

    row.map(Json).ok_or(AppError::NotFound)
}

pub async fn list_members(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
    Path(organization_id): Path<i32>,
) -> AppResult<Json<Vec<MemberInfo>>> {
    require_member(&pool, organization_id, user_id).await?;
    let members = sqlx::query_as::<_, MemberInfo>(
        r#"
        SELECT m.id, m.user_id, u.email, u.name, m.role, m.created_at
        FROM organization_members m
        JOIN users u ON u.id = m.user_id
        WHERE m.organization_id = $1
        ORDER BY m.created_at ASC, m.id ASC
        "#,
    )
    .bind(organization_id)
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!(?e, "DB error listing members");
        AppError::Db(e)
    })?;
    Ok(Json(members))
}

pub async fn add_member(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
    Path(organization_id): Path<i32>,
    Json(payload): Json<AddMemberRequest>,
) -> AppResult<(StatusCode, Json<MemberInfo>)> {
    require_manager(&pool, organization_id, user_id).await?;
    let role = payload.role.unwrap_or_else(|| "member".to_string());
    if role != "member" && role != "admin" {
        return Err(AppError::BadRequest("Role must be member or admin".into()));
    }

    let user = sqlx::query("SELECT id, name FROM users WHERE email = $1")
        .bind(payload.email.trim())
        .fetch_optional(&pool)
        .await
        .map_err(|e| {
            tracing::error!(?e, "DB error looking up user by email");
            AppError::Db(e)
        })?;
    let Some(user) = user else {
        return Err(AppError::NotFound);
    };
    let member_user_id: i32 = user.get("id");
    let member_name: String = user.get("name");

    let inserted = sqlx::query(
        r#"
        INSERT INTO organization_members (organization_id, user_id, role)
        VALUES ($1, $2, $3)
        RETURNING id, created_at
        "#,
    )
    .bind(organization_id)
    .bind(member_user_id)
    .bind(&role)
    .fetch_one(&pool)
    .await;
    let row = match inserted {
        Ok(row) => row,
        Err(e) => {
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.constraint() == Some("organization_members_organization_id_user_id_key") {
                    return Err(AppError::BadRequest("User is already a member".into()));
                }
            }
            tracing::error!(?e, "DB error adding member");
            return Err(AppError::Db(e));
        }
    };

    Ok((
        StatusCode::CREATED,
        Json(MemberInfo {
            id: row.get("id"),
            user_id: member_user_id,
            email: payload.email.trim().to_string(),
            name: member_name,
            role,
            created_at: row.get("created_at"),
        }),
    ))
}

pub async fn update_member_role(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
    Path((organization_id, member_id)): Path<(i32, i32)>,
    Json(payload): Json<UpdateMemberRole>,
) -> AppResult<Json<MemberInfo>> {
    // only owners reshape the role hierarchy
    let requester_role = require_member(&pool, organization_id, user_id).await?;
    if requester_role != "owner" {
        return Err(AppError::Forbidden);
    }
    if !matches!(payload.role.as_str(), "owner" | "admin" | "member") {
        return Err(AppError::BadRequest("Unknown role".into()));
    }

    let target = fetch_member(&pool, organization_id, member_id).await?;
    if target.role == "owner" && payload.role != "owner" {
        ensure_not_last_owner(&pool, organization_id).await?;
    }

    sqlx::query("UPDATE organization_members SET role = $2 WHERE id = $1")
        .bind(member_id)
        .bind(&payload.role)
        .execute(&pool)
        .await
        .map_err(|e| {
            tracing::error!(?e, "DB error updating member role");
            AppError::Db(e)
        })?;

    Ok(Json(MemberInfo {
        role: payload.role,
        ..target
    }))
}

pub async fn remove_member(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
    Path((organization_id, member_id)): Path<(i32, i32)>,
) -> AppResult<StatusCode> {
    let requester_role = require_manager(&pool, organization_id, user_id).await?;
    let target = fetch_member(&pool, organization_id, member_id).await?;
    if target.role == "owner" {
        if requester_role != "owner" {
            return Err(AppError::Forbidden);
        }
        ensure_not_last_owner(&pool, organization_id).await?;
    }

    sqlx::query("DELETE FROM organization_members WHERE id = $1 AND organization_id = $2")
        .bind(member_id)
        .bind(organization_id)
        .execute(&pool)
        .await
        .map_err(|e| {
            tracing::error!(?e, "DB error removing member");
            AppError::Db(e)
        })?;
    Ok(StatusCode::NO_CONTENT)
}

async fn fetch_detail(pool: &PgPool, organization_id: i32) -> AppResult<OrganizationDetail> {
    let org = sqlx::query_as::<_, OrganizationDetail>(
        r#"
        SELECT id, name, slug, plan, subscription_status, whatsapp, instagram, address, created_at
        FROM organizations
        WHERE id = $1
        "#,
    )
    .bind(organization_id)
    .fetch_optional(pool)
    .await
    .map_err(|e| {
        tracing::error!(?e, "DB error fetching organization");
        AppError::Db(e)
    })?;
    org.ok_or(AppError::NotFound)
}

async fn fetch_member(pool: &PgPool, organization_id: i32, member_id: i32) -> AppResult<MemberInfo> {
    let row = sqlx::query_as::<_, MemberInfo>(
        r#"
        SELECT m.id, m.user_id, u.email, u.name, m.role, m.created_at
        FROM organization_members m
        JOIN users u ON u.id = m.user_id
        WHERE m.id = $1 AND m.organization_id = $2
        "#,
    )
    .bind(member_id)
    .bind(organization_id)
    .fetch_optional(pool)
    .await
    .map_err(|e| {
        tracing::error!(?e, "DB error fetching member");
        AppError::Db(e)
    })?;
    row.ok_or(AppError::NotFound)
}

async fn ensure_not_last_owner(pool: &PgPool, organization_id: i32) -> AppResult<()> {
    let owners: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM organization_members WHERE organization_id = $1 AND role = 'owner'",
    )
    .bind(organization_id)
    .fetch_one(pool)
    .await
    .map_err(|e| {
        tracing::error!(?e, "DB error counting owners");
        AppError::Db(e)
    })?;
    if owners <= 1 {
        return Err(AppError::BadRequest(
            "Organization must keep at least one owner".into(),
        ));
    }
    Ok(())
}

static NON_SLUG: Lazy<Regex> = Lazy::new(|| Regex::new("[^a-z0-9]+").expect("valid regex"));

/// Lowercase, accent-stripped, hyphen-separated form of a display name.
pub fn slugify(name: &str) -> String {
    let lowered = name.to_lowercase();
    let ascii: String = lowered.chars().map(strip_accent).collect();
    NON_SLUG.replace_all(&ascii, "-").trim_matches('-').to_string()
}

fn strip_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'ç' => 'c',
        'ñ' => 'n',
        _ => c,
    }
}

/// First free slug derived from `name`, probing `-2`, `-3`, ... on collision.
pub async fn unique_slug(pool: &PgPool, name: &str) -> AppResult<String> {
    let base = {
        let slug = slugify(name);
        if slug.is_empty() {
            "menu".to_string()
        } else {
            slug
        }
    };

    let mut candidate = base.clone();
    for suffix in 2..100 {
        let taken: Option<i32> = sqlx::query_scalar("SELECT id FROM organizations WHERE slug = $1")
            .bind(&candidate)
            .fetch_optional(pool)
            .await
            .map_err(|e| {
                tracing::error!(?e, "DB error probing slug");
                AppError::Db(e)
            })?;
        if taken.is_none() {
            return Ok(candidate);
        }
        candidate = format!("{base}-{suffix}");
    }

    // crowded namespace, give up on readable suffixes
    let random = Uuid::new_v4().simple().to_string();
    Ok(format!("{base}-{}", &random[..8]))
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct OrganizationDetail {
    pub id: i32,
    pub name: String,
    pub slug: String,
    pub plan: String,
    pub subscription_status: String,
    pub whatsapp: Option<String>,
    pub instagram: Option<String>,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MemberInfo {
    pub id: i32,
    pub user_id: i32,
    pub email: String,
    pub name: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateOrganization {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub whatsapp: Option<String>,
    #[serde(default)]
    pub instagram: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub email: String,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateMemberRole {
    pub role: String,
}
