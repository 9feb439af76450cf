use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;
use crate::organizations;
use argon2::password_hash::{PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use axum::extract::Extension;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use tracing::error;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub name: Option<String>,
    pub organization_name: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub id: i32,
    pub organization_id: i32,
    pub slug: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
struct Claims {
    sub: i32,
    role: String,
    exp: usize,
}

/// Signup creates the user, their organization and the owner membership in one
/// transaction. The organization starts on the free tier with a slug derived
/// from its name.
pub async fn register_user(
    Extension(pool): Extension<PgPool>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<RegisterResponse>)> {
    if payload.password.len() < 8 {
        return Err(AppError::BadRequest("Password too short".into()));
    }
    let organization_name = payload.organization_name.trim();
    if organization_name.is_empty() {
        return Err(AppError::BadRequest("Organization name required".into()));
    }

    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(payload.password.as_bytes(), &salt)
        .map_err(|e| AppError::Message(format!("Hashing failed: {}", e)))?;

    let slug = organizations::unique_slug(&pool, organization_name).await?;

    let mut tx = pool.begin().await.map_err(AppError::Db)?;

    let user_insert =
        sqlx::query("INSERT INTO users (email, password_hash, name) VALUES ($1, $2, $3) RETURNING id")
            .bind(&payload.email)
            .bind(hash.to_string())
            .bind(payload.name.as_deref().unwrap_or(""))
            .fetch_one(&mut tx)
            .await;
    let user_row = match user_insert {
        Ok(row) => row,
        Err(e) => {
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.constraint() == Some("users_email_key") {
                    return Err(AppError::BadRequest("Email already registered".into()));
                }
            }
            error!(?e, "DB error inserting user");
            return Err(AppError::Db(e));
        }
    };
    let user_id: i32 = user_row.get("id");

    let org_insert =
        sqlx::query("INSERT INTO organizations (name, slug) VALUES ($1, $2) RETURNING id")
            .bind(organization_name)
            .bind(&slug)
            .fetch_one(&mut tx)
            .await;
    let org_row = match org_insert {
        Ok(row) => row,
        Err(e) => {
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.constraint() == Some("organizations_slug_key") {
                    // two signups raced onto the same slug
                    return Err(AppError::BadRequest("Organization name unavailable".into()));
                }
            }
            error!(?e, "DB error creating organization");
            return Err(AppError::Db(e));
        }
    };
    let organization_id: i32 = org_row.get("id");

    sqlx::query(
        "INSERT INTO organization_members (organization_id, user_id, role) VALUES ($1, $2, 'owner')",
    )
    .bind(organization_id)
    .bind(user_id)
    .execute(&mut tx)
    .await
    .map_err(|e| {
        error!(?e, "DB error adding owner membership");
        AppError::Db(e)
    })?;

    tx.commit().await.map_err(AppError::Db)?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            id: user_id,
            organization_id,
            slug,
        }),
    ))
}

pub async fn login_user(
    Extension(pool): Extension<PgPool>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<(HeaderMap, &'static str)> {
    let rec = sqlx::query("SELECT id, password_hash, role, is_active FROM users WHERE email = $1")
        .bind(&payload.email)
        .fetch_optional(&pool)
        .await
        .map_err(|e| {
            error!(?e, "DB error while fetching user");
            AppError::Db(e)
        })?;

    let Some(row) = rec else {
        return Err(AppError::Unauthorized);
    };
    let user_id: i32 = row.get("id");
    let password_hash: String = row.get("password_hash");
    let role: String = row.get("role");
    let is_active: bool = row.get("is_active");

    let parsed_hash = PasswordHash::new(&password_hash)
        .map_err(|e| AppError::Message(format!("Invalid stored hash: {}", e)))?;
    Argon2::default()
        .verify_password(payload.password.as_bytes(), &parsed_hash)
        .map_err(|_| AppError::Unauthorized)?;

    if !is_active {
        return Err(AppError::Forbidden);
    }

    let exp = Utc::now()
        .checked_add_signed(Duration::hours(24))
        .expect("valid timestamp")
        .timestamp() as usize;
    let claims = Claims {
        sub: user_id,
        role,
        exp,
    };
    let secret = crate::config::JWT_SECRET.as_str();
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Message(format!("Token error: {}", e)))?;

    let mut headers = HeaderMap::new();
    let cookie = format!("auth_token={token}; HttpOnly; Secure; SameSite=Strict; Path=/");
    headers.insert(
        axum::http::header::SET_COOKIE,
        cookie.parse().map_err(|_| AppError::Message("Cookie build failed".into()))?,
    );
    Ok((headers, "Login successful"))
}

pub async fn logout_user() -> AppResult<(HeaderMap, &'static str)> {
    let mut headers = HeaderMap::new();
    let cookie = "auth_token=deleted; HttpOnly; Path=/; Max-Age=0";
    headers.insert(
        axum::http::header::SET_COOKIE,
        cookie.parse().map_err(|_| AppError::Message("Cookie build failed".into()))?,
    );
    Ok((headers, "Logged out"))
}

pub async fn current_user(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, role }: AuthUser,
) -> AppResult<Json<MeResponse>> {
    let rec = sqlx::query("SELECT email, name FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&pool)
        .await
        .map_err(|e| {
            error!(?e, "DB error fetching current user");
            AppError::Db(e)
        })?;
    let Some(row) = rec else {
        return Err(AppError::NotFound);
    };

    let memberships = sqlx::query_as::<_, MembershipInfo>(
        r#"
        SELECT o.id AS organization_id, o.name, o.slug, o.plan, o.subscription_status,
               m.role
        FROM organizations o
        JOIN organization_members m ON m.organization_id = o.id
        WHERE m.user_id = $1
        ORDER BY o.id ASC
        "#,
    )
    .bind(user_id)
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        error!(?e, "DB error listing memberships");
        AppError::Db(e)
    })?;

    Ok(Json(MeResponse {
        id: user_id,
        email: row.get("email"),
        name: row.get("name"),
        role,
        organizations: memberships,
    }))
}

#[derive(Serialize)]
pub struct MeResponse {
    pub id: i32,
    pub email: String,
    pub name: String,
    pub role: String,
    pub organizations: Vec<MembershipInfo>,
}

#[derive(Serialize, sqlx::FromRow)]
pub struct MembershipInfo {
    pub organization_id: i32,
    pub name: String,
    pub slug: String,
    pub plan: String,
    pub subscription_status: String,
    pub role: String,
}
