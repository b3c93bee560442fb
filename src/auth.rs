use std::future::Future;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use sqlx::{Row, SqlitePool};

use crate::state::AppState;
use crate::time::now_ms;
use crate::{AppError, AppResult};

pub const ADMIN_ROLE: &str = "admin";

/// An authenticated session whose profile carries the admin role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminUser {
    pub id: String,
    pub email: Option<String>,
}

impl AdminUser {
    /// Name recorded as a snapshot's creator.
    pub fn display_name(&self) -> &str {
        self.email.as_deref().unwrap_or(&self.id)
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Resolve a session token to an administrator, failing closed.
pub async fn resolve_admin(pool: &SqlitePool, token: &str) -> AppResult<AdminUser> {
    let row = sqlx::query(
        "SELECT s.user_id AS user_id, p.role AS role, u.email AS email \
         FROM auth_sessions s \
         LEFT JOIN user_profiles p ON p.id = s.user_id \
         LEFT JOIN auth_users u ON u.id = s.user_id \
         WHERE s.token = ?1 AND s.expires_at > ?2",
    )
    .bind(token)
    .bind(now_ms())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::unauthenticated("Missing or invalid session"))?;

    let id: String = row.try_get("user_id")?;
    let role: Option<String> = row.try_get("role")?;
    if role.as_deref() != Some(ADMIN_ROLE) {
        tracing::warn!(target: "retail_vault", event = "auth_not_admin", user_id = %id);
        return Err(AppError::forbidden("Administrator role required"));
    }
    Ok(AdminUser {
        id,
        email: row.try_get("email")?,
    })
}

impl<S> FromRequestParts<S> for AdminUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        let state = AppState::from_ref(state);
        let token = bearer_token(parts)
            .ok_or_else(|| AppError::unauthenticated("Missing or invalid session"));

        async move {
            let token = token?;
            resolve_admin(&state.pool, &token).await
        }
    }
}
