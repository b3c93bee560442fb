use sqlx::SqlitePool;

use crate::config::ServerConfig;
use crate::db::memory_pool;
use crate::state::AppState;
use crate::time::now_ms;

pub const ADMIN_TOKEN: &str = "admin-token";
pub const CLERK_TOKEN: &str = "clerk-token";
pub const EXPIRED_TOKEN: &str = "expired-token";

/// An admin and a staff user, each with a live session, plus one expired
/// admin session.
pub async fn seed_identities(pool: &SqlitePool) {
    for (id, email, role) in [
        ("admin", "admin@example.com", "admin"),
        ("clerk", "clerk@example.com", "staff"),
    ] {
        sqlx::query("INSERT INTO auth_users (id, email) VALUES (?1, ?2)")
            .bind(id)
            .bind(email)
            .execute(pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO user_profiles (id, user_id, role) VALUES (?1, ?1, ?2)")
            .bind(id)
            .bind(role)
            .execute(pool)
            .await
            .unwrap();
    }
    let live = now_ms() + 3_600_000;
    for (id, user, token, expires) in [
        ("s1", "admin", ADMIN_TOKEN, live),
        ("s2", "clerk", CLERK_TOKEN, live),
        ("s3", "admin", EXPIRED_TOKEN, now_ms() - 1),
    ] {
        sqlx::query(
            "INSERT INTO auth_sessions (id, user_id, token, expires_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(id)
        .bind(user)
        .bind(token)
        .bind(expires)
        .execute(pool)
        .await
        .unwrap();
    }
}

pub async fn test_state() -> AppState {
    let pool = memory_pool().await;
    seed_identities(&pool).await;
    let mut config = ServerConfig::from_lookup(|_| None);
    config.progress_reset = std::time::Duration::from_secs(60);
    AppState::new(pool, config)
}
