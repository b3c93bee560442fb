use std::collections::HashMap;
use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeJsonError;
use sqlx::Error as SqlxError;
use ts_rs::TS;

/// A structured error returned by every backup endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AppError {
    /// Machine readable code, `FAMILY/DETAIL`.
    pub code: String,
    /// Message shown to the administrator as-is.
    pub message: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    #[ts(type = "Record<string, string>")]
    pub context: HashMap<String, String>,
    /// Lower-level failure this error wraps, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub cause: Option<Box<AppError>>,
}

pub type AppResult<T> = std::result::Result<T, AppError>;

impl AppError {
    pub const UNAUTHENTICATED: &'static str = "AUTH/UNAUTHENTICATED";
    pub const FORBIDDEN: &'static str = "AUTH/FORBIDDEN";
    pub const INVALID_SNAPSHOT: &'static str = "BACKUP/INVALID_SNAPSHOT";
    pub const BUSY: &'static str = "BACKUP/BUSY";
    pub const JOB_NOT_FOUND: &'static str = "BACKUP/JOB_NOT_FOUND";
    pub const BAD_REQUEST: &'static str = "BACKUP/BAD_REQUEST";
    pub const STORE: &'static str = "BACKUP/STORE";

    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError {
            code: code.into(),
            message: message.into(),
            context: HashMap::new(),
            cause: None,
        }
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        AppError::new(Self::UNAUTHENTICATED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        AppError::new(Self::FORBIDDEN, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        AppError::new(Self::BAD_REQUEST, message)
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &HashMap<String, String> {
        &self.context
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn caused_by(mut self, cause: AppError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// HTTP status for this error's code family.
    pub fn status(&self) -> StatusCode {
        match self.code.as_str() {
            Self::UNAUTHENTICATED => StatusCode::UNAUTHORIZED,
            Self::FORBIDDEN => StatusCode::FORBIDDEN,
            Self::INVALID_SNAPSHOT | Self::BAD_REQUEST => StatusCode::BAD_REQUEST,
            Self::BUSY => StatusCode::CONFLICT,
            Self::JOB_NOT_FOUND => StatusCode::NOT_FOUND,
            code if code.starts_with("JSON/") => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(table) = self.context.get("table") {
            write!(f, " (table {table})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

impl From<SerdeJsonError> for AppError {
    fn from(error: SerdeJsonError) -> Self {
        let code = match error.classify() {
            serde_json::error::Category::Syntax => "JSON/SYNTAX",
            serde_json::error::Category::Data => "JSON/DATA",
            serde_json::error::Category::Eof => "JSON/EOF",
            serde_json::error::Category::Io => "JSON/IO",
        };
        let mut app_error = AppError::new(code, error.to_string());
        if error.line() > 0 {
            app_error = app_error
                .with_context("line", error.line().to_string())
                .with_context("column", error.column().to_string());
        }
        app_error
    }
}

impl From<SqlxError> for AppError {
    fn from(error: SqlxError) -> Self {
        match error {
            SqlxError::Database(db) => {
                let code = db
                    .code()
                    .map(|code| format!("SQLITE/{code}"))
                    .unwrap_or_else(|| "SQLX/DATABASE".to_string());
                let app_error = AppError::new(code, db.message().to_string());
                match db.constraint() {
                    Some(constraint) => app_error.with_context("constraint", constraint),
                    None => app_error,
                }
            }
            SqlxError::Io(err) => AppError::new(format!("IO/{:?}", err.kind()), err.to_string()),
            SqlxError::PoolTimedOut => AppError::new(
                "SQLX/POOL_TIMEOUT",
                "Timed out acquiring a database connection",
            ),
            SqlxError::PoolClosed => AppError::new("SQLX/POOL_CLOSED", "Database pool is closed"),
            other => AppError::new("SQLX/ERROR", other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(target: "retail_vault", event = "request_failed", code = %self.code, error = %self);
        }
        (status, Json(self)).into_response()
    }
}
