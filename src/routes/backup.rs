use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::auth::AdminUser;
use crate::export::{export_snapshot, ExportOptions, ExportOutcome};
use crate::import::{
    import_bulk, import_finalize, import_init, import_table, validate, FinalizeRequest,
    FinalizeResponse, ImportOutcome, InitRequest, InitResponse, TableRequest, TableResponse,
    ValidationReport, ValidationTier,
};
use crate::progress::{Operation, ProgressState};
use crate::state::AppState;
use crate::topology::ExportSelection;
use crate::{AppError, AppResult};

pub const SKIPPED_TABLES_HEADER: &str = "x-backup-skipped-tables";

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ExportQuery {
    #[serde(default)]
    messaging: Option<bool>,
    #[serde(default)]
    sessions: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ValidateQuery {
    #[serde(default)]
    tier: Option<ValidationTier>,
}

fn header_value(value: &str) -> AppResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|err| {
        AppError::new("HTTP/HEADER", "Response header could not be encoded")
            .with_context("error", err.to_string())
    })
}

/// Decode a request body, recording the failure on the progress tracker.
fn decode_import_body<T: DeserializeOwned>(state: &AppState, body: &[u8]) -> AppResult<T> {
    serde_json::from_slice(body).map_err(|err| {
        state.progress.begin(Operation::Import, "validating");
        state.progress.fail(err.to_string());
        state.progress.schedule_reset(state.config.progress_reset);
        AppError::from(err)
    })
}

pub(crate) async fn export_handler(
    State(state): State<AppState>,
    admin: AdminUser,
    Query(query): Query<ExportQuery>,
) -> AppResult<Response> {
    let _guard = state.begin_maintenance()?;
    let defaults = ExportSelection::default();
    let opts = ExportOptions {
        selection: ExportSelection {
            include_messaging: query.messaging.unwrap_or(defaults.include_messaging),
            include_sessions: query.sessions.unwrap_or(defaults.include_sessions),
        },
        page_size: state.config.export_page_size,
        created_by: admin.display_name().to_string(),
        reset_delay: state.config.progress_reset,
    };
    let outcome = export_snapshot(state.store.as_ref(), &state.progress, &opts).await?;
    snapshot_response(&outcome).inspect_err(|err| {
        state.progress.fail(err.message());
        state.progress.schedule_reset(state.config.progress_reset);
    })
}

fn snapshot_response(outcome: &ExportOutcome) -> AppResult<Response> {
    let bytes = serde_json::to_vec(&outcome.snapshot)?;

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        header_value(&format!(
            "attachment; filename=\"{}\"",
            outcome.file_name().replace('"', "_")
        ))?,
    );
    if !outcome.skipped_tables.is_empty() {
        headers.insert(
            HeaderName::from_static(SKIPPED_TABLES_HEADER),
            header_value(&outcome.skipped_tables.join(","))?,
        );
    }
    Ok(response)
}

pub(crate) async fn validate_handler(
    _admin: AdminUser,
    Query(query): Query<ValidateQuery>,
    body: Bytes,
) -> AppResult<Json<ValidationReport>> {
    let document: Value = serde_json::from_slice(&body)?;
    Ok(Json(validate(&document, query.tier.unwrap_or_default())))
}

pub(crate) async fn import_handler(
    State(state): State<AppState>,
    admin: AdminUser,
    body: Bytes,
) -> AppResult<Json<ImportOutcome>> {
    let _guard = state.begin_maintenance()?;
    let document: Value = decode_import_body(&state, &body)?;
    let opts = state.import_options(Some(admin.id));
    let outcome = import_bulk(state.store.as_ref(), &state.progress, &document, &opts).await?;
    Ok(Json(outcome))
}

pub(crate) async fn import_init_handler(
    State(state): State<AppState>,
    admin: AdminUser,
    body: Bytes,
) -> AppResult<Json<InitResponse>> {
    let _guard = state.begin_maintenance()?;
    let request: InitRequest = decode_import_body(&state, &body)?;
    let opts = state.import_options(Some(admin.id));
    let ttl_ms = i64::try_from(state.config.job_ttl.as_millis()).unwrap_or(i64::MAX);
    let response = import_init(
        state.store.as_ref(),
        &state.jobs,
        &state.progress,
        &request,
        &opts,
        ttl_ms,
    )
    .await?;
    Ok(Json(response))
}

pub(crate) async fn import_table_handler(
    State(state): State<AppState>,
    admin: AdminUser,
    body: Bytes,
) -> AppResult<Json<TableResponse>> {
    let _guard = state.begin_maintenance()?;
    let request: TableRequest = decode_import_body(&state, &body)?;
    let opts = state.import_options(Some(admin.id));
    let response = import_table(
        state.store.as_ref(),
        &state.jobs,
        &state.progress,
        &request,
        &opts,
    )
    .await?;
    Ok(Json(response))
}

pub(crate) async fn import_finalize_handler(
    State(state): State<AppState>,
    admin: AdminUser,
    body: Bytes,
) -> AppResult<Json<FinalizeResponse>> {
    let _guard = state.begin_maintenance()?;
    let request: FinalizeRequest = decode_import_body(&state, &body)?;
    let opts = state.import_options(Some(admin.id));
    let response = import_finalize(
        state.store.as_ref(),
        &state.jobs,
        &state.progress,
        &request,
        &opts,
    )
    .await?;
    Ok(Json(response))
}

pub(crate) async fn progress_handler(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Json<ProgressState> {
    Json(state.progress.get())
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/backup/export", get(export_handler))
        .route("/backup/validate", post(validate_handler))
        .route("/backup/import", post(import_handler))
        .route("/backup/import/init", post(import_init_handler))
        .route("/backup/import/table", post(import_table_handler))
        .route("/backup/import/finalize", post(import_finalize_handler))
        .route("/backup/progress", get(progress_handler))
}
