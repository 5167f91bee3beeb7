use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::Json,
    Json as RequestJson,
};
use log::error;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::auth::RequireToken;
use crate::logic::{ApplyEngine, ApplyFailure, ApplyReport, ChangesetError, EntityRecord};
use crate::model::{
    Changeset, ChangesetDetail, ChangesetUpdate, Id, MalformedPayload, NewChangeset, OnestopId,
    PayloadBody, WhenToApply,
};
use crate::store::traits::Store;

/// Shared handler state
pub struct AppContext<S: Store> {
    pub engine: ApplyEngine<S>,
    /// When unset, mutating endpoints are open
    pub auth_token: Option<String>,
}

impl<S: Store> AppContext<S> {
    pub fn new(store: Arc<S>, auth_token: Option<String>) -> Self {
        Self {
            engine: ApplyEngine::new(store),
            auth_token: auth_token.filter(|token| !token.is_empty()),
        }
    }
}

pub type AppState<S> = Arc<AppContext<S>>;

pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Simple health check endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub message: String,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<ApplyFailure>,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str) -> Self {
        Self {
            message: message.to_string(),
            error: error.to_string(),
            failure: None,
        }
    }
}

/// Map an engine error onto a status code and body
pub fn error_response(err: ChangesetError) -> ApiError {
    let status = match &err {
        ChangesetError::MalformedPayload(_)
        | ChangesetError::AlreadyApplied
        | ChangesetError::ApplyFailed(_) => StatusCode::BAD_REQUEST,
        ChangesetError::ChangesetNotFound(_) => StatusCode::NOT_FOUND,
        ChangesetError::RevertUnsupported => StatusCode::NOT_IMPLEMENTED,
        ChangesetError::Storage(e) => {
            error!("Storage error: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    let mut body = ErrorResponse::new(err.kind(), &err.to_string());
    if let ChangesetError::ApplyFailed(failure) = err {
        body.failure = Some(failure);
    }
    (status, Json(body))
}

fn malformed(err: MalformedPayload) -> ApiError {
    error_response(ChangesetError::MalformedPayload(err))
}

/// Unwrap a JSON body, answering rejections in the `ErrorResponse` shape
fn request_body<T>(body: Result<RequestJson<T>, JsonRejection>) -> Result<T, ApiError> {
    match body {
        Ok(RequestJson(value)) => Ok(value),
        Err(rejection) => Err(malformed(MalformedPayload::new(rejection.body_text()))),
    }
}

#[derive(Debug, Deserialize)]
pub struct ChangesetEnvelope<T> {
    pub changeset: T,
}

/// `payload` stays raw JSON until it is parsed into changes
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ChangesetParams {
    pub notes: Option<String>,
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub when_to_apply: WhenToApply,
}

#[derive(Debug, Deserialize)]
pub struct ChangeEnvelope {
    pub change: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct ChangesetList {
    pub changesets: Vec<Changeset>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResponse {
    pub trial_succeeds: bool,
}

pub async fn list_changesets<S: Store>(
    State(ctx): State<AppState<S>>,
) -> Result<Json<ChangesetList>, ApiError> {
    let changesets = ctx.engine.list().await.map_err(error_response)?;
    Ok(Json(ChangesetList { changesets }))
}

pub async fn get_changeset<S: Store>(
    State(ctx): State<AppState<S>>,
    Path(id): Path<Id>,
) -> Result<Json<ChangesetDetail>, ApiError> {
    ctx.engine
        .detail(&id)
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn create_changeset<S: Store>(
    _token: RequireToken,
    State(ctx): State<AppState<S>>,
    body: Result<RequestJson<ChangesetEnvelope<ChangesetParams>>, JsonRejection>,
) -> Result<Json<Changeset>, ApiError> {
    let params = request_body(body)?.changeset;
    let payload = params
        .payload
        .map(PayloadBody::from_value)
        .transpose()
        .map_err(malformed)?;

    let changeset = ctx
        .engine
        .create(NewChangeset {
            notes: params.notes,
            payload,
            when_to_apply: params.when_to_apply,
        })
        .await
        .map_err(error_response)?;

    Ok(Json(changeset))
}

pub async fn update_changeset<S: Store>(
    _token: RequireToken,
    State(ctx): State<AppState<S>>,
    Path(id): Path<Id>,
    body: Result<RequestJson<ChangesetEnvelope<ChangesetUpdate>>, JsonRejection>,
) -> Result<Json<Changeset>, ApiError> {
    let update = request_body(body)?.changeset;
    ctx.engine
        .update(&id, update)
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn append_payload<S: Store>(
    _token: RequireToken,
    State(ctx): State<AppState<S>>,
    Path(id): Path<Id>,
    body: Result<RequestJson<ChangeEnvelope>, JsonRejection>,
) -> Result<Json<Changeset>, ApiError> {
    let request = request_body(body)?;
    let payload = PayloadBody::from_value(request.change).map_err(malformed)?;
    ctx.engine
        .append(&id, payload)
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn check_changeset<S: Store>(
    _token: RequireToken,
    State(ctx): State<AppState<S>>,
    Path(id): Path<Id>,
) -> Result<Json<CheckResponse>, ApiError> {
    let trial_succeeds = ctx.engine.check(&id).await.map_err(error_response)?;
    Ok(Json(CheckResponse { trial_succeeds }))
}

pub async fn apply_changeset<S: Store>(
    _token: RequireToken,
    State(ctx): State<AppState<S>>,
    Path(id): Path<Id>,
) -> Result<Json<ApplyReport>, ApiError> {
    ctx.engine
        .apply(&id)
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn revert_changeset<S: Store>(
    _token: RequireToken,
    State(ctx): State<AppState<S>>,
    Path(id): Path<Id>,
) -> Result<Json<Changeset>, ApiError> {
    ctx.engine
        .revert(&id)
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn get_by_onestop_id<S: Store>(
    State(ctx): State<AppState<S>>,
    Path(onestop_id): Path<String>,
) -> Result<Json<EntityRecord>, ApiError> {
    let onestop_id = OnestopId::parse(&onestop_id).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("invalidOnestopId", &e.to_string())),
        )
    })?;

    match ctx.engine.lookup(&onestop_id).await {
        Ok(Some(record)) => Ok(Json(record)),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(
                "notFound",
                &format!("{} not found", onestop_id),
            )),
        )),
        Err(e) => Err(error_response(e)),
    }
}
