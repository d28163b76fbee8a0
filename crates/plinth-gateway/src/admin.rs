// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Admin HTTP API: thin pass-throughs to the lifecycle manager.
//!
//! Mounted under `server.admin_prefix` behind [`require_admin`](crate::auth::require_admin).

use axum::{
    Extension, Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use plinth_core::manifest::PluginCategory;
use plinth_core::types::{Pagination, RecordFilter};
use plinth_core::{Actor, PlinthError, PluginStatus};
use plinth_plugin::{InstallOptions, UninstallOptions};

use crate::dispatcher::DispatchResponse;
use crate::envelope::Envelope;
use crate::server::GatewayState;

/// A [`PlinthError`] rendered as an envelope with its status code.
#[derive(Debug)]
pub struct ApiError(pub PlinthError);

impl From<PlinthError> for ApiError {
    fn from(err: PlinthError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.0.status_code() >= 500 {
            tracing::error!(error = %self.0, "admin request failed");
        }
        DispatchResponse::error(&self.0).into_response()
    }
}

type ApiResult = Result<(StatusCode, Json<Envelope>), ApiError>;

fn to_data<T: Serialize>(value: &T) -> Result<Value, ApiError> {
    serde_json::to_value(value).map_err(|e| ApiError(PlinthError::Internal(e.to_string())))
}

fn ok(envelope: Envelope) -> ApiResult {
    let status = StatusCode::from_u16(envelope.status_code).unwrap_or(StatusCode::OK);
    Ok((status, Json(envelope)))
}

/// Query string of `GET /`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ListQuery {
    pub is_active: Option<bool>,
    pub status: Option<PluginStatus>,
    pub category: Option<PluginCategory>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl ListQuery {
    fn split(self) -> (RecordFilter, Pagination) {
        let defaults = Pagination::default();
        (
            RecordFilter {
                is_active: self.is_active,
                status: self.status,
                category: self.category,
            },
            Pagination {
                offset: self.offset.unwrap_or(defaults.offset),
                limit: self.limit.unwrap_or(defaults.limit),
            },
        )
    }
}

pub(crate) fn routes() -> Router<GatewayState> {
    Router::new()
        .route("/", get(list).post(install))
        .route("/validate", post(validate))
        .route("/{id}", get(get_plugin).delete(uninstall))
        .route("/{id}/activate", post(activate))
        .route("/{id}/deactivate", post(deactivate))
        .route("/{id}/config", put(configure))
}

async fn list(State(state): State<GatewayState>, Query(query): Query<ListQuery>) -> ApiResult {
    let (filter, page) = query.split();
    let page = state.host.lifecycle().list(&filter, page).await?;
    ok(Envelope::ok(to_data(&page)?, 200))
}

async fn get_plugin(State(state): State<GatewayState>, Path(id): Path<String>) -> ApiResult {
    let info = state.host.lifecycle().get(&id).await?;
    ok(Envelope::ok(to_data(&info)?, 200))
}

/// Writes an uploaded archive into the staging directory.
async fn stage_upload(
    state: &GatewayState,
    body: &Bytes,
) -> Result<tempfile::NamedTempFile, PlinthError> {
    if body.is_empty() {
        return Err(PlinthError::validation("request body must be a package archive"));
    }
    let staging = &state.host.lifecycle().dirs().staging;
    tokio::fs::create_dir_all(staging).await?;
    let file = tempfile::Builder::new()
        .prefix("upload-")
        .suffix(".tar.gz")
        .tempfile_in(staging)?;
    tokio::fs::write(file.path(), body).await?;
    Ok(file)
}

async fn install(
    State(state): State<GatewayState>,
    Extension(actor): Extension<Actor>,
    Query(options): Query<InstallOptions>,
    body: Bytes,
) -> ApiResult {
    let upload = stage_upload(&state, &body).await?;
    let outcome = state
        .host
        .lifecycle()
        .install(upload.path(), &actor.id, options)
        .await?;
    let message = format!(
        "plugin '{}' {} installed",
        outcome.record.plugin_id, outcome.record.version
    );
    ok(Envelope::message(message)
        .with_data(to_data(&outcome)?)
        .with_status(201))
}

async fn validate(State(state): State<GatewayState>, body: Bytes) -> ApiResult {
    let upload = stage_upload(&state, &body).await?;
    let report = state.host.lifecycle().validate(upload.path()).await?;
    ok(Envelope::ok(to_data(&report)?, 200))
}

async fn activate(
    State(state): State<GatewayState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> ApiResult {
    let record = state.host.lifecycle().activate(&id, &actor.id).await?;
    ok(Envelope::message(format!("plugin '{id}' activated")).with_data(to_data(&record)?))
}

async fn deactivate(
    State(state): State<GatewayState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> ApiResult {
    let record = state.host.lifecycle().deactivate(&id, &actor.id).await?;
    ok(Envelope::message(format!("plugin '{id}' deactivated")).with_data(to_data(&record)?))
}

async fn configure(
    State(state): State<GatewayState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult {
    let patch: Value = serde_json::from_slice(&body)
        .map_err(|e| PlinthError::validation(format!("invalid JSON body: {e}")))?;
    let config = state.host.lifecycle().configure(&id, patch, &actor.id).await?;
    ok(Envelope::message(format!("plugin '{id}' configured")).with_data(config))
}

async fn uninstall(
    State(state): State<GatewayState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    Query(options): Query<UninstallOptions>,
) -> ApiResult {
    state
        .host
        .lifecycle()
        .uninstall(&id, &actor.id, options)
        .await?;
    ok(Envelope::message(format!("plugin '{id}' uninstalled")))
}
