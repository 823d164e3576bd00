//! C3: the OCI Distribution v2 protocol surface (spec.md §4.3, §6).
//!
//! Each module owns one resource family and mirrors the path layout under
//! `/v2/{owner}/{repository}/...`. `repo_router` is nested under that prefix
//! by `api::create_router`, which also applies the auth middleware around it.

mod blobs;
mod manifests;
mod referrers;
mod tags;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, head, patch, post, put};
use axum::Router;

use crate::api::error::ApiError;
use crate::state::AppState;
use crate::store::validate_repo_name;

/// `GET /v2/` — the API version check. No auth, no body.
pub async fn discovery() -> impl IntoResponse {
    StatusCode::OK
}

pub fn repo_router() -> Router<AppState> {
    Router::new()
        .route("/blobs/{digest}", head(blobs::check_exists))
        .route("/blobs/{digest}", get(blobs::get))
        .route("/blobs/{digest}", delete(blobs::delete))
        .route("/blobs/uploads/", post(blobs::initiate_upload))
        .route("/blobs/uploads/{reference}", patch(blobs::upload_chunk))
        .route("/blobs/uploads/{reference}", put(blobs::complete_upload))
        .route("/blobs/uploads/{reference}", get(blobs::upload_status))
        .route("/manifests/{reference}", head(manifests::check_exists))
        .route("/manifests/{reference}", get(manifests::get))
        .route("/manifests/{reference}", put(manifests::put))
        .route("/manifests/{reference}", delete(manifests::delete))
        .route("/tags/list", get(tags::list))
        .route("/referrers/{digest}", get(referrers::list))
}

/// Joins `{owner}`/`{repository}` path params into the single namespace key
/// the store expects, rejecting anything that would escape the layout.
fn repo_name(owner: &str, repository: &str) -> Result<String, ApiError> {
    let name = format!("{owner}/{repository}");
    validate_repo_name(&name)?;
    Ok(name)
}
