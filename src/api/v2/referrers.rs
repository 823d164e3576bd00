//! Referrer listing (spec.md §4.3): the OCI image index reverse-mapping
//! manifests to the subject digest they refer to.

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use super::repo_name;
use crate::api::error::ApiError;
use crate::digest::Digest;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ReferrersQuery {
    #[serde(rename = "artifactType", default)]
    artifact_type: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    Path((owner, repository, digest)): Path<(String, String, String)>,
    Query(query): Query<ReferrersQuery>,
) -> Result<Response, ApiError> {
    let repo = repo_name(&owner, &repository)?;
    let subject = Digest::parse(&digest)?;
    let filter = query.artifact_type.as_deref().filter(|s| !s.is_empty());

    let body = state.store().get_referrers(&repo, &subject, filter).await?;

    let mut response = (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "application/vnd.oci.image.index.v1+json".to_string(),
        )],
        body,
    )
        .into_response();

    if filter.is_some() {
        response.headers_mut().insert(
            header::HeaderName::from_static("oci-filters-applied"),
            header::HeaderValue::from_static("artifactType"),
        );
    }

    Ok(response)
}
