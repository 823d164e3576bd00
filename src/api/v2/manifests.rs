//! Manifest endpoints (spec.md §4.3, §6): digest/tag resolution, the
//! `.json`/`.pretty` suffix sniff for HEAD, and referrer-index maintenance
//! on PUT/DELETE when the manifest carries a `subject`.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use super::repo_name;
use crate::api::error::ApiError;
use crate::digest::Digest;
use crate::error::RegistryError;
use crate::state::AppState;
use crate::store::manifest_media_type;

fn content_type_for(reference: &str, bytes: &[u8]) -> String {
    if reference.ends_with(".json") || reference.ends_with(".pretty") {
        return "application/json".to_string();
    }
    manifest_media_type(bytes)
}

pub async fn check_exists(
    State(state): State<AppState>,
    Path((owner, repository, reference)): Path<(String, String, String)>,
) -> Result<Response, ApiError> {
    let repo = repo_name(&owner, &repository)?;
    let (exists, _, digest) = state.store().has_manifest(&repo, &reference).await?;
    if !exists {
        return Err(RegistryError::manifest_unknown("manifest not found").into());
    }
    let digest = digest.ok_or_else(|| RegistryError::manifest_unknown("manifest not found"))?;

    let content = state.store().get_manifest(&repo, digest.as_str()).await?;
    let content_type = content_type_for(&reference, &content.bytes);

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_LENGTH, content.bytes.len().to_string()),
            (
                header::HeaderName::from_static("docker-content-digest"),
                digest.into_string(),
            ),
        ],
    )
        .into_response())
}

pub async fn get(
    State(state): State<AppState>,
    Path((owner, repository, reference)): Path<(String, String, String)>,
) -> Result<Response, ApiError> {
    let repo = repo_name(&owner, &repository)?;
    let content = state.store().get_manifest(&repo, &reference).await?;
    let content_type = manifest_media_type(&content.bytes);

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (
                header::HeaderName::from_static("docker-content-digest"),
                content.digest.into_string(),
            ),
            (header::CONTENT_LENGTH, content.bytes.len().to_string()),
        ],
        content.bytes,
    )
        .into_response())
}

pub async fn put(
    State(state): State<AppState>,
    Path((owner, repository, reference)): Path<(String, String, String)>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let repo = repo_name(&owner, &repository)?;
    let digest = state.store().put_manifest(&repo, &reference, &body).await?;

    let subject = crate::store::manifest_subject(&body);
    let mut extra_headers = Vec::new();
    if let Some(subject_digest) = &subject {
        if let Err(e) = state.store().update_referrers(&repo, &body).await {
            tracing::warn!(error = %e, repo, "failed to update referrer index");
        }
        extra_headers.push((
            header::HeaderName::from_static("oci-subject"),
            subject_digest.clone(),
        ));
    }

    let mut response = (
        StatusCode::CREATED,
        [
            (
                header::LOCATION,
                format!("/v2/{owner}/{repository}/manifests/{reference}"),
            ),
            (
                header::HeaderName::from_static("docker-content-digest"),
                digest.into_string(),
            ),
        ],
    )
        .into_response();

    for (name, value) in extra_headers {
        if let Ok(value) = header::HeaderValue::from_str(&value) {
            response.headers_mut().insert(name, value);
        }
    }

    Ok(response)
}

pub async fn delete(
    State(state): State<AppState>,
    Path((owner, repository, reference)): Path<(String, String, String)>,
) -> Result<StatusCode, ApiError> {
    let repo = repo_name(&owner, &repository)?;

    if Digest::looks_like_digest(&reference) {
        if let Ok(content) = state.store().get_manifest(&repo, &reference).await {
            if let Some(subject_digest) = crate::store::manifest_subject(&content.bytes) {
                if let Ok(subject) = Digest::parse(&subject_digest) {
                    if let Err(e) = state
                        .store()
                        .remove_referrer(&repo, &subject, &content.digest)
                        .await
                    {
                        tracing::warn!(error = %e, repo, "failed to remove referrer entry");
                    }
                }
            }
        }
    }

    state.store().delete_manifest(&repo, &reference).await?;
    Ok(StatusCode::ACCEPTED)
}
