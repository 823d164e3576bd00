//! Blob endpoints and the chunked-upload handshake (spec.md §4.3, §6).

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt as _;
use serde::Deserialize;
use tokio_util::io::ReaderStream;

use super::repo_name;
use crate::api::error::ApiError;
use crate::digest::Digest;
use crate::error::RegistryError;
use crate::state::AppState;

pub async fn check_exists(
    State(state): State<AppState>,
    Path((owner, repository, digest)): Path<(String, String, String)>,
) -> Result<Response, ApiError> {
    let repo = repo_name(&owner, &repository)?;
    let digest = Digest::parse(&digest)?;

    let (exists, size) = state.store().has_blob(&repo, &digest).await?;
    if !exists {
        return Err(RegistryError::blob_unknown("blob not found").into());
    }

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_LENGTH, size.to_string()),
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
    Path((owner, repository, digest)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let repo = repo_name(&owner, &repository)?;
    let digest = Digest::parse(&digest)?;

    if let Some(range) = headers.get(header::RANGE) {
        tracing::warn!(range = ?range, "range header for blob download is not honored");
    }

    let (file, size) = state.store().get_blob(&repo, &digest).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, size.to_string()),
            (
                header::HeaderName::from_static("docker-content-digest"),
                digest.into_string(),
            ),
        ],
        body,
    )
        .into_response())
}

pub async fn delete(
    State(state): State<AppState>,
    Path((owner, repository, digest)): Path<(String, String, String)>,
) -> Result<StatusCode, ApiError> {
    let repo = repo_name(&owner, &repository)?;
    let digest = Digest::parse(&digest)?;
    state.store().delete_blob(&repo, &digest).await?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Default, Deserialize)]
pub struct InitiateQuery {
    #[serde(default)]
    digest: Option<String>,
    #[serde(default)]
    mount: Option<String>,
    #[serde(default)]
    from: Option<String>,
}

/// `POST /blobs/uploads/`: plain session start, monolithic `?digest=` push,
/// or cross-repo `?mount=&from=` (falling back to a new session if the mount
/// fails) — spec.md §4.3.
pub async fn initiate_upload(
    State(state): State<AppState>,
    Path((owner, repository)): Path<(String, String)>,
    Query(query): Query<InitiateQuery>,
    body: Body,
) -> Result<Response, ApiError> {
    let repo = repo_name(&owner, &repository)?;

    if let Some(digest) = query.digest {
        let digest = Digest::parse(&digest)?;
        let reader = tokio_util::io::StreamReader::new(
            body.into_data_stream()
                .map(|r| r.map_err(|e| std::io::Error::other(e))),
        );
        state.store().put_blob(&repo, &digest, reader).await?;

        return Ok((
            StatusCode::CREATED,
            [
                (
                    header::LOCATION,
                    format!("/v2/{owner}/{repository}/blobs/{digest}"),
                ),
                (
                    header::HeaderName::from_static("docker-content-digest"),
                    digest.into_string(),
                ),
            ],
        )
            .into_response());
    }

    if let (Some(digest), Some(from)) = (query.mount, query.from) {
        let digest = Digest::parse(&digest)?;
        match state.store().mount_blob(&from, &repo, &digest).await {
            Ok(()) => {
                return Ok((
                    StatusCode::CREATED,
                    [
                        (
                            header::LOCATION,
                            format!("/v2/{owner}/{repository}/blobs/{digest}"),
                        ),
                        (
                            header::HeaderName::from_static("docker-content-digest"),
                            digest.into_string(),
                        ),
                    ],
                )
                    .into_response());
            }
            Err(_) => {
                return new_session_response(&state, &owner, &repository, &repo).await;
            }
        }
    }

    new_session_response(&state, &owner, &repository, &repo).await
}

async fn new_session_response(
    state: &AppState,
    owner: &str,
    repository: &str,
    repo: &str,
) -> Result<Response, ApiError> {
    let session_id = state.uploads().initiate(repo).await?;
    Ok((
        StatusCode::ACCEPTED,
        [
            (
                header::LOCATION,
                format!("/v2/{owner}/{repository}/blobs/uploads/{session_id}"),
            ),
            (header::RANGE, "0-0".to_string()),
            (
                header::HeaderName::from_static("oci-chunk-min-length"),
                "1024".to_string(),
            ),
        ],
    )
        .into_response())
}

/// Parses a `Content-Range: <start>-<end>` header, or falls back to the
/// session's current offset when the header is absent (the upstream's
/// forgiving behavior, spec.md §2 recovered feature).
fn parse_content_range(headers: &HeaderMap, current_offset: u64) -> Result<u64, ApiError> {
    let Some(value) = headers.get(header::CONTENT_RANGE) else {
        return Ok(current_offset);
    };
    let value = value.to_str().map_err(|_| {
        RegistryError::new(crate::error::OciErrorCode::BlobUploadInvalid, "invalid Content-Range")
    })?;
    let (start, _end) = value.split_once('-').ok_or_else(|| {
        RegistryError::new(crate::error::OciErrorCode::BlobUploadInvalid, "invalid Content-Range")
    })?;
    start.parse::<u64>().map_err(|_| {
        RegistryError::new(crate::error::OciErrorCode::BlobUploadInvalid, "invalid Content-Range").into()
    })
}

pub async fn upload_chunk(
    State(state): State<AppState>,
    Path((owner, repository, reference)): Path<(String, String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, ApiError> {
    let _repo = repo_name(&owner, &repository)?;
    let status = state.uploads().status(&reference).await?;
    let start = parse_content_range(&headers, status.offset)?;

    let reader = tokio_util::io::StreamReader::new(
        body.into_data_stream()
            .map(|r| r.map_err(std::io::Error::other)),
    );
    let new_offset = state.uploads().chunk(&reference, reader, start).await?;

    Ok((
        StatusCode::ACCEPTED,
        [
            (
                header::LOCATION,
                format!("/v2/{owner}/{repository}/blobs/uploads/{reference}"),
            ),
            (header::RANGE, format!("0-{}", new_offset.saturating_sub(1))),
        ],
    )
        .into_response())
}

#[derive(Debug, Default, Deserialize)]
pub struct CompleteQuery {
    #[serde(default)]
    digest: Option<String>,
}

pub async fn complete_upload(
    State(state): State<AppState>,
    Path((owner, repository, reference)): Path<(String, String, String)>,
    Query(query): Query<CompleteQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, ApiError> {
    let _repo = repo_name(&owner, &repository)?;
    let digest = query
        .digest
        .ok_or_else(|| RegistryError::digest_invalid("digest parameter missing"))?;
    let digest = Digest::parse(&digest)?;

    let has_body = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(|n| n > 0)
        .unwrap_or(false);

    let trailing = if has_body {
        Some(tokio_util::io::StreamReader::new(
            body.into_data_stream()
                .map(|r| r.map_err(std::io::Error::other)),
        ))
    } else {
        None
    };

    state.uploads().complete(&reference, &digest, trailing).await?;

    Ok((
        StatusCode::CREATED,
        [
            (
                header::LOCATION,
                format!("/v2/{owner}/{repository}/blobs/{digest}"),
            ),
            (
                header::HeaderName::from_static("docker-content-digest"),
                digest.into_string(),
            ),
        ],
    )
        .into_response())
}

pub async fn upload_status(
    State(state): State<AppState>,
    Path((owner, repository, reference)): Path<(String, String, String)>,
) -> Result<Response, ApiError> {
    let _repo = repo_name(&owner, &repository)?;
    let status = state.uploads().status(&reference).await?;

    Ok((
        StatusCode::NO_CONTENT,
        [
            (
                header::LOCATION,
                format!("/v2/{owner}/{repository}/blobs/uploads/{reference}"),
            ),
            (header::RANGE, format!("0-{}", status.offset.saturating_sub(1))),
        ],
    )
        .into_response())
}
