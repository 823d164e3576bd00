//! Tag listing with `n`/`last` pagination (spec.md §4.3).

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::repo_name;
use crate::api::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct TagsQuery {
    #[serde(default)]
    n: Option<usize>,
    #[serde(default)]
    last: Option<String>,
}

#[derive(Debug, Serialize)]
struct TagList {
    name: String,
    tags: Vec<String>,
}

pub async fn list(
    State(state): State<AppState>,
    Path((owner, repository)): Path<(String, String)>,
    Query(query): Query<TagsQuery>,
) -> Result<Response, ApiError> {
    let repo = repo_name(&owner, &repository)?;
    let mut tags = state.store().list_tags(&repo).await?;
    tags.sort();

    if let Some(last) = query.last {
        let position = tags.iter().position(|t| *t == last);
        tags = match position {
            Some(idx) => tags.split_off(idx + 1),
            None => Vec::new(),
        };
    }

    if let Some(limit) = query.n {
        tags.truncate(limit);
    }

    Ok((StatusCode::OK, Json(TagList { name: repo, tags })).into_response())
}
