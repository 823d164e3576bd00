//! Request-scoped context extracted from HTTP requests (spec.md §9: "the
//! authenticated principal ... must travel with the request across
//! handlers").
//!
//! The auth middleware inserts the authenticated `Principal` as a request
//! extension before handing off to the nested router; this extractor reads
//! it back out, defaulting to anonymous for routes the middleware never
//! touches (discovery, health).

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use std::convert::Infallible;

use crate::auth::Principal;

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub principal: Principal,
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let request_id = parts
            .headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let principal = parts
            .extensions
            .get::<Principal>()
            .cloned()
            .unwrap_or_else(Principal::anonymous);

        Ok(Self {
            request_id,
            principal,
        })
    }
}
