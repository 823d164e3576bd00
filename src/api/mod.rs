//! C5: the request router and its middleware stack (spec.md §4.5).
//!
//! Outermost first: request-id tagging, tracing, panic recovery, then auth —
//! applied only to the `/v2/{owner}/{repository}/*` subtree. `GET /v2/`
//! (discovery) and the operational endpoints are reachable without it.

pub mod error;
pub mod request_context;
mod v2;

use axum::extract::{Request, State};
use axum::http::{header, HeaderValue};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId as TowerRequestId, SetRequestIdLayer,
};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

const BANNER: &str = include_str!("../../banner.txt");

#[derive(Clone, Copy)]
struct MakeUuidRequestId;

impl MakeRequestId for MakeUuidRequestId {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<TowerRequestId> {
        let id = uuid::Uuid::new_v4().to_string();
        let value = HeaderValue::from_str(&id).ok()?;
        Some(TowerRequestId::new(value))
    }
}

/// Creates the full router and attaches application state.
pub fn create_router(state: AppState) -> Router {
    let request_id_header = header::HeaderName::from_static("x-request-id");
    let set_request_id = SetRequestIdLayer::new(request_id_header.clone(), MakeUuidRequestId);
    let propagate_request_id = PropagateRequestIdLayer::new(request_id_header);

    let guarded_repo_routes = v2::repo_router()
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_gate));

    Router::new()
        .route("/", get(banner))
        .route("/healthz", get(healthz))
        .route("/v2/", get(v2::discovery))
        .nest("/v2/{owner}/{repository}", guarded_repo_routes)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(propagate_request_id)
        .layer(set_request_id)
        .with_state(state)
}

async fn banner() -> &'static str {
    BANNER
}

async fn healthz() -> &'static str {
    "."
}

/// Authenticates the request and stashes the resulting `Principal` as a
/// request extension for `RequestContext` to pick up downstream. On failure,
/// short-circuits with the OCI error body and, for basic-auth, the
/// `WWW-Authenticate` challenge (spec.md §4.4).
async fn auth_gate(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    match state.auth().authenticate(request.headers()).await {
        Ok(principal) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(err) => {
            let mut api_err: error::ApiError = err.into();
            if let Some(challenge) = state.auth().www_authenticate_challenge() {
                api_err = api_err.with_www_authenticate(challenge);
            }
            api_err.into_response()
        }
    }
}
