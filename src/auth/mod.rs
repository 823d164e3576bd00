//! C4: auth middleware.
//!
//! A single capability — gate a request and produce an authenticated
//! principal — implemented as a tagged variant with one constructor per
//! backend (spec.md §9's design note), rather than a trait object, since the
//! set of backends is closed and known at startup.

pub mod htpasswd;
pub mod jwt;

use axum::http::HeaderMap;

use crate::error::{OciErrorCode, RegistryError, Result};
use htpasswd::HtpasswdAuth;
use jwt::JwtAuth;

/// The authenticated principal, carried in the request context for
/// downstream use (spec.md §4.4).
#[derive(Debug, Clone)]
pub struct Principal {
    pub subject: String,
    pub authenticated: bool,
}

impl Principal {
    pub fn anonymous() -> Self {
        Self {
            subject: "anonymous".to_string(),
            authenticated: false,
        }
    }

    pub fn authenticated(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            authenticated: true,
        }
    }
}

#[derive(Clone)]
pub enum AuthMiddleware {
    None,
    Htpasswd(HtpasswdAuth),
    Jwt(JwtAuth),
}

impl AuthMiddleware {
    /// Validates the request's credentials and returns the authenticated
    /// principal, or an `UNAUTHORIZED` error with the appropriate challenge
    /// metadata attached via `detail` (the HTTP layer reads it back out to
    /// set `WWW-Authenticate`).
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Principal> {
        match self {
            AuthMiddleware::None => Ok(Principal::anonymous()),
            AuthMiddleware::Htpasswd(auth) => auth.authenticate(headers).await,
            AuthMiddleware::Jwt(auth) => auth.authenticate(headers).await,
        }
    }

    /// Basic-auth carries a `WWW-Authenticate: Basic` challenge on failure;
    /// other modes don't.
    pub fn www_authenticate_challenge(&self) -> Option<&'static str> {
        match self {
            AuthMiddleware::Htpasswd(_) => Some(r#"Basic realm="Sorcerer OCI Registry""#),
            _ => None,
        }
    }
}

pub fn unauthorized(message: impl Into<String>) -> RegistryError {
    RegistryError::new(OciErrorCode::Unauthorized, message)
}
