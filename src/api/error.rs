//! OCI Distribution error body (spec.md §6, §7).
//!
//! Every 4xx/5xx response under `/v2/...` carries `{"errors":[{code,message,
//! detail}]}`. `RegistryError` converts into this via `From`, choosing the
//! status code from the OCI error code except for transient I/O failures
//! (marked by `io_error`), which always surface as 500 regardless of the
//! code they carry, per spec.md §7.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::{OciErrorCode, RegistryError};

#[derive(Debug, Serialize)]
pub struct OciError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub errors: Vec<OciError>,
}

/// Wraps a `RegistryError` with the HTTP-layer detail (status code,
/// `WWW-Authenticate` challenge) needed to produce a response.
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
    www_authenticate: Option<&'static str>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: OciErrorCode, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                errors: vec![OciError {
                    code: code.as_str().to_string(),
                    message: message.into(),
                    detail: None,
                }],
            },
            www_authenticate: None,
        }
    }

    pub fn with_www_authenticate(mut self, challenge: &'static str) -> Self {
        self.www_authenticate = Some(challenge);
        self
    }
}

fn status_for(code: OciErrorCode) -> StatusCode {
    match code {
        OciErrorCode::BlobUnknown
        | OciErrorCode::BlobUploadUnknown
        | OciErrorCode::ManifestUnknown
        | OciErrorCode::ManifestBlobUnknown
        | OciErrorCode::NameUnknown => StatusCode::NOT_FOUND,
        OciErrorCode::DigestInvalid
        | OciErrorCode::ManifestInvalid
        | OciErrorCode::NameInvalid
        | OciErrorCode::SizeInvalid
        | OciErrorCode::BlobUploadInvalid
        | OciErrorCode::Unsupported => StatusCode::BAD_REQUEST,
        OciErrorCode::RangeInvalid => StatusCode::RANGE_NOT_SATISFIABLE,
        OciErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        OciErrorCode::Denied => StatusCode::FORBIDDEN,
        OciErrorCode::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        let status = if err.is_io() {
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            status_for(err.code)
        };
        Self {
            status,
            body: ErrorBody {
                errors: vec![OciError {
                    code: err.code.as_str().to_string(),
                    message: err.message,
                    detail: err.detail,
                }],
            },
            www_authenticate: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.body)).into_response();
        if let Some(challenge) = self.www_authenticate {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static(challenge));
        }
        response
    }
}
