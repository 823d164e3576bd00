//! Basic-auth backed by an htpasswd-style credential file (spec.md §4.4).
//!
//! Supports the standard htpasswd hash families: bcrypt, MD5-apr1,
//! SHA-256/512 crypt (via `pwhash`), and plaintext. The response to a wrong
//! password and to an unknown username must be byte-identical — no
//! user-enumeration side channel (spec.md §8 scenario 6) — so a missing
//! username still runs a dummy verification against a fixed hash before
//! failing, keeping the time and the error message the same either way.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::HeaderMap;
use base64::Engine;

use super::{unauthorized, Principal};
use crate::error::Result;

const GENERIC_FAILURE: &str = "invalid username or password";
// A valid bcrypt hash of a random, never-used password, spent purely to
// burn the same amount of CPU time verifying unknown usernames.
const DUMMY_HASH: &str = "$2b$10$CwTycUXWue0Thq9StjUM0uJ8Lg4sC9K2m5cXI6VHK8gX8uqiW1rxe";

#[derive(Clone)]
pub struct HtpasswdAuth {
    credentials: Arc<HashMap<String, String>>,
}

impl HtpasswdAuth {
    /// Parses `user:hash` lines, skipping blanks and `#`-comments, mirroring
    /// the upstream htpasswd file format.
    pub fn from_contents(contents: &str) -> Result<Self> {
        let mut credentials = HashMap::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((user, hash)) = line.split_once(':') else {
                continue;
            };
            credentials.insert(user.to_string(), hash.to_string());
        }

        tracing::info!(
            auth_type = "htpasswd",
            users = credentials.len(),
            "htpasswd authentication initialized"
        );

        Ok(Self {
            credentials: Arc::new(credentials),
        })
    }

    pub async fn from_file(path: &str) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            crate::error::io_error(crate::error::OciErrorCode::Unauthorized, e)
        })?;
        Self::from_contents(&contents)
    }

    fn verify(&self, username: &str, password: &str) -> bool {
        match self.credentials.get(username) {
            Some(hash) => verify_hash(password, hash),
            None => {
                // Burn the same work as a real lookup so timing doesn't
                // reveal whether the username exists.
                let _ = verify_hash(password, DUMMY_HASH);
                false
            }
        }
    }

    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Principal> {
        let (username, password) = parse_basic_auth(headers).ok_or_else(|| {
            unauthorized(GENERIC_FAILURE)
        })?;

        if self.verify(&username, &password) {
            tracing::info!(username, "user authenticated successfully");
            Ok(Principal::authenticated(username))
        } else {
            tracing::warn!(username, "authentication failed");
            Err(unauthorized(GENERIC_FAILURE))
        }
    }
}

fn parse_basic_auth(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

fn verify_hash(password: &str, hash: &str) -> bool {
    if hash.starts_with('$') {
        pwhash::unix::verify(password, hash)
    } else {
        // Plaintext htpasswd entry.
        constant_time_eq(password.as_bytes(), hash.as_bytes())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plaintext_credentials_round_trip() {
        let auth = HtpasswdAuth::from_contents("alice:hunter2\n").unwrap();
        assert!(auth.verify("alice", "hunter2"));
        assert!(!auth.verify("alice", "wrong"));
    }

    #[tokio::test]
    async fn enumeration_resistance_same_error_message() {
        let auth = HtpasswdAuth::from_contents("alice:hunter2\n").unwrap();

        let mut headers_wrong_pw = HeaderMap::new();
        headers_wrong_pw.insert(
            axum::http::header::AUTHORIZATION,
            format!(
                "Basic {}",
                base64::engine::general_purpose::STANDARD.encode(b"alice:wrongpassword")
            )
            .parse()
            .unwrap(),
        );

        let mut headers_unknown_user = HeaderMap::new();
        headers_unknown_user.insert(
            axum::http::header::AUTHORIZATION,
            format!(
                "Basic {}",
                base64::engine::general_purpose::STANDARD.encode(b"ghost:whatever")
            )
            .parse()
            .unwrap(),
        );

        let err1 = auth.authenticate(&headers_wrong_pw).await.unwrap_err();
        let err2 = auth.authenticate(&headers_unknown_user).await.unwrap_err();
        assert_eq!(err1.message, err2.message);
    }

    #[test]
    fn ignores_comments_and_blank_lines() {
        let auth = HtpasswdAuth::from_contents("# comment\n\nalice:hunter2\n").unwrap();
        assert!(auth.verify("alice", "hunter2"));
    }
}
