//! Bearer-JWT auth validated against a remote JWKS (spec.md §4.4).
//!
//! The key set is fetched once at startup and refreshed lazily on a TTL; if
//! a refresh fails after the cache has expired, the last successful key set
//! keeps being used and a warning is logged (spec.md §5: "JWKS fetch uses a
//! 10-second timeout").

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::RwLock;

use super::{unauthorized, Principal};
use crate::error::Result;

const JWKS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const CLOCK_SKEW_TOLERANCE_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct JwkDocument {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kty: String,
    kid: Option<String>,
    #[serde(default)]
    alg: Option<String>,
    n: Option<String>,
    e: Option<String>,
}

struct CachedKeys {
    by_kid: HashMap<String, (DecodingKey, Algorithm)>,
    fetched_at: Instant,
}

struct JwksCache {
    client: reqwest::Client,
    url: String,
    ttl: Duration,
    state: RwLock<Option<CachedKeys>>,
}

impl JwksCache {
    fn new(url: String, ttl: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(JWKS_FETCH_TIMEOUT)
            .build()
            .expect("reqwest client builds with static config");
        Self {
            client,
            url,
            ttl,
            state: RwLock::new(None),
        }
    }

    async fn fetch(&self) -> std::result::Result<CachedKeys, String> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let doc: JwkDocument = resp.json().await.map_err(|e| e.to_string())?;

        let mut by_kid = HashMap::new();
        for jwk in doc.keys {
            if jwk.kty != "RSA" {
                continue;
            }
            let (Some(n), Some(e)) = (jwk.n.as_deref(), jwk.e.as_deref()) else {
                continue;
            };
            let Ok(key) = DecodingKey::from_rsa_components(n, e) else {
                continue;
            };
            let alg = match jwk.alg.as_deref() {
                Some("RS384") => Algorithm::RS384,
                Some("RS512") => Algorithm::RS512,
                _ => Algorithm::RS256,
            };
            if let Some(kid) = jwk.kid.clone() {
                by_kid.insert(kid, (key, alg));
            }
        }

        Ok(CachedKeys {
            by_kid,
            fetched_at: Instant::now(),
        })
    }

    /// Returns the current key set, refreshing if the TTL elapsed. Keeps
    /// serving the last good set if a refresh fails.
    async fn keys(&self) -> Result<Arc<HashMap<String, (DecodingKey, Algorithm)>>> {
        {
            let guard = self.state.read().await;
            if let Some(cached) = guard.as_ref() {
                if cached.fetched_at.elapsed() < self.ttl {
                    return Ok(Arc::new(clone_keys(&cached.by_kid)));
                }
            }
        }

        match self.fetch().await {
            Ok(fresh) => {
                let snapshot = clone_keys(&fresh.by_kid);
                let mut guard = self.state.write().await;
                *guard = Some(fresh);
                Ok(Arc::new(snapshot))
            }
            Err(e) => {
                let guard = self.state.read().await;
                if let Some(cached) = guard.as_ref() {
                    tracing::warn!(error = %e, url = %self.url, "jwks refresh failed, using cached keys");
                    Ok(Arc::new(clone_keys(&cached.by_kid)))
                } else {
                    Err(unauthorized("authorization server unavailable"))
                }
            }
        }
    }
}

fn clone_keys(
    map: &HashMap<String, (DecodingKey, Algorithm)>,
) -> HashMap<String, (DecodingKey, Algorithm)> {
    map.iter().map(|(k, (dk, alg))| (k.clone(), (dk.clone(), *alg))).collect()
}

#[derive(Clone)]
pub struct JwtAuth {
    jwks: Arc<JwksCache>,
    issuer: String,
    audience: String,
}

impl JwtAuth {
    pub fn new(jwks_url: String, issuer: String, audience: String, cache_ttl: Duration) -> Self {
        tracing::info!(issuer = %issuer, audience = %audience, "jwt validator initialized");
        Self {
            jwks: Arc::new(JwksCache::new(jwks_url, cache_ttl)),
            issuer,
            audience,
        }
    }

    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Principal> {
        let token = bearer_token(headers).ok_or_else(|| unauthorized("missing bearer token"))?;

        let header = jsonwebtoken::decode_header(&token)
            .map_err(|_| unauthorized("malformed JWT"))?;
        let kid = header.kid.ok_or_else(|| unauthorized("JWT missing key id"))?;

        let keys = self.jwks.keys().await?;
        let (key, alg) = keys
            .get(&kid)
            .ok_or_else(|| unauthorized("unknown signing key"))?;

        let mut validation = Validation::new(*alg);
        validation.set_audience(&[&self.audience]);
        validation.set_issuer(&[&self.issuer]);
        validation.leeway = CLOCK_SKEW_TOLERANCE_SECS;

        let data = jsonwebtoken::decode::<serde_json::Value>(&token, key, &validation)
            .map_err(|e| {
                tracing::debug!(error = %e, "jwt verification failed");
                unauthorized("invalid or expired JWT token")
            })?;

        let subject = data
            .claims
            .get("sub")
            .and_then(|v| v.as_str())
            .ok_or_else(|| unauthorized("missing subject claim"))?
            .to_string();

        tracing::debug!(sub = %subject, "jwt validated successfully");
        Ok(Principal::authenticated(subject))
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    value.strip_prefix("Bearer ").map(str::to_string)
}
