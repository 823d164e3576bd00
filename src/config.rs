//! Environment-driven configuration (spec.md §6).
//!
//! Variable names use `__` as the nesting separator, matching the original
//! service's `koanf` env provider — reproduced here with plain
//! `std::env::var` calls since our surface is small enough not to need a
//! generic config-file layer.

use std::time::Duration;

use anyhow::{bail, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    None,
    Htpasswd,
    Jwt,
}

#[derive(Debug, Clone)]
pub struct HtpasswdConfig {
    pub file: Option<String>,
    pub contents: Option<String>,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub jwks_url: String,
    pub issuer: String,
    pub audience: String,
    pub cache_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub store_path: String,
    pub log_level: String,
    pub auth_mode: AuthMode,
    pub htpasswd: Option<HtpasswdConfig>,
    pub jwt: Option<JwtConfig>,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

impl Config {
    /// Loads configuration from the environment, applying spec.md's
    /// documented defaults and validating that the variables required by
    /// the selected auth mode are present.
    pub fn from_env() -> Result<Self> {
        let port = env_var("server__port")
            .map(|v| v.parse())
            .transpose()?
            .unwrap_or(3000);

        let store_path = env_var("store__path").unwrap_or_else(|| "data".to_string());
        let log_level = env_var("log__level").unwrap_or_else(|| "info".to_string());

        let auth_mode = match env_var("auth__mode").as_deref() {
            None | Some("none") => AuthMode::None,
            Some("htpasswd") => AuthMode::Htpasswd,
            Some("jwt") => AuthMode::Jwt,
            Some(other) => bail!("unknown auth__mode: {other}"),
        };

        let htpasswd = match auth_mode {
            AuthMode::Htpasswd => {
                let file = env_var("auth__htpasswd__file");
                let contents = env_var("auth__htpasswd__contents");
                if file.is_none() && contents.is_none() {
                    bail!("auth__mode=htpasswd requires auth__htpasswd__file or auth__htpasswd__contents");
                }
                Some(HtpasswdConfig { file, contents })
            }
            _ => None,
        };

        let jwt = match auth_mode {
            AuthMode::Jwt => {
                let jwks_url = env_var("auth__jwt__jwks_url")
                    .ok_or_else(|| anyhow::anyhow!("auth__mode=jwt requires auth__jwt__jwks_url"))?;
                let issuer = env_var("auth__jwt__issuer")
                    .ok_or_else(|| anyhow::anyhow!("auth__mode=jwt requires auth__jwt__issuer"))?;
                let audience = env_var("auth__jwt__audience")
                    .ok_or_else(|| anyhow::anyhow!("auth__mode=jwt requires auth__jwt__audience"))?;
                let cache_ttl = env_var("auth__jwt__cache_ttl")
                    .map(|v| v.parse())
                    .transpose()?
                    .unwrap_or(300u64);
                Some(JwtConfig {
                    jwks_url,
                    issuer,
                    audience,
                    cache_ttl: Duration::from_secs(cache_ttl),
                })
            }
            _ => None,
        };

        Ok(Self {
            port,
            store_path,
            log_level,
            auth_mode,
            htpasswd,
            jwt,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            "server__port",
            "store__path",
            "log__level",
            "auth__mode",
            "auth__htpasswd__file",
            "auth__htpasswd__contents",
            "auth__jwt__jwks_url",
            "auth__jwt__issuer",
            "auth__jwt__audience",
            "auth__jwt__cache_ttl",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn defaults_apply_with_no_env() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        let config = Config::from_env().unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.store_path, "data");
        assert_eq!(config.auth_mode, AuthMode::None);
        clear_env();
    }

    #[test]
    fn htpasswd_mode_requires_credentials_source() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("auth__mode", "htpasswd");
        assert!(Config::from_env().is_err());
        clear_env();
    }
}
