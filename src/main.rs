//! sorcerer — a self-contained OCI Distribution v2 container registry.

use anyhow::Result;
use sorcerer::auth::htpasswd::HtpasswdAuth;
use sorcerer::auth::jwt::JwtAuth;
use sorcerer::auth::AuthMiddleware;
use sorcerer::config::{AuthMode, Config};
use sorcerer::state::AppState;
use sorcerer::store::ContentStore;
use sorcerer::{api, config};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting sorcerer registry");
    info!(store_path = %config.store_path, port = config.port, "configuration loaded");

    let auth = build_auth(&config).await?;
    let store = ContentStore::new(config.store_path.clone());
    let state = AppState::new(store, auth);

    let app = api::create_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "listening for connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("sorcerer shutdown complete");
    Ok(())
}

async fn build_auth(config: &config::Config) -> Result<AuthMiddleware> {
    match config.auth_mode {
        AuthMode::None => Ok(AuthMiddleware::None),
        AuthMode::Htpasswd => {
            let htpasswd = config
                .htpasswd
                .as_ref()
                .expect("from_env validated htpasswd config is present");
            let auth = if let Some(path) = &htpasswd.file {
                HtpasswdAuth::from_file(path).await?
            } else {
                HtpasswdAuth::from_contents(
                    htpasswd
                        .contents
                        .as_deref()
                        .expect("from_env validated one of file/contents is present"),
                )?
            };
            Ok(AuthMiddleware::Htpasswd(auth))
        }
        AuthMode::Jwt => {
            let jwt = config
                .jwt
                .as_ref()
                .expect("from_env validated jwt config is present");
            Ok(AuthMiddleware::Jwt(JwtAuth::new(
                jwt.jwks_url.clone(),
                jwt.issuer.clone(),
                jwt.audience.clone(),
                jwt.cache_ttl,
            )))
        }
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("received shutdown signal");
}
