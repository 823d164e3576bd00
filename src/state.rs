//! Shared application state, cloned cheaply into every handler (mirrors the
//! control-plane's `AppState { inner: Arc<AppStateInner> }` pattern).

use std::sync::Arc;

use crate::auth::AuthMiddleware;
use crate::store::ContentStore;
use crate::upload::UploadCoordinator;

struct AppStateInner {
    store: ContentStore,
    uploads: UploadCoordinator,
    auth: AuthMiddleware,
}

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

impl AppState {
    pub fn new(store: ContentStore, auth: AuthMiddleware) -> Self {
        let uploads = UploadCoordinator::new(store.clone());
        Self {
            inner: Arc::new(AppStateInner {
                store,
                uploads,
                auth,
            }),
        }
    }

    pub fn store(&self) -> &ContentStore {
        &self.inner.store
    }

    pub fn uploads(&self) -> &UploadCoordinator {
        &self.inner.uploads
    }

    pub fn auth(&self) -> &AuthMiddleware {
        &self.inner.auth
    }
}
