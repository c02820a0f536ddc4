use crate::{config::Config, service::ImageStore};

/// Central application state shared across all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Image store with its catalog, storage backend and type registry.
    pub store: ImageStore,
}

impl AppState {
    pub fn new(store: ImageStore) -> Self {
        Self { store }
    }

    pub fn config(&self) -> &Config {
        self.store.config()
    }
}
