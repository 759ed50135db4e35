pub mod dirs;
pub mod error;
pub mod handlers;
pub mod reaper;
pub mod reveal;
pub mod server;
pub mod store;

/// Shared application state threaded through axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: store::Store,
    pub reveals: reveal::RevealCoordinator,
}

impl AppState {
    pub fn new(store: store::Store) -> Self {
        Self {
            reveals: reveal::RevealCoordinator::new(store.clone()),
            store,
        }
    }
}

pub use error::StoreError;
pub use server::{resolve_data_dir, router, run, ServerConfig};
