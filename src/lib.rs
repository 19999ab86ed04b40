pub mod admin;
pub mod appresult;
pub mod clock;
pub mod config;
pub mod db;
pub mod deletion;
pub mod media;
pub mod members;
pub mod messages;
pub mod rooms;
pub mod session;
pub mod storage;
pub mod store;
pub mod sync;
pub mod validators;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use axum::{extract::FromRef, routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_sessions::{cookie::SameSite, Expiry, MemoryStore, SessionManagerLayer};

pub use appresult::{AppError, AppResult};

use clock::Clock;
use config::Config;
use storage::ObjectStorage;
use store::Store;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub storage: Arc<dyn ObjectStorage>,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        storage: Arc<dyn ObjectStorage>,
        clock: Arc<dyn Clock>,
        config: Config,
    ) -> Self {
        Self { store, storage, clock, config: Arc::new(config) }
    }
}

/// Every route of the service with cookie sessions attached.
pub fn app(state: AppState) -> Router {
    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(false)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::days(30)));

    Router::new()
        .nest("/api/voids", rooms::router().merge(members::router()))
        .nest("/api/messages", rooms::message_router())
        .nest("/admin", admin::router())
        .route("/media/{*path}", get(rooms::serve_media))
        .with_state(state)
        .layer(session_layer)
        .layer(CorsLayer::permissive())
}
