mod login;
mod logout;

use std::sync::Arc;

use axum::{
    debug_handler,
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;

use crate::{
    appresult::{AppError, AppResult},
    db::Stats,
    session::SessionContext,
    storage::ObjectStorage,
    store::Store,
    AppState,
};

pub use login::login;
pub use logout::logout;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/stats", get(stats_handler))
        .route("/purge/{target}", post(purge_handler))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PurgeTarget {
    Messages,
    Members,
    /// Voids together with their messages, members and media.
    Voids,
    Media,
    All,
}

pub async fn stats(store: &dyn Store, storage: &dyn ObjectStorage) -> AppResult<Stats> {
    let (voids, users, messages) = store.count_all().await?;
    let media = storage.list("").await?.len() as i64;
    Ok(Stats { voids, users, messages, media })
}

/// Bulk deletion across every void. Returns the number of rows and objects
/// removed. Media never outlives its message: purged messages take their
/// attachments along, and purging voids empties the bucket.
pub async fn purge(store: &dyn Store, storage: &dyn ObjectStorage, target: PurgeTarget) -> AppResult<u64> {
    use PurgeTarget::*;

    let mut removed = 0;
    if matches!(target, Messages | Voids | All) {
        let purged = store.purge_messages().await?;
        let paths: Vec<String> = purged.iter().filter_map(|m| m.media_path.clone()).collect();
        if !paths.is_empty() {
            storage.remove(&paths).await?;
        }
        removed += (purged.len() + paths.len()) as u64;
    }
    if matches!(target, Members | Voids | All) {
        removed += store.purge_members().await?;
    }
    if matches!(target, Voids | All) {
        removed += store.purge_rooms().await?;
    }
    if matches!(target, Voids | Media | All) {
        let paths = storage.list("").await?;
        if !paths.is_empty() {
            storage.remove(&paths).await?;
        }
        removed += paths.len() as u64;
    }
    tracing::warn!("admin purge of {target:?} removed {removed} records");
    Ok(removed)
}

async fn require_admin(session: &Session) -> AppResult<SessionContext> {
    let ctx = SessionContext::load(session).await?;
    if !ctx.is_admin() {
        return Err(AppError::NoPermission);
    }
    Ok(ctx)
}

#[debug_handler(state = AppState)]
async fn stats_handler(
    State(store): State<Arc<dyn Store>>,
    State(storage): State<Arc<dyn ObjectStorage>>,
    session: Session,
) -> AppResult<Json<Stats>> {
    require_admin(&session).await?;
    Ok(Json(stats(&*store, &*storage).await?))
}

#[derive(Serialize)]
struct Purged {
    target: PurgeTarget,
    removed: u64,
}

#[debug_handler(state = AppState)]
async fn purge_handler(
    State(store): State<Arc<dyn Store>>,
    State(storage): State<Arc<dyn ObjectStorage>>,
    session: Session,
    Path(target): Path<PurgeTarget>,
) -> AppResult<Json<Purged>> {
    require_admin(&session).await?;
    let removed = purge(&*store, &*storage, target).await?;
    Ok(Json(Purged { target, removed }))
}
