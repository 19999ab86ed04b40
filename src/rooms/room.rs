use std::sync::Arc;

use axum::{
    debug_handler,
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use tower_sessions::Session;
use uuid::Uuid;

use crate::{
    appresult::AppResult,
    db::Room,
    deletion::{self, Actor},
    session::SessionContext,
    storage::ObjectStorage,
    store::Store,
    AppState,
};

#[debug_handler(state = AppState)]
pub(crate) async fn list(State(store): State<Arc<dyn Store>>) -> AppResult<Json<Vec<Room>>> {
    Ok(Json(super::list_rooms(&*store).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn room(
    State(store): State<Arc<dyn Store>>,
    Path(void_id): Path<Uuid>,
) -> AppResult<Json<Room>> {
    Ok(Json(super::get_room(&*store, void_id).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn resolve(
    State(store): State<Arc<dyn Store>>,
    Path(code): Path<String>,
) -> AppResult<Json<Value>> {
    let id = super::resolve_access_code(&*store, &code).await?;
    Ok(Json(json!({ "id": id })))
}

#[debug_handler(state = AppState)]
pub(crate) async fn delete_room(
    State(store): State<Arc<dyn Store>>,
    State(storage): State<Arc<dyn ObjectStorage>>,
    session: Session,
    Path(void_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut ctx = SessionContext::load(&session).await?;
    deletion::delete_room(&*store, &*storage, void_id, Actor::in_void(&ctx, void_id)).await?;
    ctx.forget(void_id);
    ctx.save(&session).await?;
    Ok(StatusCode::NO_CONTENT)
}
