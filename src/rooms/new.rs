use std::sync::Arc;

use axum::{debug_handler, extract::State, Json};
use serde::Deserialize;
use tower_sessions::Session;

use crate::{
    appresult::AppResult,
    clock::Clock,
    db::{Room, Visibility, MAX_USER_CAP},
    session::SessionContext,
    store::Store,
    AppState,
};

use super::{create_room, NewRoom};

const DEFAULT_NAME: &str = "New Void";

#[derive(Debug, Deserialize)]
pub(crate) struct CreateRoomQuery {
    name: Option<String>,
    description: Option<String>,
    user_cap: Option<i64>,
    #[serde(default)]
    visibility: Visibility,
}

#[debug_handler(state = AppState)]
pub(crate) async fn create(
    State(store): State<Arc<dyn Store>>,
    State(clock): State<Arc<dyn Clock>>,
    session: Session,
    Json(CreateRoomQuery { name, description, user_cap, visibility }): Json<CreateRoomQuery>,
) -> AppResult<Json<Room>> {
    let ctx = SessionContext::load(&session).await?;
    let new = NewRoom {
        name: name.filter(|name| !name.trim().is_empty()).unwrap_or_else(|| DEFAULT_NAME.to_owned()),
        description,
        user_cap: user_cap.unwrap_or(MAX_USER_CAP),
        visibility,
    };
    let room = create_room(&*store, &*clock, new, Some(ctx.client_id)).await?;
    // the client id is minted on first use
    ctx.save(&session).await?;
    Ok(Json(room))
}
