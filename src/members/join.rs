use std::sync::Arc;

use axum::{
    debug_handler,
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use uuid::Uuid;

use crate::{
    appresult::AppResult,
    clock::Clock,
    db::Membership,
    session::SessionContext,
    store::Store,
    AppState,
};

#[derive(Debug, Deserialize)]
pub(crate) struct JoinQuery {
    nickname: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct Restored {
    /// `None` means the client has to join (again).
    member: Option<Membership>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn join(
    State(store): State<Arc<dyn Store>>,
    State(clock): State<Arc<dyn Clock>>,
    session: Session,
    Path(void_id): Path<Uuid>,
    Json(JoinQuery { nickname }): Json<JoinQuery>,
) -> AppResult<Json<Membership>> {
    let mut ctx = SessionContext::load(&session).await?;
    let member = super::join(&*store, &*clock, &mut ctx, void_id, &nickname).await?;
    ctx.save(&session).await?;
    Ok(Json(member))
}

#[debug_handler(state = AppState)]
pub(crate) async fn restore(
    State(store): State<Arc<dyn Store>>,
    session: Session,
    Path(void_id): Path<Uuid>,
) -> AppResult<Json<Restored>> {
    let mut ctx = SessionContext::load(&session).await?;
    let member = super::restore_session(&*store, &mut ctx, void_id).await?;
    if member.is_none() {
        ctx.save(&session).await?;
    }
    Ok(Json(Restored { member }))
}
