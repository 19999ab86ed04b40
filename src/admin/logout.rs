use axum::{debug_handler, Json};
use serde_json::{json, Value};
use tower_sessions::Session;

use crate::{appresult::AppResult, session::SessionContext};

#[debug_handler]
pub async fn logout(session: Session) -> AppResult<Json<Value>> {
    let mut ctx = SessionContext::load(&session).await?;
    ctx.set_admin(false);
    ctx.save(&session).await?;
    Ok(Json(json!({ "admin": false })))
}
