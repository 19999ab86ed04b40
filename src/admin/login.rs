use std::sync::Arc;

use axum::{debug_handler, extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_sessions::Session;

use crate::{
    appresult::{AppError, AppResult},
    config::Config,
    session::SessionContext,
    AppState,
};

#[derive(Deserialize)]
pub struct Credentials {
    username: String,
    password: String,
}

#[debug_handler(state = AppState)]
pub async fn login(
    State(config): State<Arc<Config>>,
    session: Session,
    Json(Credentials { username, password }): Json<Credentials>,
) -> AppResult<Json<Value>> {
    if username != config.admin_username || password != config.admin_password {
        tracing::warn!("rejected admin login for {username:?}");
        return Err(AppError::NoPermission);
    }

    let mut ctx = SessionContext::load(&session).await?;
    ctx.set_admin(true);
    ctx.save(&session).await?;
    tracing::info!("admin {username} logged in");
    Ok(Json(json!({ "admin": true })))
}
