use std::sync::Arc;

use axum::{
    body::Bytes,
    debug_handler,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use tower_sessions::Session;
use uuid::Uuid;

use crate::{
    appresult::{AppError, AppResult},
    clock::Clock,
    config::Config,
    db::Message,
    deletion::{self, Actor},
    media::{self, Attachment, MediaFile},
    members, messages,
    session::SessionContext,
    storage::ObjectStorage,
    store::Store,
    AppState,
};

#[derive(Debug, Deserialize)]
pub(crate) struct SendMessageQuery {
    pub(crate) content: String,
    pub(crate) reply_to: Option<Uuid>,
    pub(crate) client_ref: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UploadQuery {
    filename: Option<String>,
    reply_to: Option<Uuid>,
    client_ref: Option<Uuid>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn live(
    State(store): State<Arc<dyn Store>>,
    State(clock): State<Arc<dyn Clock>>,
    Path(void_id): Path<Uuid>,
) -> AppResult<Json<Vec<Message>>> {
    Ok(Json(messages::live(&*store, &*clock, void_id).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn send(
    State(store): State<Arc<dyn Store>>,
    State(clock): State<Arc<dyn Clock>>,
    State(config): State<Arc<Config>>,
    session: Session,
    Path(void_id): Path<Uuid>,
    Json(SendMessageQuery { content, reply_to, client_ref }): Json<SendMessageQuery>,
) -> AppResult<Json<Message>> {
    let (_, member) = members::require_member(&*store, &session, void_id).await?;
    let ttl = config.settings.message_ttl;
    let message = messages::post(&*store, &*clock, ttl, void_id, member.id, &content, reply_to, client_ref).await?;
    Ok(Json(message))
}

#[debug_handler(state = AppState)]
pub(crate) async fn upload(
    State(state): State<AppState>,
    session: Session,
    Path(void_id): Path<Uuid>,
    Query(UploadQuery { filename, reply_to, client_ref }): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Message>> {
    let (_, member) = members::require_member(&*state.store, &session, void_id).await?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::validation("Missing content type."))?;

    let file = MediaFile { bytes: body.to_vec(), content_type: content_type.to_owned(), filename };
    let attachment = Attachment { void_id, member_id: member.id, reply_to, client_ref };
    let ttl = state.config.settings.message_ttl;
    let message = media::upload(&*state.store, &*state.storage, &*state.clock, ttl, attachment, file).await?;
    Ok(Json(message))
}

#[debug_handler(state = AppState)]
pub(crate) async fn delete_message(
    State(store): State<Arc<dyn Store>>,
    State(storage): State<Arc<dyn ObjectStorage>>,
    session: Session,
    Path(message_id): Path<Uuid>,
) -> AppResult<Json<Vec<Uuid>>> {
    let ctx = SessionContext::load(&session).await?;
    let message = store.get_message(message_id).await?.ok_or(AppError::NotFound("message"))?;
    let actor = Actor::in_void(&ctx, message.void_id);
    Ok(Json(deletion::delete_message(&*store, &*storage, message_id, actor).await?))
}

fn content_type_of(path: &str) -> &'static str {
    let ext = path.rsplit_once('.').map(|(_, ext)| ext).unwrap_or_default();
    match ext {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        _ => "application/octet-stream",
    }
}

/// Serves media kept in a local bucket.
#[debug_handler(state = AppState)]
pub async fn serve_media(
    State(storage): State<Arc<dyn ObjectStorage>>,
    Path(path): Path<String>,
) -> AppResult<Response> {
    let Some(bytes) = storage.download(&path).await? else {
        return Ok((StatusCode::NOT_FOUND, "no such media").into_response());
    };
    Ok(([(header::CONTENT_TYPE, content_type_of(&path))], bytes).into_response())
}
