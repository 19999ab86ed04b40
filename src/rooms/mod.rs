mod directory;
mod msg;
mod new;
mod room;
mod ws;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};

use crate::{media, AppState};

pub use directory::{access_code, create_room, get_room, list_rooms, normalize_access_code, resolve_access_code, NewRoom};
pub use msg::serve_media;

/// Routes under `/api/voids`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(room::list))
        .route("/create", post(new::create))
        .route("/code/{code}", get(room::resolve))
        .route("/{uuid}", get(room::room).delete(room::delete_room))
        .route("/{uuid}/messages", get(msg::live).post(msg::send))
        .route("/{uuid}/media", post(msg::upload).layer(DefaultBodyLimit::max(media::VIDEO_LIMIT)))
        .route("/{uuid}/ws", get(ws::room_ws))
}

/// Routes under `/api/messages`.
pub fn message_router() -> Router<AppState> {
    Router::new().route("/{uuid}", delete(msg::delete_message))
}
