use axum::{
    debug_handler,
    extract::{ws::Message as WsMessage, Path, State, WebSocketUpgrade},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tower_sessions::Session;
use uuid::Uuid;

use crate::{appresult::{AppError, AppResult}, members, messages, AppState};

use super::msg::SendMessageQuery;

/// Frames the server sends besides feed changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum Notice {
    /// A message sent over the socket was not stored.
    Error {
        code: &'static str,
        error: String,
        client_ref: Option<Uuid>,
    },
    /// The feed skipped changes; the client should reload the void.
    Lagged { missed: u64 },
}

impl Notice {
    fn failed(e: &AppError, client_ref: Option<Uuid>) -> Self {
        Notice::Error { code: e.error_code(), error: e.to_string(), client_ref }
    }
}

/// Push feed of one void: every insert and delete as JSON. Members may also
/// send text messages over the socket; a send that fails comes back as an
/// error frame.
#[debug_handler(state = AppState)]
pub(crate) async fn room_ws(
    State(state): State<AppState>,
    session: Session,
    Path(void_id): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> AppResult<impl IntoResponse> {
    let (_, member) = members::require_member(&*state.store, &session, void_id).await?;
    let member_id = member.id;
    let Some(mut rx) = state.store.subscribe() else {
        return Err(AppError::NotFound("push feed"));
    };

    Ok(ws.on_upgrade(move |stream| async move {
        let (mut sender, mut receiver) = stream.split();
        let (notify, mut notices) = mpsc::unbounded_channel::<Notice>();

        let mut feed_task = tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    change = rx.recv() => match change {
                        Ok(change) if change.void_id() == void_id => serde_json::to_string(&change),
                        Ok(_) => continue,
                        Err(RecvError::Lagged(missed)) => {
                            tracing::warn!("ws feed for void {void_id} skipped {missed} changes");
                            serde_json::to_string(&Notice::Lagged { missed })
                        }
                        Err(RecvError::Closed) => break,
                    },
                    Some(notice) = notices.recv() => serde_json::to_string(&notice),
                };
                let Ok(json) = frame else {
                    continue;
                };
                if sender.send(WsMessage::Text(json.into())).await.is_err() {
                    break;
                }
            }
        });

        let ttl = state.config.settings.message_ttl;
        let mut recv_task = tokio::spawn(async move {
            while let Some(Ok(msg)) = receiver.next().await {
                match msg {
                    WsMessage::Close(_) => break,
                    WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
                    _ => {}
                }
                let query: SendMessageQuery = match serde_json::from_slice(&msg.into_data()) {
                    Ok(query) => query,
                    Err(e) => {
                        let _ = notify.send(Notice::failed(&AppError::validation(format!("malformed message: {e}")), None));
                        continue;
                    }
                };
                let SendMessageQuery { content, reply_to, client_ref } = query;
                let sent = messages::post(&*state.store, &*state.clock, ttl, void_id, member_id, &content, reply_to, client_ref).await;
                if let Err(e) = sent {
                    tracing::warn!("ws send by {member_id} failed: {e}");
                    let _ = notify.send(Notice::failed(&e, client_ref));
                }
            }
        });

        tokio::select! {
            _ = &mut feed_task => recv_task.abort(),
            _ = &mut recv_task => feed_task.abort(),
        };
        tracing::debug!("ws for {member_id} in void {void_id} closed");
    }))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn failed_send_becomes_error_frame() -> AppResult<()> {
        let client_ref = Uuid::now_v7();
        let notice = Notice::failed(&AppError::validation("Message cannot be empty."), Some(client_ref));
        assert_eq!(
            serde_json::to_value(&notice)?,
            json!({
                "event": "error",
                "code": "VALIDATION",
                "error": "Message cannot be empty.",
                "client_ref": client_ref,
            })
        );
        assert_eq!(serde_json::to_value(Notice::Lagged { missed: 3 })?, json!({ "event": "lagged", "missed": 3 }));
        Ok(())
    }
}
