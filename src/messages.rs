use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{
    appresult::{AppError, AppResult},
    clock::Clock,
    db::{Message, NewMessage},
    store::Store,
    validators,
};

/// A text message ready for the store, living `ttl` from `now`.
pub fn compose(
    void_id: Uuid,
    member_id: Uuid,
    content: &str,
    reply_to: Option<Uuid>,
    client_ref: Option<Uuid>,
    now: OffsetDateTime,
    ttl: Duration,
) -> AppResult<NewMessage> {
    let content = content.trim();
    if content.is_empty() {
        return Err(AppError::validation("Message cannot be empty."));
    }
    validators::MESSAGE.run(content)?;

    Ok(NewMessage {
        void_id,
        user_id: member_id,
        content: content.to_owned(),
        media_path: None,
        media_type: None,
        reply_to,
        client_ref,
        created_at: now,
        expires_at: now + ttl,
    })
}

pub async fn post(
    store: &dyn Store,
    clock: &dyn Clock,
    ttl: Duration,
    void_id: Uuid,
    member_id: Uuid,
    content: &str,
    reply_to: Option<Uuid>,
    client_ref: Option<Uuid>,
) -> AppResult<Message> {
    let new = compose(void_id, member_id, content, reply_to, client_ref, clock.now(), ttl)?;
    store.insert_message(new).await
}

pub async fn live(store: &dyn Store, clock: &dyn Clock, void_id: Uuid) -> AppResult<Vec<Message>> {
    store.live_messages(void_id, clock.now()).await
}
