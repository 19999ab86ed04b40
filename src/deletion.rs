use uuid::Uuid;

use crate::{
    appresult::{AppError, AppResult},
    db::{Message, Room},
    session::SessionContext,
    storage::{self, ObjectStorage},
    store::Store,
    AppState,
};

/// Who is asking for a deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub client_id: Uuid,
    /// The actor's membership in the void concerned, if any.
    pub member_id: Option<Uuid>,
}

impl Actor {
    pub fn in_void(session: &SessionContext, void_id: Uuid) -> Self {
        Self {
            client_id: session.client_id,
            member_id: session.membership(void_id).map(|token| token.member_id),
        }
    }

    fn created(&self, room: &Room) -> bool {
        room.created_by == Some(self.client_id)
    }

    fn wrote(&self, message: &Message) -> bool {
        self.member_id == Some(message.user_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeleteScope {
    /// Hide from one view only; the store is not touched.
    Local,
    #[default]
    Authoritative,
}

/// Runs the numbered steps of a room deletion and records how far it got.
struct Steps {
    completed: usize,
}

impl Steps {
    async fn run<T>(&mut self, step: &'static str, op: impl Future<Output = AppResult<T>>) -> AppResult<T> {
        match op.await {
            Ok(value) => {
                self.completed += 1;
                Ok(value)
            }
            Err(e) => {
                tracing::error!("void deletion failed at {step} after {} steps: {e}", self.completed);
                Err(AppError::PartialFailure { step, completed: self.completed, source: Box::new(e) })
            }
        }
    }
}

/// Deletes a void with its messages, memberships and media. Only the creator
/// may do this. The first failing step stops the deletion; what was already
/// removed stays removed.
pub async fn delete_room(
    store: &dyn Store,
    storage: &dyn ObjectStorage,
    void_id: Uuid,
    actor: Actor,
) -> AppResult<()> {
    let room = store.get_room(void_id).await?.ok_or(AppError::NotFound("void"))?;
    if !actor.created(&room) {
        return Err(AppError::NoPermission);
    }

    let mut steps = Steps { completed: 0 };
    let messages = steps.run("messages", store.delete_room_messages(void_id)).await?;
    let members = steps.run("memberships", store.delete_members(void_id)).await?;
    let media = steps
        .run("media", async {
            let paths = storage.list(&storage::room_prefix(void_id)).await?;
            if !paths.is_empty() {
                storage.remove(&paths).await?;
            }
            Ok(paths.len())
        })
        .await?;
    steps.run("void", store.delete_room(void_id)).await?;

    tracing::info!(
        "deleted void {} ({void_id}): {messages} messages, {members} members, {media} media",
        room.name
    );
    Ok(())
}

/// Deletes a message from the store together with the messages replying to
/// it. Replies go first, then the message; media goes with each.
/// Returns the ids removed.
pub async fn delete_message(
    store: &dyn Store,
    storage: &dyn ObjectStorage,
    message_id: Uuid,
    actor: Actor,
) -> AppResult<Vec<Uuid>> {
    let message = store.get_message(message_id).await?.ok_or(AppError::NotFound("message"))?;
    if !actor.wrote(&message) {
        let room = store.get_room(message.void_id).await?;
        if !room.is_some_and(|room| actor.created(&room)) {
            return Err(AppError::NoPermission);
        }
    }

    let mut removed = Vec::new();
    for reply in store.replies_to(message_id).await? {
        remove_one(store, storage, &reply).await?;
        removed.push(reply.id);
    }
    remove_one(store, storage, &message).await?;
    removed.push(message.id);

    tracing::info!("deleted message {message_id} and {} replies", removed.len() - 1);
    Ok(removed)
}

async fn remove_one(store: &dyn Store, storage: &dyn ObjectStorage, message: &Message) -> AppResult<()> {
    store.delete_message(message.id).await?;
    if let Some(path) = &message.media_path {
        storage.remove(std::slice::from_ref(path)).await?;
    }
    Ok(())
}

/// Removes expired messages and their media from the store. Returns how many
/// messages went.
pub async fn purge_expired(
    store: &dyn Store,
    storage: &dyn ObjectStorage,
    now: time::OffsetDateTime,
) -> AppResult<usize> {
    let expired = store.delete_expired(now).await?;
    let paths: Vec<String> = expired.iter().filter_map(|m| m.media_path.clone()).collect();
    if !paths.is_empty() {
        storage.remove(&paths).await?;
    }
    if !expired.is_empty() {
        tracing::debug!("purged {} expired messages, {} media", expired.len(), paths.len());
    }
    Ok(expired.len())
}

/// Deletes expired messages and their media every sweep interval.
pub async fn janitor(state: AppState) {
    let mut interval = tokio::time::interval(state.config.settings.sweep_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if let Err(e) = purge_expired(&*state.store, &*state.storage, state.clock.now()).await {
            tracing::warn!("expired message cleanup failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use time::{Duration, OffsetDateTime};

    use super::*;
    use crate::{
        clock::SystemClock,
        db::{MediaKind, NewMessage, Visibility},
        members,
        storage::FsBucket,
        testing::FlakyStore,
        rooms::{create_room, NewRoom},
    };

    struct Fixture {
        store: FlakyStore,
        bucket: FsBucket,
        _dir: tempfile::TempDir,
        room: Room,
        creator: SessionContext,
        alice: SessionContext,
        bob: SessionContext,
    }

    impl Fixture {
        async fn new() -> AppResult<Self> {
            let dir = tempfile::tempdir()?;
            let store = FlakyStore::new().await?;
            let mut creator = SessionContext::default();
            let mut alice = SessionContext::default();
            let mut bob = SessionContext::default();
            let new = NewRoom { name: "Test".into(), description: None, user_cap: 5, visibility: Visibility::Public };
            let room = create_room(&store, &SystemClock, new, Some(creator.client_id)).await?;
            members::join(&store, &SystemClock, &mut creator, room.id, "host").await?;
            members::join(&store, &SystemClock, &mut alice, room.id, "alice").await?;
            members::join(&store, &SystemClock, &mut bob, room.id, "bob").await?;
            Ok(Self { bucket: FsBucket::new(dir.path(), "http://test"), _dir: dir, store, room, creator, alice, bob })
        }

        fn actor(&self, session: &SessionContext) -> Actor {
            Actor::in_void(session, self.room.id)
        }

        async fn post(&self, by: &SessionContext, content: &str, reply_to: Option<Uuid>, media: bool) -> AppResult<Message> {
            let now = OffsetDateTime::now_utc();
            let media_path = if media {
                let path = storage::media_path(self.room.id, MediaKind::Image, Some("a.png"));
                self.bucket.upload(&path, vec![1, 2, 3], "image/png").await?;
                Some(path)
            } else {
                None
            };
            self.store
                .insert_message(NewMessage {
                    void_id: self.room.id,
                    user_id: self.actor(by).member_id.unwrap_or_default(),
                    content: content.to_owned(),
                    media_type: media_path.as_ref().map(|_| MediaKind::Image),
                    media_path,
                    reply_to,
                    client_ref: None,
                    created_at: now,
                    expires_at: now + Duration::minutes(2),
                })
                .await
        }
    }

    #[tokio::test]
    async fn message_delete_cascades_to_replies_and_media() -> AppResult<()> {
        let f = Fixture::new().await?;
        let root = f.post(&f.alice, "root", None, true).await?;
        let reply = f.post(&f.bob, "reply", Some(root.id), true).await?;
        let other = f.post(&f.bob, "other", None, false).await?;

        let removed = delete_message(&f.store, &f.bucket, root.id, f.actor(&f.alice)).await?;
        assert_eq!(removed, [reply.id, root.id]);

        let left = f.store.live_messages(f.room.id, OffsetDateTime::now_utc()).await?;
        assert_eq!(left, [other]);
        assert!(f.bucket.list("").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn deleting_a_reply_keeps_its_parent() -> AppResult<()> {
        let f = Fixture::new().await?;
        let root = f.post(&f.alice, "root", None, false).await?;
        let reply = f.post(&f.bob, "reply", Some(root.id), false).await?;

        delete_message(&f.store, &f.bucket, reply.id, f.actor(&f.bob)).await?;
        assert!(f.store.get_message(root.id).await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn message_delete_requires_author_or_creator() -> AppResult<()> {
        let f = Fixture::new().await?;
        let first = f.post(&f.alice, "first", None, false).await?;
        let second = f.post(&f.alice, "second", None, false).await?;

        let denied = delete_message(&f.store, &f.bucket, first.id, f.actor(&f.bob)).await;
        assert!(matches!(denied, Err(AppError::NoPermission)));
        delete_message(&f.store, &f.bucket, first.id, f.actor(&f.alice)).await?;
        delete_message(&f.store, &f.bucket, second.id, f.actor(&f.creator)).await?;

        let gone = delete_message(&f.store, &f.bucket, first.id, f.actor(&f.alice)).await;
        assert!(matches!(gone, Err(AppError::NotFound("message"))));
        Ok(())
    }

    #[tokio::test]
    async fn room_delete_is_creator_only_and_complete() -> AppResult<()> {
        let f = Fixture::new().await?;
        f.post(&f.alice, "pic", None, true).await?;

        let denied = delete_room(&f.store, &f.bucket, f.room.id, f.actor(&f.alice)).await;
        assert!(matches!(denied, Err(AppError::NoPermission)));

        delete_room(&f.store, &f.bucket, f.room.id, f.actor(&f.creator)).await?;
        assert_eq!(f.store.get_room(f.room.id).await?, None);
        assert_eq!(f.store.count_members(f.room.id).await?, 0);
        assert!(f.bucket.list(&storage::room_prefix(f.room.id)).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn room_delete_reports_partial_failure() -> AppResult<()> {
        let f = Fixture::new().await?;
        f.post(&f.alice, "hello", None, false).await?;
        f.store.fail("delete_members");

        let result = delete_room(&f.store, &f.bucket, f.room.id, f.actor(&f.creator)).await;
        match result {
            Err(AppError::PartialFailure { step, completed, .. }) => {
                assert_eq!(step, "memberships");
                assert_eq!(completed, 1);
            }
            other => panic!("expected partial failure, got {other:?}"),
        }
        // no rollback: messages are gone, the room is still there
        assert!(f.store.live_messages(f.room.id, OffsetDateTime::now_utc()).await?.is_empty());
        assert!(f.store.get_room(f.room.id).await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn purge_expired_removes_rows_and_media() -> AppResult<()> {
        let f = Fixture::new().await?;
        f.post(&f.alice, "pic", None, true).await?;
        let later = OffsetDateTime::now_utc() + Duration::minutes(3);

        assert_eq!(purge_expired(&f.store, &f.bucket, later).await?, 1);
        assert!(f.bucket.list("").await?.is_empty());
        assert_eq!(purge_expired(&f.store, &f.bucket, later).await?, 0);
        Ok(())
    }
}
