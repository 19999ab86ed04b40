//! Failure injection for unit tests.

use std::{collections::HashSet, sync::Mutex};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

use crate::{
    appresult::{AppError, AppResult},
    db::{Change, MediaKind, Membership, Message, NewMessage, Room},
    store::{SqliteStore, Store},
};

/// An in-memory [`SqliteStore`] whose operations can be made to fail by name
/// and whose message inserts can be held back.
pub struct FlakyStore {
    pub inner: SqliteStore,
    failing: Mutex<HashSet<&'static str>>,
    held: watch::Sender<bool>,
    feed: bool,
}

impl FlakyStore {
    pub async fn new() -> AppResult<Self> {
        Ok(Self {
            inner: SqliteStore::memory().await?,
            failing: Mutex::default(),
            held: watch::channel(false).0,
            feed: true,
        })
    }

    /// Same store, but without a push feed.
    pub async fn polling_only() -> AppResult<Self> {
        Ok(Self { feed: false, ..Self::new().await? })
    }

    pub fn fail(&self, op: &'static str) {
        self.failing.lock().unwrap().insert(op);
    }

    pub fn heal(&self, op: &'static str) {
        self.failing.lock().unwrap().remove(op);
    }

    pub fn hold_inserts(&self, held: bool) {
        self.held.send_replace(held);
    }

    fn check(&self, op: &'static str) -> AppResult<()> {
        if self.failing.lock().unwrap().contains(op) {
            return Err(AppError::StoreUnavailable(anyhow::anyhow!("{op} failed")));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn list_rooms(&self) -> AppResult<Vec<Room>> {
        self.check("list_rooms")?;
        self.inner.list_rooms().await
    }

    async fn insert_room(&self, room: &Room) -> AppResult<Room> {
        self.check("insert_room")?;
        self.inner.insert_room(room).await
    }

    async fn get_room(&self, id: Uuid) -> AppResult<Option<Room>> {
        self.check("get_room")?;
        self.inner.get_room(id).await
    }

    async fn find_room_by_code(&self, access_code: &str) -> AppResult<Option<Room>> {
        self.check("find_room_by_code")?;
        self.inner.find_room_by_code(access_code).await
    }

    async fn delete_room(&self, id: Uuid) -> AppResult<u64> {
        self.check("delete_room")?;
        self.inner.delete_room(id).await
    }

    async fn count_members(&self, void_id: Uuid) -> AppResult<i64> {
        self.check("count_members")?;
        self.inner.count_members(void_id).await
    }

    async fn find_member_by_nickname(&self, void_id: Uuid, nickname: &str) -> AppResult<Option<Membership>> {
        self.check("find_member_by_nickname")?;
        self.inner.find_member_by_nickname(void_id, nickname).await
    }

    async fn get_member(&self, id: Uuid) -> AppResult<Option<Membership>> {
        self.check("get_member")?;
        self.inner.get_member(id).await
    }

    async fn insert_member(&self, member: &Membership, user_cap: i64) -> AppResult<Membership> {
        self.check("insert_member")?;
        self.inner.insert_member(member, user_cap).await
    }

    async fn delete_members(&self, void_id: Uuid) -> AppResult<u64> {
        self.check("delete_members")?;
        self.inner.delete_members(void_id).await
    }

    async fn bump_media_uploads(&self, member_id: Uuid, kind: MediaKind) -> AppResult<()> {
        self.check("bump_media_uploads")?;
        self.inner.bump_media_uploads(member_id, kind).await
    }

    async fn live_messages(&self, void_id: Uuid, now: OffsetDateTime) -> AppResult<Vec<Message>> {
        self.check("live_messages")?;
        self.inner.live_messages(void_id, now).await
    }

    async fn get_message(&self, id: Uuid) -> AppResult<Option<Message>> {
        self.check("get_message")?;
        self.inner.get_message(id).await
    }

    async fn insert_message(&self, message: NewMessage) -> AppResult<Message> {
        let _ = self.held.subscribe().wait_for(|held| !*held).await;
        self.check("insert_message")?;
        self.inner.insert_message(message).await
    }

    async fn replies_to(&self, id: Uuid) -> AppResult<Vec<Message>> {
        self.check("replies_to")?;
        self.inner.replies_to(id).await
    }

    async fn delete_message(&self, id: Uuid) -> AppResult<u64> {
        self.check("delete_message")?;
        self.inner.delete_message(id).await
    }

    async fn delete_room_messages(&self, void_id: Uuid) -> AppResult<u64> {
        self.check("delete_room_messages")?;
        self.inner.delete_room_messages(void_id).await
    }

    async fn delete_expired(&self, now: OffsetDateTime) -> AppResult<Vec<Message>> {
        self.check("delete_expired")?;
        self.inner.delete_expired(now).await
    }

    async fn count_all(&self) -> AppResult<(i64, i64, i64)> {
        self.check("count_all")?;
        self.inner.count_all().await
    }

    async fn purge_messages(&self) -> AppResult<Vec<Message>> {
        self.check("purge_messages")?;
        self.inner.purge_messages().await
    }

    async fn purge_members(&self) -> AppResult<u64> {
        self.check("purge_members")?;
        self.inner.purge_members().await
    }

    async fn purge_rooms(&self) -> AppResult<u64> {
        self.check("purge_rooms")?;
        self.inner.purge_rooms().await
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<Change>> {
        if self.feed { self.inner.subscribe() } else { None }
    }
}
