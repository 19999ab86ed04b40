//! The relational store the client talks to: voids, their members and their
//! messages, plus an optional push feed of message changes.
//!
//! Two backends ship with the crate. [`SqliteStore`] keeps everything in a
//! local SQLite database and publishes changes in-process; [`RestStore`]
//! speaks to a hosted PostgREST-style API and offers no push feed, so clients
//! of it converge by polling alone.

mod rest;
mod sqlite;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{
    appresult::AppResult,
    db::{Change, MediaKind, Membership, Message, NewMessage, Room},
};

pub use rest::RestStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait Store: Send + Sync {
    /// All voids, newest first.
    async fn list_rooms(&self) -> AppResult<Vec<Room>>;
    async fn insert_room(&self, room: &Room) -> AppResult<Room>;
    async fn get_room(&self, id: Uuid) -> AppResult<Option<Room>>;
    async fn find_room_by_code(&self, access_code: &str) -> AppResult<Option<Room>>;
    async fn delete_room(&self, id: Uuid) -> AppResult<u64>;

    async fn count_members(&self, void_id: Uuid) -> AppResult<i64>;
    async fn find_member_by_nickname(&self, void_id: Uuid, nickname: &str) -> AppResult<Option<Membership>>;
    async fn get_member(&self, id: Uuid) -> AppResult<Option<Membership>>;
    /// Inserts a member. Backends that can enforce the cap and nickname
    /// uniqueness atomically report `RoomFull` / `NicknameTaken` here.
    async fn insert_member(&self, member: &Membership, user_cap: i64) -> AppResult<Membership>;
    async fn delete_members(&self, void_id: Uuid) -> AppResult<u64>;
    async fn bump_media_uploads(&self, member_id: Uuid, kind: MediaKind) -> AppResult<()>;

    /// Messages of a void with `expires_at > now`, ordered by creation then id.
    async fn live_messages(&self, void_id: Uuid, now: OffsetDateTime) -> AppResult<Vec<Message>>;
    async fn get_message(&self, id: Uuid) -> AppResult<Option<Message>>;
    async fn insert_message(&self, message: NewMessage) -> AppResult<Message>;
    async fn replies_to(&self, id: Uuid) -> AppResult<Vec<Message>>;
    async fn delete_message(&self, id: Uuid) -> AppResult<u64>;
    async fn delete_room_messages(&self, void_id: Uuid) -> AppResult<u64>;
    /// Deletes every expired message and returns what was removed.
    async fn delete_expired(&self, now: OffsetDateTime) -> AppResult<Vec<Message>>;

    async fn count_all(&self) -> AppResult<(i64, i64, i64)>;
    /// Deletes every message and returns them, so their media can follow.
    async fn purge_messages(&self) -> AppResult<Vec<Message>>;
    async fn purge_members(&self) -> AppResult<u64>;
    async fn purge_rooms(&self) -> AppResult<u64>;

    /// Subscribes to message changes across all voids, if the backend has a
    /// push feed at all.
    fn subscribe(&self) -> Option<broadcast::Receiver<Change>> {
        None
    }
}
