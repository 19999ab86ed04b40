use async_trait::async_trait;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use time::OffsetDateTime;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{
    appresult::{AppError, AppResult},
    db::{from_millis, to_millis, Change, MediaKind, MediaUploads, Membership, Message, NewMessage, Room},
};

use super::Store;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS voids (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT,
        access_code TEXT NOT NULL UNIQUE,
        user_cap INTEGER NOT NULL CHECK (user_cap >= 2),
        created_at INTEGER NOT NULL,
        created_by TEXT,
        is_private INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS void_users (
        id TEXT PRIMARY KEY,
        void_id TEXT NOT NULL,
        nickname TEXT NOT NULL,
        avatar_url TEXT NOT NULL,
        joined_at INTEGER NOT NULL,
        images INTEGER NOT NULL DEFAULT 0,
        videos INTEGER NOT NULL DEFAULT 0,
        UNIQUE (void_id, nickname)
    )",
    "CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        void_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        content TEXT NOT NULL,
        media_path TEXT,
        media_type TEXT,
        reply_to TEXT,
        client_ref TEXT,
        created_at INTEGER NOT NULL,
        expires_at INTEGER NOT NULL,
        CHECK (content <> '' OR media_path IS NOT NULL)
    )",
    "CREATE INDEX IF NOT EXISTS messages_by_void ON messages (void_id, expires_at)",
    "CREATE INDEX IF NOT EXISTS messages_by_reply ON messages (reply_to)",
];

const MESSAGE_COLUMNS: &str =
    "id,void_id,user_id,content,media_path,media_type,reply_to,client_ref,created_at,expires_at";

type RoomRow = (String, String, Option<String>, String, i64, i64, Option<String>, bool);
type MemberRow = (String, String, String, String, i64, i64, i64);
type MessageRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    i64,
    i64,
);

fn uuid(s: &str) -> AppResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| AppError::StoreUnavailable(e.into()))
}

fn opt_uuid(s: Option<String>) -> AppResult<Option<Uuid>> {
    s.as_deref().map(uuid).transpose()
}

fn timestamp(millis: i64) -> AppResult<OffsetDateTime> {
    from_millis(millis).map_err(|e| AppError::StoreUnavailable(e.into()))
}

fn room_from_row((id, name, description, access_code, user_cap, created_at, created_by, is_private): RoomRow) -> AppResult<Room> {
    Ok(Room {
        id: uuid(&id)?,
        name,
        description,
        access_code,
        user_cap,
        created_at: timestamp(created_at)?,
        created_by: opt_uuid(created_by)?,
        is_private,
    })
}

fn member_from_row((id, void_id, nickname, avatar_url, joined_at, images, videos): MemberRow) -> AppResult<Membership> {
    Ok(Membership {
        id: uuid(&id)?,
        void_id: uuid(&void_id)?,
        nickname,
        avatar_url,
        joined_at: timestamp(joined_at)?,
        media_uploads: MediaUploads { images, videos },
    })
}

fn message_from_row(
    (id, void_id, user_id, content, media_path, media_type, reply_to, client_ref, created_at, expires_at): MessageRow,
) -> AppResult<Message> {
    Ok(Message {
        id: uuid(&id)?,
        void_id: uuid(&void_id)?,
        user_id: uuid(&user_id)?,
        content,
        media_path,
        media_type: media_type.as_deref().and_then(MediaKind::parse),
        reply_to: opt_uuid(reply_to)?,
        client_ref: opt_uuid(client_ref)?,
        created_at: timestamp(created_at)?,
        expires_at: timestamp(expires_at)?,
    })
}

/// Store backed by SQLite, publishing message changes on a broadcast channel.
#[derive(Clone)]
pub struct SqliteStore {
    db_pool: SqlitePool,
    tx: broadcast::Sender<Change>,
}

impl SqliteStore {
    pub async fn connect(url: &str) -> AppResult<Self> {
        let db_pool = SqlitePoolOptions::new()
            .max_connections(16)
            .connect(url)
            .await?;
        Self::new(db_pool).await
    }

    /// A private in-memory database. A single connection that never idles
    /// out keeps the data alive for the lifetime of the pool.
    pub async fn memory() -> AppResult<Self> {
        let db_pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::new(db_pool).await
    }

    pub async fn new(db_pool: SqlitePool) -> AppResult<Self> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&db_pool).await?;
        }
        Ok(Self {
            db_pool,
            tx: broadcast::channel(256).0,
        })
    }

    fn publish(&self, change: Change) {
        // no subscribers is fine
        let _ = self.tx.send(change);
    }

    fn publish_deleted(&self, rows: Vec<(String, String)>) -> AppResult<u64> {
        let count = rows.len() as u64;
        for (id, void_id) in rows {
            self.publish(Change::Deleted { id: uuid(&id)?, void_id: uuid(&void_id)? });
        }
        Ok(count)
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn list_rooms(&self) -> AppResult<Vec<Room>> {
        sqlx::query_as::<_, RoomRow>(
            "SELECT id,name,description,access_code,user_cap,created_at,created_by,is_private
             FROM voids ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&self.db_pool)
        .await?
        .into_iter()
        .map(room_from_row)
        .collect()
    }

    async fn insert_room(&self, room: &Room) -> AppResult<Room> {
        sqlx::query(
            "INSERT INTO voids (id,name,description,access_code,user_cap,created_at,created_by,is_private)
             VALUES (?,?,?,?,?,?,?,?)",
        )
        .bind(room.id.to_string())
        .bind(&room.name)
        .bind(&room.description)
        .bind(&room.access_code)
        .bind(room.user_cap)
        .bind(to_millis(room.created_at))
        .bind(room.created_by.as_ref().map(Uuid::to_string))
        .bind(room.is_private)
        .execute(&self.db_pool)
        .await?;
        self.get_room(room.id).await?.ok_or(AppError::NotFound("void"))
    }

    async fn get_room(&self, id: Uuid) -> AppResult<Option<Room>> {
        sqlx::query_as::<_, RoomRow>(
            "SELECT id,name,description,access_code,user_cap,created_at,created_by,is_private
             FROM voids WHERE id=?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.db_pool)
        .await?
        .map(room_from_row)
        .transpose()
    }

    async fn find_room_by_code(&self, access_code: &str) -> AppResult<Option<Room>> {
        sqlx::query_as::<_, RoomRow>(
            "SELECT id,name,description,access_code,user_cap,created_at,created_by,is_private
             FROM voids WHERE access_code=?",
        )
        .bind(access_code)
        .fetch_optional(&self.db_pool)
        .await?
        .map(room_from_row)
        .transpose()
    }

    async fn delete_room(&self, id: Uuid) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM voids WHERE id=?")
            .bind(id.to_string())
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn count_members(&self, void_id: Uuid) -> AppResult<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM void_users WHERE void_id=?")
            .bind(void_id.to_string())
            .fetch_one(&self.db_pool)
            .await?;
        Ok(count)
    }

    async fn find_member_by_nickname(&self, void_id: Uuid, nickname: &str) -> AppResult<Option<Membership>> {
        sqlx::query_as::<_, MemberRow>(
            "SELECT id,void_id,nickname,avatar_url,joined_at,images,videos
             FROM void_users WHERE void_id=? AND nickname=?",
        )
        .bind(void_id.to_string())
        .bind(nickname)
        .fetch_optional(&self.db_pool)
        .await?
        .map(member_from_row)
        .transpose()
    }

    async fn get_member(&self, id: Uuid) -> AppResult<Option<Membership>> {
        sqlx::query_as::<_, MemberRow>(
            "SELECT id,void_id,nickname,avatar_url,joined_at,images,videos FROM void_users WHERE id=?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.db_pool)
        .await?
        .map(member_from_row)
        .transpose()
    }

    async fn insert_member(&self, member: &Membership, user_cap: i64) -> AppResult<Membership> {
        let result = sqlx::query(
            "INSERT INTO void_users (id,void_id,nickname,avatar_url,joined_at,images,videos)
             SELECT ?,?,?,?,?,?,?
             WHERE (SELECT COUNT(*) FROM void_users WHERE void_id=?) < ?",
        )
        .bind(member.id.to_string())
        .bind(member.void_id.to_string())
        .bind(&member.nickname)
        .bind(&member.avatar_url)
        .bind(to_millis(member.joined_at))
        .bind(member.media_uploads.images)
        .bind(member.media_uploads.videos)
        .bind(member.void_id.to_string())
        .bind(user_cap)
        .execute(&self.db_pool)
        .await;

        match result {
            Ok(result) if result.rows_affected() == 0 => Err(AppError::RoomFull),
            Ok(_) => self.get_member(member.id).await?.ok_or(AppError::NotFound("member")),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(AppError::NicknameTaken(member.nickname.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_members(&self, void_id: Uuid) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM void_users WHERE void_id=?")
            .bind(void_id.to_string())
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn bump_media_uploads(&self, member_id: Uuid, kind: MediaKind) -> AppResult<()> {
        let query = match kind {
            MediaKind::Image => "UPDATE void_users SET images = images + 1 WHERE id=?",
            MediaKind::Video => "UPDATE void_users SET videos = videos + 1 WHERE id=?",
        };
        sqlx::query(query)
            .bind(member_id.to_string())
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }

    async fn live_messages(&self, void_id: Uuid, now: OffsetDateTime) -> AppResult<Vec<Message>> {
        sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE void_id=? AND expires_at > ?
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(void_id.to_string())
        .bind(to_millis(now))
        .fetch_all(&self.db_pool)
        .await?
        .into_iter()
        .map(message_from_row)
        .collect()
    }

    async fn get_message(&self, id: Uuid) -> AppResult<Option<Message>> {
        sqlx::query_as::<_, MessageRow>(&format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id=?"))
            .bind(id.to_string())
            .fetch_optional(&self.db_pool)
            .await?
            .map(message_from_row)
            .transpose()
    }

    async fn insert_message(&self, message: NewMessage) -> AppResult<Message> {
        let message = message.into_message(Uuid::now_v7());
        sqlx::query(&format!("INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES (?,?,?,?,?,?,?,?,?,?)"))
            .bind(message.id.to_string())
            .bind(message.void_id.to_string())
            .bind(message.user_id.to_string())
            .bind(&message.content)
            .bind(&message.media_path)
            .bind(message.media_type.map(MediaKind::as_str))
            .bind(message.reply_to.as_ref().map(Uuid::to_string))
            .bind(message.client_ref.as_ref().map(Uuid::to_string))
            .bind(to_millis(message.created_at))
            .bind(to_millis(message.expires_at))
            .execute(&self.db_pool)
            .await?;

        // read back so the published record carries the stored precision
        let stored = self.get_message(message.id).await?.ok_or(AppError::NotFound("message"))?;
        self.publish(Change::Inserted { message: stored.clone() });
        Ok(stored)
    }

    async fn replies_to(&self, id: Uuid) -> AppResult<Vec<Message>> {
        sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE reply_to=? ORDER BY created_at ASC, id ASC"
        ))
        .bind(id.to_string())
        .fetch_all(&self.db_pool)
        .await?
        .into_iter()
        .map(message_from_row)
        .collect()
    }

    async fn delete_message(&self, id: Uuid) -> AppResult<u64> {
        let rows: Vec<(String, String)> = sqlx::query_as("DELETE FROM messages WHERE id=? RETURNING id,void_id")
            .bind(id.to_string())
            .fetch_all(&self.db_pool)
            .await?;
        self.publish_deleted(rows)
    }

    async fn delete_room_messages(&self, void_id: Uuid) -> AppResult<u64> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("DELETE FROM messages WHERE void_id=? RETURNING id,void_id")
                .bind(void_id.to_string())
                .fetch_all(&self.db_pool)
                .await?;
        self.publish_deleted(rows)
    }

    async fn delete_expired(&self, now: OffsetDateTime) -> AppResult<Vec<Message>> {
        let expired = sqlx::query_as::<_, MessageRow>(&format!(
            "DELETE FROM messages WHERE expires_at <= ? RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(to_millis(now))
        .fetch_all(&self.db_pool)
        .await?
        .into_iter()
        .map(message_from_row)
        .collect::<AppResult<Vec<_>>>()?;

        for message in &expired {
            self.publish(Change::Deleted { id: message.id, void_id: message.void_id });
        }
        Ok(expired)
    }

    async fn count_all(&self) -> AppResult<(i64, i64, i64)> {
        let counts: (i64, i64, i64) = sqlx::query_as(
            "SELECT (SELECT COUNT(*) FROM voids), (SELECT COUNT(*) FROM void_users), (SELECT COUNT(*) FROM messages)",
        )
        .fetch_one(&self.db_pool)
        .await?;
        Ok(counts)
    }

    async fn purge_messages(&self) -> AppResult<Vec<Message>> {
        let purged = sqlx::query_as::<_, MessageRow>(&format!("DELETE FROM messages RETURNING {MESSAGE_COLUMNS}"))
            .fetch_all(&self.db_pool)
            .await?
            .into_iter()
            .map(message_from_row)
            .collect::<AppResult<Vec<_>>>()?;

        for message in &purged {
            self.publish(Change::Deleted { id: message.id, void_id: message.void_id });
        }
        Ok(purged)
    }

    async fn purge_members(&self) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM void_users").execute(&self.db_pool).await?;
        Ok(result.rows_affected())
    }

    async fn purge_rooms(&self) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM voids").execute(&self.db_pool).await?;
        Ok(result.rows_affected())
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<Change>> {
        Some(self.tx.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;

    fn room(cap: i64) -> Room {
        Room {
            id: Uuid::now_v7(),
            name: "Test".to_owned(),
            description: None,
            access_code: Uuid::new_v4().simple().to_string()[..6].to_uppercase(),
            user_cap: cap,
            created_at: OffsetDateTime::now_utc(),
            created_by: None,
            is_private: false,
        }
    }

    fn member(void_id: Uuid, nickname: &str) -> Membership {
        Membership {
            id: Uuid::now_v7(),
            void_id,
            nickname: nickname.to_owned(),
            avatar_url: String::new(),
            joined_at: OffsetDateTime::now_utc(),
            media_uploads: MediaUploads::default(),
        }
    }

    fn text(void_id: Uuid, user_id: Uuid, content: &str, created_at: OffsetDateTime) -> NewMessage {
        NewMessage {
            void_id,
            user_id,
            content: content.to_owned(),
            media_path: None,
            media_type: None,
            reply_to: None,
            client_ref: None,
            created_at,
            expires_at: created_at + Duration::minutes(2),
        }
    }

    #[tokio::test]
    async fn member_insert_enforces_cap_and_nickname() -> AppResult<()> {
        let store = SqliteStore::memory().await?;
        let void = store.insert_room(&room(2)).await?;

        store.insert_member(&member(void.id, "alice"), void.user_cap).await?;
        let dup = store.insert_member(&member(void.id, "alice"), void.user_cap).await;
        assert!(matches!(dup, Err(AppError::NicknameTaken(ref n)) if n == "alice"));

        store.insert_member(&member(void.id, "bob"), void.user_cap).await?;
        let full = store.insert_member(&member(void.id, "carol"), void.user_cap).await;
        assert!(matches!(full, Err(AppError::RoomFull)));
        assert_eq!(store.count_members(void.id).await?, 2);
        Ok(())
    }

    #[tokio::test]
    async fn live_messages_skip_expired_and_keep_order() -> AppResult<()> {
        let store = SqliteStore::memory().await?;
        let void = store.insert_room(&room(5)).await?;
        let alice = store.insert_member(&member(void.id, "alice"), 5).await?;
        let now = OffsetDateTime::now_utc();

        let old = text(void.id, alice.id, "old", now - Duration::minutes(3));
        let first = text(void.id, alice.id, "first", now - Duration::seconds(2));
        let second = text(void.id, alice.id, "second", now - Duration::seconds(1));
        store.insert_message(second).await?;
        store.insert_message(old).await?;
        store.insert_message(first).await?;

        let live = store.live_messages(void.id, now).await?;
        let contents: Vec<_> = live.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["first", "second"]);

        let expired = store.delete_expired(now).await?;
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].content, "old");
        Ok(())
    }

    #[tokio::test]
    async fn changes_are_published() -> AppResult<()> {
        let store = SqliteStore::memory().await?;
        let mut rx = store.subscribe().expect("sqlite has a feed");
        let void = store.insert_room(&room(5)).await?;
        let message = store
            .insert_message(text(void.id, Uuid::now_v7(), "hi", OffsetDateTime::now_utc()))
            .await?;

        assert_eq!(rx.recv().await.unwrap(), Change::Inserted { message: message.clone() });
        assert_eq!(store.delete_message(message.id).await?, 1);
        assert_eq!(rx.recv().await.unwrap(), Change::Deleted { id: message.id, void_id: void.id });
        Ok(())
    }

    #[tokio::test]
    async fn empty_message_is_rejected_by_schema() -> AppResult<()> {
        let store = SqliteStore::memory().await?;
        let void = store.insert_room(&room(5)).await?;
        let result = store
            .insert_message(text(void.id, Uuid::now_v7(), "", OffsetDateTime::now_utc()))
            .await;
        assert!(matches!(result, Err(AppError::StoreUnavailable(_))));
        Ok(())
    }
}
