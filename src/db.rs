use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

pub const MIN_USER_CAP: i64 = 2;
pub const MAX_USER_CAP: i64 = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub access_code: String,
    pub user_cap: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub created_by: Option<Uuid>,
    pub is_private: bool,

    // unique: id
    // unique: access_code
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Private,
    #[default]
    Public,
}

impl Visibility {
    pub fn is_private(self) -> bool {
        self == Visibility::Private
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaUploads {
    pub images: i64,
    pub videos: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub id: Uuid,
    pub void_id: Uuid,
    pub nickname: String,
    pub avatar_url: String,
    #[serde(with = "time::serde::rfc3339")]
    pub joined_at: OffsetDateTime,
    #[serde(default)]
    pub media_uploads: MediaUploads,

    // unique: id
    // unique: void_id, nickname
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn from_content_type(content_type: &str) -> Option<MediaKind> {
        let essence = content_type.split(';').next()?.trim().to_ascii_lowercase();
        if essence.starts_with("image/") {
            Some(MediaKind::Image)
        } else if essence.starts_with("video/") {
            Some(MediaKind::Video)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }

    pub fn parse(s: &str) -> Option<MediaKind> {
        match s {
            "image" => Some(MediaKind::Image),
            "video" => Some(MediaKind::Video),
            _ => None,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub void_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub media_path: Option<String>,
    pub media_type: Option<MediaKind>,
    pub reply_to: Option<Uuid>,
    pub client_ref: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,

    // unique: id
}

impl Message {
    pub fn is_live(&self, now: OffsetDateTime) -> bool {
        self.expires_at > now
    }

    /// Creation order, ties broken by id.
    pub fn order_key(&self) -> (OffsetDateTime, Uuid) {
        (self.created_at, self.id)
    }
}

/// A message as handed to the store; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewMessage {
    pub void_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub media_path: Option<String>,
    pub media_type: Option<MediaKind>,
    pub reply_to: Option<Uuid>,
    pub client_ref: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl NewMessage {
    pub fn into_message(self, id: Uuid) -> Message {
        Message {
            id,
            void_id: self.void_id,
            user_id: self.user_id,
            content: self.content,
            media_path: self.media_path,
            media_type: self.media_type,
            reply_to: self.reply_to,
            client_ref: self.client_ref,
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}

/// A row-level change as published on the push feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Change {
    Inserted { message: Message },
    Deleted { id: Uuid, void_id: Uuid },
}

impl Change {
    pub fn void_id(&self) -> Uuid {
        match self {
            Change::Inserted { message } => message.void_id,
            Change::Deleted { void_id, .. } => *void_id,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub voids: i64,
    pub users: i64,
    pub messages: i64,
    pub media: i64,
}

pub(crate) fn to_millis(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

pub(crate) fn from_millis(millis: i64) -> Result<OffsetDateTime, time::error::ComponentRange> {
    OffsetDateTime::from_unix_timestamp_nanos(millis as i128 * 1_000_000)
}
