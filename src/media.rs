use uuid::Uuid;

use crate::{
    appresult::{AppError, AppResult},
    clock::Clock,
    db::{MediaKind, Message, NewMessage},
    storage::{self, ObjectStorage},
    store::Store,
};

pub const IMAGE_LIMIT: usize = 2 * 1024 * 1024;
pub const VIDEO_LIMIT: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct MediaFile {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub filename: Option<String>,
}

/// Who posts an attachment and where it goes.
#[derive(Debug, Clone, Copy)]
pub struct Attachment {
    pub void_id: Uuid,
    pub member_id: Uuid,
    pub reply_to: Option<Uuid>,
    pub client_ref: Option<Uuid>,
}

impl Attachment {
    pub fn new(void_id: Uuid, member_id: Uuid) -> Self {
        Self { void_id, member_id, reply_to: None, client_ref: None }
    }
}

pub fn limit(kind: MediaKind) -> usize {
    match kind {
        MediaKind::Image => IMAGE_LIMIT,
        MediaKind::Video => VIDEO_LIMIT,
    }
}

/// Classifies a file and checks it against the size ceiling of its kind.
pub fn check(file: &MediaFile) -> AppResult<MediaKind> {
    let kind = MediaKind::from_content_type(&file.content_type)
        .ok_or_else(|| AppError::validation("Only images and videos can be attached."))?;
    let limit = limit(kind);
    if file.bytes.len() > limit {
        return Err(AppError::PayloadTooLarge { kind, limit });
    }
    Ok(kind)
}

/// Stores `file` and posts a message pointing at it. If the message cannot
/// be created the stored object is removed again before the error is
/// returned.
pub async fn upload(
    store: &dyn Store,
    storage: &dyn ObjectStorage,
    clock: &dyn Clock,
    ttl: time::Duration,
    attachment: Attachment,
    file: MediaFile,
) -> AppResult<Message> {
    let kind = check(&file)?;
    let Attachment { void_id, member_id, reply_to, client_ref } = attachment;

    let path = storage::media_path(void_id, kind, file.filename.as_deref());
    storage.upload(&path, file.bytes, &file.content_type).await?;

    let now = clock.now();
    let created = store
        .insert_message(NewMessage {
            void_id,
            user_id: member_id,
            content: String::new(),
            media_path: Some(path.clone()),
            media_type: Some(kind),
            reply_to,
            client_ref,
            created_at: now,
            expires_at: now + ttl,
        })
        .await;

    let message = match created {
        Ok(message) => message,
        Err(e) => {
            if let Err(cleanup) = storage.remove(std::slice::from_ref(&path)).await {
                tracing::warn!("could not remove orphaned upload {path}: {cleanup}");
            }
            return Err(e);
        }
    };

    if let Err(e) = store.bump_media_uploads(member_id, kind).await {
        tracing::warn!("could not count {kind} upload for {member_id}: {e}");
    }
    tracing::info!("{member_id} attached {kind} {path} in void {void_id}");
    Ok(message)
}

pub fn public_url(storage: &dyn ObjectStorage, path: &str) -> String {
    storage.public_url(path)
}
