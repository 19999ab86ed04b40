//! Object storage for media attachments. Paths are always room-scoped:
//! `{void_id}/{random}.{ext}`.

mod fs;
mod rest;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{appresult::AppResult, db::MediaKind};

pub use fs::FsBucket;
pub use rest::RestBucket;

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> AppResult<()>;
    async fn download(&self, path: &str) -> AppResult<Option<Vec<u8>>>;
    /// Every object path starting with `prefix`; an empty prefix lists the bucket.
    async fn list(&self, prefix: &str) -> AppResult<Vec<String>>;
    async fn remove(&self, paths: &[String]) -> AppResult<()>;
    fn public_url(&self, path: &str) -> String;
}

pub fn room_prefix(void_id: Uuid) -> String {
    format!("{void_id}/")
}

/// A fresh, room-scoped object path for an upload.
pub fn media_path(void_id: Uuid, kind: MediaKind, filename: Option<&str>) -> String {
    let ext = filename
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| match kind {
            MediaKind::Image => "img".to_owned(),
            MediaKind::Video => "vid".to_owned(),
        });
    format!("{}{}.{ext}", room_prefix(void_id), Uuid::new_v4().simple())
}
