use std::{
    io::ErrorKind,
    path::{Component, Path, PathBuf},
};

use async_trait::async_trait;

use crate::appresult::{AppError, AppResult};

use super::ObjectStorage;

/// A bucket kept in a local directory and served by the app under `/media`.
#[derive(Debug, Clone)]
pub struct FsBucket {
    root: PathBuf,
    public_base: String,
}

impl FsBucket {
    pub fn new(root: impl Into<PathBuf>, public_base: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base: public_base.into().trim_end_matches('/').to_owned(),
        }
    }

    fn resolve(&self, path: &str) -> AppResult<PathBuf> {
        let relative = Path::new(path);
        if path.is_empty() || !relative.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(AppError::validation(format!("illegal media path {path:?}")));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStorage for FsBucket {
    async fn upload(&self, path: &str, bytes: Vec<u8>, _content_type: &str) -> AppResult<()> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, bytes).await?;
        Ok(())
    }

    async fn download(&self, path: &str) -> AppResult<Option<Vec<u8>>> {
        match tokio::fs::read(self.resolve(path)?).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> AppResult<Vec<String>> {
        let mut found = Vec::new();
        let mut pending = vec![(self.root.clone(), String::new())];
        while let Some((dir, relative)) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let path = if relative.is_empty() { name } else { format!("{relative}/{name}") };
                if entry.file_type().await?.is_dir() {
                    pending.push((entry.path(), path));
                } else if path.starts_with(prefix) {
                    found.push(path);
                }
            }
        }
        found.sort();
        Ok(found)
    }

    async fn remove(&self, paths: &[String]) -> AppResult<()> {
        for path in paths {
            match tokio::fs::remove_file(self.resolve(path)?).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        format!("{}/media/{path}", self.public_base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_list_remove() -> AppResult<()> {
        let dir = tempfile::tempdir()?;
        let bucket = FsBucket::new(dir.path(), "http://localhost:8080/");

        bucket.upload("a/1.png", vec![1, 2, 3], "image/png").await?;
        bucket.upload("a/2.mp4", vec![4], "video/mp4").await?;
        bucket.upload("b/3.png", vec![5], "image/png").await?;

        assert_eq!(bucket.list("a/").await?, ["a/1.png", "a/2.mp4"]);
        assert_eq!(bucket.list("").await?.len(), 3);
        assert_eq!(bucket.download("a/1.png").await?, Some(vec![1, 2, 3]));

        bucket.remove(&["a/1.png".to_owned(), "a/missing.png".to_owned()]).await?;
        assert_eq!(bucket.list("a/").await?, ["a/2.mp4"]);
        assert_eq!(bucket.download("a/1.png").await?, None);
        assert_eq!(bucket.public_url("b/3.png"), "http://localhost:8080/media/b/3.png");
        Ok(())
    }

    #[tokio::test]
    async fn rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = FsBucket::new(dir.path(), "");
        assert!(matches!(
            bucket.upload("../evil", vec![], "image/png").await,
            Err(AppError::Validation(_))
        ));
        assert!(bucket.download("/etc/passwd").await.is_err());
    }
}
