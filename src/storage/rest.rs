use async_trait::async_trait;
use reqwest::{header, Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::json;

use crate::appresult::AppResult;

use super::ObjectStorage;

const PAGE: usize = 1000;

/// A bucket on a hosted storage API (`{url}/storage/v1/...`).
#[derive(Clone)]
pub struct RestBucket {
    http_client: Client,
    base_url: String,
    api_key: String,
    bucket: String,
}

#[derive(Deserialize)]
struct ListEntry {
    name: String,
    // folders come back without an id
    id: Option<String>,
}

impl RestBucket {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_key: api_key.into(),
            bucket: bucket.into(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http_client
            .request(method, format!("{}/storage/v1/{path}", self.base_url))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn list_folder(&self, folder: &str) -> AppResult<Vec<ListEntry>> {
        let response = self
            .request(Method::POST, &format!("object/list/{}", self.bucket))
            .json(&json!({ "prefix": folder, "limit": PAGE, "offset": 0 }))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl ObjectStorage for RestBucket {
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> AppResult<()> {
        self.request(Method::POST, &format!("object/{}/{path}", self.bucket))
            .header(header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn download(&self, path: &str) -> AppResult<Option<Vec<u8>>> {
        let response = self
            .request(Method::GET, &format!("object/{}/{path}", self.bucket))
            .send()
            .await?;
        // the storage API reports missing objects as 400 as well as 404
        if matches!(response.status(), StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST) {
            return Ok(None);
        }
        Ok(Some(response.error_for_status()?.bytes().await?.to_vec()))
    }

    async fn list(&self, prefix: &str) -> AppResult<Vec<String>> {
        let mut found = Vec::new();
        let mut folders = vec![prefix.trim_end_matches('/').to_owned()];
        while let Some(folder) = folders.pop() {
            for entry in self.list_folder(&folder).await? {
                let path = if folder.is_empty() { entry.name } else { format!("{folder}/{}", entry.name) };
                if entry.id.is_none() {
                    folders.push(path);
                } else {
                    found.push(path);
                }
            }
        }
        found.sort();
        Ok(found)
    }

    async fn remove(&self, paths: &[String]) -> AppResult<()> {
        if paths.is_empty() {
            return Ok(());
        }
        self.request(Method::DELETE, &format!("object/{}", self.bucket))
            .json(&json!({ "prefixes": paths }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        format!("{}/storage/v1/object/public/{}/{path}", self.base_url, self.bucket)
    }
}
