use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use uuid::Uuid;

use crate::{
    appresult::{AppError, AppResult},
    db::{MediaKind, Membership, Message, NewMessage, Room},
};

use super::Store;

/// Matches every row; PostgREST refuses unfiltered deletes.
const ANY_ROW: &str = "neq.00000000-0000-0000-0000-000000000000";

/// Store backed by a hosted PostgREST-style API (`{url}/rest/v1/{table}`).
///
/// Rows travel as the JSON of [`Room`], [`Membership`] and [`Message`], so
/// the hosted schema has to use the same column names:
///
/// ```sql
/// create table voids (
///     id uuid primary key, name text not null, description text,
///     access_code text not null unique, user_cap int not null,
///     created_at timestamptz not null, created_by uuid,
///     is_private boolean not null default false
/// );
/// create table void_users (
///     id uuid primary key, void_id uuid not null references voids,
///     nickname text not null, avatar_url text not null,
///     joined_at timestamptz not null,
///     media_uploads jsonb not null default '{"images":0,"videos":0}',
///     unique (void_id, nickname)
/// );
/// create table messages (
///     id uuid primary key default gen_random_uuid(),
///     void_id uuid not null references voids, user_id uuid not null,
///     content text not null, media_path text, media_type text,
///     reply_to uuid, client_ref uuid,
///     created_at timestamptz not null, expires_at timestamptz not null
/// );
/// ```
///
/// Older deployments that call the attachment column `media_url` and lack
/// `reply_to`/`client_ref` need those columns added or renamed first.
///
/// The hosted service enforces whatever constraints its schema declares; a
/// unique index on `(void_id, nickname)` surfaces here as `NicknameTaken`.
/// The occupancy cap is only checked by the caller, so two joins racing at
/// the boundary can both land.
#[derive(Clone)]
pub struct RestStore {
    http_client: Client,
    base_url: String,
    api_key: String,
}

pub(crate) fn parse_content_range(value: &str) -> Option<i64> {
    value.rsplit('/').next()?.trim().parse().ok()
}

fn rfc3339(at: OffsetDateTime) -> AppResult<String> {
    at.format(&Rfc3339).map_err(|e| AppError::StoreUnavailable(e.into()))
}

impl RestStore {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_key: api_key.into(),
        }
    }

    fn table(&self, method: reqwest::Method, table: &str) -> RequestBuilder {
        self.http_client
            .request(method, format!("{}/rest/v1/{table}", self.base_url))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn checked(response: Response) -> AppResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(AppError::StoreUnavailable(anyhow::anyhow!("store answered {status}: {body}")))
    }

    async fn fetch<T: DeserializeOwned>(request: RequestBuilder) -> AppResult<Vec<T>> {
        Ok(Self::checked(request.send().await?).await?.json().await?)
    }

    async fn fetch_one<T: DeserializeOwned>(request: RequestBuilder) -> AppResult<Option<T>> {
        Ok(Self::fetch(request).await?.into_iter().next())
    }

    async fn count(&self, table: &str, filter: &[(&str, String)]) -> AppResult<i64> {
        let response = self
            .table(reqwest::Method::HEAD, table)
            .query(&[("select", "id")])
            .query(filter)
            .header("Prefer", "count=exact")
            .send()
            .await?;
        let response = Self::checked(response).await?;
        response
            .headers()
            .get(header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range)
            .ok_or_else(|| AppError::StoreUnavailable(anyhow::anyhow!("store sent no row count for {table}")))
    }

    async fn delete_where(&self, table: &str, filter: &[(&str, String)]) -> AppResult<u64> {
        let deleted: Vec<serde_json::Value> = Self::fetch(
            self.table(reqwest::Method::DELETE, table)
                .query(filter)
                .header("Prefer", "return=representation"),
        )
        .await?;
        Ok(deleted.len() as u64)
    }

    async fn messages_where(&self, filter: &[(&str, String)]) -> AppResult<Vec<Message>> {
        Self::fetch(
            self.table(reqwest::Method::GET, "messages")
                .query(&[("select", "*"), ("order", "created_at.asc,id.asc")])
                .query(filter),
        )
        .await
    }
}

#[async_trait]
impl Store for RestStore {
    async fn list_rooms(&self) -> AppResult<Vec<Room>> {
        Self::fetch(
            self.table(reqwest::Method::GET, "voids")
                .query(&[("select", "*"), ("order", "created_at.desc")]),
        )
        .await
    }

    async fn insert_room(&self, room: &Room) -> AppResult<Room> {
        Self::fetch_one(
            self.table(reqwest::Method::POST, "voids")
                .header("Prefer", "return=representation")
                .json(room),
        )
        .await?
        .ok_or_else(|| AppError::StoreUnavailable(anyhow::anyhow!("store returned no void")))
    }

    async fn get_room(&self, id: Uuid) -> AppResult<Option<Room>> {
        Self::fetch_one(
            self.table(reqwest::Method::GET, "voids")
                .query(&[("select", "*".to_owned()), ("id", format!("eq.{id}"))]),
        )
        .await
    }

    async fn find_room_by_code(&self, access_code: &str) -> AppResult<Option<Room>> {
        Self::fetch_one(
            self.table(reqwest::Method::GET, "voids")
                .query(&[("select", "*".to_owned()), ("access_code", format!("eq.{access_code}"))]),
        )
        .await
    }

    async fn delete_room(&self, id: Uuid) -> AppResult<u64> {
        self.delete_where("voids", &[("id", format!("eq.{id}"))]).await
    }

    async fn count_members(&self, void_id: Uuid) -> AppResult<i64> {
        self.count("void_users", &[("void_id", format!("eq.{void_id}"))]).await
    }

    async fn find_member_by_nickname(&self, void_id: Uuid, nickname: &str) -> AppResult<Option<Membership>> {
        Self::fetch_one(self.table(reqwest::Method::GET, "void_users").query(&[
            ("select", "*".to_owned()),
            ("void_id", format!("eq.{void_id}")),
            ("nickname", format!("eq.{nickname}")),
        ]))
        .await
    }

    async fn get_member(&self, id: Uuid) -> AppResult<Option<Membership>> {
        Self::fetch_one(
            self.table(reqwest::Method::GET, "void_users")
                .query(&[("select", "*".to_owned()), ("id", format!("eq.{id}"))]),
        )
        .await
    }

    async fn insert_member(&self, member: &Membership, _user_cap: i64) -> AppResult<Membership> {
        let response = self
            .table(reqwest::Method::POST, "void_users")
            .header("Prefer", "return=representation")
            .json(member)
            .send()
            .await?;
        if response.status() == StatusCode::CONFLICT {
            return Err(AppError::NicknameTaken(member.nickname.clone()));
        }
        let rows: Vec<Membership> = Self::checked(response).await?.json().await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| AppError::StoreUnavailable(anyhow::anyhow!("store returned no member")))
    }

    async fn delete_members(&self, void_id: Uuid) -> AppResult<u64> {
        self.delete_where("void_users", &[("void_id", format!("eq.{void_id}"))]).await
    }

    async fn bump_media_uploads(&self, member_id: Uuid, kind: MediaKind) -> AppResult<()> {
        // read-modify-write; concurrent uploads by the same member may lose a count
        let member = self.get_member(member_id).await?.ok_or(AppError::NotFound("member"))?;
        let mut uploads = member.media_uploads;
        match kind {
            MediaKind::Image => uploads.images += 1,
            MediaKind::Video => uploads.videos += 1,
        }
        let response = self
            .table(reqwest::Method::PATCH, "void_users")
            .query(&[("id", format!("eq.{member_id}"))])
            .json(&json!({ "media_uploads": uploads }))
            .send()
            .await?;
        Self::checked(response).await?;
        Ok(())
    }

    async fn live_messages(&self, void_id: Uuid, now: OffsetDateTime) -> AppResult<Vec<Message>> {
        self.messages_where(&[
            ("void_id", format!("eq.{void_id}")),
            ("expires_at", format!("gt.{}", rfc3339(now)?)),
        ])
        .await
    }

    async fn get_message(&self, id: Uuid) -> AppResult<Option<Message>> {
        Ok(self.messages_where(&[("id", format!("eq.{id}"))]).await?.into_iter().next())
    }

    async fn insert_message(&self, message: NewMessage) -> AppResult<Message> {
        Self::fetch_one(
            self.table(reqwest::Method::POST, "messages")
                .header("Prefer", "return=representation")
                .json(&message),
        )
        .await?
        .ok_or_else(|| AppError::StoreUnavailable(anyhow::anyhow!("store returned no message")))
    }

    async fn replies_to(&self, id: Uuid) -> AppResult<Vec<Message>> {
        self.messages_where(&[("reply_to", format!("eq.{id}"))]).await
    }

    async fn delete_message(&self, id: Uuid) -> AppResult<u64> {
        self.delete_where("messages", &[("id", format!("eq.{id}"))]).await
    }

    async fn delete_room_messages(&self, void_id: Uuid) -> AppResult<u64> {
        self.delete_where("messages", &[("void_id", format!("eq.{void_id}"))]).await
    }

    async fn delete_expired(&self, now: OffsetDateTime) -> AppResult<Vec<Message>> {
        Self::fetch(
            self.table(reqwest::Method::DELETE, "messages")
                .query(&[("expires_at", format!("lte.{}", rfc3339(now)?))])
                .header("Prefer", "return=representation"),
        )
        .await
    }

    async fn count_all(&self) -> AppResult<(i64, i64, i64)> {
        let voids = self.count("voids", &[]).await?;
        let users = self.count("void_users", &[]).await?;
        let messages = self.count("messages", &[]).await?;
        Ok((voids, users, messages))
    }

    async fn purge_messages(&self) -> AppResult<Vec<Message>> {
        Self::fetch(
            self.table(reqwest::Method::DELETE, "messages")
                .query(&[("id", ANY_ROW)])
                .header("Prefer", "return=representation"),
        )
        .await
    }

    async fn purge_members(&self) -> AppResult<u64> {
        self.delete_where("void_users", &[("id", ANY_ROW.to_owned())]).await
    }

    async fn purge_rooms(&self) -> AppResult<u64> {
        self.delete_where("voids", &[("id", ANY_ROW.to_owned())]).await
    }
}

#[cfg(test)]
mod tests {
    use wiremock::{
        matchers::{header, method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::db::MediaUploads;

    fn member(void_id: Uuid) -> Membership {
        Membership {
            id: Uuid::now_v7(),
            void_id,
            nickname: "alice".to_owned(),
            avatar_url: "https://example.com/a.svg".to_owned(),
            joined_at: OffsetDateTime::now_utc(),
            media_uploads: MediaUploads::default(),
        }
    }

    #[test]
    fn content_range_count() {
        assert_eq!(parse_content_range("0-24/25"), Some(25));
        assert_eq!(parse_content_range("*/0"), Some(0));
        assert_eq!(parse_content_range("garbage"), None);
    }

    #[tokio::test]
    async fn lists_rooms_with_api_key() -> AppResult<()> {
        let server = MockServer::start().await;
        let room = Room {
            id: Uuid::now_v7(),
            name: "Test".to_owned(),
            description: None,
            access_code: "ABC123".to_owned(),
            user_cap: 2,
            created_at: OffsetDateTime::now_utc(),
            created_by: None,
            is_private: false,
        };
        Mock::given(method("GET"))
            .and(path("/rest/v1/voids"))
            .and(query_param("order", "created_at.desc"))
            .and(header("apikey", "public-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(vec![&room]))
            .mount(&server)
            .await;

        let store = RestStore::new(server.uri(), "public-key");
        assert_eq!(store.list_rooms().await?, vec![room]);
        Ok(())
    }

    #[tokio::test]
    async fn conflict_on_join_means_nickname_taken() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/void_users"))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;

        let store = RestStore::new(server.uri(), "k");
        let result = store.insert_member(&member(Uuid::now_v7()), 2).await;
        assert!(matches!(result, Err(AppError::NicknameTaken(_))));
    }

    #[tokio::test]
    async fn counts_members_from_content_range() -> AppResult<()> {
        let server = MockServer::start().await;
        let void_id = Uuid::now_v7();
        Mock::given(method("HEAD"))
            .and(path("/rest/v1/void_users"))
            .and(query_param("void_id", format!("eq.{void_id}")))
            .respond_with(ResponseTemplate::new(200).insert_header("content-range", "0-1/2"))
            .mount(&server)
            .await;

        let store = RestStore::new(server.uri(), "k");
        assert_eq!(store.count_members(void_id).await?, 2);
        Ok(())
    }

    #[tokio::test]
    async fn server_errors_are_store_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let store = RestStore::new(server.uri(), "k");
        let result = store.live_messages(Uuid::now_v7(), OffsetDateTime::now_utc()).await;
        assert!(matches!(result, Err(AppError::StoreUnavailable(_))));
    }
}
