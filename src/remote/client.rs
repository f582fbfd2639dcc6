use futures::StreamExt;
use reqwest::redirect::Policy;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use super::dto::{
    self, AssignBody, AssignmentDto, CategoryDto, CreateCategoryBody, CreateFeedBody, ErrorBody,
    FeedDto, FetchDto, ItemDto, UpdateCategoryBody,
};
use crate::backend::{
    Backend, BackendError, BackendResult, CategoryPatch, FetchOutcome, ItemQuery, Membership,
};
use crate::model::{
    Assignment, AssignmentId, CategoryId, CategoryRecord, Feed, FeedId, Item, ItemId, NewFeed,
    SourceKind,
};
use crate::util::{check_public_host, validate_source_url};

/// Largest response body the client will buffer.
const MAX_RESPONSE_SIZE: usize = 16 * 1024 * 1024; // 16MB

const MAX_REDIRECTS: usize = 3;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Invalid API base URL: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),
    #[error("Insecure API base URL: HTTPS required (except localhost for testing)")]
    InsecureBaseUrl,
    #[error("Failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// [`Backend`] over the REST service.
///
/// Every request carries the bearer token when one is configured. The token
/// is only exposed while building the `Authorization` header.
pub struct RemoteClient {
    http: reqwest::Client,
    base: Url,
    token: Option<SecretString>,
}

impl std::fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteClient")
            .field("base", &self.base.as_str())
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

fn create_redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("Too many redirects (max 3)");
        }
        tracing::debug!(
            to = %attempt.url(),
            hop = attempt.previous().len() + 1,
            "Following API redirect"
        );
        attempt.follow()
    })
}

impl RemoteClient {
    /// Build a client for `base_url`.
    ///
    /// Plain HTTP is refused unless the host is loopback, so a token is never
    /// sent in the clear to a remote host.
    pub fn new(
        base_url: &str,
        token: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let base = Url::parse(base_url)?;
        match base.scheme() {
            "https" => {}
            "http" if is_loopback(&base) => {
                tracing::warn!(base_url = %base, "Using non-HTTPS API base URL (localhost only)");
            }
            _ => {
                tracing::error!(base_url = %base, "Rejecting non-HTTPS API base URL");
                return Err(ClientError::InsecureBaseUrl);
            }
        }

        let http = reqwest::Client::builder()
            .redirect(create_redirect_policy())
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(timeout)
            .build()?;

        if token.is_none() {
            tracing::debug!("No API token configured; requests are unauthenticated");
        }

        Ok(Self { http, base, token })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        let joined = format!("{}{}", self.base.path().trim_end_matches('/'), path);
        url.set_path(&joined);
        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let request = self.http.request(method, url);
        match &self.token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    /// Send and turn non-success statuses into [`BackendError`]s.
    async fn send(&self, request: RequestBuilder) -> BackendResult<Response> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let detail = match read_limited_bytes(response, MAX_RESPONSE_SIZE).await {
            Ok(bytes) => serde_json::from_slice::<ErrorBody>(&bytes)
                .map(|body| body.message())
                .unwrap_or_else(|_| String::from_utf8_lossy(&bytes).trim().to_owned()),
            Err(_) => String::new(),
        };
        let err = status_error(status, detail);
        tracing::debug!(status = status.as_u16(), error = %err, "API request failed");
        Err(err)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> BackendResult<T> {
        let response = self.send(self.request(Method::GET, url)).await?;
        read_json(response).await
    }

    async fn send_json<T, B>(&self, method: Method, url: Url, body: &B) -> BackendResult<T>
    where
        T: DeserializeOwned,
        B: serde::Serialize + ?Sized,
    {
        let response = self.send(self.request(method, url).json(body)).await?;
        read_json(response).await
    }

    async fn delete(&self, url: Url) -> BackendResult<()> {
        self.send(self.request(Method::DELETE, url)).await?;
        Ok(())
    }
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

fn status_error(status: StatusCode, detail: String) -> BackendError {
    let detail = if detail.is_empty() {
        status.canonical_reason().unwrap_or("no detail").to_owned()
    } else {
        detail
    };
    match status {
        StatusCode::UNAUTHORIZED => BackendError::AuthExpired,
        StatusCode::NOT_FOUND => BackendError::NotFound(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            BackendError::Transient(format!("HTTP {}: {detail}", status.as_u16()))
        }
        s if s.is_server_error() => {
            BackendError::Transient(format!("HTTP {}: {detail}", s.as_u16()))
        }
        s => BackendError::Rejected {
            status: s.as_u16(),
            detail,
        },
    }
}

fn transport_error(err: reqwest::Error) -> BackendError {
    if err.is_decode() {
        BackendError::Decode(err.to_string())
    } else {
        BackendError::Transient(err.to_string())
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> BackendResult<T> {
    let bytes = read_limited_bytes(response, MAX_RESPONSE_SIZE).await?;
    serde_json::from_slice(&bytes).map_err(|e| BackendError::Decode(e.to_string()))
}

async fn read_limited_bytes(response: Response, limit: usize) -> BackendResult<Vec<u8>> {
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(BackendError::Decode(format!(
                "response too large (exceeds {limit} bytes)"
            )));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(transport_error)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(BackendError::Decode(format!(
                "response too large (exceeds {limit} bytes)"
            )));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

/// The service fetches RSS URLs itself, so hosts on the user's own network
/// are refused before the request is sent.
fn check_fetchable(url: &str) -> BackendResult<()> {
    validate_source_url(url)
        .and_then(|parsed| check_public_host(&parsed))
        .map_err(|e| BackendError::Rejected {
            status: StatusCode::UNPROCESSABLE_ENTITY.as_u16(),
            detail: e.to_string(),
        })
}

impl Backend for RemoteClient {
    async fn list_feeds(&self) -> BackendResult<Vec<Feed>> {
        let dtos: Vec<FeedDto> = self.get_json(self.endpoint("/api/feeds")).await?;
        let mut feeds = Vec::with_capacity(dtos.len());
        for dto in dtos {
            match dto.into_feed() {
                Ok(feed) => feeds.push(feed),
                Err(reason) => tracing::warn!(%reason, "Skipping feed with unusable source config"),
            }
        }
        Ok(feeds)
    }

    async fn create_feed(&self, feed: NewFeed) -> BackendResult<Feed> {
        if feed.kind == SourceKind::Rss {
            check_fetchable(feed.url.as_deref().unwrap_or_default())?;
        }
        let dto: FeedDto = self
            .send_json(
                Method::POST,
                self.endpoint("/api/feeds"),
                &CreateFeedBody::from(&feed),
            )
            .await?;
        dto.into_feed().map_err(BackendError::Decode)
    }

    async fn delete_feed(&self, id: FeedId) -> BackendResult<()> {
        self.delete(self.endpoint(&format!("/api/feeds/{id}"))).await
    }

    async fn trigger_fetch(&self, id: FeedId) -> BackendResult<FetchOutcome> {
        let response = self
            .send(self.request(Method::POST, self.endpoint(&format!("/api/feeds/{id}/fetch"))))
            .await?;
        let dto: FetchDto = read_json(response).await?;
        Ok(dto.into())
    }

    async fn list_categories(&self) -> BackendResult<Vec<CategoryRecord>> {
        let forest: Vec<CategoryDto> = self.get_json(self.endpoint("/api/categories")).await?;
        Ok(dto::flatten_forest(forest))
    }

    async fn create_category(
        &self,
        name: String,
        parent: Option<CategoryId>,
    ) -> BackendResult<CategoryRecord> {
        let body = CreateCategoryBody {
            name: &name,
            parent_id: parent.map(CategoryId::get),
        };
        let dto: CategoryDto = self
            .send_json(Method::POST, self.endpoint("/api/categories"), &body)
            .await?;
        Ok(dto.record())
    }

    async fn update_category(
        &self,
        id: CategoryId,
        patch: CategoryPatch,
    ) -> BackendResult<CategoryRecord> {
        let body = UpdateCategoryBody {
            name: patch.name.as_deref(),
            parent_id: patch.parent.map(|parent| parent.map(CategoryId::get)),
        };
        let dto: CategoryDto = self
            .send_json(
                Method::PUT,
                self.endpoint(&format!("/api/categories/{id}")),
                &body,
            )
            .await?;
        Ok(dto.record())
    }

    async fn delete_category(&self, id: CategoryId) -> BackendResult<()> {
        self.delete(self.endpoint(&format!("/api/categories/{id}")))
            .await
    }

    async fn list_items(&self, query: ItemQuery) -> BackendResult<Vec<Item>> {
        let mut url = self.endpoint("/api/items");
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(category) = query.category_id {
                pairs.append_pair("category_id", &category.to_string());
            }
            if let Some(feed) = query.feed_id {
                pairs.append_pair("feed_id", &feed.to_string());
            }
            if query.unread_only {
                pairs.append_pair("unread_only", "true");
            }
            if let Some(since) = query.since {
                pairs.append_pair("since_date", &since.format("%Y-%m-%d").to_string());
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }

        let dtos: Vec<ItemDto> = self.get_json(url).await?;
        Ok(dtos.into_iter().map(Item::from).collect())
    }

    async fn mark_item_read(&self, id: ItemId) -> BackendResult<Item> {
        let response = self
            .send(self.request(
                Method::POST,
                self.endpoint(&format!("/api/items/{id}/mark-read")),
            ))
            .await?;
        let dto: ItemDto = read_json(response).await?;
        Ok(dto.into())
    }

    async fn mark_item_unread(&self, id: ItemId) -> BackendResult<Item> {
        let response = self
            .send(self.request(
                Method::POST,
                self.endpoint(&format!("/api/items/{id}/mark-unread")),
            ))
            .await?;
        let dto: ItemDto = read_json(response).await?;
        Ok(dto.into())
    }

    async fn assign_item_to_category(
        &self,
        category: CategoryId,
        item: ItemId,
    ) -> BackendResult<Assignment> {
        let body = AssignBody {
            category_id: category.get(),
            feed_item_id: item.get(),
        };
        let dto: AssignmentDto = self
            .send_json(Method::POST, self.endpoint("/api/categories/assign"), &body)
            .await?;
        Ok(dto.into())
    }

    async fn remove_assignment(&self, id: AssignmentId) -> BackendResult<()> {
        self.delete(self.endpoint(&format!("/api/categories/assign/{id}")))
            .await
    }

    async fn list_item_categories(&self, item: ItemId) -> BackendResult<Vec<Membership>> {
        let ids: Vec<i64> = self
            .get_json(self.endpoint(&format!("/api/items/{item}/categories")))
            .await?;
        Ok(dto::memberships(ids))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn client(base: &str) -> RemoteClient {
        RemoteClient::new(base, None, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_rejects_plain_http_to_remote_host() {
        let err = RemoteClient::new("http://api.example.com", None, Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, ClientError::InsecureBaseUrl));
        assert!(RemoteClient::new("http://127.0.0.1:8000", None, Duration::from_secs(5)).is_ok());
        assert!(RemoteClient::new("not a url", None, Duration::from_secs(5)).is_err());
    }

    #[test]
    fn test_rss_urls_must_be_fetchable_by_service() {
        assert!(check_fetchable("https://blog.example.com/rss").is_ok());
        for url in ["http://localhost:8080/feed.xml", "http://10.1.2.3/rss", "nope"] {
            assert!(
                matches!(
                    check_fetchable(url),
                    Err(BackendError::Rejected { status: 422, .. })
                ),
                "{url} should be refused"
            );
        }
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let plain = client("https://api.example.com");
        assert_eq!(
            plain.endpoint("/api/feeds").as_str(),
            "https://api.example.com/api/feeds"
        );

        let prefixed = client("https://example.com/sift/");
        assert_eq!(
            prefixed.endpoint("/api/items/4/mark-read").as_str(),
            "https://example.com/sift/api/items/4/mark-read"
        );
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_error(StatusCode::UNAUTHORIZED, "expired".into()),
            BackendError::AuthExpired
        );
        assert_eq!(
            status_error(StatusCode::NOT_FOUND, "Feed not found".into()),
            BackendError::NotFound("Feed not found".into())
        );
        assert_eq!(
            status_error(StatusCode::BAD_REQUEST, String::new()),
            BackendError::Rejected {
                status: 400,
                detail: "Bad Request".into()
            }
        );
        assert!(status_error(StatusCode::BAD_GATEWAY, String::new()).is_transient());
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, String::new()).is_transient());
    }

    #[test]
    fn test_debug_masks_token() {
        let client = RemoteClient::new(
            "https://api.example.com",
            Some(SecretString::from("top-secret-token".to_string())),
            Duration::from_secs(5),
        )
        .unwrap();
        let debug = format!("{client:?}");
        assert!(!debug.contains("top-secret-token"));
        assert!(debug.contains("[REDACTED]"));
    }
}
