//! Cloud Firestore over the v1 REST API
//!
//! Documents live at
//! `{endpoint}/projects/{project}/databases/(default)/documents/{collection}/{id}`.
//! Set uses `PATCH` without a mask (full overwrite), field deletion uses
//! `PATCH` with `updateMask.fieldPaths` and an empty body, guarded by
//! `currentDocument.exists=true`.
//!
//! Setting `FIRESTORE_EMULATOR_HOST` points the store at a local
//! emulator, which accepts the `owner` token instead of OAuth.

pub mod auth;
mod value;
mod watch;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument};
use url::Url;

use crate::{Document, DocumentStore, Fields, SnapshotWatch, StoreError, StoreResult};

pub use auth::{ServiceAccount, ServiceAccountTokens, StaticToken, TokenSource};
pub use value::field_path;

pub const DEFAULT_ENDPOINT: &str = "https://firestore.googleapis.com/v1";
pub const DEFAULT_DATABASE: &str = "(default)";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const EMULATOR_HOST_ENV: &str = "FIRESTORE_EMULATOR_HOST";

const PAGE_SIZE: &str = "300";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDocument {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
    update_time: Option<DateTime<Utc>>,
}

impl From<RawDocument> for Document {
    fn from(raw: RawDocument) -> Self {
        let id = raw.name.rsplit('/').next().unwrap_or_default().to_string();
        Document {
            id,
            fields: value::decode_fields(&raw.fields),
            update_time: raw.update_time,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    documents: Vec<RawDocument>,
    next_page_token: Option<String>,
}

#[derive(Clone)]
pub struct FirestoreStore {
    http: Client,
    documents_url: Url,
    tokens: Arc<dyn TokenSource>,
    poll_interval: Duration,
}

impl FirestoreStore {
    pub fn new(
        http: Client,
        endpoint: &str,
        project_id: &str,
        tokens: Arc<dyn TokenSource>,
    ) -> StoreResult<Self> {
        let mut documents_url = Url::parse(endpoint)?;
        if documents_url.cannot_be_a_base() {
            return Err(StoreError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase));
        }
        if let Ok(mut segments) = documents_url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["projects", project_id, "databases", DEFAULT_DATABASE, "documents"]);
        }

        Ok(Self {
            http,
            documents_url,
            tokens,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Connect with a service account, or to the emulator if configured
    pub fn from_service_account(account: ServiceAccount) -> StoreResult<Self> {
        let http = Client::new();

        if let Ok(host) = std::env::var(EMULATOR_HOST_ENV) {
            info!(host = %host, project = %account.project_id, "Using Firestore emulator");
            let endpoint = format!("http://{}/v1", host);
            return Self::new(
                http,
                &endpoint,
                &account.project_id,
                Arc::new(StaticToken("owner".to_string())),
            );
        }

        let project_id = account.project_id.clone();
        let tokens = ServiceAccountTokens::new(account, http.clone())?;
        Self::new(http, DEFAULT_ENDPOINT, &project_id, Arc::new(tokens))
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.documents_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.extend(segments);
        }
        url
    }

    async fn send(&self, request: RequestBuilder) -> StoreResult<Response> {
        let token = self.tokens.token().await?;
        Ok(request.bearer_auth(token).send().await?)
    }

    /// Every document of a collection, following page tokens
    pub async fn list_documents(&self, collection: &str) -> StoreResult<Vec<Document>> {
        let mut documents = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = self.url(&[collection]);
            url.query_pairs_mut().append_pair("pageSize", PAGE_SIZE);
            if let Some(token) = &page_token {
                url.query_pairs_mut().append_pair("pageToken", token);
            }

            let response = check(self.send(self.http.get(url)).await?).await?;
            let page: ListResponse = response.json().await?;
            documents.extend(page.documents.into_iter().map(Document::from));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(documents)
    }
}

/// Turn a non-success response into [`StoreError::Api`]
async fn check(response: Response) -> StoreResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or(body);

    Err(StoreError::Api {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    #[instrument(skip(self, fields), fields(field_count = fields.len()))]
    async fn set_document(&self, collection: &str, id: &str, fields: Fields) -> StoreResult<()> {
        let body = json!({ "fields": value::encode_fields(&fields) });
        let request = self.http.patch(self.url(&[collection, id])).json(&body);
        check(self.send(request).await?).await?;
        debug!("Document written");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_document(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        let response = self.send(self.http.get(self.url(&[collection, id]))).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let raw: RawDocument = check(response).await?.json().await?;
        Ok(Some(raw.into()))
    }

    #[instrument(skip(self))]
    async fn delete_field(&self, collection: &str, id: &str, field: &str) -> StoreResult<()> {
        let mut url = self.url(&[collection, id]);
        url.query_pairs_mut()
            .append_pair("updateMask.fieldPaths", &field_path(field))
            .append_pair("currentDocument.exists", "true");

        let response = self
            .send(self.http.patch(url).json(&json!({ "fields": {} })))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }

        check(response).await?;
        debug!("Field deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_document(&self, collection: &str, id: &str) -> StoreResult<()> {
        let response = self
            .send(self.http.delete(self.url(&[collection, id])))
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn watch(&self, collection: &str) -> StoreResult<SnapshotWatch> {
        let (tx, rx) = mpsc::unbounded_channel();
        info!(
            collection,
            interval_ms = self.poll_interval.as_millis() as u64,
            "Watching collection"
        );
        let task = tokio::spawn(watch::poll(self.clone(), collection.to_string(), tx));
        Ok(SnapshotWatch::new(rx, Some(task)))
    }
}
