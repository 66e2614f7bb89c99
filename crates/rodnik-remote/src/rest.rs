//! HTTP binding of the document store contract.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Response, StatusCode};

use rodnik_types::{CreateDocument, Document, DocumentId, UpdateDocument};

use crate::error::StoreError;
use crate::store::DocumentStore;

/// Default request timeout. Saves are small JSON bodies; anything slower
/// than this is better treated as a failure and retried by the autosave.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Document store over REST: `{base_url}/documents/{id}/`.
pub struct RestDocumentStore {
    base_url: String,
    client: reqwest::Client,
}

impl RestDocumentStore {
    /// Build a store client for the given API base URL (no trailing slash
    /// required; one is tolerated).
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");
        Self::with_client(base_url, client)
    }

    /// Use a preconfigured client (custom headers, proxies, timeouts).
    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { base_url, client }
    }

    fn collection_url(&self) -> String {
        format!("{}/documents/", self.base_url)
    }

    fn document_url(&self, id: DocumentId) -> String {
        format!("{}/documents/{}/", self.base_url, id)
    }
}

/// Map a non-success response to a typed error, preserving the body —
/// store error messages are the only diagnostics we get.
async fn ensure_success(resp: Response, id: Option<DocumentId>) -> Result<Response, StoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::NOT_FOUND
        && let Some(id) = id
    {
        return Err(StoreError::NotFound(id));
    }
    let message = resp.text().await.unwrap_or_default();
    Err(StoreError::Http {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl DocumentStore for RestDocumentStore {
    async fn fetch(&self, id: DocumentId) -> Result<Document, StoreError> {
        let resp = self.client.get(self.document_url(id)).send().await?;
        let resp = ensure_success(resp, Some(id)).await?;
        Ok(resp.json().await?)
    }

    async fn create(&self, body: CreateDocument) -> Result<Document, StoreError> {
        let resp = self
            .client
            .post(self.collection_url())
            .json(&body)
            .send()
            .await?;
        let resp = ensure_success(resp, None).await?;
        Ok(resp.json().await?)
    }

    async fn update(&self, id: DocumentId, body: UpdateDocument) -> Result<Document, StoreError> {
        let resp = self
            .client
            .put(self.document_url(id))
            .json(&body)
            .send()
            .await?;
        let resp = ensure_success(resp, Some(id)).await?;
        Ok(resp.json().await?)
    }

    async fn delete(&self, id: DocumentId) -> Result<(), StoreError> {
        let resp = self.client.delete(self.document_url(id)).send().await?;
        ensure_success(resp, Some(id)).await?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
