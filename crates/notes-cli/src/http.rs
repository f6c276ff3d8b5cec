//! Content store client for an HTTP relay in front of a pinning service.
//!
//! The relay exposes two endpoints:
//! - `GET {base}/get?cid=<id>` returns the snapshot bytes (404 if unknown)
//! - `POST {base}/pin` takes the snapshot bytes and returns the new id as a JSON string
//!
//! Failures are reported as-is; nothing here retries.

use async_trait::async_trait;
use notes_sync::content::{ContentError, ContentId, ContentStore, Result};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpContentStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpContentStore {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ContentError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

fn unavailable(e: reqwest::Error) -> ContentError {
    ContentError::Unavailable(e.to_string())
}

#[async_trait]
impl ContentStore for HttpContentStore {
    async fn get(&self, id: &ContentId) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(self.endpoint("get"))
            .query(&[("cid", id.as_str())])
            .send()
            .await
            .map_err(unavailable)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ContentError::NotFound(id.clone()));
        }

        let bytes = response
            .error_for_status()
            .map_err(unavailable)?
            .bytes()
            .await
            .map_err(unavailable)?;
        debug!("Fetched {} ({} bytes) from relay", id, bytes.len());
        Ok(bytes.to_vec())
    }

    async fn put(&self, bytes: Vec<u8>) -> Result<ContentId> {
        let size = bytes.len();
        let id: String = self
            .client
            .post(self.endpoint("pin"))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(bytes)
            .send()
            .await
            .map_err(unavailable)?
            .error_for_status()
            .map_err(unavailable)?
            .json()
            .await
            .map_err(unavailable)?;

        debug!("Pinned {} bytes on relay as {}", size, id);
        Ok(ContentId::new(id))
    }
}
