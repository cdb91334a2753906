//! An [`ObjectStore`] backed by an HTTP blob service.
//!
//! The service lists objects with `GET {api_url}?prefix=…`, which answers
//! `{"blobs": [{"url", "pathname", "uploadedAt", …}]}`, and accepts uploads
//! with `PUT {api_url}/{pathname}`, which answers with the new object's
//! `url` and `pathname` but not its upload time. Uploads keep the exact
//! pathname so later listings by that prefix find them. Listing and
//! uploading need the read-write token; downloads go straight to the
//! object's public URL.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::store::{Error, ObjectInfo, ObjectStore, Result};

const TIMEOUT_SECONDS: u64 = 30;

/// HTTP client for the blob service.
pub struct BlobClient {
    http_client: reqwest::Client,
    api_url: Url,
    token: String,
}

#[derive(Deserialize)]
struct ListResponse {
    #[serde(default)]
    blobs: Vec<ObjectInfo>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PutResponse {
    url: String,
    pathname: String,
    #[serde(default)]
    uploaded_at: Option<DateTime<Utc>>,
}

impl PutResponse {
    /// The service doesn't report when it accepted the upload, so the local
    /// clock stands in.
    fn into_object_info(self, now: DateTime<Utc>) -> ObjectInfo {
        ObjectInfo {
            url: self.url,
            pathname: self.pathname,
            uploaded_at: self.uploaded_at.unwrap_or(now),
        }
    }
}

impl BlobClient {
    pub fn new(api_url: Url, token: String) -> Result<BlobClient> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECONDS))
            .build()?;
        Ok(BlobClient {
            http_client,
            api_url,
            token,
        })
    }

    fn list_url(&self, prefix: &str) -> Url {
        let mut url = self.api_url.clone();
        url.query_pairs_mut().append_pair("prefix", prefix);
        url
    }

    fn put_url(&self, pathname: &str) -> Result<Url> {
        // a trailing slash keeps `join` from replacing the last path segment
        let mut base = self.api_url.clone();
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        Ok(base.join(pathname)?)
    }

    /// Turns a non-success response into an [`Error::Status`].
    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let url = response.url().to_string();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("Unknown error"));
        Err(Error::Status { status, url, body })
    }
}

#[async_trait]
impl ObjectStore for BlobClient {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let url = self.list_url(prefix);
        debug!(%url, "listing blobs");
        let response = self
            .http_client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        let listing: ListResponse = Self::check(response).await?.json().await?;
        Ok(listing.blobs)
    }

    async fn get(&self, object: &ObjectInfo) -> Result<Vec<u8>> {
        debug!(url = %object.url, "downloading blob");
        let response = self.http_client.get(&object.url).send().await?;
        let bytes = Self::check(response).await?.bytes().await?;
        Ok(bytes.to_vec())
    }

    async fn put(&self, pathname: &str, body: Vec<u8>) -> Result<ObjectInfo> {
        let url = self.put_url(pathname)?;
        debug!(%url, bytes = body.len(), "uploading blob");
        let response = self
            .http_client
            .put(url)
            .bearer_auth(&self.token)
            .header(CONTENT_TYPE, "application/json")
            .header("x-access", "public")
            .header("x-content-type", "application/json")
            .header("x-add-random-suffix", "0")
            .header("x-allow-overwrite", "1")
            .body(body)
            .send()
            .await?;
        let uploaded: PutResponse = Self::check(response).await?.json().await?;
        Ok(uploaded.into_object_info(Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(api_url: &str) -> BlobClient {
        BlobClient::new(Url::parse(api_url).unwrap(), "token".to_owned()).unwrap()
    }

    #[test]
    fn test_list_url() {
        let client = client("https://blob.example.com");
        assert_eq!(
            "https://blob.example.com/?prefix=posts.json",
            client.list_url("posts.json").as_str()
        );
    }

    #[test]
    fn test_put_url() -> Result<()> {
        assert_eq!(
            "https://blob.example.com/posts.json",
            client("https://blob.example.com").put_url("posts.json")?.as_str()
        );
        assert_eq!(
            "https://example.com/api/blob/posts.json",
            client("https://example.com/api/blob").put_url("posts.json")?.as_str()
        );
        Ok(())
    }

    #[test]
    fn test_decode_listing() -> serde_json::Result<()> {
        let listing: ListResponse = serde_json::from_str(
            r#"{"blobs": [{
                "url": "https://public.blob.example.com/posts-x1.json",
                "pathname": "posts-x1.json",
                "size": 120,
                "uploadedAt": "2024-05-01T10:00:00.000Z"
            }], "hasMore": false}"#,
        )?;
        assert_eq!(1, listing.blobs.len());
        assert_eq!("posts-x1.json", listing.blobs[0].pathname);
        Ok(())
    }

    #[test]
    fn test_decode_put_response() -> serde_json::Result<()> {
        let uploaded: PutResponse = serde_json::from_str(
            r#"{
                "url": "https://public.blob.example.com/posts.json",
                "downloadUrl": "https://public.blob.example.com/posts.json?download=1",
                "pathname": "posts.json",
                "contentType": "application/json",
                "contentDisposition": "inline; filename=\"posts.json\""
            }"#,
        )?;
        let now = "2024-05-01T10:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let object = uploaded.into_object_info(now);
        assert_eq!("posts.json", object.pathname);
        assert_eq!("https://public.blob.example.com/posts.json", object.url);
        assert_eq!(now, object.uploaded_at);
        Ok(())
    }
}
