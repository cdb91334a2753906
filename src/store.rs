//! The mutable post store: one JSON document holding every ingested
//! [`Post`], kept in a remote object store.
//!
//! The object store can't update an object in place and may briefly hold
//! several objects under the same logical name, so [`MutableStore`] always
//! reads the whole collection from the most recently uploaded object (see
//! [`pick_latest`]) and always writes the whole collection back as a new
//! object. Concurrent writers race; the last write wins.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::post::Post;

/// The pathname the post collection is written under unless configured
/// otherwise.
pub const DEFAULT_PATHNAME: &str = "posts.json";

/// Describes one object in the object store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectInfo {
    /// Where the object's contents can be downloaded from.
    pub url: String,

    /// The object's name within the store.
    pub pathname: String,

    /// When the store accepted the upload.
    pub uploaded_at: DateTime<Utc>,
}

/// The operations [`MutableStore`] needs from an object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Lists every object whose pathname starts with `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>>;

    /// Downloads the contents of an object.
    async fn get(&self, object: &ObjectInfo) -> Result<Vec<u8>>;

    /// Uploads `body` as a new, publicly readable object.
    async fn put(&self, pathname: &str, body: Vec<u8>) -> Result<ObjectInfo>;
}

/// Picks the most recently uploaded object. Ties on the upload time go to the
/// lexically greatest pathname, so the choice doesn't depend on listing
/// order.
pub fn pick_latest(candidates: &[ObjectInfo]) -> Option<&ObjectInfo> {
    candidates
        .iter()
        .max_by(|a, b| {
            a.uploaded_at
                .cmp(&b.uploaded_at)
                .then_with(|| a.pathname.cmp(&b.pathname))
        })
}

/// Reads and writes the post collection. A store without a backend is
/// "unconfigured": reads come back empty and writes fail with
/// [`Error::NotConfigured`].
#[derive(Clone)]
pub struct MutableStore {
    backend: Option<Arc<dyn ObjectStore>>,
    pathname: String,
}

impl MutableStore {
    pub fn new(backend: Arc<dyn ObjectStore>, pathname: impl Into<String>) -> MutableStore {
        MutableStore {
            backend: Some(backend),
            pathname: pathname.into(),
        }
    }

    /// A store with no backend, used when no write credential is configured.
    pub fn unconfigured() -> MutableStore {
        MutableStore {
            backend: None,
            pathname: DEFAULT_PATHNAME.to_owned(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.backend.is_some()
    }

    pub fn pathname(&self) -> &str {
        &self.pathname
    }

    /// Fetches the whole collection. Every failure is logged and reported as
    /// an empty collection; only read paths should use this.
    pub async fn fetch_all(&self) -> Vec<Post> {
        if self.backend.is_none() {
            debug!("post store not configured; skipping fetch");
            return Vec::new();
        }
        match self.try_fetch_all().await {
            Ok(posts) => posts,
            Err(e) => {
                warn!(pathname = %self.pathname, error = %e, "fetching posts from store");
                Vec::new()
            }
        }
    }

    /// Fetches the whole collection, reporting failures. The write path reads
    /// through this so a failed read is never mistaken for an empty store.
    pub(crate) async fn try_fetch_all(&self) -> Result<Vec<Post>> {
        let backend = self.backend.as_ref().ok_or(Error::NotConfigured)?;
        let objects = backend.list(&self.pathname).await?;
        let latest = match pick_latest(&objects) {
            Some(latest) => latest,
            None => {
                debug!(pathname = %self.pathname, "no post collection in store yet");
                return Ok(Vec::new());
            }
        };
        if objects.len() > 1 {
            debug!(
                candidates = objects.len(),
                chosen = %latest.pathname,
                "resolved duplicate post collections by upload time"
            );
        }
        let body = backend.get(latest).await?;
        decode_collection(&body)
    }

    /// Writes `posts` as the new collection. Unlike [`MutableStore::fetch_all`]
    /// this reports failures, since a lost write must be visible to whoever
    /// submitted it.
    pub async fn persist_all(&self, posts: &[Post]) -> Result<ObjectInfo> {
        let backend = self.backend.as_ref().ok_or(Error::NotConfigured)?;
        let body = serde_json::to_vec_pretty(posts)?;
        let object = backend.put(&self.pathname, body).await?;
        info!(pathname = %object.pathname, posts = posts.len(), "persisted post collection");
        Ok(object)
    }
}

/// Decodes a stored collection. Entries that don't decode as a [`Post`] are
/// dropped with a warning so one bad record doesn't hide the rest.
fn decode_collection(body: &[u8]) -> Result<Vec<Post>> {
    let value: serde_json::Value = serde_json::from_slice(body)?;
    let entries = match value {
        serde_json::Value::Array(entries) => entries,
        _ => return Err(Error::NotAnArray),
    };
    Ok(entries
        .into_iter()
        .enumerate()
        .filter_map(|(i, entry)| match serde_json::from_value::<Post>(entry) {
            Ok(post) => Some(post),
            Err(e) => {
                warn!(index = i, error = %e, "skipping undecodable stored post");
                None
            }
        })
        .collect())
}

/// An [`ObjectStore`] held in memory. Each `put` adds a new object, just as
/// the remote store does, so reads exercise [`pick_latest`].
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<Vec<(ObjectInfo, Vec<u8>)>>,
}

impl MemoryObjectStore {
    pub fn new() -> MemoryObjectStore {
        MemoryObjectStore::default()
    }

    /// Stores an object with an explicit upload time.
    pub fn insert(&self, pathname: &str, uploaded_at: DateTime<Utc>, body: Vec<u8>) -> ObjectInfo {
        let mut objects = self.lock();
        let info = ObjectInfo {
            url: format!("memory://{:06}/{}", objects.len(), pathname),
            pathname: format!("{}-{:06}", pathname, objects.len()),
            uploaded_at,
        };
        objects.push((info.clone(), body));
        info
    }

    pub fn object_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(ObjectInfo, Vec<u8>)>> {
        // the guarded data is a plain list; a panic mid-push can't corrupt it
        self.objects.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        Ok(self
            .lock()
            .iter()
            .filter(|(info, _)| info.pathname.starts_with(prefix))
            .map(|(info, _)| info.clone())
            .collect())
    }

    async fn get(&self, object: &ObjectInfo) -> Result<Vec<u8>> {
        self.lock()
            .iter()
            .find(|(info, _)| info.url == object.url)
            .map(|(_, body)| body.clone())
            .ok_or_else(|| Error::Status {
                status: 404,
                url: object.url.clone(),
                body: String::from("object not found"),
            })
    }

    async fn put(&self, pathname: &str, body: Vec<u8>) -> Result<ObjectInfo> {
        Ok(self.insert(pathname, Utc::now(), body))
    }
}

/// Represents the result of a store operation.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents an error talking to the post store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Returned when writing without a configured store credential.
    #[error("post store is not configured: set BLOB_READ_WRITE_TOKEN to enable it")]
    NotConfigured,

    /// Returned when a request to the object store can't be completed.
    #[error("object store request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Returned when the object store answers with a non-success status.
    #[error("object store returned HTTP {status} for {url}: {body}")]
    Status { status: u16, url: String, body: String },

    /// Returned when an object store URL can't be built.
    #[error("invalid object store URL: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Returned when the collection can't be encoded or decoded.
    #[error("post collection is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Returned when the stored document isn't a JSON array.
    #[error("post collection is not a JSON array")]
    NotAnArray,
}
