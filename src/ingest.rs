//! The write path: authenticated, rate-limited creation of posts in the
//! [`MutableStore`].
//!
//! A request moves through rate check, authentication, body parsing,
//! validation and persistence, in that order; each step can end the request
//! with an [`Error`], and [`Error::status`] says how that surfaces over HTTP.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::post::Post;
use crate::ratelimit::{Decision, RateLimiter};
use crate::store::{self, MutableStore};
use crate::validate::{self, validate};

/// The identifying fields of a created post, as returned to the caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Created {
    pub slug: String,
    pub title: String,
    pub date: String,
    pub published: bool,
}

impl From<&Post> for Created {
    fn from(post: &Post) -> Created {
        Created {
            slug: post.slug.clone(),
            title: post.title.clone(),
            date: post.date.clone(),
            published: post.published,
        }
    }
}

/// Who is asking, as far as the HTTP layer can tell.
#[derive(Clone, Debug, Default)]
pub struct Caller<'a> {
    /// Best-effort client address, used as the rate-limit key.
    pub address: &'a str,

    /// The presented API key, if any.
    pub api_key: Option<&'a str>,
}

/// Creates posts on behalf of API callers.
pub struct Ingestor {
    store: MutableStore,
    limiter: Arc<dyn RateLimiter>,
    api_key: Option<String>,

    /// Serializes read-modify-write cycles within this process. Writers in
    /// other processes still race.
    write_lock: Mutex<()>,
}

impl Ingestor {
    pub fn new(
        store: MutableStore,
        limiter: Arc<dyn RateLimiter>,
        api_key: Option<String>,
    ) -> Ingestor {
        Ingestor {
            store,
            limiter,
            api_key: api_key.filter(|key| !key.is_empty()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Handles one submission end to end.
    pub async fn create_post(&self, caller: &Caller<'_>, body: &[u8]) -> Result<Created> {
        if let Decision::Limited { retry_after } = self.limiter.check(caller.address).await {
            warn!(caller = caller.address, ?retry_after, "rate limited post submission");
            return Err(Error::RateLimited {
                retry_after_secs: retry_after.as_secs().max(1),
            });
        }

        self.authenticate(caller.api_key)?;

        let raw: serde_json::Value = serde_json::from_slice(body).map_err(Error::MalformedBody)?;
        let post = validate(&raw, Utc::now())?.into_post();

        if !self.store.is_configured() {
            return Err(Error::Store(store::Error::NotConfigured));
        }
        let created = Created::from(&post);
        self.supersede(post).await?;
        info!(slug = %created.slug, caller = caller.address, "created post");
        Ok(created)
    }

    fn authenticate(&self, presented: Option<&str>) -> Result<()> {
        let expected = self.api_key.as_deref().ok_or(Error::ApiKeyNotConfigured)?;
        match presented {
            None | Some("") => Err(Error::MissingApiKey),
            Some(key) if key == expected => Ok(()),
            Some(_) => Err(Error::InvalidApiKey),
        }
    }

    /// Replaces any stored post with the same slug and writes the whole
    /// collection back.
    async fn supersede(&self, post: Post) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut posts = self.store.try_fetch_all().await?;
        let before = posts.len();
        posts.retain(|existing| existing.slug != post.slug);
        if posts.len() < before {
            info!(slug = %post.slug, "superseding existing post");
        }
        posts.push(post);
        self.store.persist_all(&posts).await?;
        Ok(())
    }
}

/// Represents the result of an ingestion request.
pub type Result<T> = std::result::Result<T, Error>;

/// Every way an ingestion request can fail.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The caller exceeded its request quota.
    #[error("Too many requests. Please try again in {retry_after_secs} seconds.")]
    RateLimited { retry_after_secs: u64 },

    /// No API key accompanied the request.
    #[error("Unauthorized. Missing API key.")]
    MissingApiKey,

    /// The API key doesn't match the configured secret.
    #[error("Unauthorized. Invalid API key.")]
    InvalidApiKey,

    /// The server has no API key to compare against.
    #[error("Server misconfiguration: BLOG_API_KEY is not set")]
    ApiKeyNotConfigured,

    /// The body isn't JSON.
    #[error("Invalid JSON in request body")]
    MalformedBody(#[source] serde_json::Error),

    /// The submission failed validation.
    #[error(transparent)]
    Validation(#[from] validate::Error),

    /// The store couldn't be written, or isn't configured.
    #[error("Failed to save post")]
    Store(#[from] store::Error),
}

impl Error {
    /// The HTTP status code the error surfaces as.
    pub fn status(&self) -> u16 {
        match self {
            Error::RateLimited { .. } => 429,
            Error::MissingApiKey | Error::InvalidApiKey => 401,
            Error::MalformedBody(_) | Error::Validation(_) => 400,
            Error::ApiKeyNotConfigured | Error::Store(_) => 500,
        }
    }

    /// Extra detail for server-side failures.
    pub fn details(&self) -> Option<String> {
        match self {
            Error::Store(err) => Some(err.to_string()),
            Error::ApiKeyNotConfigured => {
                Some(String::from("Set BLOG_API_KEY to enable the posts API"))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{MemoryRateLimiter, RateLimit};
    use crate::store::{MemoryObjectStore, ObjectInfo, ObjectStore, DEFAULT_PATHNAME};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Wraps a [`MemoryObjectStore`] whose downloads can be made to fail.
    #[derive(Default)]
    struct Unreliable {
        inner: MemoryObjectStore,
        failing: AtomicBool,
    }

    #[async_trait]
    impl ObjectStore for Unreliable {
        async fn list(&self, prefix: &str) -> store::Result<Vec<ObjectInfo>> {
            self.inner.list(prefix).await
        }

        async fn get(&self, object: &ObjectInfo) -> store::Result<Vec<u8>> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(store::Error::Status {
                    status: 503,
                    url: object.url.clone(),
                    body: String::from("unavailable"),
                });
            }
            self.inner.get(object).await
        }

        async fn put(&self, pathname: &str, body: Vec<u8>) -> store::Result<ObjectInfo> {
            self.inner.put(pathname, body).await
        }
    }

    const KEY: &str = "s3cret";

    fn ingestor() -> (MutableStore, Ingestor) {
        let store = MutableStore::new(Arc::new(MemoryObjectStore::new()), DEFAULT_PATHNAME);
        let limiter = Arc::new(MemoryRateLimiter::new(RateLimit::default()));
        let ingestor = Ingestor::new(store.clone(), limiter, Some(KEY.to_owned()));
        (store, ingestor)
    }

    fn caller(api_key: Option<&str>) -> Caller<'_> {
        Caller {
            address: "10.0.0.1",
            api_key,
        }
    }

    #[tokio::test]
    async fn test_create_post() -> Result<()> {
        let (store, ingestor) = ingestor();
        let created = ingestor
            .create_post(&caller(Some(KEY)), br#"{"title": "Hello World", "content": "Hi"}"#)
            .await?;
        assert_eq!("hello-world", created.slug);
        assert_eq!("Hello World", created.title);
        assert!(created.published);

        let stored = store.fetch_all().await;
        assert_eq!(1, stored.len());
        assert_eq!("Hi", stored[0].content);
        Ok(())
    }

    #[tokio::test]
    async fn test_resubmission_supersedes() -> Result<()> {
        let (store, ingestor) = ingestor();
        ingestor
            .create_post(&caller(Some(KEY)), br#"{"title": "Other", "content": "x"}"#)
            .await?;
        ingestor
            .create_post(&caller(Some(KEY)), br#"{"title": "Same", "content": "first"}"#)
            .await?;
        let after_first = store.fetch_all().await.len();
        ingestor
            .create_post(&caller(Some(KEY)), br#"{"title": "Same", "content": "second"}"#)
            .await?;

        let stored = store.fetch_all().await;
        assert_eq!(after_first, stored.len());
        let same: Vec<&Post> = stored.iter().filter(|p| p.slug == "same").collect();
        assert_eq!(1, same.len());
        assert_eq!("second", same[0].content);
        Ok(())
    }

    #[tokio::test]
    async fn test_authentication_errors() {
        let (_, ingestor) = ingestor();
        let body = br#"{"title": "T", "content": "x"}"#;

        let err = ingestor.create_post(&caller(None), body).await.unwrap_err();
        assert!(matches!(err, Error::MissingApiKey));
        assert_eq!(401, err.status());
        assert!(err.to_string().starts_with("Unauthorized"));

        let err = ingestor.create_post(&caller(Some("nope")), body).await.unwrap_err();
        assert!(matches!(err, Error::InvalidApiKey));
        assert_eq!(401, err.status());
    }

    #[tokio::test]
    async fn test_missing_server_key() {
        let store = MutableStore::new(Arc::new(MemoryObjectStore::new()), DEFAULT_PATHNAME);
        let limiter = Arc::new(MemoryRateLimiter::new(RateLimit::default()));
        let ingestor = Ingestor::new(store, limiter, Some(String::new()));
        assert!(!ingestor.has_api_key());
        let err = ingestor
            .create_post(&caller(Some("")), br#"{"title": "T", "content": "x"}"#)
            .await
            .unwrap_err();
        assert_eq!(500, err.status());
    }

    #[tokio::test]
    async fn test_body_errors() {
        let (_, ingestor) = ingestor();
        let err = ingestor.create_post(&caller(Some(KEY)), b"{not json").await.unwrap_err();
        assert!(matches!(err, Error::MalformedBody(_)));
        assert_eq!(400, err.status());

        let err = ingestor
            .create_post(&caller(Some(KEY)), br#"{"title": "T"}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(400, err.status());
    }

    #[tokio::test]
    async fn test_unconfigured_store_fails_fast() {
        let limiter = Arc::new(MemoryRateLimiter::new(RateLimit::default()));
        let ingestor = Ingestor::new(MutableStore::unconfigured(), limiter, Some(KEY.to_owned()));
        let err = ingestor
            .create_post(&caller(Some(KEY)), br#"{"title": "T", "content": "x"}"#)
            .await
            .unwrap_err();
        assert_eq!(500, err.status());
        assert!(err.details().unwrap().contains("BLOB_READ_WRITE_TOKEN"));
    }

    #[tokio::test]
    async fn test_rate_limit_checked_first() {
        let store = MutableStore::new(Arc::new(MemoryObjectStore::new()), DEFAULT_PATHNAME);
        let limiter = Arc::new(MemoryRateLimiter::new(RateLimit {
            quota: 2,
            window: Duration::from_secs(60),
        }));
        let ingestor = Ingestor::new(store, limiter, Some(KEY.to_owned()));
        let body = br#"{"title": "T", "content": "x"}"#;

        assert!(ingestor.create_post(&caller(Some(KEY)), body).await.is_ok());
        assert!(ingestor.create_post(&caller(None), body).await.is_err());
        let err = ingestor.create_post(&caller(Some(KEY)), body).await.unwrap_err();
        assert!(matches!(err, Error::RateLimited { .. }));
        assert_eq!(429, err.status());

        let other = Caller {
            address: "10.0.0.2",
            api_key: Some(KEY),
        };
        assert!(ingestor.create_post(&other, body).await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_read_aborts_write() -> Result<()> {
        let backend = Arc::new(Unreliable::default());
        let store = MutableStore::new(backend.clone(), DEFAULT_PATHNAME);
        let limiter = Arc::new(MemoryRateLimiter::new(RateLimit::default()));
        let ingestor = Ingestor::new(store.clone(), limiter, Some(KEY.to_owned()));
        for title in ["A", "B", "C"] {
            let body = format!(r#"{{"title": "{}", "content": "x"}}"#, title);
            ingestor.create_post(&caller(Some(KEY)), body.as_bytes()).await?;
        }
        let objects_before = backend.inner.object_count();

        backend.failing.store(true, Ordering::SeqCst);
        let err = ingestor
            .create_post(&caller(Some(KEY)), br#"{"title": "D", "content": "x"}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Store(_)));
        assert_eq!(500, err.status());
        assert_eq!(objects_before, backend.inner.object_count());

        backend.failing.store(false, Ordering::SeqCst);
        let slugs: Vec<String> = store.fetch_all().await.into_iter().map(|p| p.slug).collect();
        assert_eq!(vec!["a", "b", "c"], slugs);
        Ok(())
    }
}
