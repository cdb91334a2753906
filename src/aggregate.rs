//! Combines the on-disk [`Corpus`] and the [`MutableStore`] into the one
//! collection of posts the site shows.
//!
//! Neither source can fail a read: both degrade to "no posts", so a broken
//! store produces a shorter listing rather than a broken page.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, warn};

use crate::corpus::Corpus;
use crate::post::{sort_newest_first, Post};
use crate::store::MutableStore;

/// Reads posts from both sources.
#[derive(Clone)]
pub struct Aggregator {
    corpus: Corpus,
    store: MutableStore,

    /// When set, a corpus post is left out of listings if the store holds a
    /// published post with the same slug. Off by default, in which case both
    /// copies are listed.
    dedupe_listing: bool,
}

/// Both sources' contents side by side, as reported by the debug endpoint.
#[derive(Debug, Serialize)]
pub struct Snapshot {
    pub corpus: Vec<Post>,
    pub store: Vec<Post>,
    pub merged: Vec<Post>,
}

impl Aggregator {
    pub fn new(corpus: Corpus, store: MutableStore) -> Aggregator {
        Aggregator {
            corpus,
            store,
            dedupe_listing: false,
        }
    }

    pub fn with_dedupe_listing(mut self, dedupe_listing: bool) -> Aggregator {
        self.dedupe_listing = dedupe_listing;
        self
    }

    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    pub fn store(&self) -> &MutableStore {
        &self.store
    }

    pub fn dedupe_listing(&self) -> bool {
        self.dedupe_listing
    }

    /// Lists every published post, newest first. Corpus posts come first and
    /// store posts are appended before the (stable) sort, so among posts with
    /// equal dates the corpus copy is listed first.
    pub async fn list_posts(&self) -> Vec<Post> {
        let (corpus_posts, store_posts) = self.read_sources().await;
        self.merge(corpus_posts, store_posts)
    }

    fn merge(&self, corpus_posts: Vec<Post>, store_posts: Vec<Post>) -> Vec<Post> {
        let store_posts: Vec<Post> = store_posts.into_iter().filter(|p| p.published).collect();

        let mut posts: Vec<Post> = if self.dedupe_listing {
            let superseded: HashSet<&str> = store_posts.iter().map(|p| p.slug.as_str()).collect();
            corpus_posts
                .into_iter()
                .filter(|p| !superseded.contains(p.slug.as_str()))
                .collect()
        } else {
            corpus_posts
        };
        posts.extend(store_posts);
        sort_newest_first(&mut posts);
        posts
    }

    /// Reads both sources concurrently. The corpus is plain file I/O, so it
    /// runs on the blocking pool.
    async fn read_sources(&self) -> (Vec<Post>, Vec<Post>) {
        let corpus = self.corpus.clone();
        let (corpus_posts, store_posts) = tokio::join!(
            tokio::task::spawn_blocking(move || corpus.list_posts()),
            self.store.fetch_all(),
        );
        let corpus_posts = corpus_posts.unwrap_or_else(|e| {
            warn!(error = %e, "reading post corpus");
            Vec::new()
        });
        (corpus_posts, store_posts)
    }

    /// Looks up one post. A published store post wins over anything in the
    /// corpus; otherwise the corpus copy is returned if it is published.
    pub async fn get_post(&self, slug: &str) -> Option<Post> {
        if let Some(post) = self
            .store
            .fetch_all()
            .await
            .into_iter()
            .find(|p| p.slug == slug && p.published)
        {
            debug!(slug, "resolved post from store");
            return Some(post);
        }

        let corpus = self.corpus.clone();
        let owned_slug = slug.to_owned();
        let post = match tokio::task::spawn_blocking(move || corpus.read_post(&owned_slug)).await {
            Ok(post) => post,
            Err(e) => {
                warn!(error = %e, "reading post corpus");
                None
            }
        };
        post.filter(|p| p.published)
    }

    /// Captures both sources and the merged listing built from them.
    pub async fn snapshot(&self) -> Snapshot {
        let (corpus, store) = self.read_sources().await;
        let merged = self.merge(corpus.clone(), store.clone());
        Snapshot {
            corpus,
            store,
            merged,
        }
    }
}
