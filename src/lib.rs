//! The library code for the `quire` blog server. A blog post can come from
//! one of two places:
//!
//! 1. The read-only corpus: markdown documents with YAML front-matter in a
//!    directory on disk ([`crate::corpus`])
//! 2. The mutable store: a JSON array of posts kept in a remote object store
//!    ([`crate::store`], [`crate::blob`])
//!
//! Readers see the two merged ([`crate::aggregate`]). Writers submit posts
//! over HTTP, and each submission is rate limited, authenticated and
//! validated before it lands in the store ([`crate::ingest`]).
//!
//! Everything the server renders (the pages, the sitemap, the manifest and
//! the Atom feed) is built from the merged listing at request time
//! ([`crate::server`]).

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]

pub mod aggregate;
pub mod blob;
pub mod config;
pub mod corpus;
pub mod feed;
pub mod ingest;
pub mod markdown;
pub mod post;
pub mod ratelimit;
pub mod render;
pub mod seo;
pub mod server;
pub mod store;
pub mod validate;
