//! Defines the [`Post`] record shared by both post sources, along with the
//! slug and date helpers that every source agrees on.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::de::{self, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// The author used when a post doesn't name one.
pub const DEFAULT_AUTHOR: &str = "SDAD";

/// The title used when a corpus document doesn't name one.
pub const DEFAULT_TITLE: &str = "Untitled";

/// Represents one article. Posts come from either the on-disk corpus
/// ([`crate::corpus`]) or the mutable store ([`crate::store`]); both decode
/// into this same shape, and the JSON field names double as the stored wire
/// format.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    /// The URL-safe identifier of the post. For corpus documents this is the
    /// file name less the `.md` extension; for ingested posts it's derived
    /// from the title (see [`slugify`]).
    pub slug: String,

    /// The title of the post.
    pub title: String,

    /// The markdown body of the post.
    pub content: String,

    /// A short summary; empty when not provided.
    #[serde(default)]
    pub excerpt: String,

    /// An ISO-8601 timestamp. See [`parse_date`] for the accepted shapes.
    pub date: String,

    /// The tags associated with the post, in submission order.
    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default = "default_author")]
    pub author: String,

    /// An optional cover image URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Whether the post is visible. Anything other than a literal `false`
    /// decodes as `true`.
    #[serde(default = "default_published", deserialize_with = "lenient_published")]
    pub published: bool,
}

impl Post {
    /// The post's date as a UTC timestamp, if it parses.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        parse_date(&self.date)
    }
}

fn default_author() -> String {
    DEFAULT_AUTHOR.to_owned()
}

fn default_published() -> bool {
    true
}

/// Derives a slug from a title: lowercased, runs of non-alphanumeric
/// characters collapsed to one hyphen, leading and trailing hyphens removed.
/// Non-ASCII letters are transliterated first (e.g., `Café` becomes `cafe`).
pub fn slugify(title: &str) -> String {
    slug::slugify(title)
}

/// Parses the date shapes posts carry in practice: RFC 3339
/// (`2024-03-01T10:00:00.000Z`), a naive date-time (`2024-03-01T10:00:00`,
/// assumed UTC) or a plain date (`2024-03-01`, midnight UTC).
pub fn parse_date(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Formats a timestamp the way ingested posts store it.
pub fn format_date(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Orders two posts newest first. Posts whose dates don't parse sort after
/// every post whose date does.
pub fn newest_first(a: &Post, b: &Post) -> Ordering {
    match (a.timestamp(), b.timestamp()) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Sorts posts newest first. The sort is stable, so posts with equal dates
/// keep their relative order.
pub fn sort_newest_first(posts: &mut [Post]) {
    posts.sort_by(newest_first);
}

/// Deserializes the `published` flag. Only a literal boolean `false` hides a
/// post; strings, numbers, nulls and the like all count as published.
pub fn lenient_published<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    struct PublishedVisitor;

    impl<'de> Visitor<'de> for PublishedVisitor {
        type Value = bool;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(f, "any value")
        }

        fn visit_bool<E: de::Error>(self, v: bool) -> Result<bool, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, _: i64) -> Result<bool, E> {
            Ok(true)
        }

        fn visit_u64<E: de::Error>(self, _: u64) -> Result<bool, E> {
            Ok(true)
        }

        fn visit_f64<E: de::Error>(self, _: f64) -> Result<bool, E> {
            Ok(true)
        }

        fn visit_str<E: de::Error>(self, _: &str) -> Result<bool, E> {
            Ok(true)
        }

        fn visit_unit<E: de::Error>(self) -> Result<bool, E> {
            Ok(true)
        }

        fn visit_none<E: de::Error>(self) -> Result<bool, E> {
            Ok(true)
        }

        fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<bool, D::Error> {
            d.deserialize_any(PublishedVisitor)
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<bool, A::Error> {
            while seq.next_element::<IgnoredAny>()?.is_some() {}
            Ok(true)
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<bool, A::Error> {
            while map.next_entry::<IgnoredAny, IgnoredAny>()?.is_some() {}
            Ok(true)
        }
    }

    deserializer.deserialize_any(PublishedVisitor)
}
