//! Turns a loosely-typed post submission into a [`SanitizedPost`]. Rules are
//! applied field by field in a fixed order and the first failure wins.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use url::Url;

use crate::post::{format_date, parse_date, slugify, Post, DEFAULT_AUTHOR};

pub const MAX_TITLE_CHARS: usize = 200;
pub const MAX_CONTENT_CHARS: usize = 1_000_000;
pub const MAX_TAG_CHARS: usize = 50;
pub const MAX_TAGS: usize = 10;
pub const MAX_AUTHOR_CHARS: usize = 100;
pub const MAX_EXCERPT_CHARS: usize = 500;

/// A submission that passed validation. Every field is already trimmed,
/// bounded and defaulted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SanitizedPost {
    slug: String,
    title: String,
    content: String,
    excerpt: String,
    date: String,
    tags: Vec<String>,
    author: String,
    image: Option<String>,
    published: bool,
}

impl SanitizedPost {
    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn excerpt(&self) -> &str {
        &self.excerpt
    }

    pub fn date(&self) -> &str {
        &self.date
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn image(&self) -> Option<&str> {
        self.image.as_deref()
    }

    pub fn published(&self) -> bool {
        self.published
    }

    pub fn into_post(self) -> Post {
        Post {
            slug: self.slug,
            title: self.title,
            content: self.content,
            excerpt: self.excerpt,
            date: self.date,
            tags: self.tags,
            author: self.author,
            image: self.image,
            published: self.published,
        }
    }
}

/// Validates a raw submission. `now` becomes the post date when the
/// submission doesn't carry one.
pub fn validate(raw: &Value, now: DateTime<Utc>) -> Result<SanitizedPost> {
    let fields = raw.as_object().ok_or(Error::NotAnObject)?;

    let title = title(fields)?;
    let slug = slugify(&title);
    if slug.is_empty() {
        return Err(Error::invalid(
            "title",
            "must contain at least one letter or digit",
        ));
    }
    let content = content(fields)?;
    let tags = tags(fields.get("tags"));
    let author = bounded_text(fields.get("author"), MAX_AUTHOR_CHARS)
        .unwrap_or_else(|| DEFAULT_AUTHOR.to_owned());
    let excerpt = bounded_text(fields.get("excerpt"), MAX_EXCERPT_CHARS).unwrap_or_default();
    let date = date(fields.get("date"), now)?;
    let image = image(fields.get("image"))?;
    let published = !matches!(fields.get("published"), Some(Value::Bool(false)));

    Ok(SanitizedPost {
        slug,
        title,
        content,
        excerpt,
        date,
        tags,
        author,
        image,
        published,
    })
}

fn title(fields: &Map<String, Value>) -> Result<String> {
    let title = match fields.get("title") {
        Some(Value::String(title)) => title.trim(),
        Some(Value::Null) | None => return Err(Error::missing("title")),
        Some(_) => return Err(Error::invalid("title", "must be a string")),
    };
    if title.is_empty() {
        return Err(Error::missing("title"));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(Error::invalid(
            "title",
            format!("must be at most {} characters", MAX_TITLE_CHARS),
        ));
    }
    Ok(title.to_owned())
}

fn content(fields: &Map<String, Value>) -> Result<String> {
    let content = match fields.get("content") {
        Some(Value::String(content)) => content,
        Some(Value::Null) | None => return Err(Error::missing("content")),
        Some(_) => return Err(Error::invalid("content", "must be a string")),
    };
    if content.trim().is_empty() {
        return Err(Error::missing("content"));
    }
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(Error::invalid(
            "content",
            format!("must be at most {} characters", MAX_CONTENT_CHARS),
        ));
    }
    Ok(content.clone())
}

/// Normalizes tags: strings only, trimmed, empty and over-long tags dropped,
/// at most [`MAX_TAGS`] kept. A single string is a one-tag list; anything
/// else means no tags.
fn tags(value: Option<&Value>) -> Vec<String> {
    let candidates: Vec<&str> = match value {
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        Some(Value::String(tag)) => vec![tag.as_str()],
        _ => Vec::new(),
    };
    candidates
        .into_iter()
        .map(str::trim)
        .filter(|tag| !tag.is_empty() && tag.chars().count() <= MAX_TAG_CHARS)
        .take(MAX_TAGS)
        .map(str::to_owned)
        .collect()
}

/// Trims a string field and truncates it to `max_chars`. Returns `None` for
/// non-strings and blank strings.
fn bounded_text(value: Option<&Value>, max_chars: usize) -> Option<String> {
    let text = value.and_then(Value::as_str)?.trim();
    if text.is_empty() {
        return None;
    }
    Some(text.chars().take(max_chars).collect::<String>().trim_end().to_owned())
}

fn date(value: Option<&Value>, now: DateTime<Utc>) -> Result<String> {
    match value {
        None | Some(Value::Null) => Ok(format_date(now)),
        Some(Value::String(date)) => parse_date(date)
            .map(format_date)
            .ok_or_else(|| Error::invalid("date", "must be a valid ISO-8601 date")),
        Some(_) => Err(Error::invalid("date", "must be an ISO-8601 date string")),
    }
}

fn image(value: Option<&Value>) -> Result<Option<String>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(image)) if image.trim().is_empty() => Ok(None),
        Some(Value::String(image)) => match Url::parse(image.trim()) {
            Ok(_) => Ok(Some(image.trim().to_owned())),
            Err(_) => Err(Error::invalid("image", "must be a valid URL")),
        },
        Some(_) => Err(Error::invalid("image", "must be a URL string")),
    }
}

/// Represents the result of validating a submission.
pub type Result<T> = std::result::Result<T, Error>;

/// Explains why a submission was rejected.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Returned when the body isn't a JSON object.
    #[error("Request body must be a JSON object")]
    NotAnObject,

    /// Returned when a required field is absent or blank.
    #[error("Missing required field: {0} is required")]
    Missing(&'static str),

    /// Returned when a field is present but unacceptable.
    #[error("Invalid field: {field} {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl Error {
    fn missing(field: &'static str) -> Error {
        Error::Missing(field)
    }

    fn invalid(field: &'static str, reason: impl Into<String>) -> Error {
        Error::Invalid {
            field,
            reason: reason.into(),
        }
    }

    /// The name of the offending field, if the error concerns one.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Error::NotAnObject => None,
            Error::Missing(field) | Error::Invalid { field, .. } => Some(field),
        }
    }
}
