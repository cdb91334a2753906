//! Search-engine metadata derived from posts: reading time, descriptions,
//! related posts, the sitemap, the web app manifest and JSON-LD.

use std::fmt::Write;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use url::Url;

use crate::config::Site;
use crate::markdown::{escape_html, plain_text};
use crate::post::{newest_first, Post};

/// Average reading speed, in words per minute.
const WORDS_PER_MINUTE: usize = 225;

const DESCRIPTION_MAX_CHARS: usize = 160;
const DESCRIPTION_CUT_CHARS: usize = 157;
const DESCRIPTION_MIN_CUT: usize = 120;

pub fn word_count(content: &str) -> usize {
    plain_text(content).split_whitespace().count()
}

/// Estimated reading time in whole minutes, rounded up, never less than one.
pub fn reading_time(content: &str) -> usize {
    let words = word_count(content);
    ((words + WORDS_PER_MINUTE - 1) / WORDS_PER_MINUTE).max(1)
}

/// A meta description of at most 160 characters. A short enough excerpt is
/// used as is; otherwise the content's text is cut at the last sentence (or
/// failing that, word) boundary past character 120, and an ellipsis marks
/// the cut.
pub fn meta_description(content: &str, excerpt: &str) -> String {
    if !excerpt.is_empty() && excerpt.chars().count() <= DESCRIPTION_MAX_CHARS {
        return excerpt.to_owned();
    }

    let text = plain_text(content)
        .split_whitespace()
        .collect::<Vec<&str>>()
        .join(" ");
    if text.chars().count() <= DESCRIPTION_MAX_CHARS {
        return text;
    }

    let head: Vec<char> = text.chars().take(DESCRIPTION_CUT_CHARS).collect();
    let last_period = head.iter().rposition(|&c| c == '.');
    let last_space = head.iter().rposition(|&c| c == ' ');
    let cut = match (last_period, last_space) {
        (Some(period), _) if period > DESCRIPTION_MIN_CUT => period + 1,
        (_, Some(space)) if space > DESCRIPTION_MIN_CUT => space,
        _ => head.len(),
    };
    let mut description: String = head[..cut].iter().collect();
    description.truncate(description.trim_end().len());
    description.push_str("...");
    description
}

/// Picks up to `limit` posts to suggest after `current`: those sharing the
/// most tags first (newest first among equals), then the most recent of the
/// rest.
pub fn related_posts<'a>(current: &Post, all: &'a [Post], limit: usize) -> Vec<&'a Post> {
    let mut candidates: Vec<&Post> = all
        .iter()
        .filter(|p| p.slug != current.slug && p.published)
        .collect();
    candidates.sort_by(|a, b| newest_first(a, b));

    let shared = |p: &Post| p.tags.iter().filter(|t| current.tags.contains(t)).count();
    let mut related: Vec<&Post> = candidates.iter().copied().filter(|p| shared(p) > 0).collect();
    // stable, so equal scores stay newest first
    related.sort_by(|a, b| shared(b).cmp(&shared(a)));
    related.truncate(limit);

    for candidate in candidates {
        if related.len() >= limit {
            break;
        }
        if !related.iter().any(|p| p.slug == candidate.slug) {
            related.push(candidate);
        }
    }
    related
}

/// Builds the sitemap: the home page followed by every published post.
pub fn sitemap_xml(site_url: &Url, posts: &[Post], now: DateTime<Utc>) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">\n",
    );
    push_sitemap_url(&mut xml, site_url.as_str(), now, "daily", "1.0");
    for post in posts.iter().filter(|p| p.published && !p.slug.is_empty()) {
        let lastmod = post.timestamp().unwrap_or(now);
        push_sitemap_url(&mut xml, post_url(site_url, &post.slug).as_str(), lastmod, "weekly", "0.8");
    }
    xml.push_str("</urlset>\n");
    xml
}

fn push_sitemap_url(xml: &mut String, loc: &str, lastmod: DateTime<Utc>, changefreq: &str, priority: &str) {
    // writing into a `String` can't fail
    let _ = write!(
        xml,
        "  <url>\n    <loc>{}</loc>\n    <lastmod>{}</lastmod>\n    <changefreq>{}</changefreq>\n    <priority>{}</priority>\n  </url>\n",
        escape_html(loc),
        lastmod.format("%Y-%m-%d"),
        changefreq,
        priority
    );
}

/// The canonical URL of a post page.
pub fn post_url(site_url: &Url, slug: &str) -> Url {
    let mut url = site_url.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().push("posts").push(slug);
    }
    url
}

/// The web app manifest.
pub fn manifest(site: &Site) -> Value {
    json!({
        "name": site.title,
        "short_name": site.title,
        "description": site.description,
        "start_url": "/",
        "display": "standalone",
        "background_color": site.background_color,
        "theme_color": site.theme_color,
        "icons": [
            {"src": "/icon.svg", "sizes": "any", "type": "image/svg+xml"},
        ],
    })
}

/// schema.org `BlogPosting` structured data for a post page.
pub fn blog_posting_ld(site: &Site, post: &Post) -> Value {
    let url = post_url(&site.url, &post.slug);
    let mut ld = json!({
        "@context": "https://schema.org",
        "@type": "BlogPosting",
        "headline": post.title,
        "description": meta_description(&post.content, &post.excerpt),
        "datePublished": post.date,
        "author": {"@type": "Person", "name": post.author},
        "publisher": {"@type": "Organization", "name": site.title},
        "mainEntityOfPage": {"@type": "WebPage", "@id": url.as_str()},
        "url": url.as_str(),
        "keywords": post.tags.join(", "),
        "wordCount": word_count(&post.content),
        "timeRequired": format!("PT{}M", reading_time(&post.content)),
    });
    if let (Some(image), Value::Object(obj)) = (&post.image, &mut ld) {
        obj.insert("image".to_owned(), Value::String(image.clone()));
    }
    ld
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::post::tests::post;
    use chrono::TimeZone;

    fn tagged(slug: &str, date: &str, tags: &[&str]) -> Post {
        let mut p = post(slug, date);
        p.tags = tags.iter().map(|t| t.to_string()).collect();
        p
    }

    #[test]
    fn test_reading_time() {
        assert_eq!(1, reading_time(""));
        assert_eq!(1, reading_time(&"word ".repeat(225)));
        assert_eq!(2, reading_time(&"word ".repeat(226)));
        assert_eq!(3, word_count("## One *two* [three](https://x.y)"));
    }

    #[test]
    fn test_meta_description() {
        assert_eq!("Short excerpt", meta_description("whatever", "Short excerpt"));
        assert_eq!("Short body", meta_description("# Short body", ""));

        let sentence = format!("{}. ", "a".repeat(130));
        let long = format!("{}{}", sentence, "word ".repeat(40));
        let description = meta_description(&long, "");
        assert_eq!(format!("{}....", "a".repeat(130)), description);

        let words = "word ".repeat(60);
        let description = meta_description(&words, &"e".repeat(200));
        assert!(description.ends_with("word..."), "{}", description);
        assert!(description.chars().count() <= 160);
    }

    #[test]
    fn test_related_posts() {
        let current = tagged("current", "2024-01-01", &["rust", "web"]);
        let all = vec![
            current.clone(),
            tagged("one-shared-new", "2024-03-01", &["rust"]),
            tagged("two-shared", "2023-01-01", &["web", "rust"]),
            tagged("one-shared-old", "2022-01-01", &["web"]),
            tagged("unrelated-newest", "2025-01-01", &["cooking"]),
        ];
        let related: Vec<&str> = related_posts(&current, &all, 3).iter().map(|p| p.slug.as_str()).collect();
        assert_eq!(vec!["two-shared", "one-shared-new", "one-shared-old"], related);

        let related: Vec<&str> = related_posts(&current, &all[..3], 3).iter().map(|p| p.slug.as_str()).collect();
        assert_eq!(vec!["two-shared", "one-shared-new"], related);

        let untagged = post("untagged", "2024-01-01");
        let related: Vec<&str> = related_posts(&untagged, &all, 2).iter().map(|p| p.slug.as_str()).collect();
        assert_eq!(vec!["unrelated-newest", "one-shared-new"], related);
    }

    #[test]
    fn test_sitemap_lists_published_posts() {
        let site_url = Url::parse("https://blog.example.org/").unwrap();
        let mut draft = post("draft", "2024-01-01");
        draft.published = false;
        let posts = vec![post("hello-world", "2024-02-03"), draft];
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();

        let xml = sitemap_xml(&site_url, &posts, now);
        assert!(xml.contains("<loc>https://blog.example.org/</loc>"));
        assert!(xml.contains("<loc>https://blog.example.org/posts/hello-world</loc>"));
        assert!(xml.contains("<lastmod>2024-02-03</lastmod>"));
        assert!(!xml.contains("draft"));
    }

    #[test]
    fn test_post_url() {
        let with_path = Url::parse("https://example.org/blog/").unwrap();
        assert_eq!("https://example.org/blog/posts/a", post_url(&with_path, "a").as_str());
        let bare = Url::parse("https://example.org").unwrap();
        assert_eq!("https://example.org/posts/a", post_url(&bare, "a").as_str());
    }

    #[test]
    fn test_blog_posting_ld() {
        let site = Site::default();
        let mut p = tagged("a", "2024-01-01", &["x", "y"]);
        p.image = Some("https://example.com/i.png".to_owned());
        let ld = blog_posting_ld(&site, &p);
        assert_eq!("BlogPosting", ld["@type"]);
        assert_eq!("x, y", ld["keywords"]);
        assert_eq!("https://example.com/i.png", ld["image"]);
        assert_eq!("PT1M", ld["timeRequired"]);
    }
}
