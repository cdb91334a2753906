//! Renders the HTML pages of the site from [`Post`]s.
//!
//! Pages are built as template values and run through the built-in
//! templates. The templates don't escape anything themselves, so every
//! string that reaches them is escaped here, except the rendered post body.

use std::collections::HashMap;

use gtmpl::Value;

use crate::config::Site;
use crate::markdown::{self, escape_html};
use crate::post::Post;
use crate::seo::{blog_posting_ld, meta_description, post_url, reading_time, related_posts};

const INDEX_TEMPLATE: &str = include_str!("../templates/index.html");
const POST_TEMPLATE: &str = include_str!("../templates/post.html");
const NOT_FOUND_TEMPLATE: &str = include_str!("../templates/not_found.html");

/// How many related posts a post page suggests.
const RELATED_POSTS: usize = 3;

/// Renders pages for one site.
pub struct Renderer {
    site: Site,
}

impl Renderer {
    pub fn new(site: Site) -> Renderer {
        Renderer { site }
    }

    pub fn site(&self) -> &Site {
        &self.site
    }

    /// The listing page. An empty `posts` renders the empty-state message.
    pub fn index_page(&self, posts: &[Post]) -> Result<String> {
        let mut page = self.page();
        page.insert(
            "posts".to_owned(),
            Value::Array(posts.iter().map(|p| self.summarize(p)).collect()),
        );
        execute(INDEX_TEMPLATE, page)
    }

    /// The page for a single post. `all` is the full listing, used to pick
    /// related posts.
    pub fn post_page(&self, post: &Post, all: &[Post]) -> Result<String> {
        let mut body = String::new();
        markdown::to_html(&mut body, &post.content);

        let mut item = self.summarize(post);
        if let Value::Object(obj) = &mut item {
            obj.insert("body".to_owned(), Value::String(body));
            obj.insert(
                "description".to_owned(),
                text(&meta_description(&post.content, &post.excerpt)),
            );
            obj.insert("keywords".to_owned(), text(&post.tags.join(", ")));
            obj.insert("published_time".to_owned(), text(&post.date));
            obj.insert(
                "image".to_owned(),
                text(post.image.as_deref().unwrap_or_default()),
            );
        }

        // `</` can't appear inside a script element
        let json_ld = blog_posting_ld(&self.site, post)
            .to_string()
            .replace("</", "<\\/");

        let mut page = self.page();
        page.insert("post".to_owned(), item);
        page.insert(
            "related".to_owned(),
            Value::Array(
                related_posts(post, all, RELATED_POSTS)
                    .into_iter()
                    .map(|p| self.summarize(p))
                    .collect(),
            ),
        );
        page.insert("json_ld".to_owned(), Value::String(json_ld));
        execute(POST_TEMPLATE, page)
    }

    pub fn not_found_page(&self) -> Result<String> {
        execute(NOT_FOUND_TEMPLATE, self.page())
    }

    /// The values every page gets.
    fn page(&self) -> HashMap<String, Value> {
        let mut site: HashMap<String, Value> = HashMap::new();
        site.insert("title".to_owned(), text(&self.site.title));
        site.insert("description".to_owned(), text(&self.site.description));
        site.insert("url".to_owned(), text(self.site.url.as_str()));
        site.insert("theme_color".to_owned(), text(&self.site.theme_color));
        site.insert(
            "background_color".to_owned(),
            text(&self.site.background_color),
        );

        let mut page: HashMap<String, Value> = HashMap::new();
        page.insert("site".to_owned(), Value::Object(site));
        page
    }

    /// Converts a [`Post`] into the [`Value`] listing pages show for it.
    fn summarize(&self, post: &Post) -> Value {
        let mut m: HashMap<String, Value> = HashMap::new();
        m.insert("title".to_owned(), text(&post.title));
        m.insert(
            "url".to_owned(),
            text(post_url(&self.site.url, &post.slug).as_str()),
        );
        m.insert("date".to_owned(), text(&display_date(post)));
        m.insert("author".to_owned(), text(&post.author));
        m.insert("excerpt".to_owned(), text(&post.excerpt));
        m.insert(
            "reading_time".to_owned(),
            Value::String(reading_time(&post.content).to_string()),
        );
        m.insert(
            "tags".to_owned(),
            Value::Array(post.tags.iter().map(|t| text(t)).collect()),
        );
        Value::Object(m)
    }
}

fn text(s: &str) -> Value {
    Value::String(escape_html(s))
}

/// Formats a post date for readers, e.g. `March 1, 2024`. Dates that don't
/// parse are shown as written.
fn display_date(post: &Post) -> String {
    match post.timestamp() {
        Some(date) => date.format("%B %-d, %Y").to_string(),
        None => post.date.clone(),
    }
}

fn execute(template: &str, page: HashMap<String, Value>) -> Result<String> {
    gtmpl::template(template, Value::Object(page)).map_err(|e| Error::Template(e.to_string()))
}

/// The result of a fallible rendering operation.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents an error rendering a page.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An error during templating.
    #[error("rendering template: {0}")]
    Template(String),
}
