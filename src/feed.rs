//! Support for creating Atom feeds from a list of posts.

use crate::config::Site;
use crate::post::Post;
use crate::seo::{meta_description, post_url};
use atom_syndication::{Category, Entry, Error as AtomError, Feed, FixedDateTime, Link, Person, Text};
use chrono::{DateTime, Utc};

/// Creates a feed from the site settings and a list of [`Post`]s (already in
/// listing order) and serializes it. `now` stands in for the date of any
/// post whose date doesn't parse.
pub fn write_feed(site: &Site, posts: &[Post], now: DateTime<Utc>) -> Result<Vec<u8>> {
    Ok(feed(site, posts, now).write_to(Vec::new())?)
}

fn feed(site: &Site, posts: &[Post], now: DateTime<Utc>) -> Feed {
    let updated = posts
        .iter()
        .filter_map(Post::timestamp)
        .max()
        .unwrap_or(now);

    let mut feed = Feed::default();
    feed.set_title(Text::plain(site.title.clone()));
    feed.set_subtitle(Some(Text::plain(site.description.clone())));
    feed.set_id(site.url.to_string());
    feed.set_updated(fixed(updated));
    feed.set_links(vec![link(site.url.as_str(), "alternate")]);
    feed.set_entries(
        posts
            .iter()
            .filter(|post| post.published)
            .map(|post| entry(site, post, now))
            .collect::<Vec<Entry>>(),
    );
    feed
}

fn entry(site: &Site, post: &Post, now: DateTime<Utc>) -> Entry {
    let url = post_url(&site.url, &post.slug);
    let date = fixed(post.timestamp().unwrap_or(now));

    let mut author = Person::default();
    author.set_name(post.author.clone());

    let mut entry = Entry::default();
    entry.set_title(Text::plain(post.title.clone()));
    entry.set_id(url.to_string());
    entry.set_updated(date);
    entry.set_published(Some(date));
    entry.set_authors(vec![author]);
    entry.set_links(vec![link(url.as_str(), "alternate")]);
    entry.set_summary(Some(Text::plain(meta_description(&post.content, &post.excerpt))));
    entry.set_categories(
        post.tags
            .iter()
            .map(|tag| {
                let mut category = Category::default();
                category.set_term(tag.clone());
                category
            })
            .collect::<Vec<Category>>(),
    );
    entry
}

fn link(href: &str, rel: &str) -> Link {
    let mut link = Link::default();
    link.set_href(href);
    link.set_rel(rel);
    link
}

fn fixed(date: DateTime<Utc>) -> FixedDateTime {
    date.into()
}

/// The result of a fallible feed operation.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents an error creating a feed.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Returned for errors serializing the feed.
    #[error("writing feed: {0}")]
    Atom(#[from] AtomError),
}
