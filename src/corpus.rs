//! Defines the [`Corpus`] reader, which loads [`Post`]s from the markdown
//! documents that ship with a deployment. The corpus is read-only at runtime
//! and never fails past its own boundary: problems are logged and the
//! offending documents (or the whole directory) are left out.

use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::post::{format_date, sort_newest_first, Post, DEFAULT_AUTHOR, DEFAULT_TITLE};

const MARKDOWN_EXTENSION: &str = "md";

/// Reads [`Post`]s from a directory of markdown files.
#[derive(Clone, Debug)]
pub struct Corpus {
    /// `directory` holds one `{slug}.md` file per post.
    directory: PathBuf,
}

impl Corpus {
    pub fn new(directory: impl Into<PathBuf>) -> Corpus {
        Corpus {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Returns every published post in the corpus, most recent first. Each
    /// post file must be structured as follows:
    ///
    /// 1. Initial frontmatter fence (`---`)
    /// 2. YAML frontmatter with any of `title`, `date`, `excerpt`, `tags`,
    ///    `author`, `image` and `published`
    /// 3. Terminal frontmatter fence (`---`)
    /// 4. Post body
    ///
    /// For example:
    ///
    /// ```md
    /// ---
    /// title: Hello, world!
    /// date: 2021-04-16
    /// tags: [greet]
    /// ---
    /// # Hello
    ///
    /// World
    /// ```
    ///
    /// An unreadable directory yields no posts; a document that fails to
    /// parse is skipped.
    pub fn list_posts(&self) -> Vec<Post> {
        match self.try_list_posts() {
            Ok(posts) => posts,
            Err(e) => {
                warn!(directory = %self.directory.display(), error = %e, "reading post corpus");
                Vec::new()
            }
        }
    }

    fn try_list_posts(&self) -> Result<Vec<Post>> {
        self.ensure_directory()?;

        let mut posts = Vec::new();
        for result in WalkDir::new(&self.directory)
            .min_depth(1)
            .max_depth(1)
            .sort_by(|a, b| a.file_name().cmp(b.file_name()))
        {
            let entry = result?;
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|ext| ext.to_str()) != Some(MARKDOWN_EXTENSION)
            {
                continue;
            }
            let slug = match path.file_stem().and_then(|stem| stem.to_str()) {
                Some(slug) => slug,
                None => {
                    warn!(path = %path.display(), "skipping post with a non UTF-8 file name");
                    continue;
                }
            };
            match parse_post_file(slug, path) {
                Ok(post) if post.published => posts.push(post),
                Ok(post) => debug!(slug = %post.slug, "skipping unpublished post"),
                Err(e) => warn!(error = %e, "skipping post"),
            }
        }

        sort_newest_first(&mut posts);
        Ok(posts)
    }

    /// Reads the post stored at `{directory}/{slug}.md`. The `published`
    /// flag is not consulted here; callers decide whether an unpublished post
    /// is visible.
    pub fn read_post(&self, slug: &str) -> Option<Post> {
        if slug.is_empty() || slug.contains(['/', '\\']) || slug.contains("..") {
            return None;
        }
        if let Err(e) = self.ensure_directory() {
            warn!(directory = %self.directory.display(), error = %e, "reading post corpus");
            return None;
        }
        let path = self
            .directory
            .join(format!("{}.{}", slug, MARKDOWN_EXTENSION));
        if !path.is_file() {
            return None;
        }
        match parse_post_file(slug, &path) {
            Ok(post) => Some(post),
            Err(e) => {
                warn!(error = %e, "reading post");
                None
            }
        }
    }

    fn ensure_directory(&self) -> Result<()> {
        std::fs::create_dir_all(&self.directory).map_err(|err| Error::CreateDirectory {
            path: self.directory.clone(),
            err,
        })
    }
}

fn parse_post_file(slug: &str, path: &Path) -> Result<Post> {
    fn parse(slug: &str, path: &Path) -> Result<Post> {
        let mut contents = String::new();
        File::open(path)?.read_to_string(&mut contents)?;
        parse_post(slug, &contents)
    }

    parse(slug, path)
        .map_err(|e| Error::Annotated(format!("parsing post `{}`", path.display()), Box::new(e)))
}

/// Parses a single [`Post`] from its slug and the document text, filling
/// in defaults for any missing frontmatter fields.
pub fn parse_post(slug: &str, input: &str) -> Result<Post> {
    let (frontmatter, body) = match split_frontmatter(input)? {
        Some((yaml, body)) if yaml.trim().is_empty() => (Frontmatter::default(), body),
        Some((yaml, body)) => (serde_yaml::from_str::<Frontmatter>(yaml)?, body),
        None => (Frontmatter::default(), input),
    };

    Ok(Post {
        slug: slug.to_owned(),
        title: frontmatter
            .title
            .filter(|title| !title.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_TITLE.to_owned()),
        content: body.to_owned(),
        excerpt: frontmatter.excerpt.unwrap_or_default(),
        date: frontmatter
            .date
            .filter(|date| !date.trim().is_empty())
            .unwrap_or_else(|| format_date(Utc::now())),
        tags: frontmatter.tags.map(Tags::into_vec).unwrap_or_default(),
        author: frontmatter
            .author
            .filter(|author| !author.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_AUTHOR.to_owned()),
        image: frontmatter.image.filter(|image| !image.trim().is_empty()),
        published: frontmatter.published,
    })
}

/// Splits a document into its YAML frontmatter and body. Returns `None` when
/// the document has no opening fence, in which case the whole document is
/// body.
fn split_frontmatter(input: &str) -> Result<Option<(&str, &str)>> {
    const FENCE: &str = "---";

    let first_line_end = input.find('\n').unwrap_or(input.len());
    if input[..first_line_end].trim_end() != FENCE {
        return Ok(None);
    }

    let yaml_start = (first_line_end + 1).min(input.len());
    let mut offset = yaml_start;
    for line in input[yaml_start..].split_inclusive('\n') {
        if line.trim_end() == FENCE {
            let body_start = offset + line.len();
            let body = &input[body_start..];
            // the blank line conventionally following the fence isn't content
            let body = body
                .strip_prefix("\r\n")
                .or_else(|| body.strip_prefix('\n'))
                .unwrap_or(body);
            return Ok(Some((&input[yaml_start..offset], body)));
        }
        offset += line.len();
    }
    Err(Error::FrontmatterMissingEndFence)
}

#[derive(Deserialize)]
struct Frontmatter {
    title: Option<String>,

    date: Option<String>,

    excerpt: Option<String>,

    /// Either a list of tags or a single tag.
    tags: Option<Tags>,

    author: Option<String>,

    image: Option<String>,

    #[serde(
        default = "published_by_default",
        deserialize_with = "crate::post::lenient_published"
    )]
    published: bool,
}

fn published_by_default() -> bool {
    true
}

impl Default for Frontmatter {
    fn default() -> Self {
        Frontmatter {
            title: None,
            date: None,
            excerpt: None,
            tags: None,
            author: None,
            image: None,
            published: published_by_default(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Tags {
    Many(Vec<String>),
    One(String),
}

impl Tags {
    fn into_vec(self) -> Vec<String> {
        match self {
            Tags::Many(tags) => tags,
            Tags::One(tag) => vec![tag],
        }
    }
}

/// Represents the result of a corpus operation.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents an error reading a [`Post`] from the corpus.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Returned when a post source file has an opening frontmatter fence
    /// (`---`) but no closing one.
    #[error("missing closing `---`")]
    FrontmatterMissingEndFence,

    /// Returned when there was an error parsing the frontmatter as YAML.
    #[error(transparent)]
    DeserializeYaml(#[from] serde_yaml::Error),

    /// Returned when the corpus directory can't be created.
    #[error("creating directory '{}': {err}", path.display())]
    CreateDirectory { path: PathBuf, err: std::io::Error },

    /// Returned for other I/O errors.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Returned for WalkDir I/O errors.
    #[error(transparent)]
    WalkDir(#[from] walkdir::Error),

    /// An error with an annotation.
    #[error("{0}: {1}")]
    Annotated(String, Box<Error>),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, contents: &str) {
        std::fs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn test_parse_post_with_frontmatter() -> Result<()> {
        let post = parse_post(
            "hello",
            "---\ntitle: Hello, world!\ndate: 2021-04-16\ntags: [greet, intro]\nauthor: Ada\nimage: https://example.com/a.png\n---\n\n# Hello\n\nWorld\n",
        )?;
        assert_eq!("hello", post.slug);
        assert_eq!("Hello, world!", post.title);
        assert_eq!("2021-04-16", post.date);
        assert_eq!(vec!["greet", "intro"], post.tags);
        assert_eq!("Ada", post.author);
        assert_eq!(Some("https://example.com/a.png".to_owned()), post.image);
        assert_eq!("# Hello\n\nWorld\n", post.content);
        assert!(post.published);
        Ok(())
    }

    #[test]
    fn test_parse_post_defaults() -> Result<()> {
        let post = parse_post("bare", "just a body")?;
        assert_eq!(DEFAULT_TITLE, post.title);
        assert_eq!(DEFAULT_AUTHOR, post.author);
        assert_eq!("", post.excerpt);
        assert!(post.tags.is_empty());
        assert!(post.timestamp().is_some());
        assert_eq!("just a body", post.content);
        assert!(post.published);
        Ok(())
    }

    #[test]
    fn test_parse_post_empty_frontmatter_is_published() -> Result<()> {
        let post = parse_post("empty", "---\n---\nbody")?;
        assert!(post.published);
        assert_eq!("body", post.content);
        Ok(())
    }

    #[test]
    fn test_list_posts_includes_documents_without_frontmatter() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "bare.md", "just a body");
        let posts = Corpus::new(dir.path()).list_posts();
        assert_eq!(1, posts.len());
        assert_eq!("bare", posts[0].slug);
    }

    #[test]
    fn test_parse_post_single_tag_and_lenient_published() -> Result<()> {
        let post = parse_post("p", "---\ntitle: P\ntags: solo\npublished: \"false\"\n---\nbody")?;
        assert_eq!(vec!["solo"], post.tags);
        assert!(post.published);
        Ok(())
    }

    #[test]
    fn test_parse_post_missing_end_fence() {
        match parse_post("p", "---\ntitle: P\nbody") {
            Err(Error::FrontmatterMissingEndFence) => {}
            other => panic!("wanted missing fence error; found {:?}", other.map(|p| p.slug)),
        }
    }

    #[test]
    fn test_list_posts_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "older.md", "---\ntitle: Older\ndate: 2023-01-01\n---\nold");
        write(dir.path(), "newer.md", "---\ntitle: Newer\ndate: 2024-01-01\n---\nnew");
        write(dir.path(), "draft.md", "---\ntitle: Draft\ndate: 2025-01-01\npublished: false\n---\nwip");
        write(dir.path(), "broken.md", "---\ntitle: Broken\n");
        write(dir.path(), "notes.txt", "not a post");

        let posts = Corpus::new(dir.path()).list_posts();
        let slugs: Vec<&str> = posts.iter().map(|p| p.slug.as_str()).collect();
        assert_eq!(vec!["newer", "older"], slugs);
    }

    #[test]
    fn test_list_posts_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = Corpus::new(dir.path().join("data").join("posts"));
        assert!(corpus.list_posts().is_empty());
        assert!(corpus.directory().is_dir());
    }

    #[test]
    fn test_list_posts_unreadable_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-directory");
        write(dir.path(), "not-a-directory", "");
        assert!(Corpus::new(file).list_posts().is_empty());
    }

    #[test]
    fn test_read_post_ignores_published_flag() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "draft.md", "---\ntitle: Draft\npublished: false\n---\nwip");
        let corpus = Corpus::new(dir.path());
        let post = corpus.read_post("draft").unwrap();
        assert!(!post.published);
        assert!(corpus.read_post("missing").is_none());
        assert!(corpus.read_post("../draft").is_none());
    }
}
