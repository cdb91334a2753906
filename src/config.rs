//! Loads the site [`Config`] from an optional `quire.yaml` project file and
//! the environment. Secrets never live in the project file: the store token
//! and the API key come from `BLOB_READ_WRITE_TOKEN` and `BLOG_API_KEY`.

use crate::ratelimit::RateLimit;
use crate::store::DEFAULT_PATHNAME;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs::File;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use url::Url;

pub const PROJECT_FILE: &str = "quire.yaml";
pub const STORE_TOKEN_VAR: &str = "BLOB_READ_WRITE_TOKEN";
pub const API_KEY_VAR: &str = "BLOG_API_KEY";

const DEFAULT_BIND: &str = "127.0.0.1:3000";
const DEFAULT_POSTS_DIRECTORY: &str = "data/posts";
const DEFAULT_STORE_API_URL: &str = "https://blob.vercel-storage.com";

/// Presentation settings for the rendered pages, the feed and the manifest.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Site {
    pub title: String,
    pub description: String,

    /// The public root URL; post pages live at `{url}/posts/{slug}`.
    pub url: Url,

    pub theme_color: String,
    pub background_color: String,
}

impl Default for Site {
    fn default() -> Self {
        Site {
            title: String::from("ML Matters"),
            description: String::from(
                "AI and Machine Learning blog covering the latest technology trends, breakthroughs, and innovations",
            ),
            url: Url::parse("http://localhost:3000/").unwrap(), // should always succeed
            theme_color: String::from("#00f5ff"),
            background_color: String::from("#0a0a0f"),
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct StoreSettings {
    api_url: Option<Url>,
    pathname: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Project {
    bind: Option<SocketAddr>,
    posts_directory: Option<PathBuf>,
    dedupe_listing: bool,
    site: Site,
    store: StoreSettings,
    rate_limit: RateLimit,
}

/// Everything the server needs to run.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind: SocketAddr,
    pub posts_directory: PathBuf,
    pub dedupe_listing: bool,
    pub site: Site,
    pub store_api_url: Url,
    pub store_pathname: String,
    pub store_token: Option<String>,
    pub api_key: Option<String>,
    pub rate_limit: RateLimit,
}

impl Config {
    /// Searches `dir` and its ancestors for `quire.yaml`. Without one, the
    /// defaults apply relative to `dir`.
    pub fn from_directory(dir: &Path) -> Result<Config> {
        let mut current = Some(dir);
        while let Some(candidate) = current {
            let path = candidate.join(PROJECT_FILE);
            if path.is_file() {
                return Config::from_project_file(&path)
                    .with_context(|| format!("Loading configuration from `{}`", path.display()));
            }
            current = candidate.parent();
        }
        Config::from_project(Project::default(), dir)
    }

    pub fn from_project_file(path: &Path) -> Result<Config> {
        let file = File::open(path)
            .with_context(|| format!("Opening project file `{}`", path.display()))?;
        let project: Project = serde_yaml::from_reader(file)?;
        match path.parent() {
            None => Err(anyhow!(
                "Can't get parent directory for provided project file path '{:?}'",
                path
            )),
            Some(project_root) => Config::from_project(project, project_root),
        }
    }

    fn from_project(project: Project, project_root: &Path) -> Result<Config> {
        Ok(Config {
            bind: match project.bind {
                Some(bind) => bind,
                None => DEFAULT_BIND.parse()?,
            },
            posts_directory: project_root.join(
                project
                    .posts_directory
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_POSTS_DIRECTORY)),
            ),
            dedupe_listing: project.dedupe_listing,
            site: project.site,
            store_api_url: match project.store.api_url {
                Some(url) => url,
                None => Url::parse(DEFAULT_STORE_API_URL)?,
            },
            store_pathname: project
                .store
                .pathname
                .unwrap_or_else(|| DEFAULT_PATHNAME.to_owned()),
            store_token: env_secret(STORE_TOKEN_VAR),
            api_key: env_secret(API_KEY_VAR),
            rate_limit: project.rate_limit,
        })
    }
}

fn env_secret(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}
