//! The HTTP surface: the posts API and the rendered site, served by axum.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use axum::body::Bytes;
use axum::extract::{ConnectInfo, DefaultBodyLimit, Path, State};
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::aggregate::Aggregator;
use crate::blob::BlobClient;
use crate::config::Config;
use crate::corpus::Corpus;
use crate::feed::write_feed;
use crate::ingest::{self, Caller, Ingestor};
use crate::post::Post;
use crate::ratelimit::MemoryRateLimiter;
use crate::render::{self, Renderer};
use crate::seo;
use crate::store::{MemoryObjectStore, MutableStore, ObjectStore};

/// Leaves room for a maximum-length post body in multi-byte UTF-8.
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Everything the handlers share.
#[derive(Clone)]
pub struct AppState {
    pub aggregator: Aggregator,
    pub ingestor: Arc<Ingestor>,
    pub renderer: Arc<Renderer>,
}

impl AppState {
    /// Wires the components up from configuration. With `memory_store` set,
    /// posts are kept in process memory instead of the remote store.
    pub fn from_config(config: &Config, memory_store: bool) -> anyhow::Result<AppState> {
        let store = if memory_store {
            info!("keeping ingested posts in memory");
            MutableStore::new(Arc::new(MemoryObjectStore::new()), &config.store_pathname)
        } else if let Some(token) = &config.store_token {
            let client: Arc<dyn ObjectStore> = Arc::new(
                BlobClient::new(config.store_api_url.clone(), token.clone())
                    .context("Building the object store client")?,
            );
            MutableStore::new(client, &config.store_pathname)
        } else {
            warn!("BLOB_READ_WRITE_TOKEN is not set; serving the post corpus only and rejecting submissions");
            MutableStore::unconfigured()
        };
        if config.api_key.is_none() {
            warn!("BLOG_API_KEY is not set; post submissions will be rejected");
        }

        let aggregator = Aggregator::new(Corpus::new(&config.posts_directory), store.clone())
            .with_dedupe_listing(config.dedupe_listing);
        let limiter = Arc::new(MemoryRateLimiter::new(config.rate_limit));
        Ok(AppState {
            aggregator,
            ingestor: Arc::new(Ingestor::new(store, limiter, config.api_key.clone())),
            renderer: Arc::new(Renderer::new(config.site.clone())),
        })
    }
}

/// Build the axum router with every endpoint.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/posts/:slug", get(post_handler))
        .route("/sitemap.xml", get(sitemap_handler))
        .route("/manifest.webmanifest", get(manifest_handler))
        .route("/feed.atom", get(feed_handler))
        .route("/api/posts", get(usage_handler).post(create_post_handler))
        .route("/api/posts/debug", get(debug_handler))
        .fallback(not_found_handler)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start serving requests.
pub async fn serve(config: Config, memory_store: bool) -> anyhow::Result<()> {
    let app = build_router(AppState::from_config(&config, memory_store)?);
    let listener = TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("Binding {}", config.bind))?;
    info!("quire listening on {}", config.bind);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Serving HTTP")
}

async fn usage_handler() -> Json<Value> {
    Json(json!({
        "message": "Blog API Endpoint",
        "usage": {
            "method": "POST",
            "url": "/api/posts",
            "headers": {
                "Content-Type": "application/json",
                "Authorization": "Bearer YOUR_API_KEY",
                "x-api-key": "YOUR_API_KEY (alternative to Authorization)",
            },
            "body": {
                "title": "string (required, at most 200 characters)",
                "content": "string (required, markdown)",
                "excerpt": "string (optional, at most 500 characters)",
                "tags": "array or string (optional, at most 10 tags of 50 characters)",
                "author": "string (optional, defaults to \"SDAD\")",
                "date": "ISO date string (optional, defaults to current date)",
                "image": "string URL (optional)",
                "published": "boolean (optional, defaults to true)",
            },
        },
        "example": {
            "title": "My First Blog Post",
            "content": "# Hello World\n\nThis is my first blog post!",
            "excerpt": "A brief description of the post",
            "tags": ["blog", "first-post"],
            "author": "SDAD",
            "published": true,
        },
    }))
}

async fn create_post_handler(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let address = client_address(&headers, connect_info.map(|ConnectInfo(addr)| addr));
    let caller = Caller {
        address: &address,
        api_key: api_key(&headers),
    };
    match state.ingestor.create_post(&caller, &body).await {
        Ok(created) => (
            StatusCode::CREATED,
            Json(json!({
                "success": true,
                "message": "Blog post created successfully",
                "slug": created.slug,
                "title": created.title,
                "date": created.date,
                "published": created.published,
            })),
        )
            .into_response(),
        Err(e) => ingest_error_response(e),
    }
}

fn ingest_error_response(e: ingest::Error) -> Response {
    let status = StatusCode::from_u16(e.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut body = json!({ "error": e.to_string() });
    if let Some(details) = e.details() {
        error!(error = %e, %details, "post submission failed");
        body["details"] = Value::String(details);
    } else {
        info!(status = status.as_u16(), error = %e, "post submission rejected");
    }
    let mut response = (status, Json(body)).into_response();
    if let ingest::Error::RateLimited { retry_after_secs } = e {
        if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
    }
    response
}

/// Takes the key from `Authorization: Bearer …`, falling back to
/// `x-api-key`.
fn api_key(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.strip_prefix("Bearer ").unwrap_or(value))
        .filter(|key| !key.is_empty());
    bearer.or_else(|| {
        headers
            .get("x-api-key")
            .and_then(|value| value.to_str().ok())
            .filter(|key| !key.is_empty())
    })
}

/// Best-effort client address: the first `x-forwarded-for` hop, then
/// `x-real-ip`, then the peer address.
fn client_address(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    let real_ip = headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    match (forwarded.or(real_ip), peer) {
        (Some(address), _) => address.to_owned(),
        (None, Some(peer)) => peer.ip().to_string(),
        (None, None) => String::from("unknown"),
    }
}

/// Reports configuration and both sources' contents. Unauthenticated.
async fn debug_handler(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.aggregator.snapshot().await;
    let summary = |posts: &[Post]| {
        json!({
            "count": posts.len(),
            "posts": posts
                .iter()
                .map(|p| json!({
                    "slug": p.slug,
                    "title": p.title,
                    "date": p.date,
                    "published": p.published,
                    "excerpt": p.excerpt.chars().take(100).collect::<String>(),
                }))
                .collect::<Vec<Value>>(),
        })
    };
    Json(json!({
        "status": "ok",
        "configuration": {
            "storeConfigured": state.aggregator.store().is_configured(),
            "storePathname": state.aggregator.store().pathname(),
            "apiKeyConfigured": state.ingestor.has_api_key(),
            "dedupeListing": state.aggregator.dedupe_listing(),
            "postsDirectory": state.aggregator.corpus().directory().display().to_string(),
        },
        "totalPosts": snapshot.merged.len(),
        "corpus": summary(&snapshot.corpus),
        "store": summary(&snapshot.store),
        "merged": summary(&snapshot.merged),
    }))
}

async fn index_handler(State(state): State<AppState>) -> Response {
    let posts = state.aggregator.list_posts().await;
    html_response(StatusCode::OK, state.renderer.index_page(&posts))
}

async fn post_handler(State(state): State<AppState>, Path(slug): Path<String>) -> Response {
    match state.aggregator.get_post(&slug).await {
        Some(post) => {
            let all = state.aggregator.list_posts().await;
            html_response(StatusCode::OK, state.renderer.post_page(&post, &all))
        }
        None => html_response(StatusCode::NOT_FOUND, state.renderer.not_found_page()),
    }
}

async fn not_found_handler(State(state): State<AppState>) -> Response {
    html_response(StatusCode::NOT_FOUND, state.renderer.not_found_page())
}

fn html_response(status: StatusCode, page: render::Result<String>) -> Response {
    match page {
        Ok(html) => (status, Html(html)).into_response(),
        Err(e) => {
            error!(error = %e, "rendering page");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
        }
    }
}

async fn sitemap_handler(State(state): State<AppState>) -> Response {
    let posts = state.aggregator.list_posts().await;
    let xml = seo::sitemap_xml(&state.renderer.site().url, &posts, Utc::now());
    ([(header::CONTENT_TYPE, "application/xml")], xml).into_response()
}

async fn manifest_handler(State(state): State<AppState>) -> Response {
    (
        [(header::CONTENT_TYPE, "application/manifest+json")],
        seo::manifest(state.renderer.site()).to_string(),
    )
        .into_response()
}

async fn feed_handler(State(state): State<AppState>) -> Response {
    let posts = state.aggregator.list_posts().await;
    match write_feed(state.renderer.site(), &posts, Utc::now()) {
        Ok(xml) => ([(header::CONTENT_TYPE, "application/atom+xml")], xml).into_response(),
        Err(e) => {
            error!(error = %e, "writing feed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
        }
    }
}
