//! Page-cache middleware.
//!
//! Checks for a cached page before the handler runs; on a miss, captures the
//! rendered output after it completes. Cache hits carry `X-Cache: HIT` plus
//! age/expiry headers; misses that were captured carry `X-Cache: MISS`.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::counter;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc2822;
use tracing::{debug, instrument};

use super::cache::{PageCache, PageEntry};
use super::dynamic::TokenMinter;
use super::eligibility::EligibilityPolicy;
use super::variation::{VariationAxis, VariationDescriptor};

const METRIC_PAGE_HIT: &str = "quizcache_page_hit_total";
const METRIC_PAGE_MISS: &str = "quizcache_page_miss_total";

/// Response headers replayed from the cached entry.
const REPLAYED_HEADERS: &[&str] = &["content-type", "content-language", "vary"];

/// Supplies session-scoped token minting for the current request.
pub trait SessionProvider: Send + Sync {
    fn tokens_for(&self, headers: &HeaderMap) -> Arc<dyn TokenMinter>;
}

/// Shared state for the page-cache middleware.
#[derive(Clone)]
pub struct PageCacheState {
    pub pages: Arc<PageCache>,
    pub policy: Arc<EligibilityPolicy>,
    pub sessions: Arc<dyn SessionProvider>,
    /// Additionally registered variation axes.
    pub axes: Vec<Arc<dyn VariationAxis>>,
}

/// Middleware for full-page caching.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn page_cache_layer(
    State(state): State<PageCacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if let Err(reason) = state
        .policy
        .check(request.method(), request.uri(), request.headers())
    {
        debug!(reason = %reason, "page cache bypassed");
        return next.run(request).await;
    }

    let host = request
        .headers()
        .get("host")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost")
        .to_string();
    let path = request.uri().path().to_string();
    let variation = VariationDescriptor::from_request(request.headers(), &state.axes);

    if let Some(entry) = state.pages.lookup(&host, &path, &variation) {
        counter!(METRIC_PAGE_HIT).increment(1);
        debug!(cache = "page", outcome = "hit", "serving cached page");
        let minter = state.sessions.tokens_for(request.headers());
        let body = state.pages.serve(&entry, minter.as_ref());
        return build_hit_response(&entry, body);
    }

    counter!(METRIC_PAGE_MISS).increment(1);
    debug!(cache = "page", outcome = "miss", "rendering");

    // Stampede claim: a concurrent request already rendering this key keeps
    // us from storing a duplicate; we still render and serve normally.
    let key = state.pages.cache_key(&host, &path, &variation);
    let claimed = state.pages.try_claim(&key);

    let response = next.run(request).await;

    if response.status() != StatusCode::OK {
        if claimed {
            state.pages.release_claim(&key);
        }
        return response;
    }

    // Buffer the full body: the size gates apply to capture, not to serving.
    // An over-cap render is served as rendered and merely skipped by store.
    let (parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => {
            if claimed {
                state.pages.release_claim(&key);
            }
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if claimed {
        if let Ok(content) = std::str::from_utf8(&bytes) {
            let headers = replayable_headers(&parts.headers);
            if let Err(err) =
                state
                    .pages
                    .store(&host, &path, &variation, content.to_string(), headers)
            {
                debug!(error = %err, "page store failed; serving uncached");
            }
        }
        state.pages.release_claim(&key);
    }

    let mut response = Response::from_parts(parts, Body::from(bytes));
    response
        .headers_mut()
        .insert("x-cache", HeaderValue::from_static("MISS"));
    response
}

fn replayable_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|(name, _)| REPLAYED_HEADERS.contains(&name.as_str()))
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

fn build_hit_response(entry: &PageEntry, body: String) -> Response {
    let now = OffsetDateTime::now_utc();
    let mut builder = Response::builder().status(StatusCode::OK);

    for (name, value) in &entry.headers {
        if let Ok(header_value) = HeaderValue::from_str(value) {
            builder = builder.header(name.as_str(), header_value);
        }
    }

    builder = builder
        .header("x-cache", "HIT")
        .header("x-cache-age", entry.age_secs(now).to_string());
    if let Ok(expires) = OffsetDateTime::from_unix_timestamp(entry.expires_at())
        .map_err(|_| ())
        .and_then(|at| at.format(&Rfc2822).map_err(|_| ()))
    {
        builder = builder.header("x-cache-expires", expires);
    }

    builder
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
