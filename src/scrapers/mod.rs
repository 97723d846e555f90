//! Listing page fetching and headline collection.
//!
//! Each cycle follows the same two steps for every configured source:
//!
//! 1. **Fetching**: download the listing page through a [`PageFetcher`]
//! 2. **Extracting**: select headline anchors with [`listing::extract_items`]
//!
//! Sources are fetched concurrently. A source that fails (network error,
//! non-200 status, bad markup) is logged and skipped for this cycle; the
//! remaining sources are still processed.

pub mod listing;

use crate::error::{DigestError, DigestResult};
use crate::models::{NewsItem, NewsSource};
use crate::sent::SentLinks;
use futures::future::join_all;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};

const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Anything that can download a listing page.
pub trait PageFetcher {
    /// Fetch `url` and return the response body.
    async fn fetch(&self, url: &str) -> DigestResult<String>;
}

/// [`PageFetcher`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Build a fetcher with a flat per-request timeout.
    pub fn new(timeout: Duration) -> DigestResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml"),
        );
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl PageFetcher for HttpFetcher {
    #[instrument(level = "info", skip(self))]
    async fn fetch(&self, url: &str) -> DigestResult<String> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        info!(status = status.as_u16(), "Listing page response");
        if status != reqwest::StatusCode::OK {
            return Err(DigestError::Status {
                service: "news source",
                status: status.as_u16(),
                body: String::new(),
            });
        }
        Ok(response.text().await?)
    }
}

/// Headlines gathered in one cycle plus per-source success counts.
#[derive(Debug, Default)]
pub struct Collected {
    pub items: Vec<NewsItem>,
    pub sources_ok: usize,
    pub sources_failed: usize,
}

/// Fetch every source and return the headlines whose URL has not been sent.
///
/// Items keep source order, then page order within a source.
#[instrument(level = "info", skip_all, fields(sources = sources.len()))]
pub async fn collect_new_items<F: PageFetcher>(
    fetcher: &F,
    sources: &[NewsSource],
    sent: &SentLinks,
    per_source_limit: usize,
) -> Collected {
    let fetches = sources.iter().map(|source| async move {
        let t0 = Instant::now();
        let result = match fetcher.fetch(&source.url).await {
            Ok(html) => listing::extract_items(source, &html, per_source_limit),
            Err(e) => Err(e),
        };
        (source, result, t0.elapsed())
    });

    let mut collected = Collected::default();
    for (source, result, elapsed) in join_all(fetches).await {
        match result {
            Ok(items) => {
                collected.sources_ok += 1;
                let found = items.len();
                let fresh: Vec<NewsItem> =
                    items.into_iter().filter(|i| !sent.contains(&i.url)).collect();
                if found == 0 {
                    warn!(source = %source.name, "Selector matched no headlines");
                }
                info!(
                    source = %source.name,
                    found,
                    new = fresh.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Parsed source"
                );
                collected.items.extend(fresh);
            }
            Err(e) => {
                collected.sources_failed += 1;
                error!(
                    source = %source.name,
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %e,
                    "Source failed; skipping for this cycle"
                );
            }
        }
    }

    info!(
        count = collected.items.len(),
        ok = collected.sources_ok,
        failed = collected.sources_failed,
        "Collected new articles"
    );
    collected
}
