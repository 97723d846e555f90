//! Headline extraction from a listing page.
//!
//! Every configured source is scraped the same way: select the headline
//! anchors with the source's CSS selector, keep the first few, and resolve
//! their `href` against the listing page URL.

use crate::error::{DigestError, DigestResult};
use crate::models::{NewsItem, NewsSource};
use crate::utils::collapse_whitespace;
use scraper::Html;
use tracing::{debug, instrument};
use url::Url;

/// Extract up to `limit` headlines from a listing page.
///
/// The limit applies to selector matches, before empty matches are skipped,
/// so a page full of icon-only links yields fewer than `limit` items rather
/// than reaching further down the page.
///
/// Matches with no `href` or no visible text are skipped. Relative links are
/// resolved against [`NewsSource::url`]; links that cannot be resolved, or
/// that resolve to something other than http(s), are skipped too.
#[instrument(level = "debug", skip(html), fields(source = %source.name))]
pub fn extract_items(source: &NewsSource, html: &str, limit: usize) -> DigestResult<Vec<NewsItem>> {
    let base = Url::parse(&source.url)
        .map_err(|e| DigestError::Config(format!("source {}: bad url: {e}", source.name)))?;
    let selector = source.parsed_selector()?;
    let document = Html::parse_document(html);

    let mut items = Vec::new();
    let matches = document.select(&selector);
    for element in matches.take(limit) {
        let Some(href) = element.value().attr("href").map(str::trim) else {
            continue;
        };
        let title = collapse_whitespace(&element.text().collect::<String>());
        if href.is_empty() || title.is_empty() {
            continue;
        }

        let url = match base.join(href) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => url,
            Ok(url) => {
                debug!(%url, "Skipping non-http link");
                continue;
            }
            Err(e) => {
                debug!(href, error = %e, "Skipping unresolvable link");
                continue;
            }
        };

        items.push(NewsItem {
            source: source.name.clone(),
            title,
            url: url.to_string(),
        });
    }

    debug!(count = items.len(), "Extracted headlines");
    Ok(items)
}
