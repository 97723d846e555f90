//! Data models for scraped headlines, configured sources and generated digests.
//!
//! - [`NewsItem`]: one headline scraped from a listing page during a cycle
//! - [`NewsSource`]: a site to scrape, with the selector that finds its headlines
//! - [`Digest`]: the generated post and the items it covers
//! - [`CycleReport`]: counters for one fetch/filter/publish cycle

use crate::error::{DigestError, DigestResult};
use scraper::Selector;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, instrument};

/// A headline scraped from a source's listing page.
///
/// Items are built fresh every cycle and dropped once they are either
/// published or filtered out. `url` is always absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewsItem {
    /// Name of the [`NewsSource`] the item was found on.
    pub source: String,
    /// Headline text, whitespace-collapsed.
    pub title: String,
    /// Absolute article URL.
    pub url: String,
}

/// A news site to scrape.
///
/// Sources are fixed at startup: either the built-in [`NewsSource::defaults`]
/// or a YAML list loaded with [`load_sources`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsSource {
    /// Display name, included in the prompt next to each headline.
    pub name: String,
    /// Listing page URL. Relative article links are resolved against it.
    pub url: String,
    /// CSS selector matching the headline anchors on the listing page.
    pub selector: String,
}

impl NewsSource {
    pub fn new(name: &str, url: &str, selector: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            selector: selector.to_string(),
        }
    }

    /// Built-in crypto news sources.
    pub fn defaults() -> Vec<NewsSource> {
        vec![
            NewsSource::new(
                "Cointelegraph",
                "https://cointelegraph.com/",
                "a.post-card-inline__title-link",
            ),
            NewsSource::new("Decrypt", "https://decrypt.co/", "a.heading"),
        ]
    }

    /// Parse this source's selector.
    pub fn parsed_selector(&self) -> DigestResult<Selector> {
        Selector::parse(&self.selector).map_err(|_| DigestError::Selector {
            source_name: self.name.clone(),
            selector: self.selector.clone(),
        })
    }

    /// Reject sources that could never yield an item.
    pub fn validate(&self) -> DigestResult<()> {
        if self.name.trim().is_empty() {
            return Err(DigestError::Config(format!(
                "source with url {} has no name",
                self.url
            )));
        }
        url::Url::parse(&self.url)
            .map_err(|e| DigestError::Config(format!("source {}: bad url: {e}", self.name)))?;
        self.parsed_selector()?;
        Ok(())
    }
}

/// Load sources from a YAML file containing a list of `{name, url, selector}`.
///
/// An empty list is rejected: a bot with nothing to scrape would loop forever
/// without ever posting.
#[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
pub fn load_sources(path: impl AsRef<Path>) -> DigestResult<Vec<NewsSource>> {
    let raw = std::fs::read_to_string(path.as_ref())?;
    let sources: Vec<NewsSource> = serde_yaml::from_str(&raw)?;
    if sources.is_empty() {
        return Err(DigestError::Config("sources file lists no sources".into()));
    }
    for source in &sources {
        source.validate()?;
    }
    info!(count = sources.len(), "Loaded sources file");
    Ok(sources)
}

/// A generated post, ready to publish.
#[derive(Debug, Clone)]
pub struct Digest {
    /// Text returned by the completion API.
    pub text: String,
    /// Optional illustration URL returned by the image API.
    pub image_url: Option<String>,
    /// The items the text was generated from. Marked as sent after publishing.
    pub items: Vec<NewsItem>,
}

/// Counters for a single cycle, logged by the scheduler.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub sources_ok: usize,
    pub sources_failed: usize,
    /// Items that survived the sent-links and duplicate filters.
    pub new_items: usize,
    /// Items that made it into the digest after the source quota.
    pub digest_items: usize,
    pub published: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_sources_are_valid() {
        let sources = NewsSource::defaults();
        assert_eq!(sources.len(), 2);
        for source in &sources {
            assert!(source.validate().is_ok(), "{} should validate", source.name);
        }
    }

    #[test]
    fn test_invalid_selector_is_rejected() {
        let source = NewsSource::new("Broken", "https://example.com/", "a[[");
        match source.validate() {
            Err(DigestError::Selector { source_name, .. }) => assert_eq!(source_name, "Broken"),
            other => panic!("expected selector error, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        let source = NewsSource::new("Broken", "not a url", "a");
        assert!(matches!(source.validate(), Err(DigestError::Config(_))));
    }

    #[test]
    fn test_load_sources_from_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
- name: Example
  url: https://example.com/news/
  selector: "h2 > a"
- name: Other
  url: https://other.org/
  selector: a.title
"#
        )
        .unwrap();

        let sources = load_sources(file.path()).unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].name, "Example");
        assert_eq!(sources[0].selector, "h2 > a");
        assert_eq!(sources[1].url, "https://other.org/");
    }

    #[test]
    fn test_load_sources_rejects_empty_list() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[]").unwrap();
        assert!(matches!(load_sources(file.path()), Err(DigestError::Config(_))));
    }
}
