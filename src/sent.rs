//! The in-memory record of what has been published.
//!
//! This is the only state the bot keeps. It lives for the lifetime of the
//! process, only ever grows, and is lost on restart.

use crate::models::NewsItem;
use crate::utils::normalize_title;
use std::collections::HashSet;

/// URLs, and normalized headlines, that have already been published.
///
/// Headlines are kept alongside URLs so that the same story carried by a
/// second outlet under its own URL is not posted after the first one was.
#[derive(Debug, Default)]
pub struct SentLinks {
    /// Absolute article URLs.
    links: HashSet<String>,
    /// [`normalize_title`] keys of published headlines.
    titles: HashSet<String>,
}

impl SentLinks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.links.contains(url)
    }

    /// Whether a headline with the same normalized text was published.
    ///
    /// # Arguments
    ///
    /// * `title_key` - a key produced by [`normalize_title`]
    pub fn contains_title_key(&self, title_key: &str) -> bool {
        self.titles.contains(title_key)
    }

    /// Record a single URL. Returns `false` if it was already present.
    #[cfg(test)]
    pub fn insert(&mut self, url: impl Into<String>) -> bool {
        self.links.insert(url.into())
    }

    /// Record every item of a published digest, URL and headline.
    pub fn mark_all<'a>(&mut self, items: impl IntoIterator<Item = &'a NewsItem>) {
        for item in items {
            self.links.insert(item.url.clone());
            self.titles.insert(normalize_title(&item.title));
        }
    }

    /// Number of published URLs.
    pub fn len(&self) -> usize {
        self.links.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}
