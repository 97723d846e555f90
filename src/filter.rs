//! Per-cycle deduplication and the source quota.

use crate::models::NewsItem;
use crate::sent::SentLinks;
use crate::utils::normalize_title;
use itertools::Itertools;
use std::collections::{HashSet, VecDeque};
use tracing::debug;

/// Drop repeated URLs and near-duplicate headlines, keeping the first
/// occurrence of each.
///
/// Two outlets often run the same wire story under an identical headline;
/// after [`normalize_title`] those collapse to one item. A headline already
/// published in an earlier cycle is dropped too, whatever its URL.
///
/// # Arguments
///
/// * `items` - candidates in source order, already filtered by URL
/// * `sent` - the process-lifetime record of published links and headlines
pub fn dedupe(items: Vec<NewsItem>, sent: &SentLinks) -> Vec<NewsItem> {
    let before = items.len();
    let mut seen_titles = HashSet::new();
    let kept: Vec<NewsItem> = items
        .into_iter()
        .unique_by(|i| i.url.clone())
        .filter(|i| {
            let key = normalize_title(&i.title);
            !sent.contains_title_key(&key) && seen_titles.insert(key)
        })
        .collect();
    if kept.len() != before {
        debug!(before, after = kept.len(), "Dropped duplicate headlines");
    }
    kept
}

/// Take at most `max_items`, alternating between sources.
///
/// Items are grouped by source in order of first appearance, then picked
/// round-robin, so a site with a long listing cannot crowd out the others.
/// Within a source, page order is kept.
pub fn apply_quota(items: Vec<NewsItem>, max_items: usize) -> Vec<NewsItem> {
    if items.len() <= max_items {
        return items;
    }

    let mut order: Vec<String> = Vec::new();
    let mut groups: Vec<VecDeque<NewsItem>> = Vec::new();
    for item in items {
        match order.iter().position(|s| *s == item.source) {
            Some(idx) => groups[idx].push_back(item),
            None => {
                order.push(item.source.clone());
                groups.push(VecDeque::from([item]));
            }
        }
    }

    let mut picked = Vec::with_capacity(max_items);
    while picked.len() < max_items {
        let mut progressed = false;
        for group in groups.iter_mut() {
            if picked.len() == max_items {
                break;
            }
            if let Some(item) = group.pop_front() {
                picked.push(item);
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
    picked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(source: &str, title: &str, url: &str) -> NewsItem {
        NewsItem {
            source: source.into(),
            title: title.into(),
            url: url.into(),
        }
    }

    #[test]
    fn test_dedupe_by_url() {
        let items = vec![
            item("A", "One", "https://a.test/1"),
            item("A", "One again", "https://a.test/1"),
            item("A", "Two", "https://a.test/2"),
        ];
        let kept = dedupe(items, &SentLinks::new());
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].title, "One");
    }

    #[test]
    fn test_dedupe_near_duplicate_titles_across_sources() {
        let items = vec![
            item("A", "SEC approves ETH ETFs!", "https://a.test/1"),
            item("B", "sec approves  eth etfs", "https://b.test/9"),
            item("B", "Something else", "https://b.test/10"),
        ];
        let kept = dedupe(items, &SentLinks::new());
        let sources: Vec<&str> = kept.iter().map(|i| i.source.as_str()).collect();
        assert_eq!(sources, vec!["A", "B"]);
        assert_eq!(kept[1].title, "Something else");
    }

    #[test]
    fn test_dedupe_drops_headlines_published_earlier() {
        let mut sent = SentLinks::new();
        sent.mark_all(&[item("A", "SEC approves ETH ETFs", "https://a.test/1")]);

        let items = vec![
            item("B", "SEC approves ETH ETFs!", "https://b.test/9"),
            item("B", "Something else", "https://b.test/10"),
        ];
        let kept = dedupe(items, &sent);
        let titles: Vec<&str> = kept.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["Something else"]);
    }

    #[test]
    fn test_quota_under_limit_is_untouched() {
        let items = vec![item("A", "1", "u1"), item("A", "2", "u2")];
        assert_eq!(apply_quota(items.clone(), 5), items);
    }

    #[test]
    fn test_quota_round_robins_sources() {
        let items = vec![
            item("A", "a1", "a1"),
            item("A", "a2", "a2"),
            item("A", "a3", "a3"),
            item("A", "a4", "a4"),
            item("B", "b1", "b1"),
            item("C", "c1", "c1"),
            item("C", "c2", "c2"),
        ];
        let picked = apply_quota(items, 5);
        let titles: Vec<&str> = picked.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["a1", "b1", "c1", "a2", "c2"]);
    }

    #[test]
    fn test_quota_zero() {
        let items = vec![item("A", "1", "u1")];
        assert!(apply_quota(items, 0).is_empty());
    }
}
