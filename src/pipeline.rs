//! The fetch → filter → digest → publish cycle and the timer loop around it.

use crate::api::{Digester, generate_digest};
use crate::commands::Subscribers;
use crate::error::DigestResult;
use crate::filter::{apply_quota, dedupe};
use crate::models::{CycleReport, NewsSource};
use crate::publish::{Publisher, publish_digest};
use crate::scrapers::{PageFetcher, collect_new_items};
use crate::sent::SentLinks;
use chrono::Local;
use std::time::{Duration, Instant};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info, instrument};

/// Knobs for a single cycle.
#[derive(Debug, Clone)]
pub struct CycleSettings {
    /// Chat id or `@username` of the channel every digest goes to.
    pub channel_id: String,
    /// Selector matches considered per source.
    pub per_source_limit: usize,
    /// Items per digest, shared round-robin between sources.
    pub max_items: usize,
    /// Request an illustration and post the digest as a photo.
    pub with_image: bool,
}

/// Owns the collaborators and the sent-links set for the process lifetime.
///
/// Generic over its three network seams so cycles can run against
/// in-memory fakes.
pub struct Pipeline<F, D, P> {
    pub(crate) fetcher: F,
    pub(crate) digester: D,
    pub(crate) publisher: P,
    pub(crate) sources: Vec<NewsSource>,
    pub(crate) settings: CycleSettings,
    pub(crate) subscribers: Subscribers,
    pub(crate) sent: SentLinks,
}

impl<F, D, P> Pipeline<F, D, P>
where
    F: PageFetcher,
    D: Digester,
    P: Publisher,
{
    /// Assemble a pipeline with an empty sent-links set.
    ///
    /// # Arguments
    ///
    /// * `fetcher` - Downloads listing pages
    /// * `digester` - Writes the digest (and illustration)
    /// * `publisher` - Posts to the channel and subscribers
    /// * `sources` - Sites scraped every cycle, in prompt order
    /// * `settings` - Per-cycle limits and the target channel
    /// * `subscribers` - Chats added through `/start`, shared with the poller
    pub fn new(
        fetcher: F,
        digester: D,
        publisher: P,
        sources: Vec<NewsSource>,
        settings: CycleSettings,
        subscribers: Subscribers,
    ) -> Self {
        Self {
            fetcher,
            digester,
            publisher,
            sources,
            settings,
            subscribers,
            sent: SentLinks::new(),
        }
    }

    /// Run one cycle.
    ///
    /// Links are marked as sent only once the channel post succeeded, so a
    /// failed completion or publish leaves the items eligible next cycle.
    #[instrument(level = "info", skip_all, fields(started_at = %Local::now().format("%H:%M:%S")))]
    pub async fn run_cycle(&mut self) -> DigestResult<CycleReport> {
        let collected = collect_new_items(
            &self.fetcher,
            &self.sources,
            &self.sent,
            self.settings.per_source_limit,
        )
        .await;

        let mut report = CycleReport {
            sources_ok: collected.sources_ok,
            sources_failed: collected.sources_failed,
            ..Default::default()
        };

        let fresh = dedupe(collected.items, &self.sent);
        report.new_items = fresh.len();
        if fresh.is_empty() {
            info!("No new articles");
            return Ok(report);
        }

        let batch = apply_quota(fresh, self.settings.max_items);
        report.digest_items = batch.len();

        let digest = generate_digest(&self.digester, batch, self.settings.with_image).await?;
        publish_digest(
            &self.publisher,
            &self.settings.channel_id,
            &self.subscribers.snapshot(),
            &digest,
        )
        .await?;

        self.sent.mark_all(&digest.items);
        report.published = true;
        info!(sent_links = self.sent.len(), "Marked digest items as sent");
        Ok(report)
    }

    /// Run cycles forever, the first one immediately.
    ///
    /// A failed cycle is logged and the loop waits for the next tick.
    pub async fn run(&mut self, every: Duration) {
        info!(interval_secs = every.as_secs(), sources = self.sources.len(), "Starting main loop");
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.run_once().await;
        }
    }

    /// Run one cycle and log its outcome.
    pub async fn run_once(&mut self) -> Option<CycleReport> {
        let t0 = Instant::now();
        match self.run_cycle().await {
            Ok(report) => {
                info!(
                    elapsed_ms = t0.elapsed().as_millis() as u64,
                    sources_ok = report.sources_ok,
                    sources_failed = report.sources_failed,
                    new_items = report.new_items,
                    digest_items = report.digest_items,
                    published = report.published,
                    "Cycle complete"
                );
                Some(report)
            }
            Err(e) => {
                error!(elapsed_ms = t0.elapsed().as_millis() as u64, error = %e, "Cycle failed; nothing published");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::FakeDigester;
    use crate::publish::tests::{FakePublisher, Sent};
    use crate::scrapers::tests::{FakeFetcher, sources};
    use std::sync::atomic::Ordering;

    const ALPHA: &str = r#"
        <a class="story" href="/a1">Alpha one</a>
        <a class="story" href="/a2">Alpha two</a>
    "#;
    const BETA: &str = r#"<a class="story" href="https://beta.test/b1">Beta one</a>"#;

    fn settings() -> CycleSettings {
        CycleSettings {
            channel_id: "@digest".into(),
            per_source_limit: 10,
            max_items: 15,
            with_image: false,
        }
    }

    fn pipeline(
        fetcher: FakeFetcher,
        digester: FakeDigester,
        publisher: FakePublisher,
    ) -> Pipeline<FakeFetcher, FakeDigester, FakePublisher> {
        Pipeline::new(
            fetcher,
            digester,
            publisher,
            sources(),
            settings(),
            Subscribers::new(),
        )
    }

    fn both_pages() -> FakeFetcher {
        FakeFetcher::default()
            .with_page("https://alpha.test/", ALPHA)
            .with_page("https://beta.test/", BETA)
    }

    #[tokio::test]
    async fn test_cycle_publishes_and_marks_links() {
        let mut p = pipeline(both_pages(), FakeDigester::default(), FakePublisher::default());

        let report = p.run_cycle().await.unwrap();

        assert_eq!(report.sources_ok, 2);
        assert_eq!(report.new_items, 3);
        assert_eq!(report.digest_items, 3);
        assert!(report.published);
        assert_eq!(p.sent.len(), 3);
        assert!(p.sent.contains("https://alpha.test/a1"));
        assert!(p.sent.contains("https://beta.test/b1"));

        let prompts = p.digester.prompts.lock().unwrap().clone();
        assert!(prompts[0].contains("Alpha one (Alpha)"));
        assert!(prompts[0].contains("Beta one (Beta)"));
        assert_eq!(
            p.publisher.sent(),
            vec![Sent::Message {
                chat: "@digest".into(),
                text: "Today in crypto: things happened.".into()
            }]
        );
    }

    #[tokio::test]
    async fn test_sent_links_are_never_reemitted() {
        let mut p = pipeline(both_pages(), FakeDigester::default(), FakePublisher::default());

        assert!(p.run_cycle().await.unwrap().published);
        let second = p.run_cycle().await.unwrap();

        assert_eq!(second.new_items, 0);
        assert!(!second.published);
        assert_eq!(p.digester.completions.load(Ordering::SeqCst), 1);
        assert_eq!(p.publisher.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_only_new_links_reach_the_digest() {
        let mut p = pipeline(both_pages(), FakeDigester::default(), FakePublisher::default());
        p.sent.insert("https://alpha.test/a1");
        p.sent.insert("https://beta.test/b1");

        let report = p.run_cycle().await.unwrap();

        assert_eq!(report.new_items, 1);
        let prompts = p.digester.prompts.lock().unwrap().clone();
        assert!(prompts[0].contains("Alpha two"));
        assert!(!prompts[0].contains("Alpha one"));
        assert!(!prompts[0].contains("Beta one"));
    }

    #[tokio::test]
    async fn test_near_duplicate_is_not_posted_in_a_later_cycle() {
        let fetcher = FakeFetcher::default()
            .with_page(
                "https://alpha.test/",
                r#"<a class="story" href="/etf">SEC approves ETH ETFs</a>"#,
            )
            .with_page(
                "https://beta.test/",
                r#"<a class="story" href="/eth-etf">SEC approves ETH ETFs!</a>"#,
            );
        let mut p = pipeline(fetcher, FakeDigester::default(), FakePublisher::default());

        let first = p.run_cycle().await.unwrap();
        assert_eq!(first.new_items, 1);
        assert!(first.published);

        let second = p.run_cycle().await.unwrap();
        assert_eq!(second.new_items, 0);
        assert!(!second.published);
        assert_eq!(p.digester.completions.load(Ordering::SeqCst), 1);
        assert_eq!(p.publisher.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_no_new_items_means_no_calls() {
        let fetcher = FakeFetcher::default()
            .with_page("https://alpha.test/", "<p>nothing</p>")
            .with_page("https://beta.test/", "<p>nothing</p>");
        let mut p = pipeline(fetcher, FakeDigester::default(), FakePublisher::default());

        let report = p.run_cycle().await.unwrap();

        assert_eq!(report.new_items, 0);
        assert!(!report.published);
        assert_eq!(p.digester.completions.load(Ordering::SeqCst), 0);
        assert_eq!(p.digester.images.load(Ordering::SeqCst), 0);
        assert!(p.publisher.sent().is_empty());
    }

    #[tokio::test]
    async fn test_failing_source_does_not_block_cycle() {
        let fetcher = FakeFetcher::default().with_page("https://beta.test/", BETA);
        let mut p = pipeline(fetcher, FakeDigester::default(), FakePublisher::default());

        let report = p.run_cycle().await.unwrap();

        assert_eq!(report.sources_failed, 1);
        assert_eq!(report.sources_ok, 1);
        assert!(report.published);
        assert!(p.sent.contains("https://beta.test/b1"));
    }

    #[tokio::test]
    async fn test_completion_failure_marks_nothing() {
        let digester = FakeDigester {
            fail_first: 1,
            ..Default::default()
        };
        let mut p = pipeline(both_pages(), digester, FakePublisher::default());

        assert!(p.run_cycle().await.is_err());
        assert!(p.sent.is_empty());
        assert!(p.publisher.sent().is_empty());

        // The same items go out on the next cycle.
        let report = p.run_cycle().await.unwrap();
        assert!(report.published);
        assert_eq!(p.sent.len(), 3);
    }

    #[tokio::test]
    async fn test_channel_failure_marks_nothing() {
        let publisher = FakePublisher {
            failing: vec!["@digest".into()],
            ..Default::default()
        };
        let mut p = pipeline(both_pages(), FakeDigester::default(), publisher);

        assert!(p.run_once().await.is_none());
        assert!(p.sent.is_empty());
    }

    #[tokio::test]
    async fn test_quota_leaves_rest_for_next_cycle() {
        let mut p = pipeline(both_pages(), FakeDigester::default(), FakePublisher::default());
        p.settings.max_items = 2;

        let first = p.run_cycle().await.unwrap();
        assert_eq!(first.new_items, 3);
        assert_eq!(first.digest_items, 2);
        assert!(p.sent.contains("https://alpha.test/a1"));
        assert!(p.sent.contains("https://beta.test/b1"));

        let second = p.run_cycle().await.unwrap();
        assert_eq!(second.digest_items, 1);
        assert!(p.sent.contains("https://alpha.test/a2"));
    }

    #[tokio::test]
    async fn test_subscribers_receive_digest() {
        let mut p = pipeline(both_pages(), FakeDigester::default(), FakePublisher::default());
        p.subscribers.add(99);

        p.run_cycle().await.unwrap();

        let chats: Vec<String> = p
            .publisher
            .sent()
            .into_iter()
            .map(|s| match s {
                Sent::Message { chat, .. } | Sent::Photo { chat, .. } => chat,
            })
            .collect();
        assert_eq!(chats, vec!["@digest", "99"]);
    }

    #[tokio::test]
    async fn test_image_digest_is_sent_as_photo() {
        let mut p = pipeline(both_pages(), FakeDigester::default(), FakePublisher::default());
        p.settings.with_image = true;

        p.run_cycle().await.unwrap();

        assert!(matches!(
            &p.publisher.sent()[..],
            [Sent::Photo { caption: Some(_), .. }]
        ));
    }
}
