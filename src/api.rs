//! Completion and image-generation API interaction.
//!
//! # Architecture
//!
//! - [`Digester`]: what the scheduler needs from a model provider
//! - [`OpenAiClient`]: talks to an OpenAI-compatible HTTP API
//! - [`RetryAsk`]: decorator that adds bounded retries to any [`Digester`]
//! - [`generate_digest`]: prompt building plus the optional illustration
//!
//! # Retry Strategy
//!
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
//! ```

use crate::error::{DigestError, DigestResult};
use crate::models::{Digest, NewsItem};
use crate::utils::truncate_for_log;
use rand::{Rng, rng};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::{Duration as StdDuration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Model provider seam used by the scheduler.
pub trait Digester {
    /// Send a prompt and return the completion text.
    async fn complete(&self, prompt: &str) -> DigestResult<String>;

    /// Generate an image for `prompt` and return its URL.
    async fn illustrate(&self, prompt: &str) -> DigestResult<String>;
}

/// Wrapper that adds exponential backoff retry logic to any [`Digester`].
///
/// Both the completion and the image call go through the same policy. The
/// last error is returned once `max_retries` retries have failed.
pub struct RetryAsk<T> {
    /// The underlying provider client.
    inner: T,
    /// Retries after the first attempt; `0` disables retrying.
    max_retries: usize,
    /// Delay before the first retry, doubled for each further one.
    base_delay: StdDuration,
    /// Cap on the doubled delay, before jitter.
    max_delay: StdDuration,
    /// Upper bound of the random jitter added to every delay.
    max_jitter_ms: u64,
}

impl<T> RetryAsk<T>
where
    T: Digester,
{
    /// Create a retry wrapper around an existing [`Digester`].
    ///
    /// # Arguments
    ///
    /// * `inner` - The underlying provider client to wrap
    /// * `max_retries` - Retries after the first failed attempt
    /// * `base_delay` - Initial delay between retries (1 second in production)
    ///
    /// # Example
    ///
    /// ```ignore
    /// let client = OpenAiClient::new(config)?;
    /// let digester = RetryAsk::new(client, 2, Duration::from_secs(1));
    /// ```
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: StdDuration::from_secs(30),
            max_jitter_ms: 250,
        }
    }

    #[cfg(test)]
    pub fn with_max_jitter(mut self, max_jitter_ms: u64) -> Self {
        self.max_jitter_ms = max_jitter_ms;
        self
    }

    #[cfg(test)]
    pub fn inner(&self) -> &T {
        &self.inner
    }

    fn backoff(&self, attempt: usize) -> StdDuration {
        let shift = (attempt - 1).min(16) as u32;
        let delay = self.base_delay.saturating_mul(1 << shift).min(self.max_delay);
        let jitter_ms: u64 = rng().random_range(0..=self.max_jitter_ms);
        delay + StdDuration::from_millis(jitter_ms)
    }

    async fn retry<O, Fut>(&self, label: &'static str, op: impl Fn() -> Fut) -> DigestResult<O>
    where
        Fut: Future<Output = DigestResult<O>>,
    {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match op().await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if attempt > self.max_retries {
                        error!(
                            call = label,
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                            elapsed_ms_total = total_dt.as_millis() as u64,
                            error = %e,
                            "exhausted retries"
                        );
                        return Err(e);
                    }

                    let delay = self.backoff(attempt);
                    warn!(
                        call = label,
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                        elapsed_ms_total = total_dt.as_millis() as u64,
                        ?delay,
                        error = %e,
                        "attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

impl<T> fmt::Debug for RetryAsk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryAsk")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> Digester for RetryAsk<T>
where
    T: Digester,
{
    #[instrument(level = "info", skip_all)]
    async fn complete(&self, prompt: &str) -> DigestResult<String> {
        self.retry("complete", move || self.inner.complete(prompt)).await
    }

    #[instrument(level = "info", skip_all)]
    async fn illustrate(&self, prompt: &str) -> DigestResult<String> {
        self.retry("illustrate", move || self.inner.illustrate(prompt)).await
    }
}

/// Settings for [`OpenAiClient`]. Not `Debug`: it carries the API key.
#[derive(Clone)]
pub struct OpenAiConfig {
    /// Secret sent as a bearer token.
    pub api_key: String,
    /// Sent as the `OpenAI-Organization` header when present.
    pub organization: Option<String>,
    /// API root, e.g. [`DEFAULT_BASE_URL`]; paths are appended to it.
    pub base_url: String,
    /// Chat model that writes the digest (e.g. `gpt-4o-mini`).
    pub model: String,
    /// Sampling temperature for the digest.
    pub temperature: f32,
    /// Model used by `/images/generations` (e.g. `dall-e-3`).
    pub image_model: String,
    /// Requested image size, such as `1024x1024`.
    pub image_size: String,
    /// Whole-request timeout, applied to both endpoints.
    pub timeout: StdDuration,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u8,
    size: &'a str,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    url: Option<String>,
}

/// Client for an OpenAI-compatible chat-completion and image API.
pub struct OpenAiClient {
    http: reqwest::Client,
    config: OpenAiConfig,
}

impl fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .field("image_model", &self.config.image_model)
            .finish()
    }
}

impl OpenAiClient {
    /// Build a client with the auth headers baked into its defaults.
    ///
    /// # Errors
    ///
    /// Returns [`DigestError::Config`] if the key or organization cannot be
    /// sent as a header value, or [`DigestError::Http`] if the TLS backend
    /// fails to initialise.
    pub fn new(config: OpenAiConfig) -> DigestResult<Self> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|_| DigestError::Config("API key is not a valid header value".into()))?;
        headers.insert(AUTHORIZATION, bearer);
        if let Some(org) = &config.organization {
            let org = HeaderValue::from_str(org)
                .map_err(|_| DigestError::Config("organization is not a valid header value".into()))?;
            headers.insert("openai-organization", org);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;
        Ok(Self { http, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn post_json<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> DigestResult<R> {
        let response = self.http.post(self.endpoint(path)).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DigestError::Status {
                service: "completion API",
                status: status.as_u16(),
                body: truncate_for_log(&body, 300),
            });
        }
        Ok(response.json().await?)
    }
}

impl Digester for OpenAiClient {
    #[instrument(level = "info", skip_all, fields(model = %self.config.model))]
    async fn complete(&self, prompt: &str) -> DigestResult<String> {
        let t0 = Instant::now();
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.config.temperature,
        };
        let response: ChatResponse = self.post_json("chat/completions", &request).await?;
        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or(DigestError::EmptyCompletion)?;
        info!(
            elapsed_ms = t0.elapsed().as_millis() as u64,
            chars = text.chars().count(),
            "Completion received"
        );
        Ok(text)
    }

    #[instrument(level = "info", skip_all, fields(model = %self.config.image_model))]
    async fn illustrate(&self, prompt: &str) -> DigestResult<String> {
        let t0 = Instant::now();
        let request = ImageRequest {
            model: &self.config.image_model,
            prompt,
            n: 1,
            size: &self.config.image_size,
        };
        let response: ImageResponse = self.post_json("images/generations", &request).await?;
        let url = response
            .data
            .into_iter()
            .find_map(|d| d.url)
            .ok_or(DigestError::EmptyImage)?;
        info!(elapsed_ms = t0.elapsed().as_millis() as u64, "Image generated");
        Ok(url)
    }
}

/// Build the rewrite prompt for a batch of headlines.
pub fn build_prompt(items: &[NewsItem]) -> String {
    let combined = items
        .iter()
        .map(|n| format!("{} ({})", n.title, n.source))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Rewrite these crypto headlines into one concise Telegram post.\n\
         Avoid repetition.\n\
         \n\
         News:\n\
         {combined}\n"
    )
}

/// Build the illustration prompt from a generated digest.
pub fn build_image_prompt(digest_text: &str) -> String {
    let head: String = digest_text.chars().take(600).collect();
    format!(
        "An editorial illustration for a news digest. No text, letters or logos in the image.\n\n{head}"
    )
}

/// Turn a batch of headlines into a [`Digest`].
///
/// A completion failure fails the whole digest. An image failure only drops
/// the illustration.
#[instrument(level = "info", skip_all, fields(items = items.len(), with_image = with_image))]
pub async fn generate_digest<D: Digester>(
    digester: &D,
    items: Vec<NewsItem>,
    with_image: bool,
) -> DigestResult<Digest> {
    let prompt = build_prompt(&items);
    debug!(prompt = %truncate_for_log(&prompt, 500), "Built digest prompt");

    let text = digester.complete(&prompt).await?;

    let image_url = if with_image {
        match digester.illustrate(&build_image_prompt(&text)).await {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(error = %e, "Image generation failed; posting text only");
                None
            }
        }
    } else {
        None
    };

    Ok(Digest {
        text,
        image_url,
        items,
    })
}
