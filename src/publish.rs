//! Posting digests through the Telegram Bot API.
//!
//! # Message Limits
//!
//! | Kind | Limit |
//! |------|-------|
//! | `sendMessage` text | 4096 characters |
//! | `sendPhoto` caption | 1024 characters |
//!
//! Longer digests are split on line boundaries. A digest with an image whose
//! text does not fit in a caption is sent as a bare photo followed by the text.
//!
//! The bot token is part of every request URL, so transport errors are
//! stripped of their URL before they can reach a log line.

use crate::error::{DigestError, DigestResult};
use crate::models::Digest;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{info, instrument, warn};

pub const MAX_MESSAGE_CHARS: usize = 4096;
pub const MAX_CAPTION_CHARS: usize = 1024;
const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Messaging seam used by the scheduler.
pub trait Publisher {
    /// Send plain text to `chat_id` (numeric id or `@channel`).
    async fn send_message(&self, chat_id: &str, text: &str) -> DigestResult<()>;

    /// Send a photo by URL, optionally with a caption.
    async fn send_photo(&self, chat_id: &str, photo_url: &str, caption: Option<&str>)
    -> DigestResult<()>;
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    disable_web_page_preview: bool,
}

#[derive(Debug, Serialize)]
struct SendPhoto<'a> {
    chat_id: &'a str,
    photo: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    caption: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct GetUpdates {
    offset: i64,
    timeout: u64,
    allowed_updates: [&'static str; 1],
}

/// Envelope every Bot API method responds with.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    description: Option<String>,
    result: Option<T>,
}

/// An incoming update, reduced to what command handling reads.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<IncomingMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

/// Telegram Bot API client.
///
/// Cheap to clone: the command poller and the scheduler share one
/// connection pool.
#[derive(Clone)]
pub struct TelegramBot {
    /// Shared HTTP client with the default per-request timeout.
    http: reqwest::Client,
    /// API root, without the `/bot<token>` segment.
    api_base: String,
    /// Bot token; kept out of `Debug` output.
    token: String,
}

impl fmt::Debug for TelegramBot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramBot")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl TelegramBot {
    /// Create a client for the bot identified by `token`.
    ///
    /// # Arguments
    ///
    /// * `token` - Bot token as issued by BotFather; never logged
    /// * `timeout` - Timeout for `sendMessage`/`sendPhoto`; long polls set their own
    ///
    /// # Example
    ///
    /// ```ignore
    /// let bot = TelegramBot::new(&token, Duration::from_secs(30))?;
    /// bot.send_message("@my_channel", "hello").await?;
    /// ```
    pub fn new(token: &str, timeout: Duration) -> DigestResult<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_base: DEFAULT_API_BASE.to_string(),
            token: token.to_string(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    async fn call<B, R>(&self, method: &'static str, body: &B, timeout: Option<Duration>) -> DigestResult<R>
    where
        B: Serialize,
        R: for<'de> Deserialize<'de>,
    {
        let mut request = self.http.post(self.method_url(method)).json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await.map_err(|e| e.without_url())?;
        let envelope: ApiResponse<R> = response.json().await.map_err(|e| e.without_url())?;
        if !envelope.ok {
            return Err(DigestError::BotApi {
                method,
                description: envelope.description.unwrap_or_else(|| "unknown error".into()),
            });
        }
        envelope.result.ok_or(DigestError::BotApi {
            method,
            description: "response carried no result".into(),
        })
    }

    /// Long-poll for updates newer than `offset`.
    #[instrument(level = "debug", skip(self))]
    pub async fn get_updates(&self, offset: i64, poll_timeout: Duration) -> DigestResult<Vec<Update>> {
        let body = GetUpdates {
            offset,
            timeout: poll_timeout.as_secs(),
            allowed_updates: ["message"],
        };
        // The HTTP timeout must outlast the server-side long-poll.
        let http_timeout = poll_timeout + Duration::from_secs(10);
        self.call("getUpdates", &body, Some(http_timeout)).await
    }
}

impl Publisher for TelegramBot {
    #[instrument(level = "info", skip(self, text), fields(chars = text.chars().count()))]
    async fn send_message(&self, chat_id: &str, text: &str) -> DigestResult<()> {
        let body = SendMessage {
            chat_id,
            text,
            disable_web_page_preview: true,
        };
        let _: serde_json::Value = self.call("sendMessage", &body, None).await?;
        Ok(())
    }

    #[instrument(level = "info", skip(self, caption))]
    async fn send_photo(
        &self,
        chat_id: &str,
        photo_url: &str,
        caption: Option<&str>,
    ) -> DigestResult<()> {
        let body = SendPhoto {
            chat_id,
            photo: photo_url,
            caption,
        };
        let _: serde_json::Value = self.call("sendPhoto", &body, None).await?;
        Ok(())
    }
}

/// Split `text` into chunks of at most `limit` characters.
///
/// Breaks fall on newlines where possible; a single line longer than
/// `limit` is cut mid-line.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for line in text.split_inclusive('\n') {
        let line_len = line.chars().count();
        if current_len + line_len <= limit {
            current.push_str(line);
            current_len += line_len;
            continue;
        }
        if !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len <= limit {
            current.push_str(line);
            current_len = line_len;
            continue;
        }
        let chars: Vec<char> = line.chars().collect();
        for piece in chars.chunks(limit) {
            if piece.len() == limit {
                chunks.push(piece.iter().collect());
            } else {
                current = piece.iter().collect();
                current_len = piece.len();
            }
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
        .into_iter()
        .map(|c| c.trim_end().to_string())
        .filter(|c| !c.is_empty())
        .collect()
}

/// Send a digest to one chat.
#[instrument(level = "info", skip(publisher, digest), fields(has_image = digest.image_url.is_some()))]
pub async fn send_digest<P: Publisher>(
    publisher: &P,
    chat_id: &str,
    digest: &Digest,
) -> DigestResult<()> {
    let text_chars = digest.text.chars().count();

    if let Some(image_url) = &digest.image_url {
        let caption = (text_chars <= MAX_CAPTION_CHARS).then_some(digest.text.as_str());
        match publisher.send_photo(chat_id, image_url, caption).await {
            Ok(()) if caption.is_some() => return Ok(()),
            Ok(()) => {}
            Err(e) => warn!(error = %e, "Photo send failed; falling back to text"),
        }
    }

    for chunk in split_message(&digest.text, MAX_MESSAGE_CHARS) {
        publisher.send_message(chat_id, &chunk).await?;
    }
    Ok(())
}

/// Send a digest to the channel and every subscriber.
///
/// Returns the channel's result: a subscriber failure is logged and does not
/// prevent the remaining subscribers from being served.
#[instrument(level = "info", skip_all, fields(subscribers = subscribers.len()))]
pub async fn publish_digest<P: Publisher>(
    publisher: &P,
    channel_id: &str,
    subscribers: &[i64],
    digest: &Digest,
) -> DigestResult<()> {
    send_digest(publisher, channel_id, digest).await?;
    info!(channel = %channel_id, items = digest.items.len(), "Post sent");

    for chat in subscribers {
        let chat = chat.to_string();
        if chat == channel_id {
            continue;
        }
        if let Err(e) = send_digest(publisher, &chat, digest).await {
            warn!(%chat, error = %e, "Subscriber delivery failed");
        }
    }
    Ok(())
}
