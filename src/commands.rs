//! Optional `/start` and `/stop` handling over Bot API long polling.
//!
//! Subscribed chats receive every digest in addition to the channel. The
//! subscriber set is in-memory only, like the sent-links set.

use crate::publish::{Publisher, TelegramBot, Update};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

const POLL_TIMEOUT: Duration = Duration::from_secs(30);
const ERROR_PAUSE: Duration = Duration::from_secs(5);

/// Chat ids that asked for digests with `/start`.
#[derive(Debug, Clone, Default)]
pub struct Subscribers {
    inner: Arc<Mutex<BTreeSet<i64>>>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, chat_id: i64) -> bool {
        self.lock().insert(chat_id)
    }

    pub fn remove(&self, chat_id: i64) -> bool {
        self.lock().remove(&chat_id)
    }

    /// Current subscribers in ascending order.
    pub fn snapshot(&self) -> Vec<i64> {
        self.lock().iter().copied().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeSet<i64>> {
        // A poisoned set is still a valid set.
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
}

impl Command {
    /// Parse `/start`, `/stop` and their `@botname` forms.
    pub fn parse(text: &str) -> Option<Command> {
        let first = text.split_whitespace().next()?;
        let name = first.split('@').next().unwrap_or(first);
        match name {
            "/start" => Some(Command::Start),
            "/stop" => Some(Command::Stop),
            _ => None,
        }
    }
}

/// Apply one update to the subscriber set.
///
/// Returns the chat to answer and the reply text, or `None` when the update
/// is not a command.
pub fn apply_update(subscribers: &Subscribers, update: &Update) -> Option<(i64, &'static str)> {
    let message = update.message.as_ref()?;
    let command = Command::parse(message.text.as_deref()?)?;
    let chat = message.chat.id;
    let reply = match command {
        Command::Start => {
            if subscribers.add(chat) {
                info!(chat, "Chat subscribed");
                "Subscribed. New digests will be sent here."
            } else {
                "Already subscribed."
            }
        }
        Command::Stop => {
            if subscribers.remove(chat) {
                info!(chat, "Chat unsubscribed");
                "Unsubscribed. Send /start to resume."
            } else {
                "Not subscribed."
            }
        }
    };
    Some((chat, reply))
}

/// Long-poll for commands until the task is aborted.
#[instrument(level = "info", skip_all)]
pub async fn poll_commands(bot: TelegramBot, subscribers: Subscribers) {
    info!("Command polling started");
    let mut offset = 0i64;
    loop {
        let updates = match bot.get_updates(offset, POLL_TIMEOUT).await {
            Ok(updates) => updates,
            Err(e) => {
                warn!(error = %e, "getUpdates failed");
                sleep(ERROR_PAUSE).await;
                continue;
            }
        };
        debug!(count = updates.len(), "Received updates");

        for update in &updates {
            offset = offset.max(update.update_id + 1);
            if let Some((chat, reply)) = apply_update(&subscribers, update) {
                if let Err(e) = bot.send_message(&chat.to_string(), reply).await {
                    warn!(chat, error = %e, "Command reply failed");
                }
            }
        }
    }
}
