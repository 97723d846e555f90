//! Command-line interface definitions for headline_digest.
//!
//! Every option can be given as a flag or through the environment. The
//! credentials are declared optional so that a missing one is reported by
//! [`Cli::credentials`] as a logged startup error rather than a usage dump.

use crate::api::DEFAULT_BASE_URL;
use crate::error::{DigestError, DigestResult};
use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments.
///
/// # Examples
///
/// ```sh
/// BOT_TOKEN=... CHANNEL_ID=@mychannel OPENAI_API_KEY=... headline_digest
///
/// # Custom sources, with an illustration per digest
/// headline_digest --sources-file sources.yaml --image
///
/// # Single cycle, for cron
/// headline_digest --once
/// ```
#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Bot API token
    #[arg(long, env = "BOT_TOKEN", hide_env_values = true)]
    pub bot_token: Option<String>,

    /// Channel chat id or @username to post digests to
    #[arg(long, env = "CHANNEL_ID")]
    pub channel_id: Option<String>,

    /// Completion API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Completion API organization id
    #[arg(long, env = "OPENAI_ORGANIZATION")]
    pub openai_organization: Option<String>,

    /// Base URL of an OpenAI-compatible API
    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub openai_base_url: String,

    /// Chat model used to write the digest
    #[arg(long, env = "OPENAI_MODEL", default_value = "gpt-4o-mini")]
    pub model: String,

    /// Sampling temperature for the digest
    #[arg(long, default_value_t = 0.7)]
    pub temperature: f32,

    /// Attach a generated illustration to each digest
    #[arg(long)]
    pub image: bool,

    /// Image model used with --image
    #[arg(long, env = "IMAGE_MODEL", default_value = "dall-e-3")]
    pub image_model: String,

    /// Image size used with --image
    #[arg(long, default_value = "1024x1024")]
    pub image_size: String,

    /// Seconds between cycles
    #[arg(long, env = "CHECK_INTERVAL", default_value_t = 120, value_parser = clap::value_parser!(u64).range(1..))]
    pub interval: u64,

    /// YAML file listing sources (name, url, selector); built-in sources otherwise
    #[arg(long, env = "SOURCES_FILE")]
    pub sources_file: Option<PathBuf>,

    /// Headlines considered per source each cycle
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    pub per_source_limit: u64,

    /// Headlines per digest, shared between sources
    #[arg(long, default_value_t = 15, value_parser = clap::value_parser!(u64).range(1..))]
    pub max_items: u64,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    pub request_timeout: u64,

    /// Retries for completion and image calls
    #[arg(long, default_value_t = 2)]
    pub max_retries: usize,

    /// Answer /start and /stop and post digests to subscribed chats too
    #[arg(long)]
    pub commands: bool,

    /// Run a single cycle and exit
    #[arg(long)]
    pub once: bool,
}

/// Secrets and targets that must be present before anything starts.
pub struct Credentials {
    pub bot_token: String,
    pub channel_id: String,
    pub openai_api_key: String,
}

fn required(value: &Option<String>, name: &str) -> DigestResult<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| DigestError::Config(format!("{name} not set")))
}

impl Cli {
    /// Check the required values, blank counting as missing.
    pub fn credentials(&self) -> DigestResult<Credentials> {
        Ok(Credentials {
            bot_token: required(&self.bot_token, "BOT_TOKEN")?,
            channel_id: required(&self.channel_id, "CHANNEL_ID")?,
            openai_api_key: required(&self.openai_api_key, "OPENAI_API_KEY")?,
        })
    }

    /// Organization header value, if a non-blank one was given.
    pub fn organization(&self) -> Option<String> {
        self.openai_organization
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }
}
