//! # headline_digest
//!
//! Periodically scrapes a handful of news listing pages, rewrites the
//! headlines it has not posted yet into a single digest with a completion
//! API, and posts the digest to a bot channel.
//!
//! ## Usage
//!
//! ```sh
//! BOT_TOKEN=... CHANNEL_ID=@mychannel OPENAI_API_KEY=... headline_digest --image
//! ```
//!
//! ## Architecture
//!
//! Each cycle runs four steps on a fixed timer:
//! 1. **Fetching**: download every source's listing page concurrently
//! 2. **Filtering**: drop already-sent links and duplicate headlines, apply the source quota
//! 3. **Digesting**: ask the completion API for one post (and optionally an image)
//! 4. **Publishing**: post to the channel and subscribers, then mark the links as sent
//!
//! The sent-links set is kept in memory only and resets on restart.

use clap::Parser;
use std::error::Error;
use std::time::Duration;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod api;
mod cli;
mod commands;
mod error;
mod filter;
mod models;
mod pipeline;
mod publish;
mod scrapers;
mod sent;
mod utils;

use api::{OpenAiClient, OpenAiConfig, RetryAsk};
use cli::Cli;
use commands::{Subscribers, poll_commands};
use models::{NewsSource, load_sources};
use pipeline::{CycleSettings, Pipeline};
use publish::TelegramBot;
use scrapers::HttpFetcher;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "headline_digest starting up");

    let args = Cli::parse();
    let creds = match args.credentials() {
        Ok(creds) => creds,
        Err(e) => {
            error!(error = %e, "Startup validation failed");
            return Err(e.into());
        }
    };

    let sources = match &args.sources_file {
        Some(path) => match load_sources(path) {
            Ok(sources) => sources,
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to load sources file");
                return Err(e.into());
            }
        },
        None => NewsSource::defaults(),
    };
    for source in &sources {
        debug!(name = %source.name, url = %source.url, selector = %source.selector, "Configured source");
    }

    let timeout = Duration::from_secs(args.request_timeout);
    let fetcher = HttpFetcher::new(timeout)?;
    let openai = OpenAiClient::new(OpenAiConfig {
        api_key: creds.openai_api_key,
        organization: args.organization(),
        base_url: args.openai_base_url.clone(),
        model: args.model.clone(),
        temperature: args.temperature,
        image_model: args.image_model.clone(),
        image_size: args.image_size.clone(),
        // Image generation routinely takes longer than a page fetch.
        timeout: timeout.max(Duration::from_secs(120)),
    })?;
    let digester = RetryAsk::new(openai, args.max_retries, Duration::from_secs(1));
    let bot = TelegramBot::new(&creds.bot_token, timeout)?;

    let subscribers = Subscribers::new();
    let poller = args
        .commands
        .then(|| tokio::spawn(poll_commands(bot.clone(), subscribers.clone())));

    let settings = CycleSettings {
        channel_id: creds.channel_id,
        per_source_limit: args.per_source_limit as usize,
        max_items: args.max_items as usize,
        with_image: args.image,
    };
    info!(
        sources = sources.len(),
        channel = %settings.channel_id,
        model = %args.model,
        with_image = settings.with_image,
        commands = args.commands,
        "Configuration loaded"
    );

    let mut pipeline = Pipeline::new(fetcher, digester, bot, sources, settings, subscribers);

    let result: Result<(), Box<dyn Error>> = if args.once {
        match pipeline.run_once().await {
            Some(_) => Ok(()),
            None => Err("cycle failed".into()),
        }
    } else {
        tokio::select! {
            _ = pipeline.run(Duration::from_secs(args.interval)) => Ok(()),
            signal = shutdown_signal() => {
                info!(signal, "Shutdown signal received");
                Ok(())
            }
        }
    };

    if let Some(handle) = poller {
        handle.abort();
    }
    info!("headline_digest stopped");
    result
}

/// Resolve on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => tokio::select! {
                _ = tokio::signal::ctrl_c() => "SIGINT",
                _ = term.recv() => "SIGTERM",
            },
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                "SIGINT"
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        "SIGINT"
    }
}
