//! Error types shared by the scraping, completion and bot clients.

use thiserror::Error;

/// Failures raised at the network and configuration seams.
///
/// The scheduler treats every variant the same way (log and skip the rest of
/// the cycle); the variants exist so log lines say which collaborator failed.
#[derive(Debug, Error)]
pub enum DigestError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} returned status {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("bot API rejected {method}: {description}")]
    BotApi {
        method: &'static str,
        description: String,
    },

    #[error("completion API returned no content")]
    EmptyCompletion,

    #[error("image API returned no image")]
    EmptyImage,

    #[error("invalid selector for source {source_name}: {selector}")]
    Selector {
        source_name: String,
        selector: String,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type DigestResult<T> = Result<T, DigestError>;
