//! Streaming service access.
//!
//! The tracker never talks to the service directly. It consumes batches
//! produced by a [`Fetcher`] (wrapped in a [`crate::watcher::PeriodicWatcher`]).

pub mod twitch;
pub mod types;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use twitch::{TwitchConfig, TwitchFetcher};
pub use types::{Batch, Stream, User};

/// Errors a fetcher can report.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The fetch was abandoned because cancellation was requested.
    #[error("fetch cancelled")]
    Cancelled,

    /// Transport-level failure.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("service returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The response could not be understood.
    #[error("invalid response: {0}")]
    Decode(String),
}

impl FetchError {
    /// Whether this error only signals cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }
}

/// Knows how to obtain the current list of live streams.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch every currently live stream.
    ///
    /// Implementations must return [`FetchError::Cancelled`] promptly once
    /// `cancel` fires.
    async fn fetch(&self, cancel: &CancellationToken) -> Result<Batch, FetchError>;
}
