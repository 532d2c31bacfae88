//! Error taxonomy for token acquisition, Graph calls, and subscription tracking

use thiserror::Error;

/// Failure modes of the watcher core.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The identity provider rejected the credentials or the token endpoint
    /// returned a non-success response.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The device-code sign-in did not complete within the allowed wait.
    #[error("interactive sign-in timed out")]
    AuthTimeout,

    /// The user (or a tenant policy) declined the device-code sign-in.
    #[error("interactive sign-in was denied")]
    AuthDenied,

    /// Non-2xx from the Graph API, with the response body for diagnostics.
    #[error("Graph returned HTTP {status}: {body}")]
    Upstream { status: u16, body: String },

    /// Network failure reaching a remote endpoint.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Lifecycle guard: subscription operations after stop() are rejected.
    #[error("subscription tracking has been stopped")]
    Stopped,
}

impl WatchError {
    /// True for a 401 from Graph, which callers may answer with a single
    /// token re-acquire and retry.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, WatchError::Upstream { status: 401, .. })
    }
}

pub type Result<T> = std::result::Result<T, WatchError>;
