use std::time::Duration;

/// Failures surfaced by reconciliation, wallet requests and teardown.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// No URI was produced, or the wallet rejected or never answered the proposal.
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// A request on an established session failed.
    #[error("Request {method} failed: {message}")]
    Request { method: String, message: String },

    /// The client store never showed the expected pairing or session.
    #[error("Timed out after {waited:?} waiting for {what}")]
    StaleState { what: &'static str, waited: Duration },

    #[error("Not connected: {0}")]
    NotConnected(&'static str),

    #[error("Client error: {0}")]
    Client(#[source] anyhow::Error),

    #[error("Connection manager is not running")]
    ManagerUnavailable,
}

impl ConnectError {
    pub fn request(method: &str, err: impl std::fmt::Display) -> Self {
        ConnectError::Request {
            method: method.to_string(),
            message: err.to_string(),
        }
    }
}
