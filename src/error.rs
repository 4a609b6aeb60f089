//! Unified error types.

/// The error type returned by the server's fallible startup operations.
///
/// Request-level failures (a malformed override header, duplicate override
/// headers) are never surfaced as `Error`s: they become `500` responses for
/// the one request that caused them. This type covers infrastructure only:
/// binding a port, accepting a connection, loading the base configuration.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("config: {0}")]
    Config(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Config(e.to_string())
    }
}

/// Why a request's effective configuration could not be computed.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// The override header held a document that does not parse or merge.
    #[error("{0}")]
    InvalidOverride(String),

    /// More than one override header was present. Duplicates are never
    /// disambiguated by picking one; the caller has to send exactly one.
    #[error("Received multiple configuration headers in the request, expected only one.")]
    DuplicateOverrideHeaders,
}
