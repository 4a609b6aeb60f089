//! Incoming HTTP request type, as seen by route handlers.

use http::HeaderMap;

/// A request that made it through the middleware chain. The body has already
/// been streamed through the filters and is not kept.
pub struct Request {
    pub(crate) headers: HeaderMap,
}

impl Request {
    pub(crate) fn new(headers: HeaderMap) -> Self {
        Self { headers }
    }

    /// Headers as left by the middleware chain.
    pub fn headers(&self) -> &HeaderMap { &self.headers }
}
