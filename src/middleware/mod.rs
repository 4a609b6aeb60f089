//! Per-request middleware.
//!
//! A [`FilterFactory`] is built once at startup and shared by every request.
//! For each request the [`App`](crate::App) asks every factory for a fresh
//! [`Filter`] and drives the instances through the request lifecycle:
//!
//! ```text
//! on_attach ─▶ decode_headers ─▶ decode_data* ─▶ handler ─▶ encode_headers ─▶ on_destroy
//!                    │                 │
//!                    └── local reply ──┴──────────────────▶ encode_headers ─▶ on_destroy
//! ```
//!
//! Filters run in registration order on the way in and in reverse order on
//! the way out. All hooks are synchronous; the only suspension point is a
//! [`FilterStatus::Pause`], which the chain honours with a tokio timer before
//! moving on to the next filter.
//!
//! Built-in filters:
//! - [`time_tracking`]: reports the time since the previous request in a response header
//! - [`dynamic_delay`]: delays requests proportionally to the number in flight

pub(crate) mod chain;
pub mod config;
pub mod dynamic_delay;
pub mod fault;
pub mod time_tracking;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::HeaderMap;

use crate::response::Response;
use crate::status::Status;
use crate::stopwatch::MonotonicClock;

/// What the chain should do after a filter hook returns.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FilterStatus {
    /// Hand the request to the next filter.
    Continue,
    /// Stop processing this request. The filter has sent a local reply.
    StopIteration,
    /// Wait for the given duration, then continue.
    Pause(Duration),
}

/// The request-scoped handle a filter uses to talk back to the host.
pub struct DecoderCallbacks {
    clock: Arc<dyn MonotonicClock>,
    local_reply: Option<Response>,
}

impl DecoderCallbacks {
    pub(crate) fn new(clock: Arc<dyn MonotonicClock>) -> Self {
        Self { clock, local_reply: None }
    }

    /// The server's monotonic time source.
    pub fn clock(&self) -> &dyn MonotonicClock {
        self.clock.as_ref()
    }

    /// Answers the request directly with a plain-text body. The route
    /// handler is skipped; filters still see the reply in `encode_headers`.
    pub fn send_local_reply(&mut self, status: Status, body: impl Into<String>) {
        self.local_reply = Some(Response::builder().status(status).text(body));
    }

    pub(crate) fn take_local_reply(&mut self) -> Option<Response> {
        self.local_reply.take()
    }
}

/// One middleware instance, owned by a single request.
pub trait Filter: Send {
    /// Called once, as soon as the instance is bound to its request and
    /// before any headers are decoded.
    fn on_attach(&mut self, _callbacks: &DecoderCallbacks) {}

    fn decode_headers(
        &mut self,
        _headers: &mut HeaderMap,
        _end_stream: bool,
        _callbacks: &mut DecoderCallbacks,
    ) -> FilterStatus {
        FilterStatus::Continue
    }

    /// Called for every body chunk. The final call has `end_stream` set and
    /// may carry an empty chunk.
    fn decode_data(
        &mut self,
        _data: &Bytes,
        _end_stream: bool,
        _callbacks: &mut DecoderCallbacks,
    ) -> FilterStatus {
        FilterStatus::Continue
    }

    fn encode_headers(&mut self, _headers: &mut HeaderMap) {}

    /// Called once when the request is finished, including when the client
    /// goes away mid-request and the request future is dropped.
    fn on_destroy(&mut self) {}
}

/// Creates one [`Filter`] per request.
pub trait FilterFactory: Send + Sync {
    fn create(&self) -> Box<dyn Filter>;
}
