//! The filter instances of one request.

use std::sync::Arc;

use bytes::Bytes;
use http::HeaderMap;
use tracing::{debug, warn};

use crate::middleware::{DecoderCallbacks, Filter, FilterFactory, FilterStatus};
use crate::response::Response;
use crate::status::Status;
use crate::stopwatch::MonotonicClock;

/// Owns a request's filters from creation to `on_destroy`.
///
/// Dropping the chain destroys the filters, so a request future cancelled
/// mid-flight still runs every filter's teardown exactly once.
pub(crate) struct ActiveChain {
    filters: Vec<Box<dyn Filter>>,
    callbacks: DecoderCallbacks,
}

impl ActiveChain {
    /// Creates one filter per factory and attaches each to the request.
    pub(crate) fn new(factories: &[Arc<dyn FilterFactory>], clock: Arc<dyn MonotonicClock>) -> Self {
        let callbacks = DecoderCallbacks::new(clock);
        let mut filters: Vec<_> = factories.iter().map(|f| f.create()).collect();
        for filter in &mut filters {
            filter.on_attach(&callbacks);
        }
        Self { filters, callbacks }
    }

    /// Runs `decode_headers` through the chain, pausing where asked.
    /// Returns the local reply if a filter stopped the request.
    pub(crate) async fn decode_headers(
        &mut self,
        headers: &mut HeaderMap,
        end_stream: bool,
    ) -> Option<Response> {
        for filter in &mut self.filters {
            match filter.decode_headers(headers, end_stream, &mut self.callbacks) {
                FilterStatus::Continue => {}
                FilterStatus::Pause(delay) => {
                    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                    debug!(delay_ms, "pausing request");
                    tokio::time::sleep(delay).await;
                }
                FilterStatus::StopIteration => return Some(stopped(&mut self.callbacks)),
            }
        }
        None
    }

    /// Runs `decode_data` through the chain. Pauses are not honoured for
    /// body data; a filter that wants one must ask while decoding headers.
    pub(crate) fn decode_data(&mut self, data: &Bytes, end_stream: bool) -> Option<Response> {
        for filter in &mut self.filters {
            if filter.decode_data(data, end_stream, &mut self.callbacks) == FilterStatus::StopIteration {
                return Some(stopped(&mut self.callbacks));
            }
        }
        None
    }

    /// Runs `encode_headers` through the chain, last filter first.
    pub(crate) fn encode_headers(&mut self, headers: &mut HeaderMap) {
        for filter in self.filters.iter_mut().rev() {
            filter.encode_headers(headers);
        }
    }
}

impl Drop for ActiveChain {
    fn drop(&mut self) {
        for filter in &mut self.filters {
            filter.on_destroy();
        }
    }
}

fn stopped(callbacks: &mut DecoderCallbacks) -> Response {
    callbacks.take_local_reply().unwrap_or_else(|| {
        warn!("filter stopped the request without a reply");
        Response::status(Status::InternalServerError)
    })
}
