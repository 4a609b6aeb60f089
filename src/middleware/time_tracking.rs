//! Inter-request timing.
//!
//! Every request reads and resets a shared [`MonotonicStopwatch`] the moment
//! its filter is attached. If the effective configuration names
//! `emit_previous_request_delta_in_response_header`, the response carries the
//! nanoseconds elapsed since the previous request did the same.

use std::sync::Arc;

use bytes::Bytes;
use http::HeaderMap;
use http::header::{HeaderName, HeaderValue};
use tracing::warn;

use crate::error::Error;
use crate::middleware::config::{EffectiveConfig, FilterConfig};
use crate::middleware::{DecoderCallbacks, Filter, FilterFactory, FilterStatus};
use crate::options::ResponseOptions;
use crate::stopwatch::MonotonicStopwatch;

/// Factory for [`TimeTrackingFilter`]s sharing one stopwatch.
#[derive(Clone, Debug)]
pub struct TimeTracking {
    config: FilterConfig,
    stopwatch: Arc<MonotonicStopwatch>,
}

impl TimeTracking {
    pub const NAME: &'static str = "time-tracking";

    pub fn new(base: ResponseOptions, stopwatch: Arc<MonotonicStopwatch>) -> Result<Self, Error> {
        Ok(Self { config: FilterConfig::new(Self::NAME, base)?, stopwatch })
    }
}

impl FilterFactory for TimeTracking {
    fn create(&self) -> Box<dyn Filter> {
        Box::new(TimeTrackingFilter {
            shared: self.clone(),
            effective: None,
            last_request_delta_ns: 0,
        })
    }
}

pub struct TimeTrackingFilter {
    shared: TimeTracking,
    effective: Option<EffectiveConfig>,
    last_request_delta_ns: u64,
}

impl Filter for TimeTrackingFilter {
    fn on_attach(&mut self, callbacks: &DecoderCallbacks) {
        self.last_request_delta_ns = self.shared.stopwatch.read_and_reset(callbacks.clock());
    }

    fn decode_headers(
        &mut self,
        headers: &mut HeaderMap,
        end_stream: bool,
        callbacks: &mut DecoderCallbacks,
    ) -> FilterStatus {
        let effective = self.effective.insert(self.shared.config.resolve(headers));
        if end_stream && self.shared.config.validate_or_send_error(effective, callbacks) {
            return FilterStatus::StopIteration;
        }
        FilterStatus::Continue
    }

    fn decode_data(
        &mut self,
        _data: &Bytes,
        end_stream: bool,
        callbacks: &mut DecoderCallbacks,
    ) -> FilterStatus {
        if let (true, Some(effective)) = (end_stream, &self.effective) {
            if self.shared.config.validate_or_send_error(effective, callbacks) {
                return FilterStatus::StopIteration;
            }
        }
        FilterStatus::Continue
    }

    fn encode_headers(&mut self, headers: &mut HeaderMap) {
        let Some(Ok(options)) = &self.effective else { return };
        let Some(name) = options.previous_request_delta_header() else { return };
        if self.last_request_delta_ns == 0 {
            return;
        }

        match HeaderName::try_from(name) {
            Ok(name) => {
                headers.append(name, HeaderValue::from(self.last_request_delta_ns));
            }
            Err(_) => warn!(header = name, "invalid previous-request delta header name"),
        }
    }
}
