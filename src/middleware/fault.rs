//! Header-driven request delays.
//!
//! The delay filters never wait themselves. They write the requested delay
//! into [`DELAY_REQUEST_HEADER`] and hand the headers to a [`FaultDelay`],
//! which decides whether and how long the chain pauses.

use std::time::Duration;

use http::HeaderMap;
use tracing::debug;

use crate::middleware::FilterStatus;

/// Request header carrying a delay in milliseconds.
pub const DELAY_REQUEST_HEADER: &str = "x-envoy-fault-delay-request";

/// Turns a delay request found in the headers into a pause.
pub trait FaultDelay: Send + Sync {
    fn decode_headers(&self, headers: &HeaderMap) -> FilterStatus;
}

/// Honours [`DELAY_REQUEST_HEADER`], optionally capped at `max_delay`.
#[derive(Clone, Debug, Default)]
pub struct HeaderFaultDelay {
    max_delay: Option<Duration>,
}

impl HeaderFaultDelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_delay(max_delay: Option<Duration>) -> Self {
        Self { max_delay }
    }
}

impl FaultDelay for HeaderFaultDelay {
    fn decode_headers(&self, headers: &HeaderMap) -> FilterStatus {
        let requested = headers
            .get(DELAY_REQUEST_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|&ms| ms > 0);

        match requested {
            Some(ms) => {
                let mut delay = Duration::from_millis(ms);
                if let Some(max) = self.max_delay {
                    delay = delay.min(max);
                }
                let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                debug!(delay_ms, "injecting request delay");
                FilterStatus::Pause(delay)
            }
            None => FilterStatus::Continue,
        }
    }
}
