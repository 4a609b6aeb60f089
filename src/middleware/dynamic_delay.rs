//! Concurrency-based request delays.
//!
//! Every [`DynamicDelayFilter`] counts itself in a shared
//! [`ConcurrencyCounter`] while its request is in flight. When request
//! headers arrive, the filter computes a delay from the effective
//! configuration and the current count, writes it into
//! [`DELAY_REQUEST_HEADER`], and lets the [`FaultDelay`] it was built with
//! perform the pause.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::HeaderMap;
use http::header::HeaderValue;
use tracing::debug;

use crate::counter::{ActiveGuard, ConcurrencyCounter};
use crate::error::Error;
use crate::middleware::config::{EffectiveConfig, FilterConfig};
use crate::middleware::fault::{DELAY_REQUEST_HEADER, FaultDelay};
use crate::middleware::{DecoderCallbacks, Filter, FilterFactory, FilterStatus};
use crate::options::ResponseOptions;

const NANOS_PER_MILLI: u128 = 1_000_000;

/// Rounds `minimal_delay + concurrency * delay_factor` to the nearest
/// millisecond, halves away from zero.
///
/// Arithmetic is done on `u128` nanoseconds and saturates at `u64::MAX`
/// milliseconds instead of wrapping.
pub fn linear_delay_ms(concurrency: u64, minimal_delay: Duration, delay_factor: Duration) -> u64 {
    let nanos = delay_factor
        .as_nanos()
        .saturating_mul(u128::from(concurrency))
        .saturating_add(minimal_delay.as_nanos());
    let millis = nanos.saturating_add(NANOS_PER_MILLI / 2) / NANOS_PER_MILLI;
    u64::try_from(millis).unwrap_or(u64::MAX)
}

/// The delay the effective configuration asks for, if any.
///
/// A static delay is truncated to whole milliseconds. A linear delay uses
/// `concurrency` as the number of requests in flight.
pub fn compute_delay_ms(options: &ResponseOptions, concurrency: u64) -> Option<u64> {
    if let Some(delay) = options.static_delay {
        return Some(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX));
    }
    options.concurrency_based_linear_delay.as_ref().map(|linear| {
        linear_delay_ms(concurrency, linear.minimal_delay(), linear.concurrency_delay_factor())
    })
}

/// Asks the downstream [`FaultDelay`] for a pause by setting
/// [`DELAY_REQUEST_HEADER`]. Absent or zero delays leave `headers` untouched.
pub fn maybe_request_fault_delay(delay_ms: Option<u64>, headers: &mut HeaderMap) {
    if let Some(ms) = delay_ms.filter(|&ms| ms > 0) {
        headers.insert(DELAY_REQUEST_HEADER, HeaderValue::from(ms));
    }
}

/// Factory for [`DynamicDelayFilter`]s sharing one counter and one
/// suspension mechanism.
#[derive(Clone)]
pub struct DynamicDelay {
    config: FilterConfig,
    counter: Arc<ConcurrencyCounter>,
    fault: Arc<dyn FaultDelay>,
}

impl DynamicDelay {
    pub const NAME: &'static str = "dynamic-delay";

    pub fn new(
        base: ResponseOptions,
        counter: Arc<ConcurrencyCounter>,
        fault: Arc<dyn FaultDelay>,
    ) -> Result<Self, Error> {
        Ok(Self { config: FilterConfig::new(Self::NAME, base)?, counter, fault })
    }
}

impl FilterFactory for DynamicDelay {
    fn create(&self) -> Box<dyn Filter> {
        Box::new(DynamicDelayFilter { shared: self.clone(), effective: None, active: None })
    }
}

pub struct DynamicDelayFilter {
    shared: DynamicDelay,
    effective: Option<EffectiveConfig>,
    active: Option<ActiveGuard>,
}

impl Filter for DynamicDelayFilter {
    fn on_attach(&mut self, _callbacks: &DecoderCallbacks) {
        if self.active.is_none() {
            self.active = Some(self.shared.counter.enter());
        }
    }

    fn decode_headers(
        &mut self,
        headers: &mut HeaderMap,
        end_stream: bool,
        callbacks: &mut DecoderCallbacks,
    ) -> FilterStatus {
        let effective = &*self.effective.insert(self.shared.config.resolve(headers));
        let Ok(options) = effective else {
            if end_stream && self.shared.config.validate_or_send_error(effective, callbacks) {
                return FilterStatus::StopIteration;
            }
            return FilterStatus::Continue;
        };

        let concurrency = self.shared.counter.approximate();
        let delay_ms = compute_delay_ms(options, concurrency);
        debug!(concurrency, ?delay_ms, "computed dynamic delay");
        maybe_request_fault_delay(delay_ms, headers);
        self.shared.fault.decode_headers(headers)
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

    fn on_destroy(&mut self) {
        if let Some(active) = self.active.as_mut() {
            active.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::middleware::config::CONFIG_HEADER;
    use crate::middleware::fault::HeaderFaultDelay;
    use crate::stopwatch::SystemClock;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn linear_delay_formula() {
        assert_eq!(linear_delay_ms(0, 5 * MS, 10 * MS), 5);
        assert_eq!(linear_delay_ms(3, 5 * MS, 10 * MS), 35);
        assert_eq!(linear_delay_ms(0, Duration::ZERO, Duration::ZERO), 0);
    }

    #[test]
    fn linear_delay_rounds_half_away_from_zero() {
        assert_eq!(linear_delay_ms(1, Duration::ZERO, Duration::from_micros(1_500)), 2);
        assert_eq!(linear_delay_ms(1, Duration::ZERO, Duration::from_micros(1_499)), 1);
        assert_eq!(linear_delay_ms(3, Duration::ZERO, Duration::from_micros(500)), 2);
    }

    #[test]
    fn linear_delay_saturates() {
        assert_eq!(linear_delay_ms(u64::MAX, Duration::MAX, Duration::MAX), u64::MAX);
    }

    #[test]
    fn compute_delay_picks_the_configured_mode() {
        let none = ResponseOptions::default();
        assert_eq!(compute_delay_ms(&none, 7), None);

        let fixed = ResponseOptions::from_json(r#"{"static_delay": "0.0259s"}"#).unwrap();
        assert_eq!(compute_delay_ms(&fixed, 7), Some(25));

        let linear = ResponseOptions::from_json(
            r#"{"concurrency_based_linear_delay":
                {"minimal_delay": "0.05s", "concurrency_delay_factor": "0.01s"}}"#,
        )
        .unwrap();
        assert_eq!(compute_delay_ms(&linear, 0), Some(50));
        assert_eq!(compute_delay_ms(&linear, 4), Some(90));
    }

    #[test]
    fn fault_delay_header_only_for_positive_delays() {
        let mut headers = HeaderMap::new();
        maybe_request_fault_delay(None, &mut headers);
        maybe_request_fault_delay(Some(0), &mut headers);
        assert!(headers.is_empty());

        maybe_request_fault_delay(Some(50), &mut headers);
        assert_eq!(headers[DELAY_REQUEST_HEADER], "50");
    }

    /// Records the headers it was asked to act on instead of pausing.
    #[derive(Default)]
    struct RecordingFault(Mutex<Vec<Option<String>>>);

    impl FaultDelay for RecordingFault {
        fn decode_headers(&self, headers: &HeaderMap) -> FilterStatus {
            let seen = headers
                .get(DELAY_REQUEST_HEADER)
                .map(|v| v.to_str().unwrap().to_owned());
            self.0.lock().unwrap().push(seen);
            FilterStatus::Continue
        }
    }

    fn factory(base: &str, fault: Arc<dyn FaultDelay>) -> (DynamicDelay, Arc<ConcurrencyCounter>) {
        let counter = Arc::new(ConcurrencyCounter::new());
        let base = ResponseOptions::from_json(base).unwrap();
        (DynamicDelay::new(base, Arc::clone(&counter), fault).unwrap(), counter)
    }

    fn callbacks() -> DecoderCallbacks {
        DecoderCallbacks::new(Arc::new(SystemClock::new()))
    }

    #[test]
    fn counts_instances_and_releases_once() {
        let (factory, counter) = factory("{}", Arc::new(HeaderFaultDelay::new()));
        let callbacks = callbacks();

        let mut a = factory.create();
        let mut b = factory.create();
        a.on_attach(&callbacks);
        b.on_attach(&callbacks);
        assert_eq!(counter.approximate(), 2);

        a.on_destroy();
        a.on_destroy();
        assert_eq!(counter.approximate(), 1);
        drop(a);
        assert_eq!(counter.approximate(), 1);

        // Aborted: dropped without on_destroy.
        drop(b);
        assert_eq!(counter.approximate(), 0);
    }

    #[test]
    fn signals_linear_delay_using_current_concurrency() {
        let fault = Arc::new(RecordingFault::default());
        let (factory, _counter) = factory(
            r#"{"concurrency_based_linear_delay":
                {"minimal_delay": "0.005s", "concurrency_delay_factor": "0.010s"}}"#,
            fault.clone(),
        );
        let mut callbacks = callbacks();

        let mut others: Vec<_> = (0..2).map(|_| factory.create()).collect();
        for other in &mut others {
            other.on_attach(&callbacks);
        }

        let mut filter = factory.create();
        filter.on_attach(&callbacks);
        let mut headers = HeaderMap::new();
        assert_eq!(filter.decode_headers(&mut headers, true, &mut callbacks), FilterStatus::Continue);

        // Three active instances, this one included.
        assert_eq!(headers[DELAY_REQUEST_HEADER], "35");
        assert_eq!(*fault.0.lock().unwrap(), [Some("35".to_owned())]);
    }

    #[test]
    fn no_delay_configured_leaves_headers_alone() {
        let fault = Arc::new(RecordingFault::default());
        let (factory, _counter) = factory("{}", fault.clone());
        let mut callbacks = callbacks();

        let mut filter = factory.create();
        filter.on_attach(&callbacks);
        let mut headers = HeaderMap::new();
        filter.decode_headers(&mut headers, true, &mut callbacks);

        assert!(headers.get(DELAY_REQUEST_HEADER).is_none());
        assert_eq!(*fault.0.lock().unwrap(), [None]);
    }

    #[test]
    fn header_fault_delay_turns_signal_into_pause() {
        let (factory, _counter) = factory(r#"{"static_delay": "0.05s"}"#, Arc::new(HeaderFaultDelay::new()));
        let mut callbacks = callbacks();
        let mut filter = factory.create();
        filter.on_attach(&callbacks);

        let status = filter.decode_headers(&mut HeaderMap::new(), true, &mut callbacks);
        assert_eq!(status, FilterStatus::Pause(50 * MS));
    }

    #[test]
    fn invalid_override_skips_delay_and_sends_error() {
        let fault = Arc::new(RecordingFault::default());
        let (factory, counter) = factory(r#"{"static_delay": "1s"}"#, fault.clone());
        let mut callbacks = callbacks();
        let mut filter = factory.create();
        filter.on_attach(&callbacks);

        let mut headers = HeaderMap::new();
        headers.append(CONFIG_HEADER, HeaderValue::from_static("{}"));
        headers.append(CONFIG_HEADER, HeaderValue::from_static("{}"));

        assert_eq!(filter.decode_headers(&mut headers, false, &mut callbacks), FilterStatus::Continue);
        assert!(callbacks.take_local_reply().is_none());
        assert_eq!(
            filter.decode_data(&Bytes::new(), true, &mut callbacks),
            FilterStatus::StopIteration
        );

        let reply = callbacks.take_local_reply().unwrap();
        let body = std::str::from_utf8(reply.body()).unwrap();
        assert!(body.starts_with("dynamic-delay didn't understand the request: "));
        assert!(headers.get(DELAY_REQUEST_HEADER).is_none());
        assert!(fault.0.lock().unwrap().is_empty());

        filter.on_destroy();
        assert_eq!(counter.approximate(), 0);
    }
}
