//! Process configuration, loaded once at startup.
//!
//! ```json
//! {
//!   "listen": "0.0.0.0:10000",
//!   "test_server": { "response_body_size": 1024 },
//!   "time_tracking": { "emit_previous_request_delta_in_response_header": "x-prev-delta" },
//!   "dynamic_delay": {
//!     "response_options": {
//!       "concurrency_based_linear_delay": {
//!         "minimal_delay": "0.005s",
//!         "concurrency_delay_factor": "0.001s"
//!       }
//!     },
//!     "max_delay": "10s"
//!   }
//! }
//! ```
//!
//! A middleware section that is absent disables that middleware.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::app::App;
use crate::counter::ConcurrencyCounter;
use crate::error::Error;
use crate::middleware::dynamic_delay::DynamicDelay;
use crate::middleware::fault::HeaderFaultDelay;
use crate::middleware::time_tracking::TimeTracking;
use crate::options::{ResponseOptions, duration};
use crate::origin::TestServer;
use crate::router::Router;
use crate::stopwatch::MonotonicStopwatch;

pub const DEFAULT_PORT: u16 = 10_000;

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub listen: Option<SocketAddr>,
    pub test_server: ResponseOptions,
    pub time_tracking: Option<ResponseOptions>,
    pub dynamic_delay: Option<DynamicDelaySection>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DynamicDelaySection {
    pub response_options: ResponseOptions,
    /// Upper bound on any single injected delay.
    #[serde(deserialize_with = "duration::deserialize_opt")]
    pub max_delay: Option<Duration>,
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let doc = std::fs::read_to_string(path)?;
        Self::from_json(&doc).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    pub fn from_json(doc: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(doc)?)
    }

    pub fn listen(&self) -> SocketAddr {
        self.listen
            .unwrap_or_else(|| SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)))
    }

    /// Wires the test-server origin behind the configured middleware, in the
    /// order time-tracking, dynamic-delay.
    ///
    /// The stopwatch and concurrency counter are created here, once per app.
    pub fn build_app(&self) -> Result<App, Error> {
        let origin = TestServer::new(self.test_server.clone())?;
        let router = Router::new()
            .on_all("/", origin.clone().into_handler())
            .on_all("/{*path}", origin.into_handler());
        let mut app = App::new(router);

        if let Some(base) = &self.time_tracking {
            let stopwatch = Arc::new(MonotonicStopwatch::new());
            app = app.filter(TimeTracking::new(base.clone(), stopwatch)?);
            info!(filter = TimeTracking::NAME, "middleware enabled");
        }
        if let Some(section) = &self.dynamic_delay {
            let counter = Arc::new(ConcurrencyCounter::new());
            let fault = Arc::new(HeaderFaultDelay::with_max_delay(section.max_delay));
            app = app.filter(DynamicDelay::new(section.response_options.clone(), counter, fault)?);
            info!(filter = DynamicDelay::NAME, max_delay = ?section.max_delay, "middleware enabled");
        }
        Ok(app)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = ServerConfig::from_json("{}").unwrap();
        assert_eq!(config.listen(), "0.0.0.0:10000".parse().unwrap());
        assert!(config.time_tracking.is_none());
        assert!(config.dynamic_delay.is_none());
    }

    #[test]
    fn parses_sections() {
        let config = ServerConfig::from_json(
            r#"{
                "listen": "127.0.0.1:8080",
                "time_tracking": {"emit_previous_request_delta_in_response_header": "x-d"},
                "dynamic_delay": {"response_options": {"static_delay": "0.01s"}, "max_delay": "1s"}
            }"#,
        )
        .unwrap();

        assert_eq!(config.listen(), "127.0.0.1:8080".parse().unwrap());
        let section = config.dynamic_delay.as_ref().unwrap();
        assert_eq!(section.max_delay, Some(Duration::from_secs(1)));
        assert_eq!(section.response_options.static_delay, Some(Duration::from_millis(10)));
        assert!(config.build_app().is_ok());
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(matches!(ServerConfig::from_json(r#"{"lisen": "x"}"#), Err(Error::Config(_))));
    }

    #[test]
    fn conflicting_delay_modes_fail_at_build() {
        let config = ServerConfig::from_json(
            r#"{"dynamic_delay": {"response_options": {
                "static_delay": "1s", "concurrency_based_linear_delay": {}}}}"#,
        )
        .unwrap();
        let err = config.build_app().err().unwrap();
        assert!(err.to_string().contains("dynamic-delay"));
    }

    #[test]
    fn oversized_base_body_fails_at_build() {
        let config =
            ServerConfig::from_json(r#"{"test_server": {"response_body_size": 4194305}}"#).unwrap();
        let err = config.build_app().err().unwrap();
        assert!(err.to_string().contains("test-server"), "{err}");

        let config =
            ServerConfig::from_json(r#"{"test_server": {"response_body_size": 4194304}}"#).unwrap();
        assert!(config.build_app().is_ok());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = ServerConfig::load(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
