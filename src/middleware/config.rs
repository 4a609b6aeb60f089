//! Per-request configuration resolution shared by every filter.
//!
//! Each filter owns a base [`ResponseOptions`] loaded at startup. A request
//! may override it for itself alone through the [`CONFIG_HEADER`]:
//!
//! | override headers | effective configuration |
//! |---|---|
//! | none | the base, shared, not copied |
//! | one | a copy of the base with the header's JSON patch merged in |
//! | more than one | [`ConfigError::DuplicateOverrideHeaders`] |

use std::sync::Arc;

use http::HeaderMap;
use tracing::warn;

use crate::error::{ConfigError, Error};
use crate::middleware::DecoderCallbacks;
use crate::options::ResponseOptions;
use crate::response::Response;
use crate::status::Status;

/// Request header carrying a JSON [`ResponseOptions`] patch.
pub const CONFIG_HEADER: &str = "x-test-server-config";

/// Outcome of resolving a request's configuration. Never mutated after it
/// is produced.
pub type EffectiveConfig = Result<Arc<ResponseOptions>, ConfigError>;

/// A filter's name and base configuration.
#[derive(Clone, Debug)]
pub struct FilterConfig {
    name: &'static str,
    base: Arc<ResponseOptions>,
}

impl FilterConfig {
    pub fn new(name: &'static str, base: ResponseOptions) -> Result<Self, Error> {
        base.validate().map_err(|e| Error::Config(format!("{name}: {e}")))?;
        Ok(Self { name, base: Arc::new(base) })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn base(&self) -> &Arc<ResponseOptions> {
        &self.base
    }

    /// Computes the configuration in effect for a request with `headers`.
    pub fn resolve(&self, headers: &HeaderMap) -> EffectiveConfig {
        let mut values = headers.get_all(CONFIG_HEADER).iter();
        let Some(value) = values.next() else {
            return Ok(Arc::clone(&self.base));
        };
        if values.next().is_some() {
            return Err(ConfigError::DuplicateOverrideHeaders);
        }

        let doc = value
            .to_str()
            .map_err(|e| ConfigError::InvalidOverride(format!("{CONFIG_HEADER} is not text: {e}")))?;
        let mut options = ResponseOptions::clone(&self.base);
        options.merge_json(doc).map_err(ConfigError::InvalidOverride)?;
        Ok(Arc::new(options))
    }

    /// If `effective` is an error, sends it as a `500` local reply and
    /// returns `true`: the caller must stop processing the request.
    pub fn validate_or_send_error(
        &self,
        effective: &EffectiveConfig,
        callbacks: &mut DecoderCallbacks,
    ) -> bool {
        match effective {
            Ok(_) => false,
            Err(e) => {
                callbacks.send_local_reply(Status::InternalServerError, self.error_message(e));
                true
            }
        }
    }

    /// The `500` response for a request whose configuration did not resolve.
    pub fn error_response(&self, error: &ConfigError) -> Response {
        Response::builder()
            .status(Status::InternalServerError)
            .text(self.error_message(error))
    }

    fn error_message(&self, error: &ConfigError) -> String {
        warn!(filter = self.name, %error, "rejecting request configuration");
        format!("{} didn't understand the request: {error}", self.name)
    }
}
