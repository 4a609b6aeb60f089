//! Response-shaping options.
//!
//! One [`ResponseOptions`] document is loaded at startup as the base
//! configuration and shared by every request. A request may carry a partial
//! document in its override header; that patch is merged into a fresh copy of
//! the base with [`ResponseOptions::merge_json`].
//!
//! Every field is optional. Merging follows message-merge rules:
//!
//! - a scalar set in the patch replaces the base value
//! - `response_headers` entries are appended
//! - `concurrency_based_linear_delay` merges field by field
//! - `static_delay` and `concurrency_based_linear_delay` are one-of: setting
//!   either in a patch clears the other, and a single document may not name both

use std::time::Duration;

use serde::Deserialize;

/// Body size used by the origin when `response_body_size` is unset.
pub const DEFAULT_RESPONSE_BODY_SIZE: u32 = 10;

/// Largest body the origin will synthesize.
pub const MAX_RESPONSE_BODY_SIZE: u32 = 4 * 1024 * 1024;

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ResponseOptions {
    pub response_body_size: Option<u32>,
    pub response_headers: Vec<ResponseHeader>,
    pub echo_request_headers: Option<bool>,
    /// Name of the response header that carries the time, in nanoseconds,
    /// since the previous request was observed.
    pub emit_previous_request_delta_in_response_header: Option<String>,
    #[serde(deserialize_with = "duration::deserialize_opt")]
    pub static_delay: Option<Duration>,
    pub concurrency_based_linear_delay: Option<LinearDelay>,
}

/// Parameters of `minimal_delay + concurrency * concurrency_delay_factor`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LinearDelay {
    #[serde(deserialize_with = "duration::deserialize_opt")]
    pub minimal_delay: Option<Duration>,
    #[serde(deserialize_with = "duration::deserialize_opt")]
    pub concurrency_delay_factor: Option<Duration>,
}

impl LinearDelay {
    pub fn minimal_delay(&self) -> Duration {
        self.minimal_delay.unwrap_or_default()
    }

    pub fn concurrency_delay_factor(&self) -> Duration {
        self.concurrency_delay_factor.unwrap_or_default()
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ResponseHeader {
    pub header: HeaderEntry,
    /// `false` replaces any value already present. Defaults to appending.
    #[serde(default)]
    pub append: Option<bool>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct HeaderEntry {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

impl ResponseOptions {
    /// Parses a complete document and checks it for conflicting fields.
    pub fn from_json(doc: &str) -> Result<Self, String> {
        let options: Self = serde_json::from_str(doc).map_err(|e| e.to_string())?;
        options.validate()?;
        Ok(options)
    }

    /// Rejects documents that select both delay modes at once or ask for a
    /// body larger than [`MAX_RESPONSE_BODY_SIZE`].
    pub fn validate(&self) -> Result<(), String> {
        if let Some(size) = self.response_body_size.filter(|&size| size > MAX_RESPONSE_BODY_SIZE) {
            return Err(format!(
                "response_body_size {size} exceeds the maximum of {MAX_RESPONSE_BODY_SIZE}"
            ));
        }
        if self.static_delay.is_some() && self.concurrency_based_linear_delay.is_some() {
            return Err(
                "static_delay and concurrency_based_linear_delay are mutually exclusive".to_owned(),
            );
        }
        Ok(())
    }

    /// Parses `doc` as a patch and merges it into `self`.
    ///
    /// On error `self` is left untouched.
    pub fn merge_json(&mut self, doc: &str) -> Result<(), String> {
        let patch = Self::from_json(doc)?;
        self.merge_from(patch);
        Ok(())
    }

    pub fn merge_from(&mut self, patch: ResponseOptions) {
        if patch.response_body_size.is_some() {
            self.response_body_size = patch.response_body_size;
        }
        self.response_headers.extend(patch.response_headers);
        if patch.echo_request_headers.is_some() {
            self.echo_request_headers = patch.echo_request_headers;
        }
        if patch.emit_previous_request_delta_in_response_header.is_some() {
            self.emit_previous_request_delta_in_response_header =
                patch.emit_previous_request_delta_in_response_header;
        }

        if let Some(delay) = patch.static_delay {
            self.static_delay = Some(delay);
            self.concurrency_based_linear_delay = None;
        } else if let Some(linear) = patch.concurrency_based_linear_delay {
            self.static_delay = None;
            let current = self.concurrency_based_linear_delay.get_or_insert_default();
            if linear.minimal_delay.is_some() {
                current.minimal_delay = linear.minimal_delay;
            }
            if linear.concurrency_delay_factor.is_some() {
                current.concurrency_delay_factor = linear.concurrency_delay_factor;
            }
        }
    }

    pub fn response_body_size(&self) -> u32 {
        self.response_body_size.unwrap_or(DEFAULT_RESPONSE_BODY_SIZE)
    }

    pub fn echo_request_headers(&self) -> bool {
        self.echo_request_headers.unwrap_or(false)
    }

    /// The delta-report header name, if one is configured and non-empty.
    pub fn previous_request_delta_header(&self) -> Option<&str> {
        self.emit_previous_request_delta_in_response_header
            .as_deref()
            .filter(|name| !name.is_empty())
    }
}

/// Duration strings: `"1.5s"` (fractional seconds, nanosecond precision) or
/// anything `humantime` understands (`"5ms"`, `"1m 30s"`).
pub(crate) mod duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        raw.map(|s| parse(&s).map_err(serde::de::Error::custom)).transpose()
    }

    pub fn parse(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if s.starts_with('-') {
            return Err(format!("negative duration `{s}`"));
        }
        if let Some(d) = parse_seconds(s) {
            return Ok(d);
        }
        humantime::parse_duration(s).map_err(|e| format!("invalid duration `{s}`: {e}"))
    }

    fn parse_seconds(s: &str) -> Option<Duration> {
        let number = s.strip_suffix('s')?;
        let (secs, frac) = number.split_once('.').unwrap_or((number, ""));
        if secs.is_empty() && frac.is_empty() {
            return None;
        }
        if frac.len() > 9 || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let secs: u64 = if secs.is_empty() { 0 } else { secs.parse().ok()? };
        let nanos: u32 = if frac.is_empty() {
            0
        } else {
            format!("{frac:0<9}").parse().ok()?
        };
        Some(Duration::new(secs, nanos))
    }
}
