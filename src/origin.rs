//! The test-server origin: a configurable synthetic response.
//!
//! The response shape comes from the effective [`ResponseOptions`] of each
//! request, so a load generator can vary body size and headers per request
//! through the override header.

use std::fmt::Write as _;
use std::sync::Arc;

use http::header::{HeaderName, HeaderValue};
use tracing::warn;

use crate::error::Error;
use crate::handler::Handler;
use crate::middleware::config::FilterConfig;
use crate::options::ResponseOptions;
use crate::request::Request;
use crate::response::Response;

#[derive(Clone, Debug)]
pub struct TestServer {
    config: FilterConfig,
}

impl TestServer {
    pub const NAME: &'static str = "test-server";

    pub fn new(base: ResponseOptions) -> Result<Self, Error> {
        Ok(Self { config: FilterConfig::new(Self::NAME, base)? })
    }

    /// A route handler serving [`respond`](TestServer::respond).
    pub fn into_handler(self) -> impl Handler {
        let origin = Arc::new(self);
        move |req: Request| {
            let origin = Arc::clone(&origin);
            async move { origin.respond(&req) }
        }
    }

    /// `200` with `response_body_size` bytes of `a`, the configured response
    /// headers and, if asked for, a dump of the request headers.
    pub fn respond(&self, req: &Request) -> Response {
        let options = match self.config.resolve(req.headers()) {
            Ok(options) => options,
            Err(e) => return self.config.error_response(&e),
        };

        let mut body = "a".repeat(options.response_body_size() as usize);
        if options.echo_request_headers() {
            body.push_str("\nRequest Headers:\n");
            for (name, value) in req.headers() {
                let _ = writeln!(body, "{name}: {}", String::from_utf8_lossy(value.as_bytes()));
            }
        }

        let mut response = Response::text(body);
        for entry in &options.response_headers {
            let (Ok(name), Ok(value)) = (
                HeaderName::try_from(entry.header.key.as_str()),
                HeaderValue::try_from(entry.header.value.as_str()),
            ) else {
                warn!(header = %entry.header.key, "skipping invalid configured response header");
                continue;
            };
            if entry.append.unwrap_or(true) {
                response.headers_mut().append(name, value);
            } else {
                response.headers_mut().insert(name, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use http::{HeaderMap, StatusCode};

    use super::*;
    use crate::middleware::config::CONFIG_HEADER;

    fn request(headers: &[(&'static str, &'static str)]) -> Request {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.append(*name, HeaderValue::from_static(value));
        }
        Request::new(map)
    }

    fn server(base: &str) -> TestServer {
        TestServer::new(ResponseOptions::from_json(base).unwrap()).unwrap()
    }

    #[test]
    fn default_body_is_ten_bytes() {
        let response = server("{}").respond(&request(&[]));
        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(response.body(), b"aaaaaaaaaa");
    }

    #[test]
    fn override_changes_body_size() {
        let response = server(r#"{"response_body_size": 2}"#)
            .respond(&request(&[(CONFIG_HEADER, r#"{"response_body_size": 4}"#)]));
        assert_eq!(response.body(), b"aaaa");
    }

    #[test]
    fn response_headers_append_or_replace() {
        let response = server(
            r#"{"response_headers": [
                {"header": {"key": "x-a", "value": "1"}},
                {"header": {"key": "x-a", "value": "2"}},
                {"header": {"key": "content-type", "value": "application/x-test"}, "append": false}
            ]}"#,
        )
        .respond(&request(&[]));

        let values: Vec<_> = response.headers().get_all("x-a").iter().collect();
        assert_eq!(values, ["1", "2"]);
        assert_eq!(response.headers().get_all("content-type").iter().count(), 1);
        assert_eq!(response.headers()["content-type"], "application/x-test");
    }

    #[test]
    fn echoes_request_headers() {
        let response = server(r#"{"echo_request_headers": true, "response_body_size": 0}"#)
            .respond(&request(&[("x-hello", "world")]));
        let body = std::str::from_utf8(response.body()).unwrap();
        assert!(body.contains("Request Headers:\n"));
        assert!(body.contains("x-hello: world\n"));
    }

    #[test]
    fn bad_override_is_a_500() {
        let response = server("{}").respond(&request(&[(CONFIG_HEADER, "not json")]));
        assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = std::str::from_utf8(response.body()).unwrap();
        assert!(body.starts_with("test-server didn't understand the request: "));
    }
}
