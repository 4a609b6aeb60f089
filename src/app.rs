//! One request, end to end: middleware chain, routing, response.

use std::fmt::Display;
use std::sync::Arc;

use bytes::Bytes;
use http_body::Body;
use http_body_util::{BodyExt, Full};
use tracing::warn;

use crate::method::Method;
use crate::middleware::FilterFactory;
use crate::middleware::chain::ActiveChain;
use crate::request::Request;
use crate::response::Response;
use crate::router::Router;
use crate::status::Status;
use crate::stopwatch::{MonotonicClock, SystemClock};

/// A [`Router`] behind an ordered list of middleware.
///
/// ```rust
/// use std::sync::Arc;
/// use testserver::{App, Request, Response, Router};
/// use testserver::middleware::time_tracking::TimeTracking;
/// use testserver::options::ResponseOptions;
/// use testserver::stopwatch::MonotonicStopwatch;
///
/// async fn origin(_: Request) -> Response { Response::text("ok") }
///
/// let stopwatch = Arc::new(MonotonicStopwatch::new());
/// let app = App::new(Router::new().on_all("/", origin))
///     .filter(TimeTracking::new(ResponseOptions::default(), stopwatch).unwrap());
/// ```
pub struct App {
    router: Router,
    filters: Vec<Arc<dyn FilterFactory>>,
    clock: Arc<dyn MonotonicClock>,
}

impl App {
    pub fn new(router: Router) -> Self {
        Self { router, filters: Vec::new(), clock: Arc::new(SystemClock::new()) }
    }

    /// Appends a middleware. Filters see requests in the order they are added.
    pub fn filter(mut self, factory: impl FilterFactory + 'static) -> Self {
        self.filters.push(Arc::new(factory));
        self
    }

    /// Replaces the monotonic clock handed to filters.
    pub fn clock(mut self, clock: Arc<dyn MonotonicClock>) -> Self {
        self.clock = clock;
        self
    }

    /// Handles one request. Never fails: every error becomes a response.
    pub async fn handle<B>(&self, req: http::Request<B>) -> http::Response<Full<Bytes>>
    where
        B: Body<Data = Bytes> + Unpin,
        B::Error: Display,
    {
        self.respond(req).await.into_inner()
    }

    async fn respond<B>(&self, req: http::Request<B>) -> Response
    where
        B: Body<Data = Bytes> + Unpin,
        B::Error: Display,
    {
        let mut chain = ActiveChain::new(&self.filters, Arc::clone(&self.clock));
        let (mut parts, body) = req.into_parts();

        let mut response = match decode(&mut chain, &mut parts.headers, body).await {
            Decoded::Reply(reply) => reply,
            Decoded::Complete => self.route(parts).await,
        };

        chain.encode_headers(&mut response.headers);
        response
    }

    async fn route(&self, parts: http::request::Parts) -> Response {
        let Ok(method) = parts.method.as_str().parse::<Method>() else {
            return Response::status(Status::MethodNotAllowed);
        };

        match self.router.lookup(method, parts.uri.path()) {
            Some(handler) => handler.call(Request::new(parts.headers)).await,
            None => Response::status(Status::NotFound),
        }
    }
}

enum Decoded {
    Reply(Response),
    Complete,
}

/// Feeds headers and body frames through the chain. Each frame is dropped
/// once the filters have seen it.
async fn decode<B>(chain: &mut ActiveChain, headers: &mut http::HeaderMap, mut body: B) -> Decoded
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: Display,
{
    let end_stream = body.is_end_stream();
    if let Some(reply) = chain.decode_headers(headers, end_stream).await {
        return Decoded::Reply(reply);
    }
    if end_stream {
        return Decoded::Complete;
    }

    loop {
        let frame = match body.frame().await {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                warn!("failed to read request body: {e}");
                return Decoded::Reply(Response::status(Status::BadRequest));
            }
            None => {
                return match chain.decode_data(&Bytes::new(), true) {
                    Some(reply) => Decoded::Reply(reply),
                    None => Decoded::Complete,
                };
            }
        };

        // Trailers are not surfaced to filters.
        let Ok(data) = frame.into_data() else { continue };
        let end_stream = body.is_end_stream();
        if let Some(reply) = chain.decode_data(&data, end_stream) {
            return Decoded::Reply(reply);
        }
        if end_stream {
            return Decoded::Complete;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::convert::Infallible;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::task::{Context, Poll};

    use http::{HeaderMap, StatusCode};
    use http_body::Frame;

    use super::*;
    use crate::middleware::{DecoderCallbacks, Filter, FilterStatus};

    /// A body that yields its chunks one frame at a time.
    struct Chunked(VecDeque<Bytes>);

    impl Body for Chunked {
        type Data = Bytes;
        type Error = Infallible;

        fn poll_frame(
            mut self: Pin<&mut Self>,
            _: &mut Context<'_>,
        ) -> Poll<Option<Result<Frame<Bytes>, Infallible>>> {
            Poll::Ready(self.0.pop_front().map(|chunk| Ok(Frame::data(chunk))))
        }

        fn is_end_stream(&self) -> bool {
            self.0.is_empty()
        }
    }

    type Seen = Arc<Mutex<Vec<(usize, bool)>>>;

    struct BodyLog(Seen);

    impl FilterFactory for BodyLog {
        fn create(&self) -> Box<dyn Filter> {
            Box::new(BodyLogFilter(Arc::clone(&self.0)))
        }
    }

    struct BodyLogFilter(Seen);

    impl Filter for BodyLogFilter {
        fn decode_data(&mut self, data: &Bytes, end_stream: bool, _: &mut DecoderCallbacks) -> FilterStatus {
            self.0.lock().unwrap().push((data.len(), end_stream));
            FilterStatus::Continue
        }
    }

    async fn header_count(req: Request) -> Response {
        Response::text(req.headers().len().to_string())
    }

    fn app(seen: &Seen) -> App {
        App::new(Router::new().on_all("/{*path}", header_count)).filter(BodyLog(Arc::clone(seen)))
    }

    #[tokio::test]
    async fn streams_body_frames_through_filters() {
        let seen = Seen::default();
        let chunks = [Bytes::from(vec![b'x'; 3]), Bytes::from(vec![b'y'; 5])];
        let request = http::Request::post("/upload")
            .header("x-a", "1")
            .body(Chunked(chunks.into_iter().collect()))
            .unwrap();

        let response = app(&seen).handle(request).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(*seen.lock().unwrap(), [(3, false), (5, true)]);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, "1");
    }

    #[tokio::test]
    async fn bodiless_request_skips_decode_data() {
        let seen = Seen::default();
        let request = http::Request::get("/").body(Full::new(Bytes::new())).unwrap();

        let response = app(&seen).handle(request).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(seen.lock().unwrap().is_empty());

        let mut headers = HeaderMap::new();
        headers.insert("x-b", "2".parse().unwrap());
        let mut request = http::Request::get("/a").body(Full::new(Bytes::new())).unwrap();
        *request.headers_mut() = headers;
        let response = app(&seen).handle(request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(seen.lock().unwrap().is_empty());
    }
}
