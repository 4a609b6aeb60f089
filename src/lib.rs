//! # testserver
//!
//! An origin server for load-testing tools. Responses are synthetic; what
//! matters is how the server behaves under load:
//!
//! - **Per-request configuration**: any request may patch the server's
//!   response options for itself through the `x-test-server-config` header.
//! - **Inter-request timing**: the [`time_tracking`](middleware::time_tracking)
//!   middleware reports the nanoseconds since the previous request.
//! - **Concurrency-based delays**: the [`dynamic_delay`](middleware::dynamic_delay)
//!   middleware slows requests down in proportion to how many are in flight.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use testserver::{Server, config::ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), testserver::Error> {
//!     let config = ServerConfig::from_json(r#"{
//!         "time_tracking": {"emit_previous_request_delta_in_response_header": "x-prev-delta"},
//!         "dynamic_delay": {"response_options": {"static_delay": "0.05s"}}
//!     }"#)?;
//!     Server::bind(config.listen()).serve(config.build_app()?).await
//! }
//! ```
//!
//! Then override the delay for one request:
//!
//! ```text
//! curl -H 'x-test-server-config: {"static_delay": "0.5s"}' http://localhost:10000/
//! ```

mod app;
mod error;
mod handler;
mod method;
mod request;
mod response;
mod router;
mod server;
mod status;

pub mod config;
pub mod counter;
pub mod middleware;
pub mod options;
pub mod origin;
pub mod stopwatch;

pub use app::App;
pub use error::{ConfigError, Error};
pub use handler::Handler;
pub use method::Method;
pub use request::Request;
pub use response::{IntoResponse, Response, ResponseBuilder};
pub use router::Router;
pub use server::Server;
pub use status::Status;
