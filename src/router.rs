//! Radix-tree request router.
//!
//! One `matchit` tree per HTTP method, O(path-length) lookup.

use std::collections::HashMap;
use std::sync::Arc;

use matchit::Router as MatchitRouter;

use crate::handler::{BoxedHandler, Handler};
use crate::method::Method;

/// The application router. Build it once at startup and hand it to
/// [`App::new`](crate::App::new).
pub struct Router {
    routes: HashMap<Method, MatchitRouter<BoxedHandler>>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: HashMap::new() }
    }

    /// Register a handler for a method + path pair. Returns `self` for chaining.
    ///
    /// Routes use `matchit` syntax: `{name}` for a segment, `{*name}` for a
    /// catch-all. Handlers see headers only, so captured values are not kept.
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid route or conflicts with one already
    /// registered for `method`.
    pub fn on(self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.insert(method, path, handler.into_boxed_handler())
    }

    /// Register one handler for every [`Method`].
    ///
    /// ```rust
    /// # use testserver::{Request, Response, Router};
    /// # async fn origin(_: Request) -> Response { Response::text("") }
    /// Router::new()
    ///     .on_all("/", origin)
    ///     .on_all("/{*path}", origin);
    /// ```
    pub fn on_all(mut self, path: &str, handler: impl Handler) -> Self {
        let handler = handler.into_boxed_handler();
        for method in Method::ALL {
            self = self.insert(method, path, Arc::clone(&handler));
        }
        self
    }

    fn insert(mut self, method: Method, path: &str, handler: BoxedHandler) -> Self {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, handler)
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    pub(crate) fn lookup(&self, method: Method, path: &str) -> Option<BoxedHandler> {
        let tree = self.routes.get(&method)?;
        let matched = tree.at(path).ok()?;
        Some(Arc::clone(matched.value))
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}
