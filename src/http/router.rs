//! Ordered route table.
//!
//! A route pairs an optional method guard and a path pattern with a handler.
//! Routes are tried in order and the first match handles the request;
//! when nothing matches the not-found handler runs, by default replying
//! `404 Not Found` with no headers and an empty body.
//!
//! ```
//! use appgate::{router::{PathPattern, Router}, AppError, Application, Environment, Reply};
//!
//! struct Hello;
//!
//! impl Application for Hello {
//!     async fn call(&self, _: &mut Environment<'_>) -> Result<Reply, AppError> {
//!         Ok(Reply::new((200, "OK")).body("hello"))
//!     }
//! }
//!
//! let router = Router::new()
//!     .get("/hello", appgate::boxed(Hello))
//!     .any(PathPattern::starts_with("/static/"), appgate::boxed(Hello))
//!     .any(PathPattern::matches(r"/user/\d+").unwrap(), appgate::boxed(Hello));
//!
//! assert!(router.find("GET", "/hello").is_some());
//! assert!(router.find("POST", "/hello").is_none());
//! assert!(router.find("GET", "/user/42").is_some());
//! assert!(router.find("GET", "/user/4a").is_none());
//! ```

use crate::{
    errors::AppError,
    http::{request::Environment, response::Reply},
    server::server_impl::Application,
    StatusCode,
};
use futures_util::future::BoxFuture;
use regex::Regex;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("invalid route pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Path pattern of a route. A bare string converts to [`Exact`](Self::Exact).
#[derive(Clone)]
pub enum PathPattern {
    /// Byte equality.
    Exact(String),
    /// Path starts with the prefix.
    StartsWith(String),
    /// Regex matching the whole path.
    Matches(Regex),
}

impl PathPattern {
    #[inline]
    pub fn exact<S: Into<String>>(path: S) -> Self {
        PathPattern::Exact(path.into())
    }

    #[inline]
    pub fn starts_with<S: Into<String>>(prefix: S) -> Self {
        PathPattern::StartsWith(prefix.into())
    }

    /// Compiles `pattern` anchored at both ends, so it has to match the
    /// whole path rather than a substring of it.
    pub fn matches(pattern: &str) -> Result<Self, RouteError> {
        Regex::new(&format!("^(?:{pattern})$"))
            .map(PathPattern::Matches)
            .map_err(|source| RouteError::InvalidPattern {
                pattern: pattern.to_owned(),
                source,
            })
    }

    #[inline]
    pub fn is_match(&self, path: &str) -> bool {
        match self {
            PathPattern::Exact(exact) => path == exact,
            PathPattern::StartsWith(prefix) => path.starts_with(prefix.as_str()),
            PathPattern::Matches(regex) => regex.is_match(path),
        }
    }
}

impl fmt::Debug for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathPattern::Exact(s) => f.debug_tuple("Exact").field(s).finish(),
            PathPattern::StartsWith(s) => f.debug_tuple("StartsWith").field(s).finish(),
            PathPattern::Matches(r) => f.debug_tuple("Matches").field(&r.as_str()).finish(),
        }
    }
}

impl From<&str> for PathPattern {
    #[inline]
    fn from(value: &str) -> Self {
        PathPattern::Exact(value.to_owned())
    }
}

impl From<String> for PathPattern {
    #[inline]
    fn from(value: String) -> Self {
        PathPattern::Exact(value)
    }
}

/// One entry of a [`Router`].
#[derive(Debug, Clone)]
pub struct Route<H> {
    method: Option<String>,
    pattern: PathPattern,
    handler: H,
}

impl<H> Route<H> {
    /// Route guarded by `method` (compared case-sensitively), or matching
    /// any method when `None`.
    #[inline]
    pub fn new<P: Into<PathPattern>>(method: Option<&str>, pattern: P, handler: H) -> Self {
        Self {
            method: method.map(str::to_owned),
            pattern: pattern.into(),
            handler,
        }
    }

    #[inline]
    pub fn is_match(&self, method: &str, path: &str) -> bool {
        self.method.as_deref().map_or(true, |guard| guard == method) && self.pattern.is_match(path)
    }

    #[inline(always)]
    pub fn handler(&self) -> &H {
        &self.handler
    }
}

/// Ordered route table; first match wins.
///
/// Read-only once built and shared between connections as the server's
/// [`Application`].
pub struct Router<H = BoxApplication> {
    routes: Vec<Route<H>>,
    not_found: Option<H>,
}

impl<H> Default for Router<H> {
    fn default() -> Self {
        Self {
            routes: Vec::new(),
            not_found: None,
        }
    }
}

impl<H> Router<H> {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn route(mut self, route: Route<H>) -> Self {
        self.routes.push(route);
        self
    }

    #[inline]
    pub fn any<P: Into<PathPattern>>(self, pattern: P, handler: H) -> Self {
        self.route(Route::new(None, pattern, handler))
    }

    #[inline]
    pub fn get<P: Into<PathPattern>>(self, pattern: P, handler: H) -> Self {
        self.route(Route::new(Some("GET"), pattern, handler))
    }

    #[inline]
    pub fn post<P: Into<PathPattern>>(self, pattern: P, handler: H) -> Self {
        self.route(Route::new(Some("POST"), pattern, handler))
    }

    /// Handler for requests no route matches.
    #[inline]
    pub fn not_found(mut self, handler: H) -> Self {
        self.not_found = Some(handler);
        self
    }

    /// Handler of the first route matching `method` and `path`.
    pub fn find(&self, method: &str, path: &str) -> Option<&H> {
        self.routes
            .iter()
            .find(|route| route.is_match(method, path))
            .map(Route::handler)
    }

    #[inline(always)]
    pub fn routes(&self) -> &[Route<H>] {
        &self.routes
    }
}

impl<H: Application> Router<H> {
    /// Runs the matching handler, or the not-found handler, with `env`.
    ///
    /// Matching uses the path component of `request_path`; the query
    /// string does not take part.
    pub async fn dispatch(&self, env: &mut Environment<'_>) -> Result<Reply, AppError> {
        let handler = self
            .find(env.request_method(), env.path())
            .or(self.not_found.as_ref());

        match handler {
            Some(handler) => handler.call(env).await,
            None => Ok(Reply::new(StatusCode::NotFound)),
        }
    }
}

impl<H: Application> Application for Router<H> {
    #[inline]
    async fn call(&self, env: &mut Environment<'_>) -> Result<Reply, AppError> {
        self.dispatch(env).await
    }
}

impl<H: fmt::Debug> fmt::Debug for Router<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes)
            .field("not_found", &self.not_found)
            .finish()
    }
}

/// Object-safe form of [`Application`], for tables mixing handler types.
pub trait DynApplication: Send + Sync + 'static {
    fn call_boxed<'a, 'e>(&'a self, env: &'a mut Environment<'e>) -> BoxFuture<'a, Result<Reply, AppError>>;
}

impl<A: Application> DynApplication for A {
    #[inline]
    fn call_boxed<'a, 'e>(&'a self, env: &'a mut Environment<'e>) -> BoxFuture<'a, Result<Reply, AppError>> {
        Box::pin(self.call(env))
    }
}

/// Boxed handler, the default handler type of [`Router`].
pub type BoxApplication = Box<dyn DynApplication>;

impl Application for BoxApplication {
    #[inline]
    async fn call(&self, env: &mut Environment<'_>) -> Result<Reply, AppError> {
        (**self).call_boxed(env).await
    }
}

impl fmt::Debug for dyn DynApplication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DynApplication")
    }
}

/// Boxes `app` for use in a [`Router`] mixing handler types.
#[inline]
pub fn boxed<A: Application>(app: A) -> BoxApplication {
    Box::new(app)
}

#[cfg(test)]
mod pattern_tests {
    use super::*;

    #[test]
    fn patterns() {
        let exact = PathPattern::from("/bar");
        let prefix = PathPattern::starts_with("/bar");
        let regex = PathPattern::matches("^/baz/(bam|BAM)$").unwrap();

        #[rustfmt::skip]
        let cases = [
            (&exact,  "/bar",     true),
            (&exact,  "/bar/baz", false),
            (&exact,  "/ba",      false),
            (&prefix, "/bar",     true),
            (&prefix, "/bar/baz", true),
            (&prefix, "/barn",    true),
            (&prefix, "/ba",      false),
            (&regex,  "/baz/bam", true),
            (&regex,  "/baz/BAM", true),
            (&regex,  "/baz/bAm", false),
        ];

        for (pattern, path, expected) in cases {
            assert_eq!(pattern.is_match(path), expected, "{pattern:?} {path}");
        }
    }

    #[test]
    fn regex_is_anchored() {
        let regex = PathPattern::matches("/baz/ba.").unwrap();

        assert!(regex.is_match("/baz/bam"));
        assert!(!regex.is_match("/x/baz/bam"));
        assert!(!regex.is_match("/baz/bamm"));
    }

    #[test]
    fn invalid_regex() {
        assert!(matches!(
            PathPattern::matches("/(unclosed"),
            Err(RouteError::InvalidPattern { pattern, .. }) if pattern == "/(unclosed"
        ));
    }
}
