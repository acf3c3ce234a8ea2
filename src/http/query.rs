//! Request-target splitting and query string parsing.
//!
//! The environment carries the raw request path including its query string.
//! These helpers derive the path component and the query parameters from it
//! without copying.

use memchr::memchr;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Splits a raw request path into its path component and optional query.
///
/// A fragment (`#...`) is dropped. Splitting the returned path again yields
/// the same path with no query, so the derivation is idempotent.
///
/// ```
/// use appgate::query::split_path;
///
/// assert_eq!(split_path("/foo?bar=123&bar=456"), ("/foo", Some("bar=123&bar=456")));
/// assert_eq!(split_path("/foo"), ("/foo", None));
/// assert_eq!(split_path("/foo?"), ("/foo", Some("")));
/// assert_eq!(split_path("/foo#top"), ("/foo", None));
/// ```
#[inline]
pub fn split_path(raw: &str) -> (&str, Option<&str>) {
    let raw = match memchr(b'#', raw.as_bytes()) {
        Some(i) => &raw[..i],
        None => raw,
    };

    match memchr(b'?', raw.as_bytes()) {
        Some(i) => (&raw[..i], Some(&raw[i + 1..])),
        None => (raw, None),
    }
}

/// Query string parser.
///
/// Keys and values are returned as slices of the input; percent-encoding is
/// left untouched.
///
/// ```
/// use appgate::query::Query;
/// use std::collections::HashMap;
///
/// // Vec keeps order and duplicates
/// let params: Vec<(&str, &str)> = Query::parse("bar=123&bar=456&flag", 10).unwrap();
/// assert_eq!(params, [("bar", "123"), ("bar", "456"), ("flag", "")]);
///
/// // HashMap keeps the last value
/// let params: HashMap<&str, &str> = Query::parse("bar=123&bar=456", 10).unwrap();
/// assert_eq!(params["bar"], "456");
///
/// assert!(Query::parse::<Vec<(&str, &str)>>("a=1&b=2", 1).is_err());
/// ```
pub struct Query;

impl Query {
    /// Parses `query` into a new collection.
    ///
    /// A leading `?` is ignored, so `?a=1` and `a=1` are equivalent.
    #[inline(always)]
    pub fn parse<'a, C: QueryCollector<'a>>(query: &'a str, limit: usize) -> Result<C, Error> {
        let mut result = C::with_capacity(limit.min(16));
        Self::parse_into(&mut result, query, limit)?;
        Ok(result)
    }

    /// Parses `query` and appends the parameters to `result`.
    ///
    /// ```
    /// use appgate::query::Query;
    ///
    /// let mut collector = Vec::new();
    /// Query::parse_into(&mut collector, "a=1&b=2", 10).unwrap();
    /// Query::parse_into(&mut collector, "c=3", 10).unwrap();
    /// assert_eq!(collector.len(), 3);
    ///
    /// Query::parse_into(&mut collector, "email=user%40example.com", 10).unwrap();
    /// assert_eq!(collector[3].1, "user%40example.com");
    /// ```
    pub fn parse_into<'a, C: QueryCollector<'a>>(
        result: &mut C,
        query: &'a str,
        limit: usize,
    ) -> Result<(), Error> {
        let data = query.strip_prefix('?').unwrap_or(query);
        if data.is_empty() {
            return Err(Error::Empty);
        }

        let mut added = 0;
        for segment in data.split('&') {
            if added >= limit {
                return Err(Error::OverLimit(limit));
            }

            let (key, value) = segment.split_once('=').unwrap_or((segment, ""));
            result.add_param(key, value);
            added += 1;
        }

        Ok(())
    }
}

/// Storage for parsed query parameters.
///
/// ```rust
/// use appgate::query::{Query, QueryCollector};
///
/// struct Owned(Vec<(String, String)>);
///
/// impl<'a> QueryCollector<'a> for Owned {
///     fn add_param(&mut self, key: &'a str, value: &'a str) {
///         self.0.push((key.to_owned(), value.to_owned()));
///     }
///
///     fn with_capacity(capacity: usize) -> Self {
///         Owned(Vec::with_capacity(capacity))
///     }
/// }
///
/// let Owned(params) = Query::parse("a=1", 4).unwrap();
/// assert_eq!(params[0].0, "a");
/// ```
pub trait QueryCollector<'a>
where
    Self: Sized,
{
    /// Adds a parsed parameter. `value` is empty when the segment has no `=`.
    fn add_param(&mut self, key: &'a str, value: &'a str);

    fn with_capacity(capacity: usize) -> Self;
}

impl<'a> QueryCollector<'a> for Vec<(&'a str, &'a str)> {
    #[inline(always)]
    fn add_param(&mut self, key: &'a str, value: &'a str) {
        self.push((key, value));
    }

    #[inline(always)]
    fn with_capacity(capacity: usize) -> Self {
        Vec::with_capacity(capacity)
    }
}

// Last value wins
impl<'a> QueryCollector<'a> for HashMap<&'a str, &'a str> {
    #[inline(always)]
    fn add_param(&mut self, key: &'a str, value: &'a str) {
        self.insert(key, value);
    }

    #[inline(always)]
    fn with_capacity(capacity: usize) -> Self {
        HashMap::with_capacity(capacity)
    }
}

impl<'a> QueryCollector<'a> for BTreeMap<&'a str, &'a str> {
    #[inline(always)]
    fn add_param(&mut self, key: &'a str, value: &'a str) {
        self.insert(key, value);
    }

    #[inline(always)]
    fn with_capacity(_: usize) -> Self {
        BTreeMap::new()
    }
}

/// Query parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// More than the allowed number of parameters.
    #[error("query parameter limit exceeded: limit={0}")]
    OverLimit(usize),

    /// The query string is empty or only `?`.
    #[error("query string is empty")]
    Empty,
}
