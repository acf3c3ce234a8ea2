use crate::{
    errors::{BodyError, Error},
    http::types::{slice_to_u64, Version},
    query::{self, split_path, Query},
};
use futures_util::future::BoxFuture;
use std::{borrow::Cow, fmt, time::Duration};

/// Where body bytes come from when the environment is bound to a connection.
pub(crate) trait BodySource: Send + Sync {
    /// Reads exactly `n` bytes, or up to `max` available bytes when `n` is `0`.
    fn read_body(
        &mut self,
        n: usize,
        max: usize,
        timeout: Option<Duration>,
    ) -> BoxFuture<'_, Result<Vec<u8>, BodyError>>;
}

/// Request head accumulated from parse events.
#[derive(Debug, Clone)]
pub(crate) struct RequestHead {
    pub(crate) method: String,
    pub(crate) path: String,
    pub(crate) version: Version,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) content_type: Option<String>,
    pub(crate) content_length: Option<u64>,
}

impl RequestHead {
    #[inline]
    pub(crate) fn new(method: String, path: String, version: Version) -> Self {
        Self {
            method,
            path,
            version,
            headers: Vec::new(),
            content_type: None,
            content_length: None,
        }
    }

    /// Records a header, mirroring `Content-Type` and `Content-Length`.
    ///
    /// Repeated `Content-Length` headers must agree. Request bodies with a
    /// `Transfer-Encoding` are not supported.
    pub(crate) fn push_header(&mut self, name: String, value: String) -> Result<(), Error> {
        if name.eq_ignore_ascii_case("content-length") {
            let length = slice_to_u64(value.trim().as_bytes())
                .ok_or_else(|| Error::InvalidContentLength(value.clone()))?;
            if self.content_length.is_some_and(|previous| previous != length) {
                return Err(Error::InvalidContentLength(value));
            }
            self.content_length = Some(length);
        } else if name.eq_ignore_ascii_case("transfer-encoding") {
            return Err(Error::UnsupportedTransferEncoding(value));
        } else if name.eq_ignore_ascii_case("content-type") {
            self.content_type = Some(value.clone());
        }

        self.headers.push((name, value));
        Ok(())
    }

    /// Persistence decision for this request.
    ///
    /// | Version  | `Connection` header         | Result |
    /// |----------|-----------------------------|--------|
    /// | >= 1.1   | `close`                     | close  |
    /// | >= 1.1   | anything else or absent     | keep   |
    /// | 1.0      | `Keep-Alive`                | keep   |
    /// | 1.0      | anything else or absent     | close  |
    pub(crate) fn wants_close(&self) -> bool {
        let connection = self
            .headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("connection"))
            .map(|(_, value)| value.as_str());

        match self.version.is_persistent_by_default() {
            true => connection == Some("close"),
            false => connection != Some("Keep-Alive"),
        }
    }
}

enum Source<'c> {
    Socket(&'c mut (dyn BodySource + 'c)),
    Memory { data: Vec<u8>, pos: usize },
}

/// Body-read capability of an [`Environment`].
///
/// Bound to the connection socket while the request is dispatched. Bytes
/// the application leaves unread are discarded by the server before the next
/// request on the same connection is parsed.
pub struct BodyReader<'c> {
    source: Source<'c>,
    content_length: Option<u64>,
    consumed: u64,
    chunk_size: usize,
}

// Read size for detached environments
const MEMORY_CHUNK_SIZE: usize = 16 * 1024;

impl<'c> BodyReader<'c> {
    #[inline]
    pub(crate) fn socket(
        source: &'c mut (dyn BodySource + 'c),
        content_length: Option<u64>,
        chunk_size: usize,
    ) -> Self {
        Self {
            source: Source::Socket(source),
            content_length,
            consumed: 0,
            chunk_size,
        }
    }

    #[inline]
    pub(crate) fn memory(data: Vec<u8>, content_length: Option<u64>) -> Self {
        Self {
            source: Source::Memory { data, pos: 0 },
            content_length,
            consumed: 0,
            chunk_size: MEMORY_CHUNK_SIZE,
        }
    }

    /// Waits for exactly `n` body bytes, or for the rest of the body when
    /// `Content-Length` declares fewer. With `n == 0` returns whatever is
    /// available, which may be nothing.
    ///
    /// Never reads past the declared body: once it is used up, or when the
    /// request has no `Content-Length`, the result is empty. Fails with
    /// [`BodyError::Closed`] when the peer closes first.
    #[inline]
    pub async fn read(&mut self, n: usize) -> Result<Vec<u8>, BodyError> {
        self.read_inner(n, None).await
    }

    /// Like [`read`](Self::read), but gives up with [`BodyError::Timeout`]
    /// when no data arrives within `timeout`.
    #[inline]
    pub async fn read_timeout(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>, BodyError> {
        self.read_inner(n, Some(timeout)).await
    }

    /// Reads the rest of the body declared by `Content-Length`.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>, BodyError> {
        match self.remaining() {
            Some(0) | None => Ok(Vec::new()),
            Some(n) => self.read(n as usize).await,
        }
    }

    /// Declared body bytes not read yet.
    #[inline]
    pub fn remaining(&self) -> Option<u64> {
        self.content_length
            .map(|length| length.saturating_sub(self.consumed))
    }

    /// Preferred size of incremental reads, from
    /// [`ConnLimits::body_chunk_size`](crate::limits::ConnLimits::body_chunk_size).
    #[inline(always)]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Body bytes handed out so far.
    #[inline(always)]
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    async fn read_inner(&mut self, n: usize, timeout: Option<Duration>) -> Result<Vec<u8>, BodyError> {
        // No Content-Length, no body
        let max = match self.remaining().unwrap_or(0) {
            0 => return Ok(Vec::new()),
            remaining => usize::try_from(remaining).unwrap_or(usize::MAX),
        };
        let n = n.min(max);

        let data = match &mut self.source {
            Source::Socket(source) => source.read_body(n, max, timeout).await?,
            Source::Memory { data, pos } => {
                let available = data.len() - *pos;
                let take = if n == 0 { available.min(max) } else { n };
                if take > available {
                    return Err(BodyError::Closed {
                        expected: n,
                        received: available,
                    });
                }

                let chunk = data[*pos..*pos + take].to_vec();
                *pos += take;
                chunk
            }
        };

        self.consumed += data.len() as u64;
        Ok(data)
    }
}

impl fmt::Debug for BodyReader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyReader")
            .field("content_length", &self.content_length)
            .field("consumed", &self.consumed)
            .finish_non_exhaustive()
    }
}

/// Per-request context handed to an [`Application`](crate::Application).
///
/// Exposes the logical keys `request_method`, `request_path` (raw, query
/// string included), `request_protocol` (`HTTP/<major>.<minor>`),
/// `http_headers` (arrival order, duplicates kept), `content_type`,
/// `content_length` and the body readers.
///
/// A fresh environment is built for every request. Applications and
/// middleware may add their own string entries with
/// [`with_var`](Self::with_var); a later entry overrides an earlier one of
/// the same key and [`var`](Self::var) looks up both kinds.
///
/// ```
/// use appgate::Environment;
///
/// let env = Environment::builder("GET", "/foo?bar=123&bar=456")
///     .header("Content-Type", "text/plain")
///     .build()
///     .unwrap()
///     .with_var("user", "alice");
///
/// assert_eq!(env.request_protocol(), "HTTP/1.1");
/// assert_eq!(env.path(), "/foo");
/// assert_eq!(env.var("content_type").as_deref(), Some("text/plain"));
/// assert_eq!(env.var("user").as_deref(), Some("alice"));
/// ```
pub struct Environment<'c> {
    head: RequestHead,
    vars: Vec<(String, String)>,
    body: BodyReader<'c>,
}

impl<'c> Environment<'c> {
    #[inline]
    pub(crate) fn new(head: RequestHead, body: BodyReader<'c>) -> Self {
        Self {
            head,
            vars: Vec::new(),
            body,
        }
    }

    /// Builds a detached environment whose body is held in memory.
    #[inline]
    pub fn builder<M: Into<String>, P: Into<String>>(method: M, path: P) -> EnvironmentBuilder {
        EnvironmentBuilder {
            head: RequestHead::new(method.into(), path.into(), Version::HTTP_11),
            headers: Vec::new(),
            body: None,
        }
    }

    #[inline(always)]
    pub fn request_method(&self) -> &str {
        &self.head.method
    }

    /// Raw request path, query string included.
    #[inline(always)]
    pub fn request_path(&self) -> &str {
        &self.head.path
    }

    /// `HTTP/<major>.<minor>`
    #[inline]
    pub fn request_protocol(&self) -> String {
        self.head.version.to_string()
    }

    #[inline(always)]
    pub fn protocol(&self) -> Version {
        self.head.version
    }

    /// Path component of [`request_path`](Self::request_path).
    #[inline]
    pub fn path(&self) -> &str {
        split_path(&self.head.path).0
    }

    /// Query component of [`request_path`](Self::request_path), without `?`.
    #[inline]
    pub fn query(&self) -> Option<&str> {
        split_path(&self.head.path).1
    }

    /// Query parameters in order, duplicates kept.
    ///
    /// An absent or empty query gives an empty list.
    pub fn query_params(&self, limit: usize) -> Result<Vec<(&str, &str)>, query::Error> {
        match self.query() {
            None | Some("") => Ok(Vec::new()),
            Some(query) => Query::parse(query, limit),
        }
    }

    /// All request headers, arrival order, duplicates kept.
    #[inline(always)]
    pub fn http_headers(&self) -> &[(String, String)] {
        &self.head.headers
    }

    /// First header named `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head
            .headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[inline(always)]
    pub fn content_type(&self) -> Option<&str> {
        self.head.content_type.as_deref()
    }

    #[inline(always)]
    pub fn content_length(&self) -> Option<u64> {
        self.head.content_length
    }

    /// Looks up an entry by name: extra entries first, then the built-in
    /// keys `request_method`, `request_path`, `request_protocol`,
    /// `content_type` and `content_length`.
    pub fn var(&self, key: &str) -> Option<Cow<'_, str>> {
        if let Some((_, value)) = self.vars.iter().find(|(k, _)| k == key) {
            return Some(Cow::Borrowed(value));
        }

        match key {
            "request_method" => Some(Cow::Borrowed(self.request_method())),
            "request_path" => Some(Cow::Borrowed(self.request_path())),
            "request_protocol" => Some(Cow::Owned(self.request_protocol())),
            "content_type" => self.content_type().map(Cow::Borrowed),
            "content_length" => self.content_length().map(|n| Cow::Owned(n.to_string())),
            _ => None,
        }
    }

    /// Returns the environment extended with `key`, replacing any earlier
    /// entry of that key.
    #[inline]
    pub fn with_var<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.set_var(key, value);
        self
    }

    /// In-place form of [`with_var`](Self::with_var).
    pub fn set_var<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        let key = key.into();
        self.vars.retain(|(k, _)| *k != key);
        self.vars.insert(0, (key, value.into()));
    }

    /// Extra entries, most recent first.
    #[inline(always)]
    pub fn vars(&self) -> &[(String, String)] {
        &self.vars
    }

    /// Body readers bound to this request.
    #[inline(always)]
    pub fn body(&mut self) -> &mut BodyReader<'c> {
        &mut self.body
    }

    #[inline(always)]
    pub(crate) fn body_consumed(&self) -> u64 {
        self.body.consumed
    }
}

impl fmt::Debug for Environment<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("request_method", &self.head.method)
            .field("request_path", &self.head.path)
            .field("request_protocol", &self.head.version)
            .field("http_headers", &self.head.headers)
            .field("content_type", &self.head.content_type)
            .field("content_length", &self.head.content_length)
            .field("vars", &self.vars)
            .field("body", &self.body)
            .finish()
    }
}

/// Builder for detached environments, returned by [`Environment::builder`].
#[derive(Debug)]
pub struct EnvironmentBuilder {
    head: RequestHead,
    headers: Vec<(String, String)>,
    body: Option<Vec<u8>>,
}

impl EnvironmentBuilder {
    #[inline]
    pub fn protocol(mut self, version: Version) -> Self {
        self.head.version = version;
        self
    }

    #[inline]
    pub fn header<N: Into<String>, V: Into<String>>(mut self, name: N, value: V) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// In-memory body. Sets `content_length` unless a `Content-Length`
    /// header was given.
    #[inline]
    pub fn body<B: Into<Vec<u8>>>(mut self, body: B) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Fails with [`Error::InvalidContentLength`] on a non-numeric or
    /// conflicting `Content-Length` header, and with
    /// [`Error::UnsupportedTransferEncoding`] on a `Transfer-Encoding` header.
    pub fn build(self) -> Result<Environment<'static>, Error> {
        let mut head = self.head;
        for (name, value) in self.headers {
            head.push_header(name, value)?;
        }

        let body = self.body.unwrap_or_default();
        if head.content_length.is_none() && !body.is_empty() {
            head.content_length = Some(body.len() as u64);
        }

        let content_length = head.content_length;
        Ok(Environment::new(head, BodyReader::memory(body, content_length)))
    }
}
