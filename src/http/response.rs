//! Application replies and their wire framing.
//!
//! An [`Application`](crate::Application) returns a [`Reply`]. The engine
//! turns it into an outgoing response, adds the framing headers the
//! application did not set itself and writes it to the socket.

use crate::{
    errors::Error,
    http::types::{number_to_bytes, HeaderValue, Status, Version},
};
use chrono::{DateTime, Utc};
use std::{borrow::Cow, collections::HashSet, fmt, io::Write};

/// Value of the `Server` header added to every response.
pub const SERVER_TOKEN: &str = concat!("appgate/", env!("CARGO_PKG_VERSION"));

/// Pull-based body producer. Called repeatedly until it returns
/// [`Pull::Last`] or [`Pull::Done`].
pub type Producer = Box<dyn FnMut() -> Pull + Send>;

/// One step of a [`Producer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pull {
    /// Write the data and pull again.
    Continue(Vec<u8>),
    /// Write the data, then the body is complete.
    Last(Vec<u8>),
    /// The body is complete.
    Done,
}

/// Response body: fixed bytes or a producer pulled on demand.
///
/// ```
/// use appgate::{Body, Pull};
///
/// let fixed = Body::from("hi");
/// assert_eq!(fixed.len(), Some(2));
///
/// let mut left = 3;
/// let stream = Body::stream(move || {
///     left -= 1;
///     match left {
///         0 => Pull::Done,
///         n => Pull::Continue(n.to_string().into_bytes()),
///     }
/// });
/// assert_eq!(stream.len(), None);
/// ```
pub enum Body {
    Fixed(Vec<u8>),
    Stream(Producer),
}

impl Body {
    #[inline]
    pub fn empty() -> Self {
        Body::Fixed(Vec::new())
    }

    #[inline]
    pub fn stream<F: FnMut() -> Pull + Send + 'static>(producer: F) -> Self {
        Body::Stream(Box::new(producer))
    }

    /// Byte length of a fixed body, `None` for a producer.
    #[inline]
    pub fn len(&self) -> Option<usize> {
        match self {
            Body::Fixed(bytes) => Some(bytes.len()),
            Body::Stream(_) => None,
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Body::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Fixed(bytes) => f.debug_tuple("Fixed").field(&bytes.len()).finish(),
            Body::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<Vec<u8>> for Body {
    #[inline]
    fn from(value: Vec<u8>) -> Self {
        Body::Fixed(value)
    }
}

impl From<&[u8]> for Body {
    #[inline]
    fn from(value: &[u8]) -> Self {
        Body::Fixed(value.to_vec())
    }
}

impl From<String> for Body {
    #[inline]
    fn from(value: String) -> Self {
        Body::Fixed(value.into_bytes())
    }
}

impl From<&str> for Body {
    #[inline]
    fn from(value: &str) -> Self {
        Body::Fixed(value.as_bytes().to_vec())
    }
}

/// What an application returns for a request: status, ordered headers, body.
///
/// A reply built without a body has an empty one.
///
/// ```
/// use appgate::{Reply, StatusCode};
///
/// let reply = Reply::new((200, "OK"))
///     .header("Content-Type", "text/plain")
///     .header("X-Items", 3)
///     .body("hi");
///
/// assert_eq!(reply.status().code(), 200);
/// assert_eq!(reply.headers().len(), 2);
///
/// let empty = Reply::new(StatusCode::NoContent);
/// assert_eq!(empty.body_ref().len(), Some(0));
/// ```
#[derive(Debug)]
pub struct Reply {
    status: Status,
    headers: Vec<(Cow<'static, str>, HeaderValue)>,
    body: Body,
}

impl Reply {
    #[inline]
    pub fn new<S: Into<Status>>(status: S) -> Self {
        Self {
            status: status.into(),
            headers: Vec::new(),
            body: Body::empty(),
        }
    }

    /// Appends a header. Order and duplicates are kept.
    #[inline]
    pub fn header<N, V>(mut self, name: N, value: V) -> Self
    where
        N: Into<Cow<'static, str>>,
        V: Into<HeaderValue>,
    {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Appends every header of `headers`.
    pub fn headers_from<I, N, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<Cow<'static, str>>,
        V: Into<HeaderValue>,
    {
        self.headers
            .extend(headers.into_iter().map(|(n, v)| (n.into(), v.into())));
        self
    }

    #[inline]
    pub fn body<B: Into<Body>>(mut self, body: B) -> Self {
        self.body = body.into();
        self
    }

    #[inline(always)]
    pub fn status(&self) -> &Status {
        &self.status
    }

    #[inline(always)]
    pub fn headers(&self) -> &[(Cow<'static, str>, HeaderValue)] {
        &self.headers
    }

    #[inline(always)]
    pub fn body_ref(&self) -> &Body {
        &self.body
    }

    /// First header named `name`, compared case-insensitively.
    pub fn header_value(&self, name: &str) -> Option<&HeaderValue> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    pub fn into_parts(self) -> (Status, Vec<(Cow<'static, str>, HeaderValue)>, Body) {
        (self.status, self.headers, self.body)
    }
}

/// A validated reply being put on the wire.
pub(crate) struct Outgoing {
    status: Status,
    headers: Vec<(Cow<'static, str>, HeaderValue)>,
    // lower-cased names of `headers`
    index: HashSet<String>,
    pub(crate) body: Body,
    pub(crate) chunked: bool,
    pub(crate) close: bool,
}

impl Outgoing {
    /// Checks that the reply can be serialized.
    pub(crate) fn from_reply(reply: Reply) -> Result<Self, Error> {
        let (status, headers, body) = reply.into_parts();

        if !(100..=999).contains(&status.code()) {
            return Err(Error::BadReturnValue(format!(
                "status code {} out of range",
                status.code()
            )));
        }
        if has_line_break(status.reason()) {
            return Err(Error::BadReturnValue("line break in reason phrase".into()));
        }

        let mut index = HashSet::with_capacity(headers.len() + 4);
        for (name, value) in &headers {
            if !is_valid_name(name) {
                return Err(Error::BadReturnValue(format!("invalid header name {name:?}")));
            }
            if value.as_str().is_some_and(has_line_break) {
                return Err(Error::BadReturnValue(format!(
                    "line break in value of header {name:?}"
                )));
            }
            index.insert(name.to_ascii_lowercase());
        }

        Ok(Self {
            status,
            headers,
            index,
            body,
            chunked: false,
            close: false,
        })
    }

    /// Best-effort response for a failed request: no headers, no body.
    pub(crate) fn failure(status: Status) -> Self {
        Self {
            status,
            headers: Vec::new(),
            index: HashSet::new(),
            body: Body::empty(),
            chunked: false,
            close: true,
        }
    }

    #[inline]
    pub(crate) fn has_header(&self, lower_name: &str) -> bool {
        self.index.contains(lower_name)
    }

    fn text_header(&self, lower_name: &str) -> Option<&str> {
        if !self.has_header(lower_name) {
            return None;
        }
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(lower_name))
            .and_then(|(_, v)| v.as_str())
    }

    fn add_default(&mut self, name: &'static str, value: HeaderValue) {
        let lower = name.to_ascii_lowercase();
        if self.index.insert(lower) {
            self.headers.push((Cow::Borrowed(name), value));
        }
    }

    /// Adds framing, `Date`, `Server` and `Connection` headers, each only
    /// when the application did not set it.
    ///
    /// `close` is the persistence decision taken from the request; the body
    /// kind and an application-set `Connection: close` may force it.
    pub(crate) fn finalize(&mut self, version: Version, close: bool, now: DateTime<Utc>) {
        self.close |= close;
        if self
            .text_header("connection")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("close"))
        {
            self.close = true;
        }

        let persistent = version.is_persistent_by_default();
        // HTTP/1.0 has no transfer codings
        if !persistent && self.index.remove("transfer-encoding") {
            self.headers
                .retain(|(name, _)| !name.eq_ignore_ascii_case("transfer-encoding"));
        }

        let chunked_by_app = persistent
            && self
                .text_header("transfer-encoding")
                .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"));

        match self.body.len() {
            Some(_) if chunked_by_app => self.chunked = true,
            Some(len) => self.add_default("Content-Length", len.into()),

            // the application frames the stream itself
            None if self.has_header("content-length") => {}
            None if !persistent => self.close = true,
            None if self.has_header("transfer-encoding") => {
                self.chunked = chunked_by_app;
                self.close |= !chunked_by_app;
            }
            None => {
                self.add_default("Transfer-Encoding", "chunked".into());
                self.chunked = true;
            }
        }

        self.add_default("Date", http_date(now).into());
        self.add_default("Server", SERVER_TOKEN.into());
        if !self.close {
            self.add_default("Connection", "keep-alive".into());
        }
    }

    /// Appends the status line, the headers and the blank line to `buffer`.
    pub(crate) fn write_head(&self, buffer: &mut Vec<u8>, version: Version) {
        // "HTTP/1.1 "
        buffer.extend_from_slice(b"HTTP/");
        let (arr, start) = number_to_bytes(version.major as u128);
        buffer.extend_from_slice(&arr[start..]);
        buffer.push(b'.');
        let (arr, start) = number_to_bytes(version.minor as u128);
        buffer.extend_from_slice(&arr[start..]);
        buffer.push(b' ');

        // "200 OK\r\n"
        let (arr, start) = number_to_bytes(self.status.code() as u128);
        buffer.extend_from_slice(&arr[start..]);
        buffer.push(b' ');
        buffer.extend_from_slice(self.status.reason().as_bytes());
        buffer.extend_from_slice(b"\r\n");

        for (name, value) in &self.headers {
            buffer.extend_from_slice(name.as_bytes());
            buffer.extend_from_slice(b": ");
            value.write_to(buffer);
            buffer.extend_from_slice(b"\r\n");
        }
        buffer.extend_from_slice(b"\r\n");
    }
}

/// Terminating zero-length chunk.
pub(crate) const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// Appends `<hex len>\r\n<data>\r\n`. An empty `data` writes nothing, since a
/// zero-length chunk would end the body.
#[inline]
pub(crate) fn write_chunk(buffer: &mut Vec<u8>, data: &[u8]) {
    if data.is_empty() {
        return;
    }
    // Writing into a Vec never fails
    let _ = write!(buffer, "{:x}\r\n", data.len());
    buffer.extend_from_slice(data);
    buffer.extend_from_slice(b"\r\n");
}

/// RFC 1123 date, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
#[inline]
pub(crate) fn http_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[inline]
fn has_line_break(value: &str) -> bool {
    value.bytes().any(|b| b == b'\r' || b == b'\n')
}

#[inline]
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_graphic() && b != b':')
}


#[cfg(test)]
mod finalize_tests {
    use super::*;
    use crate::tools::*;
    use chrono::TimeZone;

    fn date() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap()
    }

    fn head(reply: Reply, version: Version, close: bool) -> (String, Outgoing) {
        let mut out = Outgoing::from_reply(reply).unwrap();
        out.finalize(version, close, date());

        let mut buffer = Vec::new();
        out.write_head(&mut buffer, version);
        (str_op(&buffer).to_owned(), out)
    }

    #[test]
    fn date_format() {
        assert_eq!(http_date(date()), "Sun, 06 Nov 1994 08:49:37 GMT");
    }

    #[test]
    fn fixed_body() {
        let (text, out) = head(Reply::new((200, "OK")).body("hi"), Version::HTTP_11, false);

        assert_eq!(
            text,
            format!(
                "HTTP/1.1 200 OK\r\n\
                 Content-Length: 2\r\n\
                 Date: Sun, 06 Nov 1994 08:49:37 GMT\r\n\
                 Server: {SERVER_TOKEN}\r\n\
                 Connection: keep-alive\r\n\r\n"
            )
        );
        assert!(!out.chunked);
        assert!(!out.close);
    }

    #[test]
    fn closing() {
        let (text, out) = head(Reply::new((404, "Not Found")), Version::HTTP_10, true);

        assert!(text.starts_with("HTTP/1.0 404 Not Found\r\nContent-Length: 0\r\n"));
        assert!(!text.contains("Connection"));
        assert!(out.close);
    }

    #[test]
    fn producer() {
        #[rustfmt::skip]
        let cases = [
            (Version::HTTP_11, true,  false),
            (Version::new(1, 2), true,  false),
            (Version::HTTP_10, false, true),
        ];

        for (version, chunked, close) in cases {
            let reply = Reply::new((200, "OK")).body(Body::stream(|| Pull::Done));
            let (text, out) = head(reply, version, false);

            assert_eq!(out.chunked, chunked);
            assert_eq!(out.close, close);
            assert_eq!(text.contains("Transfer-Encoding: chunked\r\n"), chunked);
            assert!(!text.contains("Content-Length"));
        }
    }

    #[test]
    fn app_headers_win() {
        let reply = Reply::new((200, "OK"))
            .header("content-length", 5)
            .header("DATE", "yesterday")
            .header("server", "custom")
            .header("connection", "Keep-Alive")
            .body("hello");
        let (text, _) = head(reply, Version::HTTP_11, false);

        assert_eq!(
            text,
            "HTTP/1.1 200 OK\r\n\
             content-length: 5\r\n\
             DATE: yesterday\r\n\
             server: custom\r\n\
             connection: Keep-Alive\r\n\r\n"
        );
    }

    #[test]
    fn app_requests_close() {
        let reply = Reply::new((200, "OK")).header("Connection", "close");
        let (text, out) = head(reply, Version::HTTP_11, false);

        assert!(out.close);
        assert_eq!(text.matches("Connection").count(), 1);
    }

    #[test]
    fn app_chunked_fixed_body() {
        let reply = Reply::new((200, "OK"))
            .header("Transfer-Encoding", "chunked")
            .body("abc");
        let (text, out) = head(reply, Version::HTTP_11, false);

        assert!(out.chunked);
        assert!(!text.contains("Content-Length"));
    }

    #[test]
    fn app_transfer_encoding_on_http_10() {
        let reply = Reply::new((200, "OK"))
            .header("Transfer-Encoding", "chunked")
            .body("abc");
        let (text, out) = head(reply, Version::HTTP_10, false);

        assert!(!out.chunked);
        assert!(text.contains("Content-Length: 3\r\n"));
        assert!(!text.to_ascii_lowercase().contains("transfer-encoding"));

        let reply = Reply::new((200, "OK"))
            .header("transfer-encoding", "chunked")
            .body(Body::stream(|| Pull::Done));
        let (text, out) = head(reply, Version::HTTP_10, false);

        assert!(!out.chunked);
        assert!(out.close);
        assert!(!text.to_ascii_lowercase().contains("transfer-encoding"));
    }

    #[test]
    fn chunks() {
        let mut buffer = Vec::new();
        write_chunk(&mut buffer, b"hello");
        write_chunk(&mut buffer, b"");
        write_chunk(&mut buffer, &[b'x'; 26]);
        buffer.extend_from_slice(LAST_CHUNK);

        assert_eq!(
            str_op(&buffer),
            format!("5\r\nhello\r\n1a\r\n{}\r\n0\r\n\r\n", "x".repeat(26))
        );
    }
}
