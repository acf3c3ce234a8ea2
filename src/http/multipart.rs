//! Streaming `multipart/form-data` decoder ([RFC 2046](https://datatracker.ietf.org/doc/html/rfc2046#section-5.1)).
//!
//! The body is fed in chunks of any size; chunk borders may fall anywhere,
//! including inside a boundary line or a part header. A caller-supplied
//! callback sees every part's headers before its body is stored and decides
//! whether to keep it, drop it or keep it under another name.
//!
//! ```
//! use appgate::multipart::Decoder;
//!
//! let body = "--xyz\r\n\
//!     Content-Disposition: form-data; name=\"title\"\r\n\r\n\
//!     Hello\r\n\
//!     --xyz--\r\n";
//!
//! let mut decoder = Decoder::new("xyz").unwrap();
//! for chunk in body.as_bytes().chunks(7) {
//!     decoder.feed(chunk).unwrap();
//! }
//! decoder.finish().unwrap();
//!
//! assert_eq!(decoder.form_data()["title"].body, b"Hello");
//! ```

use crate::{
    errors::BodyError, http::request::Environment, limits::MultipartLimits,
};
use memchr::memmem::Finder;
use std::{collections::BTreeMap, fmt};
use thiserror::Error;

/// Longest boundary allowed by RFC 2046.
pub const MAX_BOUNDARY_LEN: usize = 70;

/// Multipart decoding failures.
#[derive(Debug, Error)]
pub enum MultipartError {
    #[error("boundary must be 1 to {MAX_BOUNDARY_LEN} bytes, got {0}")]
    InvalidBoundary(usize),
    #[error("content type carries no multipart boundary")]
    MissingBoundary,
    #[error("unexpected data after boundary")]
    InvalidBoundaryLine,
    #[error("part header line without ':' {0:?}")]
    MissingColon(String),
    #[error("part header block exceeds {0} bytes")]
    HeadersTooLarge(usize),
    #[error("body ended before the closing boundary")]
    UnexpectedEnd,
    #[error("decoder failed earlier and accepts no more input")]
    Poisoned,
    #[error("request has no Content-Length")]
    MissingContentLength,
    #[error(transparent)]
    Body(#[from] BodyError),
}

/// A decoded part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    /// `name` parameter of `Content-Disposition`, empty when absent.
    pub name: String,
    /// Part headers in order, duplicates kept.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Part {
    /// First header named `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// `filename` parameter of `Content-Disposition`.
    pub fn filename(&self) -> Option<String> {
        disposition_param(self.header("content-disposition")?, "filename")
    }

    /// Body as UTF-8 text.
    pub fn text(&self) -> Option<&str> {
        simdutf8::basic::from_utf8(&self.body).ok()
    }
}

/// What the callback sees of a part once its headers are parsed.
#[derive(Debug, Clone, Copy)]
pub struct PartInfo<'a> {
    /// Position of the part in the body, counting skipped parts.
    pub index: usize,
    pub name: &'a str,
    pub headers: &'a [(String, String)],
}

/// Callback verdict for a part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition<U> {
    /// Store the part as is.
    Continue(U),
    /// Drop the part; its body is consumed but not stored.
    Skip(U),
    /// Store the part under `name` with `headers`.
    Rename {
        name: String,
        headers: Vec<(String, String)>,
        user_data: U,
    },
}

type Callback<U> = Box<dyn FnMut(PartInfo<'_>, U) -> Disposition<U> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Preamble,
    AfterBoundary,
    Headers,
    Body,
    Done,
    Failed,
}

struct Pending {
    name: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    header_size: usize,
    store: bool,
}

/// Incremental multipart decoder.
///
/// `U` is opaque user data threaded through the callback in part order:
/// each invocation receives the value returned by the previous one. While a
/// callback runs the decoder does not hold it.
pub struct Decoder<U = ()> {
    // "\r\n--" + boundary
    delimiter: Vec<u8>,
    finder: Finder<'static>,
    buffer: Vec<u8>,
    state: State,
    limits: MultipartLimits,

    callback: Option<Callback<U>>,
    // `None` only while, or after, a callback holds it
    user_data: Option<U>,

    current: Option<Pending>,
    index: usize,
    parts: Vec<Part>,
}

impl Decoder<()> {
    /// Decoder that stores every part.
    pub fn new<B: AsRef<str>>(boundary: B) -> Result<Self, MultipartError> {
        Self::build(boundary.as_ref(), None, ())
    }
}

impl<U> Decoder<U> {
    /// Decoder that asks `callback` about every part.
    ///
    /// ```
    /// use appgate::multipart::{Decoder, Disposition};
    ///
    /// let mut decoder = Decoder::with_callback(
    ///     "xyz",
    ///     |part, mut seen: Vec<String>| {
    ///         seen.push(part.name.to_owned());
    ///         match part.name {
    ///             "secret" => Disposition::Skip(seen),
    ///             _ => Disposition::Continue(seen),
    ///         }
    ///     },
    ///     Vec::new(),
    /// )
    /// .unwrap();
    ///
    /// decoder.feed(b"--xyz\r\nContent-Disposition: form-data; name=\"secret\"\r\n\r\n42\r\n").unwrap();
    /// decoder.feed(b"--xyz\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\n1\r\n--xyz--").unwrap();
    ///
    /// assert_eq!(decoder.user_data().unwrap(), &["secret", "a"]);
    /// assert_eq!(decoder.form_data().len(), 1);
    /// ```
    pub fn with_callback<B, F>(boundary: B, callback: F, user_data: U) -> Result<Self, MultipartError>
    where
        B: AsRef<str>,
        F: FnMut(PartInfo<'_>, U) -> Disposition<U> + Send + 'static,
    {
        Self::build(boundary.as_ref(), Some(Box::new(callback)), user_data)
    }

    fn build(boundary: &str, callback: Option<Callback<U>>, user_data: U) -> Result<Self, MultipartError> {
        if boundary.is_empty() || boundary.len() > MAX_BOUNDARY_LEN {
            return Err(MultipartError::InvalidBoundary(boundary.len()));
        }

        let mut delimiter = Vec::with_capacity(boundary.len() + 4);
        delimiter.extend_from_slice(b"\r\n--");
        delimiter.extend_from_slice(boundary.as_bytes());

        Ok(Self {
            finder: Finder::new(&delimiter).into_owned(),
            // The first boundary may open the body without a preceding CRLF
            buffer: b"\r\n".to_vec(),
            delimiter,
            state: State::Preamble,
            limits: MultipartLimits::default(),
            callback,
            user_data: Some(user_data),
            current: None,
            index: 0,
            parts: Vec::new(),
        })
    }

    #[inline]
    pub fn with_limits(mut self, limits: MultipartLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Parts stored so far keyed by name; a later part overwrites an
    /// earlier one of the same name.
    pub fn form_data(&self) -> BTreeMap<&str, &Part> {
        self.parts.iter().map(|part| (part.name.as_str(), part)).collect()
    }

    /// Every stored part in body order.
    #[inline(always)]
    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    /// Current user data. `None` when a callback panicked while holding it.
    #[inline(always)]
    pub fn user_data(&self) -> Option<&U> {
        self.user_data.as_ref()
    }

    #[inline]
    pub fn into_user_data(self) -> Option<U> {
        self.user_data
    }

    /// Whether the closing boundary has been seen.
    #[inline(always)]
    pub fn is_complete(&self) -> bool {
        self.state == State::Done
    }

    /// Reports a body that ended before its closing boundary.
    pub fn finish(&mut self) -> Result<(), MultipartError> {
        match self.state {
            State::Done => Ok(()),
            State::Failed => Err(MultipartError::Poisoned),
            _ => {
                self.state = State::Failed;
                Err(MultipartError::UnexpectedEnd)
            }
        }
    }

    /// Consumes the next chunk of the body.
    ///
    /// Input after the closing boundary is ignored. After an error every
    /// call fails with [`MultipartError::Poisoned`]; parts stored before the
    /// error stay available.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<(), MultipartError> {
        match self.state {
            State::Done => return Ok(()),
            State::Failed => return Err(MultipartError::Poisoned),
            _ => {}
        }

        self.buffer.extend_from_slice(chunk);

        loop {
            let progressed = match self.state {
                State::Preamble => self.skip_preamble(),
                State::AfterBoundary => self.after_boundary(),
                State::Headers => self.header_line(),
                State::Body => Ok(self.body()),
                State::Done => {
                    self.buffer = Vec::new();
                    return Ok(());
                }
                State::Failed => return Err(MultipartError::Poisoned),
            };

            match progressed {
                Ok(true) => continue,
                Ok(false) => return Ok(()),
                Err(err) => {
                    self.state = State::Failed;
                    self.current = None;
                    self.buffer = Vec::new();
                    return Err(err);
                }
            }
        }
    }

    // Each step returns whether it made progress with the buffered input.

    fn skip_preamble(&mut self) -> Result<bool, MultipartError> {
        match self.finder.find(&self.buffer) {
            Some(i) => {
                self.buffer.drain(..i + self.delimiter.len());
                self.state = State::AfterBoundary;
                Ok(true)
            }
            None => {
                let keep = self.delimiter.len() - 1;
                if self.buffer.len() > keep {
                    self.buffer.drain(..self.buffer.len() - keep);
                }
                Ok(false)
            }
        }
    }

    fn after_boundary(&mut self) -> Result<bool, MultipartError> {
        if self.buffer.len() < 2 {
            return Ok(false);
        }
        if self.buffer.starts_with(b"--") {
            self.state = State::Done;
            return Ok(true);
        }

        match memchr::memmem::find(&self.buffer, b"\r\n") {
            // Only transport padding may follow the boundary
            Some(i) if self.buffer[..i].iter().all(|b| matches!(b, b' ' | b'\t')) => {
                self.buffer.drain(..i + 2);
                self.current = Some(Pending {
                    name: String::new(),
                    headers: Vec::new(),
                    body: Vec::new(),
                    header_size: 0,
                    store: true,
                });
                self.state = State::Headers;
                Ok(true)
            }
            Some(_) => Err(MultipartError::InvalidBoundaryLine),
            None if self.buffer.iter().all(|b| matches!(b, b' ' | b'\t' | b'\r')) => Ok(false),
            None => Err(MultipartError::InvalidBoundaryLine),
        }
    }

    fn header_line(&mut self) -> Result<bool, MultipartError> {
        let max = self.limits.max_header_size;
        let Some(pending) = self.current.as_mut() else {
            return Err(MultipartError::Poisoned);
        };

        let Some(end) = memchr::memmem::find(&self.buffer, b"\r\n") else {
            return match pending.header_size + self.buffer.len() > max {
                true => Err(MultipartError::HeadersTooLarge(max)),
                false => Ok(false),
            };
        };

        pending.header_size += end + 2;
        if pending.header_size > max {
            return Err(MultipartError::HeadersTooLarge(max));
        }

        if end == 0 {
            self.buffer.drain(..2);
            self.start_body()?;
            return Ok(true);
        }

        let line = String::from_utf8_lossy(&self.buffer[..end]).into_owned();
        self.buffer.drain(..end + 2);

        // Folded continuation of the previous header
        if line.starts_with([' ', '\t']) {
            match pending.headers.last_mut() {
                Some((_, value)) => {
                    value.push(' ');
                    value.push_str(line.trim());
                    return Ok(true);
                }
                None => return Err(MultipartError::MissingColon(line)),
            }
        }

        let Some((name, value)) = line.split_once(':') else {
            return Err(MultipartError::MissingColon(line));
        };
        pending
            .headers
            .push((name.trim().to_owned(), value.trim().to_owned()));
        Ok(true)
    }

    fn start_body(&mut self) -> Result<(), MultipartError> {
        let index = self.index;
        self.index += 1;

        let Some(pending) = self.current.as_mut() else {
            return Err(MultipartError::Poisoned);
        };
        pending.name = pending
            .headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case("content-disposition"))
            .and_then(|(_, v)| disposition_param(v, "name"))
            .unwrap_or_default();

        let Some(user_data) = self.user_data.take() else {
            return Err(MultipartError::Poisoned);
        };
        let disposition = match self.callback.as_mut() {
            Some(callback) => callback(
                PartInfo {
                    index,
                    name: &pending.name,
                    headers: &pending.headers,
                },
                user_data,
            ),
            None => Disposition::Continue(user_data),
        };

        self.user_data = Some(match disposition {
            Disposition::Continue(user_data) => user_data,
            Disposition::Skip(user_data) => {
                pending.store = false;
                user_data
            }
            Disposition::Rename {
                name,
                headers,
                user_data,
            } => {
                pending.name = name;
                pending.headers = headers;
                user_data
            }
        });
        self.state = State::Body;
        Ok(())
    }

    fn body(&mut self) -> bool {
        match self.finder.find(&self.buffer) {
            Some(i) => {
                if let Some(mut pending) = self.current.take() {
                    if pending.store {
                        pending.body.extend_from_slice(&self.buffer[..i]);
                        self.parts.push(Part {
                            name: pending.name,
                            headers: pending.headers,
                            body: pending.body,
                        });
                    }
                }
                self.buffer.drain(..i + self.delimiter.len());
                self.state = State::AfterBoundary;
                true
            }
            None => {
                // The tail may be the start of a delimiter
                let keep = self.delimiter.len() - 1;
                if self.buffer.len() > keep {
                    let commit = self.buffer.len() - keep;
                    if let Some(pending) = self.current.as_mut().filter(|p| p.store) {
                        pending.body.extend_from_slice(&self.buffer[..commit]);
                    }
                    self.buffer.drain(..commit);
                }
                false
            }
        }
    }
}

impl<U: fmt::Debug> fmt::Debug for Decoder<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decoder")
            .field("delimiter", &String::from_utf8_lossy(&self.delimiter))
            .field("state", &self.state)
            .field("buffered", &self.buffer.len())
            .field("parts", &self.parts.len())
            .field("user_data", &self.user_data)
            .finish_non_exhaustive()
    }
}

/// Extracts the boundary from a `multipart/*` content type.
///
/// ```
/// use appgate::multipart::boundary_from_content_type;
///
/// let boundary = boundary_from_content_type(
///     "multipart/form-data; boundary=----WebKitFormBoundaryDr6DS6tqR3sKzPnI",
/// )
/// .unwrap();
/// assert_eq!(boundary, "----WebKitFormBoundaryDr6DS6tqR3sKzPnI");
/// ```
pub fn boundary_from_content_type(content_type: &str) -> Result<String, MultipartError> {
    let mime = content_type.split(';').next().unwrap_or("").trim();
    let is_multipart = mime
        .get(..10)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("multipart/"));
    if !is_multipart {
        return Err(MultipartError::MissingBoundary);
    }

    let boundary = disposition_param(content_type, "boundary").ok_or(MultipartError::MissingBoundary)?;
    if boundary.is_empty() || boundary.len() > MAX_BOUNDARY_LEN {
        return Err(MultipartError::InvalidBoundary(boundary.len()));
    }
    Ok(boundary)
}

/// Reads the request body declared by `Content-Length` through the
/// environment's body reader and feeds it to `decoder` chunk by chunk.
///
/// Fails with [`MultipartError::UnexpectedEnd`] when the body has no closing
/// boundary.
pub async fn read_form<U>(
    env: &mut Environment<'_>,
    decoder: &mut Decoder<U>,
) -> Result<(), MultipartError> {
    let body = env.body();
    let mut remaining = body.remaining().ok_or(MultipartError::MissingContentLength)?;
    let chunk_size = body.chunk_size().max(1) as u64;

    while remaining > 0 {
        let data = body.read(remaining.min(chunk_size) as usize).await?;
        remaining -= data.len() as u64;
        decoder.feed(&data)?;
    }

    decoder.finish()
}

// Value of `key` in a `value; key=token; key2="quoted \" string"` header.
fn disposition_param(header: &str, key: &str) -> Option<String> {
    let mut rest = header.split_once(';')?.1;

    loop {
        rest = rest.trim_start_matches([' ', '\t', ';']);
        if rest.is_empty() {
            return None;
        }

        let eq = rest.find('=')?;
        let name = rest[..eq].trim();
        rest = rest[eq + 1..].trim_start();

        let value = if let Some(quoted) = rest.strip_prefix('"') {
            let mut value = String::new();
            let mut chars = quoted.char_indices();
            let mut end = quoted.len();
            while let Some((i, c)) = chars.next() {
                match c {
                    '\\' => {
                        if let Some((_, escaped)) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => {
                        end = i + 1;
                        break;
                    }
                    c => value.push(c),
                }
            }
            rest = &quoted[end..];
            value
        } else {
            let end = rest.find(';').unwrap_or(rest.len());
            let value = rest[..end].trim().to_owned();
            rest = &rest[end..];
            value
        };

        if name.eq_ignore_ascii_case(key) {
            return Some(value);
        }
    }
}


#[cfg(test)]
mod callback_tests {
    use super::*;

    const BOUNDARY: &str = "----WebKitFormBoundaryDr6DS6tqR3sKzPnI";

    fn body(names: &[&str]) -> Vec<u8> {
        let mut body = String::new();
        for name in names {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\nvalue of {name}\r\n"
            ));
        }
        body.push_str(&format!("--{BOUNDARY}--\r\n"));
        body.into_bytes()
    }

    #[test]
    fn skip() {
        let mut decoder = Decoder::with_callback(
            BOUNDARY,
            |part, ()| match part.name.starts_with("skip") {
                true => Disposition::Skip(()),
                false => Disposition::Continue(()),
            },
            (),
        )
        .unwrap();

        decoder.feed(&body(&["a", "skip1", "b", "skip2"])).unwrap();
        decoder.finish().unwrap();

        let names: Vec<&str> = decoder.form_data().into_keys().collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn skipped_parts_leave_others_intact() {
        let body = format!(
            "preamble\r\n\
             --{BOUNDARY}\r\nContent-Disposition: form-data; name=\"title\"\r\n\r\nHello\r\n\
             --{BOUNDARY}\r\nContent-Disposition: form-data; name=\"skip-me\"\r\nX-Extra: 1\r\n\r\nx--{BOUNDARY}\r\n\
             --{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.bin\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n\x00\r\n\r-\r\n--\r\n\
             --{BOUNDARY}\r\nContent-Disposition: form-data; name=\"skip-too\"\r\n\r\n...\r\n\
             --{BOUNDARY}\r\nContent-Disposition: form-data; name=\"tail\"\r\n\r\n\r\n\
             --{BOUNDARY}--\r\nepilogue"
        );
        let body = body.as_bytes();

        let mut reference = Decoder::new(BOUNDARY).unwrap();
        reference.feed(body).unwrap();
        reference.finish().unwrap();
        let expected: Vec<Part> = reference
            .parts()
            .iter()
            .filter(|part| !part.name.starts_with("skip"))
            .cloned()
            .collect();
        assert_eq!(expected.len(), 3);

        for size in [1, 2, 3, 7, 16, 41, body.len()] {
            let mut decoder = Decoder::with_callback(
                BOUNDARY,
                |part, skipped: usize| match part.name.starts_with("skip") {
                    true => Disposition::Skip(skipped + 1),
                    false => Disposition::Continue(skipped),
                },
                0,
            )
            .unwrap();

            for chunk in body.chunks(size) {
                decoder.feed(chunk).unwrap();
            }
            decoder.finish().unwrap();

            assert_eq!(decoder.parts(), expected.as_slice(), "chunk size {size}");
            assert_eq!(decoder.user_data(), Some(&2), "chunk size {size}");
        }
    }

    #[test]
    fn user_data_without_default() {
        #[derive(Debug, PartialEq)]
        struct Tally {
            bytes_of_names: usize,
        }

        let mut decoder = Decoder::with_callback(
            BOUNDARY,
            |part, tally: Tally| {
                Disposition::Continue(Tally {
                    bytes_of_names: tally.bytes_of_names + part.name.len(),
                })
            },
            Tally { bytes_of_names: 0 },
        )
        .unwrap();

        decoder.feed(&body(&["ab", "cde"])).unwrap();
        assert_eq!(decoder.into_user_data(), Some(Tally { bytes_of_names: 5 }));
    }

    #[test]
    fn callback_panic_poisons() {
        let mut decoder = Decoder::with_callback(
            BOUNDARY,
            |part, ()| match part.name {
                "b" => panic!("callback failed"),
                _ => Disposition::Continue(()),
            },
            (),
        )
        .unwrap();

        let body = body(&["a", "b", "c"]);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| decoder.feed(&body)));
        assert!(result.is_err());

        assert_eq!(decoder.user_data(), None);
        assert_eq!(decoder.parts().len(), 1);
        assert!(decoder.feed(&body).is_err());
        assert!(decoder.finish().is_err());
    }

    #[test]
    fn rename() {
        let mut decoder = Decoder::with_callback(
            BOUNDARY,
            |part, ()| Disposition::Rename {
                name: part.name.to_uppercase(),
                headers: vec![("X-Index".into(), part.index.to_string())],
                user_data: (),
            },
            (),
        )
        .unwrap();

        for chunk in body(&["a", "b"]).chunks(5) {
            decoder.feed(chunk).unwrap();
        }

        let form = decoder.form_data();
        assert_eq!(form["A"].body, b"value of a");
        assert_eq!(form["B"].headers, [("X-Index".to_owned(), "1".to_owned())]);
        assert!(!form.contains_key("a"));
    }

    #[test]
    fn user_data_order() {
        let mut decoder = Decoder::with_callback(
            BOUNDARY,
            |part, mut seen: Vec<(usize, String)>| {
                seen.push((part.index, part.name.to_owned()));
                match part.index % 2 {
                    0 => Disposition::Continue(seen),
                    _ => Disposition::Skip(seen),
                }
            },
            Vec::new(),
        )
        .unwrap();

        for chunk in body(&["z", "y", "x", "w"]).chunks(3) {
            decoder.feed(chunk).unwrap();
        }
        decoder.finish().unwrap();

        assert_eq!(decoder.form_data().len(), 2);
        #[rustfmt::skip]
        assert_eq!(decoder.into_user_data().unwrap(), [
            (0, "z".to_owned()),
            (1, "y".to_owned()),
            (2, "x".to_owned()),
            (3, "w".to_owned()),
        ]);
    }

    #[test]
    fn counter() {
        let mut decoder =
            Decoder::with_callback(BOUNDARY, |_, n: usize| Disposition::Continue(n + 1), 10).unwrap();
        decoder.feed(&body(&["a", "b", "c"])).unwrap();
        assert_eq!(decoder.user_data(), Some(&13));
    }
}


#[cfg(test)]
mod content_type_tests {
    use super::*;

    #[test]
    fn boundary() {
        #[rustfmt::skip]
        let cases = [
            ("multipart/form-data; boundary=abc",             Some("abc")),
            ("multipart/form-data; boundary=\"a b;c\"",       Some("a b;c")),
            ("Multipart/Mixed; charset=utf-8; boundary=x",    Some("x")),
            ("multipart/form-data;boundary=abc;other=1",      Some("abc")),
            ("multipart/form-data",                           None),
            ("text/plain; boundary=abc",                      None),
            ("multipart/form-data; boundary=",                None),
        ];

        for (content_type, expected) in cases {
            assert_eq!(
                boundary_from_content_type(content_type).ok().as_deref(),
                expected,
                "{content_type}"
            );
        }
    }

    #[test]
    fn disposition() {
        let header = r#"form-data; name="field"; filename="a \"quoted\" name.txt""#;
        assert_eq!(disposition_param(header, "name").as_deref(), Some("field"));
        assert_eq!(
            disposition_param(header, "filename").as_deref(),
            Some(r#"a "quoted" name.txt"#)
        );
        assert_eq!(disposition_param("form-data", "name"), None);
        assert_eq!(
            disposition_param("form-data; NAME=bare", "name").as_deref(),
            Some("bare")
        );
    }
}

#[cfg(test)]
mod read_form_tests {
    use super::*;

    #[tokio::test]
    async fn from_environment() {
        let body = "--xyz\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\n1\r\n--xyz--\r\n";
        let mut env = Environment::builder("POST", "/upload")
            .header("Content-Type", "multipart/form-data; boundary=xyz")
            .body(body)
            .build()
            .unwrap();

        let boundary = boundary_from_content_type(env.content_type().unwrap()).unwrap();
        let mut decoder = Decoder::new(boundary).unwrap();
        read_form(&mut env, &mut decoder).await.unwrap();

        assert_eq!(decoder.form_data()["a"].body, b"1");
        assert_eq!(env.body().remaining(), Some(0));
    }

    #[tokio::test]
    async fn truncated() {
        let mut env = Environment::builder("POST", "/upload")
            .body("--xyz\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\n1")
            .build()
            .unwrap();

        let mut decoder = Decoder::new("xyz").unwrap();
        assert!(matches!(
            read_form(&mut env, &mut decoder).await,
            Err(MultipartError::UnexpectedEnd)
        ));
    }

    #[tokio::test]
    async fn no_length() {
        let mut env = Environment::builder("POST", "/upload").build().unwrap();
        let mut decoder = Decoder::new("xyz").unwrap();
        assert!(matches!(
            read_form(&mut env, &mut decoder).await,
            Err(MultipartError::MissingContentLength)
        ));
    }
}
