//! Core HTTP protocol types and utilities

use crate::errors::Error;
use std::{borrow::Cow, fmt};

#[inline(always)]
pub(crate) fn slice_to_u64(bytes: &[u8]) -> Option<u64> {
    if bytes.is_empty() {
        return None;
    }

    let mut result: u64 = 0;

    for &byte in bytes {
        if !byte.is_ascii_digit() {
            return None;
        }

        result = result.checked_mul(10)?.checked_add((byte - b'0') as u64)?;
    }

    Some(result)
}

// Renders `n` as decimal digits into the tail of a fixed buffer and
// returns the index of the first digit.
#[inline]
pub(crate) const fn number_to_bytes(mut n: u128) -> ([u8; 39], usize) {
    let mut buffer = [b'0'; 39];
    let mut i = 39;

    if n == 0 {
        return (buffer, 38);
    }

    while n > 0 {
        i -= 1;
        buffer[i] = b'0' + (n % 10) as u8;
        n /= 10;
    }

    (buffer, i)
}

// VERSION

/// HTTP protocol version as a `(major, minor)` pair.
///
/// Rendered on the wire and in the [`Environment`](crate::Environment)
/// as `HTTP/<major>.<minor>`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    /// HTTP/1.0 - [RFC 1945](https://tools.ietf.org/html/rfc1945)
    pub const HTTP_10: Version = Version::new(1, 0);
    /// HTTP/1.1 - [RFC 9112](https://datatracker.ietf.org/doc/html/rfc9112)
    pub const HTTP_11: Version = Version::new(1, 1);

    #[inline(always)]
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Whether connections on this version stay open unless told otherwise.
    #[inline(always)]
    pub fn is_persistent_by_default(self) -> bool {
        self >= Self::HTTP_11
    }

    /// Parses `HTTP/<digits>.<digits>`.
    pub(crate) fn from_bytes(src: &[u8]) -> Result<Self, Error> {
        let rest = src
            .strip_prefix(b"HTTP/")
            .ok_or(Error::UnsupportedVersion)?;
        let dot = memchr::memchr(b'.', rest).ok_or(Error::UnsupportedVersion)?;

        let major = slice_to_u64(&rest[..dot]).ok_or(Error::UnsupportedVersion)?;
        let minor = slice_to_u64(&rest[dot + 1..]).ok_or(Error::UnsupportedVersion)?;

        match (u8::try_from(major), u8::try_from(minor)) {
            (Ok(major), Ok(minor)) => Ok(Self::new(major, minor)),
            _ => Err(Error::UnsupportedVersion),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP/{}.{}", self.major, self.minor)
    }
}

// STATUS

/// Response status: numeric code plus reason phrase.
///
/// Any `(u16, reason)` pair converts into a `Status`, as does every
/// [`StatusCode`].
///
/// ```
/// use appgate::{Status, StatusCode};
///
/// assert_eq!(Status::from(StatusCode::NotFound), Status::new(404, "Not Found"));
/// assert_eq!(Status::from((299, "Custom")).reason(), "Custom");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Status {
    code: u16,
    reason: Cow<'static, str>,
}

impl Status {
    #[inline]
    pub fn new<R: Into<Cow<'static, str>>>(code: u16, reason: R) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    #[inline(always)]
    pub const fn code(&self) -> u16 {
        self.code
    }

    #[inline(always)]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl From<StatusCode> for Status {
    #[inline]
    fn from(value: StatusCode) -> Self {
        Status::new(value.code(), value.reason())
    }
}

impl<R: Into<Cow<'static, str>>> From<(u16, R)> for Status {
    #[inline]
    fn from((code, reason): (u16, R)) -> Self {
        Status::new(code, reason)
    }
}

// STATUS_CODE

macro_rules! set_status_codes {
    ($(
        $(#[$docs:meta])+
        $name:ident = ($num:expr, $str:expr);
    )+) => {
        /// Well-known HTTP status codes
        ///
        /// Represents status codes as defined in
        /// [RFC 9110](https://datatracker.ietf.org/doc/html/rfc9110#section-15) and other
        /// standards. Converts into [`Status`].
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum StatusCode { $(
            #[doc = concat!(stringify!($num), " ", $str)]
            $(#[$docs])+
            $name = $num,
        )+ }

        impl StatusCode {
            /// Numeric code, e.g. `404`.
            #[inline]
            pub const fn code(&self) -> u16 {
                *self as u16
            }

            /// Canonical reason phrase, e.g. `"Not Found"`.
            #[inline]
            pub const fn reason(&self) -> &'static str {
                match self { $(
                    StatusCode::$name => $str,
                )+ }
            }
        }
    }
}

set_status_codes! {
    /// [[RFC9110, Section 15.2.1](https://datatracker.ietf.org/doc/html/rfc9110#section-15.2.1)]
    Continue = (100, "Continue");

    /// [[RFC9110, Section 15.3.1](https://datatracker.ietf.org/doc/html/rfc9110#section-15.3.1)]
    Ok = (200, "OK");
    /// [[RFC9110, Section 15.3.2](https://datatracker.ietf.org/doc/html/rfc9110#section-15.3.2)]
    Created = (201, "Created");
    /// [[RFC9110, Section 15.3.3](https://datatracker.ietf.org/doc/html/rfc9110#section-15.3.3)]
    Accepted = (202, "Accepted");
    /// [[RFC9110, Section 15.3.5](https://datatracker.ietf.org/doc/html/rfc9110#section-15.3.5)]
    NoContent = (204, "No Content");

    /// [[RFC9110, Section 15.4.2](https://datatracker.ietf.org/doc/html/rfc9110#section-15.4.2)]
    MovedPermanently = (301, "Moved Permanently");
    /// [[RFC9110, Section 15.4.3](https://datatracker.ietf.org/doc/html/rfc9110#section-15.4.3)]
    Found = (302, "Found");
    /// [[RFC9110, Section 15.4.4](https://datatracker.ietf.org/doc/html/rfc9110#section-15.4.4)]
    SeeOther = (303, "See Other");
    /// [[RFC9110, Section 15.4.5](https://datatracker.ietf.org/doc/html/rfc9110#section-15.4.5)]
    NotModified = (304, "Not Modified");

    /// [[RFC9110, Section 15.5.1](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.1)]
    BadRequest = (400, "Bad Request");
    /// [[RFC9110, Section 15.5.2](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.2)]
    Unauthorized = (401, "Unauthorized");
    /// [[RFC9110, Section 15.5.4](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.4)]
    Forbidden = (403, "Forbidden");
    /// [[RFC9110, Section 15.5.5](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.5)]
    NotFound = (404, "Not Found");
    /// [[RFC9110, Section 15.5.6](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.6)]
    MethodNotAllowed = (405, "Method Not Allowed");
    /// [[RFC9110, Section 15.5.9](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.9)]
    RequestTimeout = (408, "Request Timeout");
    /// [[RFC9110, Section 15.5.12](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.12)]
    LengthRequired = (411, "Length Required");
    /// [[RFC9110, Section 15.5.14](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.14)]
    PayloadTooLarge = (413, "Payload Too Large");
    /// [[RFC9110, Section 15.5.15](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.15)]
    UriTooLong = (414, "URI Too Long");
    /// [[RFC9110, Section 15.5.16](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.16)]
    UnsupportedMediaType = (415, "Unsupported Media Type");
    /// [[RFC9110, Section 15.5.21](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.21)]
    UnprocessableEntity = (422, "Unprocessable Entity");
    /// [[RFC6585, Section 5](https://datatracker.ietf.org/doc/html/rfc6585#section-5)]
    RequestHeaderFieldsTooLarge = (431, "Request Header Fields Too Large");

    /// [[RFC9110, Section 15.6.1](https://datatracker.ietf.org/doc/html/rfc9110#section-15.6.1)]
    InternalServerError = (500, "Internal Server Error");
    /// [[RFC9110, Section 15.6.2](https://datatracker.ietf.org/doc/html/rfc9110#section-15.6.2)]
    NotImplemented = (501, "Not Implemented");
    /// [[RFC9110, Section 15.6.4](https://datatracker.ietf.org/doc/html/rfc9110#section-15.6.4)]
    ServiceUnavailable = (503, "Service Unavailable");
    /// [[RFC9110, Section 15.6.6](https://datatracker.ietf.org/doc/html/rfc9110#section-15.6.6)]
    HttpVersionNotSupported = (505, "HTTP Version Not Supported");
}

// HEADER VALUE

/// A response header value.
///
/// Numbers are kept as numbers and rendered as decimal strings when the
/// response is written.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HeaderValue {
    Text(Cow<'static, str>),
    Number(i128),
}

impl HeaderValue {
    /// Appends the wire representation of the value to `buffer`.
    #[inline]
    pub(crate) fn write_to(&self, buffer: &mut Vec<u8>) {
        match self {
            HeaderValue::Text(text) => buffer.extend_from_slice(text.as_bytes()),
            HeaderValue::Number(n) => {
                if *n < 0 {
                    buffer.push(b'-');
                }
                let (arr, start) = number_to_bytes(n.unsigned_abs());
                buffer.extend_from_slice(&arr[start..]);
            }
        }
    }

    /// Returns the text form if this is a textual value.
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::Text(text) => Some(text),
            HeaderValue::Number(_) => None,
        }
    }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderValue::Text(text) => f.write_str(text),
            HeaderValue::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<&'static str> for HeaderValue {
    #[inline]
    fn from(value: &'static str) -> Self {
        HeaderValue::Text(Cow::Borrowed(value))
    }
}

impl From<String> for HeaderValue {
    #[inline]
    fn from(value: String) -> Self {
        HeaderValue::Text(Cow::Owned(value))
    }
}

impl From<Cow<'static, str>> for HeaderValue {
    #[inline]
    fn from(value: Cow<'static, str>) -> Self {
        HeaderValue::Text(value)
    }
}

macro_rules! impl_header_number {
    ($($t:ty),*) => {
        $(impl From<$t> for HeaderValue {
            #[inline] fn from(value: $t) -> Self {
                HeaderValue::Number(value as i128)
            }
        })*
    };
}

impl_header_number! { u8, u16, u32, u64, usize, i8, i16, i32, i64, isize }
