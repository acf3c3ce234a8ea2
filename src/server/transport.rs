use crate::{
    errors::{is_disconnect, BodyError, Error},
    http::{request::BodySource, types::Version},
    limits::ConnLimits,
};
use futures_util::future::BoxFuture;
use memchr::memchr;
use std::{io, ops::Range, time::Duration};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    time::timeout,
};
use tracing::trace;

const READ_SIZE: usize = 4096;

/// Request-head parse events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    RequestLine {
        method: String,
        path: String,
        version: Version,
    },
    Header {
        name: String,
        value: String,
    },
    EndOfHeaders,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    RequestLine,
    Headers,
    // raw body bytes, until the next request
    Raw,
}

/// Buffered stream turning request heads into [`Event`]s and serving raw
/// body reads.
pub(crate) struct Transport<S> {
    stream: S,
    buffer: Vec<u8>,
    // start of unconsumed data in `buffer`
    pos: usize,
    mode: Mode,
    headers: usize,
    limits: ConnLimits,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send + Sync> Transport<S> {
    #[inline]
    pub(crate) fn new(stream: S, limits: ConnLimits) -> Self {
        Self {
            stream,
            buffer: Vec::with_capacity(READ_SIZE),
            pos: 0,
            mode: Mode::RequestLine,
            headers: 0,
            limits,
        }
    }

    #[inline(always)]
    pub(crate) fn limits(&self) -> &ConnLimits {
        &self.limits
    }

    /// Next event of the request head.
    ///
    /// `None` means the peer closed the connection or stayed silent longer
    /// than the read timeout. Called in raw mode it starts the next request.
    pub(crate) async fn next_event(&mut self) -> Result<Option<Event>, Error> {
        loop {
            match self.mode {
                Mode::Raw => self.mode = Mode::RequestLine,
                Mode::RequestLine => {
                    let Some(range) = self.next_line().await? else {
                        return Ok(None);
                    };
                    // Blank lines ahead of a request line are ignored
                    if range.is_empty() {
                        continue;
                    }

                    let event = parse_request_line(&self.buffer[range])?;
                    self.mode = Mode::Headers;
                    self.headers = 0;
                    return Ok(Some(event));
                }
                Mode::Headers => {
                    let Some(range) = self.next_line().await? else {
                        return Ok(None);
                    };
                    if range.is_empty() {
                        self.mode = Mode::Raw;
                        return Ok(Some(Event::EndOfHeaders));
                    }

                    self.headers += 1;
                    if self.headers > self.limits.max_headers {
                        return Err(Error::TooManyHeaders(self.limits.max_headers));
                    }
                    return parse_header(&self.buffer[range]).map(Some);
                }
            }
        }
    }

    // Range of the next line without its CRLF. A bare LF leaves a trailing
    // CR-less line, which the line parsers reject.
    async fn next_line(&mut self) -> Result<Option<Range<usize>>, Error> {
        let max = self.limits.max_line_size;
        let mut scanned = 0;

        loop {
            let start = self.pos;
            if let Some(i) = memchr(b'\n', &self.buffer[start + scanned..]) {
                let lf = start + scanned + i;
                if lf + 1 - start > max {
                    return Err(Error::LineTooLong(max));
                }

                self.pos = lf + 1;
                return match lf > start && self.buffer[lf - 1] == b'\r' {
                    true => Ok(Some(start..lf - 1)),
                    false => Err(match self.mode {
                        Mode::Headers => Error::InvalidHeader,
                        _ => Error::InvalidRequestLine,
                    }),
                };
            }

            scanned = self.buffer.len() - start;
            if scanned >= max {
                return Err(Error::LineTooLong(max));
            }

            let wait = self.limits.socket_read_timeout;
            match timeout(wait, self.read_more()).await {
                Ok(Ok(0)) => return Ok(None),
                Ok(Ok(_)) => {}
                Ok(Err(err)) if is_disconnect(&err) => return Ok(None),
                Ok(Err(err)) => return Err(err.into()),
                Err(_) => {
                    trace!(?wait, "request head read timed out");
                    return Ok(None);
                }
            }
        }
    }

    // Appends one read to the buffer. Cancel-safe.
    async fn read_more(&mut self) -> io::Result<usize> {
        if self.pos > 0 {
            self.buffer.drain(..self.pos);
            self.pos = 0;
        }
        self.buffer.reserve(READ_SIZE);
        self.stream.read_buf(&mut self.buffer).await
    }

    #[inline(always)]
    fn buffered(&self) -> usize {
        self.buffer.len() - self.pos
    }

    /// Reads exactly `n` raw bytes, or up to `max` available bytes when `n`
    /// is `0`.
    pub(crate) async fn read_raw(
        &mut self,
        n: usize,
        max: usize,
        limit: Option<Duration>,
    ) -> Result<Vec<u8>, BodyError> {
        if n == 0 && self.buffered() == 0 {
            self.read_with(limit).await?;
        }

        let wanted = if n == 0 { self.buffered().min(max) } else { n };
        while self.buffered() < wanted {
            if self.read_with(limit).await? == 0 {
                return Err(BodyError::Closed {
                    expected: wanted,
                    received: self.buffered(),
                });
            }
        }

        let chunk = self.buffer[self.pos..self.pos + wanted].to_vec();
        self.pos += wanted;
        Ok(chunk)
    }

    async fn read_with(&mut self, limit: Option<Duration>) -> Result<usize, BodyError> {
        let result = match limit {
            Some(limit) => timeout(limit, self.read_more())
                .await
                .map_err(|_| BodyError::Timeout(limit))?,
            None => self.read_more().await,
        };

        match result {
            Ok(n) => Ok(n),
            Err(err) if is_disconnect(&err) => Ok(0),
            Err(err) => Err(err.into()),
        }
    }

    /// Drops `n` body bytes the application left unread. Returns `false`
    /// when the peer closed or stalled first.
    pub(crate) async fn discard(&mut self, mut n: u64) -> Result<bool, BodyError> {
        let limit = Some(self.limits.socket_read_timeout);

        loop {
            let take = (self.buffered() as u64).min(n) as usize;
            self.pos += take;
            n -= take as u64;

            if n == 0 {
                return Ok(true);
            }
            match self.read_with(limit).await {
                Ok(0) | Err(BodyError::Timeout(_)) => return Ok(false),
                Ok(_) => {}
                Err(err) => return Err(err),
            }
        }
    }

    /// Writes all of `bytes` within the write timeout.
    pub(crate) async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let write = async {
            self.stream.write_all(bytes).await?;
            self.stream.flush().await
        };

        match timeout(self.limits.socket_write_timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(io::ErrorKind::TimedOut.into()),
        }
    }

    pub(crate) async fn shutdown(&mut self) {
        let _ = timeout(self.limits.socket_write_timeout, self.stream.shutdown()).await;
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send + Sync> BodySource for Transport<S> {
    #[inline]
    fn read_body(
        &mut self,
        n: usize,
        max: usize,
        timeout: Option<Duration>,
    ) -> BoxFuture<'_, Result<Vec<u8>, BodyError>> {
        Box::pin(self.read_raw(n, max, timeout))
    }
}

#[inline]
fn is_token(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&byte)
}

// METHOD SP TARGET SP HTTP/x.y
fn parse_request_line(line: &[u8]) -> Result<Event, Error> {
    let line = simdutf8::basic::from_utf8(line).map_err(|_| Error::InvalidEncoding)?;

    let mut parts = line.split(' ');
    let (Some(method), Some(path), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::InvalidRequestLine);
    };

    if method.is_empty() || !method.bytes().all(is_token) {
        return Err(Error::InvalidRequestLine);
    }
    if path.is_empty() || path.bytes().any(|b| b.is_ascii_control()) {
        return Err(Error::InvalidRequestLine);
    }
    if !version.starts_with("HTTP/") {
        return Err(Error::InvalidRequestLine);
    }

    let version = Version::from_bytes(version.as_bytes())?;
    if version.major != 1 {
        return Err(Error::UnsupportedVersion);
    }

    Ok(Event::RequestLine {
        method: method.to_owned(),
        path: path.to_owned(),
        version,
    })
}

// NAME ":" OWS VALUE OWS
fn parse_header(line: &[u8]) -> Result<Event, Error> {
    let line = simdutf8::basic::from_utf8(line).map_err(|_| Error::InvalidEncoding)?;

    let (name, value) = line.split_once(':').ok_or(Error::InvalidHeader)?;
    if name.is_empty() || !name.bytes().all(is_token) {
        return Err(Error::InvalidHeader);
    }

    Ok(Event::Header {
        name: name.to_owned(),
        value: value.trim_matches([' ', '\t']).to_owned(),
    })
}
