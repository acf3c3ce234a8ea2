//! Server configuration limits and timeouts
//!
//! # Security-First Defaults
//!
//! Default limits are conservative to prevent:
//! - Slowloris attacks
//! - Header flooding
//! - Unbounded memory use while buffering request heads
//!
//! # Examples
//!
//! ```no_run
//! # appgate::impt_default_application!{MyApp}
//! use appgate::{Server, limits::{ConnLimits, ServerLimits}};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), appgate::Error> {
//!     Server::builder()
//!         .server_limits(ServerLimits {
//!             backlog: 4096,
//!             ..ServerLimits::default()
//!         })
//!         .connection_limits(ConnLimits {
//!             socket_read_timeout: Duration::from_secs(5),
//!             max_headers: 64,
//!             ..ConnLimits::default()
//!         })
//!         .bind("127.0.0.1:8080".parse().unwrap())
//!         .await?
//!         .application(MyApp)
//!         .build()?
//!         .launch()
//!         .await;
//!     Ok(())
//! }
//! ```

use std::time::Duration;

/// Listener socket options.
///
/// Applied by [`ServerBuilder::bind`](crate::ServerBuilder::bind) when the
/// server creates its own listener. A listener passed through
/// [`ServerBuilder::listener`](crate::ServerBuilder::listener) is used as-is,
/// except for [`nodelay`](Self::nodelay) which applies to every accepted stream.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Length of the kernel accept queue (default: `1024`)
    pub backlog: i32,

    /// `SO_RCVBUF` for the listening socket (default: `None`, kernel default)
    ///
    /// Accepted sockets inherit the value on most platforms.
    pub recv_buffer_size: Option<usize>,

    /// Set `TCP_NODELAY` on accepted streams (default: `true`)
    pub nodelay: bool,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            backlog: 1024,
            recv_buffer_size: None,
            nodelay: true,

            _priv: (),
        }
    }
}

/// Connection-level limits and timeouts
///
/// Controls individual TCP connection behavior: how long the engine waits
/// for a request head, how long a write may take, and how large a request
/// head may grow.
///
/// Default values balance performance, resource usage, and security.
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Maximum duration to wait for request-head data from the socket (default: `15 seconds`)
    ///
    /// Covers both the idle time between kept-alive requests and slow
    /// clients sending a head byte by byte. When it elapses the connection
    /// is closed silently.
    pub socket_read_timeout: Duration,

    /// Maximum duration of a single socket write (default: `5 seconds`)
    pub socket_write_timeout: Duration,

    /// Maximum length of the request line or of one header line,
    /// including CRLF (default: `8 KB`)
    ///
    /// Longer lines are answered with
    /// [431](crate::StatusCode::RequestHeaderFieldsTooLarge) and the
    /// connection is closed.
    pub max_line_size: usize,

    /// Maximum number of request headers (default: `100`)
    pub max_headers: usize,

    /// Size of the reads issued by [`read_form`](crate::multipart::read_form),
    /// exposed to applications as
    /// [`BodyReader::chunk_size`](crate::BodyReader::chunk_size)
    /// (default: `16 KB`)
    pub body_chunk_size: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ConnLimits {
    #[inline(always)]
    fn default() -> Self {
        Self {
            socket_read_timeout: Duration::from_secs(15),
            socket_write_timeout: Duration::from_secs(5),
            max_line_size: 8 * 1024,
            max_headers: 100,
            body_chunk_size: 16 * 1024,

            _priv: (),
        }
    }
}

/// Multipart decoder limits
///
/// ```
/// use appgate::{limits::MultipartLimits, multipart::Decoder};
///
/// let decoder = Decoder::new("xyz").unwrap().with_limits(MultipartLimits {
///     max_header_size: 1024,
///     ..MultipartLimits::default()
/// });
/// assert!(!decoder.is_complete());
/// ```
#[derive(Debug, Clone)]
pub struct MultipartLimits {
    /// Maximum size of one part's header block in bytes (default: `8 KB`)
    ///
    /// Exceeding it fails the decoder with
    /// [`MultipartError::HeadersTooLarge`](crate::multipart::MultipartError::HeadersTooLarge).
    pub max_header_size: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for MultipartLimits {
    fn default() -> Self {
        Self {
            max_header_size: 8 * 1024,
            _priv: (),
        }
    }
}
