use crate::{
    errors::{is_disconnect, Error},
    http::{
        request::{BodyReader, Environment, RequestHead},
        response::{write_chunk, Body, Outgoing, Producer, Pull, LAST_CHUNK},
        types::Version,
    },
    limits::ConnLimits,
    server::{
        server_impl::Application,
        transport::{Event, Transport},
    },
    Reply, StatusCode,
};
use chrono::Utc;
use futures_util::FutureExt;
use std::{
    any::Any,
    mem,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, trace};

/// Where a connection is within the current exchange. Ordered: once
/// [`Phase::RespondingStatus`] is reached bytes may be on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Phase {
    AwaitingRequestLine,
    AwaitingHeaders,
    DispatchingToApp,
    RespondingStatus,
    RespondingHeaders,
    RespondingBody,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    KeepAlive,
    Close,
}

pub(crate) struct HttpConnection<A: Application, S> {
    app: Arc<A>,
    transport: Transport<S>,

    phase: Phase,
    version: Version,
    requests: u64,
}

impl<A: Application, S: AsyncRead + AsyncWrite + Unpin + Send + Sync> HttpConnection<A, S> {
    #[inline]
    pub(crate) fn new(app: Arc<A>, stream: S, limits: ConnLimits) -> Self {
        Self {
            app,
            transport: Transport::new(stream, limits),

            phase: Phase::AwaitingRequestLine,
            version: Version::HTTP_11,
            requests: 0,
        }
    }

    /// Serves requests until the connection closes.
    ///
    /// A peer that disconnects or goes idle ends the connection with
    /// `Ok(())`. Any other failure is answered with a best-effort status
    /// response, if nothing was written yet, and then returned.
    pub(crate) async fn run(mut self) -> Result<(), Error> {
        let result = match self.impl_run().await {
            Err(Error::Io(err)) if is_disconnect(&err) => {
                debug!(error = %err, "peer went away");
                Ok(())
            }
            Err(err) => {
                if self.phase < Phase::RespondingStatus {
                    if let Some(status) = err.status() {
                        self.send_failure(status).await;
                    }
                }
                Err(err)
            }
            Ok(()) => Ok(()),
        };

        trace!(requests = self.requests, "closing connection");
        self.transport.shutdown().await;
        result
    }

    async fn impl_run(&mut self) -> Result<(), Error> {
        loop {
            match self.serve_one().await? {
                Outcome::KeepAlive => self.requests += 1,
                Outcome::Close => return Ok(()),
            }
        }
    }

    async fn serve_one(&mut self) -> Result<Outcome, Error> {
        let Some(head) = self.read_head().await? else {
            return Ok(Outcome::Close);
        };

        let close = head.wants_close();
        let content_length = head.content_length;
        debug!(method = %head.method, path = %head.path, version = %head.version, close, "request");

        self.phase = Phase::DispatchingToApp;
        let (reply, consumed) = self.dispatch(head).await?;

        let mut outgoing = Outgoing::from_reply(reply)?;
        outgoing.finalize(self.version, close, Utc::now());
        self.respond(&mut outgoing).await?;

        if outgoing.close {
            return Ok(Outcome::Close);
        }

        let unread = content_length.unwrap_or(0).saturating_sub(consumed);
        if unread > 0 {
            trace!(unread, "draining request body");
            match self.transport.discard(unread).await {
                Ok(true) => {}
                Ok(false) => return Ok(Outcome::Close),
                Err(err) => {
                    debug!(error = %err, "failed to drain request body");
                    return Ok(Outcome::Close);
                }
            }
        }

        Ok(Outcome::KeepAlive)
    }

    // `None` when the peer left before a full head arrived.
    async fn read_head(&mut self) -> Result<Option<RequestHead>, Error> {
        self.phase = Phase::AwaitingRequestLine;
        self.version = Version::HTTP_11;

        let mut head = match self.transport.next_event().await? {
            Some(Event::RequestLine { method, path, version }) => {
                RequestHead::new(method, path, version)
            }
            Some(_) => return Err(Error::InvalidRequestLine),
            None => return Ok(None),
        };
        // Status lines carry at most the version this server implements
        self.version = head.version.min(Version::HTTP_11);

        self.phase = Phase::AwaitingHeaders;
        loop {
            match self.transport.next_event().await? {
                Some(Event::Header { name, value }) => head.push_header(name, value)?,
                Some(Event::EndOfHeaders) => return Ok(Some(head)),
                Some(Event::RequestLine { .. }) => return Err(Error::InvalidHeader),
                None => return Ok(None),
            }
        }
    }

    // Runs the application with the body bound to the socket. Returns the
    // reply and the number of body bytes it read.
    async fn dispatch(&mut self, head: RequestHead) -> Result<(Reply, u64), Error> {
        let chunk_size = self.transport.limits().body_chunk_size;
        let body = BodyReader::socket(&mut self.transport, head.content_length, chunk_size);
        let mut env = Environment::new(head, body);

        let result = AssertUnwindSafe(self.app.call(&mut env))
            .catch_unwind()
            .await;
        let consumed = env.body_consumed();

        match result {
            Ok(Ok(reply)) => Ok((reply, consumed)),
            Ok(Err(err)) => Err(Error::Application(err)),
            Err(panic) => Err(Error::Panicked(panic_message(panic.as_ref()))),
        }
    }

    async fn respond(&mut self, outgoing: &mut Outgoing) -> Result<(), Error> {
        self.phase = Phase::RespondingStatus;
        let mut buffer = Vec::with_capacity(512);
        outgoing.write_head(&mut buffer, self.version);
        self.phase = Phase::RespondingHeaders;

        match mem::take(&mut outgoing.body) {
            Body::Fixed(bytes) => {
                match outgoing.chunked {
                    true => {
                        write_chunk(&mut buffer, &bytes);
                        buffer.extend_from_slice(LAST_CHUNK);
                    }
                    false => buffer.extend_from_slice(&bytes),
                }

                self.phase = Phase::RespondingBody;
                self.transport.write_all(&buffer).await?;
            }
            Body::Stream(mut producer) => {
                self.transport.write_all(&buffer).await?;
                self.phase = Phase::RespondingBody;
                self.stream_body(&mut producer, outgoing.chunked).await?;
            }
        }

        Ok(())
    }

    async fn stream_body(&mut self, producer: &mut Producer, chunked: bool) -> Result<(), Error> {
        let mut buffer = Vec::new();

        loop {
            buffer.clear();
            let (data, last) = match pull(producer)? {
                Pull::Continue(data) => (data, false),
                Pull::Last(data) => (data, true),
                Pull::Done => (Vec::new(), true),
            };

            match chunked {
                true => write_chunk(&mut buffer, &data),
                false => buffer.extend_from_slice(&data),
            }
            if last && chunked {
                buffer.extend_from_slice(LAST_CHUNK);
            }

            if !buffer.is_empty() {
                self.transport.write_all(&buffer).await?;
            }
            if last {
                return Ok(());
            }
        }
    }

    async fn send_failure(&mut self, status: StatusCode) {
        debug!(status = status.code(), "sending failure response");

        let mut buffer = Vec::with_capacity(64);
        Outgoing::failure(status.into()).write_head(&mut buffer, self.version);
        if let Err(err) = self.transport.write_all(&buffer).await {
            trace!(error = %err, "failure response not delivered");
        }
    }
}

#[inline]
fn pull(producer: &mut Producer) -> Result<Pull, Error> {
    panic::catch_unwind(AssertUnwindSafe(|| producer()))
        .map_err(|panic| Error::Panicked(panic_message(panic.as_ref())))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        return (*message).to_owned();
    }
    match panic.downcast_ref::<String>() {
        Some(message) => message.clone(),
        None => "opaque panic payload".to_owned(),
    }
}

#[cfg(test)]
mod engine_tests {
    use super::*;
    use crate::{AppError, Body, SERVER_TOKEN};
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    struct Hi;

    impl Application for Hi {
        async fn call(&self, _: &mut Environment<'_>) -> Result<Reply, AppError> {
            Ok(Reply::new(StatusCode::Ok).body("hi"))
        }
    }

    struct Inspect;

    impl Application for Inspect {
        async fn call(&self, env: &mut Environment<'_>) -> Result<Reply, AppError> {
            let text = format!(
                "{} {} {} {:?} {:?}",
                env.request_method(),
                env.request_path(),
                env.request_protocol(),
                env.query_params(8)?,
                env.header("host"),
            );
            Ok(Reply::new(StatusCode::Ok).body(text))
        }
    }

    struct Echo;

    impl Application for Echo {
        async fn call(&self, env: &mut Environment<'_>) -> Result<Reply, AppError> {
            let body = env.body().read_to_end().await?;
            Ok(Reply::new(StatusCode::Ok).body(body))
        }
    }

    // Reads two bytes of the body and leaves the rest.
    struct Peek;

    impl Application for Peek {
        async fn call(&self, env: &mut Environment<'_>) -> Result<Reply, AppError> {
            let body = env.body().read(2).await?;
            Ok(Reply::new(StatusCode::Ok).body(body))
        }
    }

    // Asks for more than the body holds, then for whatever is left.
    struct Greedy;

    impl Application for Greedy {
        async fn call(&self, env: &mut Environment<'_>) -> Result<Reply, AppError> {
            let mut body = env.body().read(6).await?;
            body.extend(env.body().read(0).await?);
            body.extend(env.body().read_timeout(4, Duration::from_millis(20)).await?);
            Ok(Reply::new(StatusCode::Ok).body(body))
        }
    }

    struct Protocol;

    impl Application for Protocol {
        async fn call(&self, env: &mut Environment<'_>) -> Result<Reply, AppError> {
            Ok(Reply::new(StatusCode::Ok).body(env.request_protocol()))
        }
    }

    struct Fails;

    impl Application for Fails {
        async fn call(&self, _: &mut Environment<'_>) -> Result<Reply, AppError> {
            Err("database is down".into())
        }
    }

    struct Panics;

    impl Application for Panics {
        async fn call(&self, env: &mut Environment<'_>) -> Result<Reply, AppError> {
            if env.path() == "/boom" {
                panic!("boom");
            }
            Ok(Reply::new(StatusCode::Ok))
        }
    }

    struct Stream(Vec<Pull>);

    impl Application for Stream {
        async fn call(&self, _: &mut Environment<'_>) -> Result<Reply, AppError> {
            let mut units = self.0.clone().into_iter();
            Ok(Reply::new(StatusCode::Ok).body(Body::stream(move || units.next().unwrap_or(Pull::Done))))
        }
    }

    struct Custom(fn() -> Reply);

    impl Application for Custom {
        async fn call(&self, _: &mut Environment<'_>) -> Result<Reply, AppError> {
            Ok((self.0)())
        }
    }

    async fn exchange<A: Application>(app: A, input: &[u8]) -> (String, Result<(), Error>) {
        let (mut client, server) = duplex(64 * 1024);
        client.write_all(input).await.unwrap();
        client.shutdown().await.unwrap();

        let result = HttpConnection::new(Arc::new(app), server, ConnLimits::default())
            .run()
            .await;

        let mut output = Vec::new();
        client.read_to_end(&mut output).await.unwrap();
        (normalize(&String::from_utf8(output).unwrap()), result)
    }

    // Replaces the clock-dependent header value.
    fn normalize(output: &str) -> String {
        output
            .split("\r\n")
            .map(|line| match line.starts_with("Date: ") {
                true => "Date: <now>",
                false => line,
            })
            .collect::<Vec<_>>()
            .join("\r\n")
    }

    fn responses(output: &str) -> usize {
        output.matches("HTTP/1.").count()
    }

    #[tokio::test]
    async fn keep_alive_exchange() {
        let input = b"GET /foo?bar=123&bar=456 HTTP/1.1\r\n\r\nGET /again HTTP/1.1\r\nConnection: close\r\n\r\n";
        let (output, result) = exchange(Hi, input).await;

        let expected = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nDate: <now>\r\nServer: {SERVER_TOKEN}\r\nConnection: keep-alive\r\n\r\nhi\
             HTTP/1.1 200 OK\r\nContent-Length: 2\r\nDate: <now>\r\nServer: {SERVER_TOKEN}\r\n\r\nhi"
        );
        assert_eq!(output, expected);
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn environment_keys() {
        let input = b"GET /foo?bar=123&bar=456 HTTP/1.0\r\nHost: example\r\n\r\n";
        let (output, _) = exchange(Inspect, input).await;

        assert!(output.ends_with(
            r#"GET /foo?bar=123&bar=456 HTTP/1.0 [("bar", "123"), ("bar", "456")] Some("example")"#
        ));
    }

    #[tokio::test]
    async fn persistence() {
        #[rustfmt::skip]
        let cases = [
            ("GET / HTTP/1.1\r\n",                              true),
            ("GET / HTTP/1.1\r\nConnection: close\r\n",         false),
            ("GET / HTTP/1.1\r\nConnection: Close\r\n",         true),
            ("GET / HTTP/1.0\r\n",                              false),
            ("GET / HTTP/1.0\r\nConnection: Keep-Alive\r\n",    true),
            ("GET / HTTP/1.0\r\nConnection: keep-alive\r\n",    false),
        ];

        for (head, keep) in cases {
            let input = format!("{head}\r\nGET /second HTTP/1.1\r\n\r\n");
            let (output, result) = exchange(Hi, input.as_bytes()).await;

            assert!(result.is_ok(), "{head:?}");
            assert_eq!(responses(&output), if keep { 2 } else { 1 }, "{head:?}");
            assert_eq!(
                output.starts_with("HTTP/1.") && output.split("\r\n\r\n").next().unwrap().contains("Connection: keep-alive"),
                keep,
                "{head:?}"
            );
        }
    }

    #[tokio::test]
    async fn chunked_stream() {
        let app = Stream(vec![
            Pull::Continue(b"ab".to_vec()),
            Pull::Continue(Vec::new()),
            Pull::Continue(b"0123456789abcdef".to_vec()),
            Pull::Done,
        ]);
        let (output, result) = exchange(app, b"GET / HTTP/1.1\r\n\r\n").await;

        assert!(result.is_ok());
        assert!(output.contains("Transfer-Encoding: chunked\r\n"));
        assert!(output.contains("Connection: keep-alive\r\n"));
        assert!(output.ends_with("\r\n\r\n2\r\nab\r\n10\r\n0123456789abcdef\r\n0\r\n\r\n"));
    }

    #[tokio::test]
    async fn last_unit() {
        let app = Stream(vec![Pull::Continue(b"x".to_vec()), Pull::Last(b"yz".to_vec())]);
        let (output, _) = exchange(app, b"GET / HTTP/1.1\r\n\r\n").await;

        assert!(output.ends_with("\r\n\r\n1\r\nx\r\n2\r\nyz\r\n0\r\n\r\n"));
    }

    #[tokio::test]
    async fn stream_on_http_10() {
        let app = Stream(vec![Pull::Continue(b"abc".to_vec()), Pull::Last(b"de".to_vec())]);
        let input = b"GET / HTTP/1.0\r\nConnection: Keep-Alive\r\n\r\nGET / HTTP/1.0\r\n\r\n";
        let (output, result) = exchange(app, input).await;

        assert!(result.is_ok());
        assert_eq!(responses(&output), 1);
        assert!(!output.contains("Transfer-Encoding"));
        assert!(!output.contains("Connection: keep-alive"));
        assert!(output.ends_with("\r\n\r\nabcde"));
    }

    #[tokio::test]
    async fn application_error() {
        let (output, result) = exchange(Fails, b"GET / HTTP/1.1\r\n\r\n").await;

        assert_eq!(output, "HTTP/1.1 500 Internal Server Error\r\n\r\n");
        assert!(matches!(result, Err(Error::Application(err)) if err.to_string() == "database is down"));
    }

    #[tokio::test]
    async fn application_panic() {
        let input = b"GET /fine HTTP/1.1\r\n\r\nGET /boom HTTP/1.1\r\n\r\n";
        let (output, result) = exchange(Panics, input).await;

        assert_eq!(responses(&output), 2);
        assert!(output.ends_with("HTTP/1.1 500 Internal Server Error\r\n\r\n"));
        assert!(matches!(result, Err(Error::Panicked(message)) if message == "boom"));
    }

    #[tokio::test]
    async fn producer_panic() {
        let app = Custom(|| {
            Reply::new(StatusCode::Ok).body(Body::stream(|| panic!("producer failed")))
        });
        let (output, result) = exchange(app, b"GET / HTTP/1.1\r\n\r\n").await;

        assert!(output.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(!output.contains("500"));
        assert!(matches!(result, Err(Error::Panicked(message)) if message == "producer failed"));
    }

    #[tokio::test]
    async fn bad_replies() {
        #[rustfmt::skip]
        let cases: [fn() -> Reply; 3] = [
            || Reply::new((42, "Odd")),
            || Reply::new(StatusCode::Ok).header("X-Split", "a\r\nb"),
            || Reply::new(StatusCode::Ok).header("Bad: Name", "v"),
        ];

        for reply in cases {
            let (output, result) = exchange(Custom(reply), b"GET / HTTP/1.1\r\n\r\n").await;
            assert_eq!(output, "HTTP/1.1 500 Internal Server Error\r\n\r\n");
            assert!(matches!(result, Err(Error::BadReturnValue(_))));
        }
    }

    #[tokio::test]
    async fn protocol_errors() {
        #[rustfmt::skip]
        let cases = [
            ("BROKEN\r\n\r\n",                                      "HTTP/1.1 400 Bad Request\r\n\r\n"),
            ("GET / HTTP/1.1\r\nNo colon\r\n\r\n",                  "HTTP/1.1 400 Bad Request\r\n\r\n"),
            ("GET / HTTP/x\r\n\r\n",                                "HTTP/1.1 505 HTTP Version Not Supported\r\n\r\n"),
            ("POST / HTTP/1.0\r\nContent-Length: abc\r\n\r\n",      "HTTP/1.0 500 Internal Server Error\r\n\r\n"),
        ];

        for (input, expected) in cases {
            let (output, result) = exchange(Hi, input.as_bytes()).await;
            assert_eq!(output, expected, "{input:?}");
            assert!(result.is_err());
        }
    }

    #[tokio::test]
    async fn peer_leaves_mid_head() {
        let (output, result) = exchange(Hi, b"GET / HTTP/1.1\r\nHost: exa").await;

        assert_eq!(output, "");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn request_body() {
        let input = b"POST /echo HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        let (output, result) = exchange(Echo, input).await;

        assert!(result.is_ok());
        assert!(output.contains("Content-Length: 5\r\n"));
        assert!(output.ends_with("\r\n\r\nhello"));
    }

    #[tokio::test]
    async fn unread_body_is_drained() {
        #[rustfmt::skip]
        let cases = [
            (true,  "Content-Length: 5\r\n\r\nhello"),
            (false, "Content-Length: 11\r\n\r\nhello world"),
        ];

        for (ignore, rest) in cases {
            let input = format!("POST /upload HTTP/1.1\r\n{rest}GET /next HTTP/1.1\r\n\r\n");
            let (output, result) = match ignore {
                true => exchange(Hi, input.as_bytes()).await,
                false => exchange(Peek, input.as_bytes()).await,
            };

            assert!(result.is_ok());
            assert_eq!(responses(&output), 2, "{rest:?}");
        }
    }

    #[tokio::test]
    async fn status_line_version() {
        #[rustfmt::skip]
        let cases = [
            ("HTTP/1.1", "HTTP/1.1 200 OK\r\n"),
            ("HTTP/1.0", "HTTP/1.0 200 OK\r\n"),
            ("HTTP/1.7", "HTTP/1.1 200 OK\r\n"),
        ];

        for (version, status_line) in cases {
            let input = format!("GET / {version}\r\nConnection: close\r\n\r\n");
            let (output, result) = exchange(Protocol, input.as_bytes()).await;

            assert!(result.is_ok(), "{version}");
            assert!(output.starts_with(status_line), "{version}: {output:?}");
            assert!(output.ends_with(&format!("\r\n\r\n{version}")), "{version}");
        }
    }

    #[tokio::test]
    async fn foreign_major_versions() {
        for version in ["HTTP/2.0", "HTTP/0.9", "HTTP/3.1"] {
            let input = format!("GET / {version}\r\n\r\n");
            let (output, result) = exchange(Hi, input.as_bytes()).await;

            assert_eq!(output, "HTTP/1.1 505 HTTP Version Not Supported\r\n\r\n", "{version}");
            assert!(matches!(result, Err(Error::UnsupportedVersion)), "{version}");
        }
    }

    #[tokio::test]
    async fn body_reads_stop_at_content_length() {
        let input = b"POST / HTTP/1.1\r\nContent-Length: 2\r\n\r\nabGET /next HTTP/1.1\r\n\r\n";
        let (output, result) = exchange(Greedy, input).await;

        assert!(result.is_ok());
        assert_eq!(responses(&output), 2);
        assert!(!output.contains("400 Bad Request"));

        let first = output.split("HTTP/1.1 200 OK").nth(1).unwrap();
        assert!(first.contains("Content-Length: 2\r\n"));
        assert!(first.ends_with("\r\n\r\nab"));
    }

    #[tokio::test]
    async fn request_framing_errors() {
        #[rustfmt::skip]
        let cases = [
            (
                "POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n",
                "HTTP/1.1 501 Not Implemented\r\n\r\n",
            ),
            (
                "POST / HTTP/1.1\r\nContent-Length: 5\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n",
                "HTTP/1.1 501 Not Implemented\r\n\r\n",
            ),
            (
                "POST / HTTP/1.1\r\nContent-Length: 2\r\nContent-Length: 7\r\n\r\nabGET / HTTP/1.1\r\n\r\n",
                "HTTP/1.1 500 Internal Server Error\r\n\r\n",
            ),
        ];

        for (input, expected) in cases {
            let (output, result) = exchange(Echo, input.as_bytes()).await;

            assert_eq!(output, expected, "{input:?}");
            assert!(
                matches!(
                    result,
                    Err(Error::UnsupportedTransferEncoding(_) | Error::InvalidContentLength(_))
                ),
                "{input:?}"
            );
        }
    }
}
