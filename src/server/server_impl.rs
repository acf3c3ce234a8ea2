use crate::{
    errors::{AppError, Error},
    http::{request::Environment, response::Reply},
    limits::{ConnLimits, ServerLimits},
    server::connection::HttpConnection,
};
use socket2::{Domain, Protocol, Socket, Type};
use std::{future::Future, io, net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// The contract between the server and the code answering requests.
///
/// Called once per request with a fresh [`Environment`]. An `Err` or a panic
/// is answered with `500 Internal Server Error` and the connection is closed.
///
/// # Examples
///
/// ```
/// use appgate::{AppError, Application, Environment, Reply, StatusCode};
///
/// struct Greeter;
///
/// impl Application for Greeter {
///     async fn call(&self, env: &mut Environment<'_>) -> Result<Reply, AppError> {
///         let name = env.path().trim_start_matches('/').to_owned();
///         Ok(Reply::new(StatusCode::Ok)
///             .header("Content-Type", "text/plain")
///             .body(format!("Hello, {name}!")))
///     }
/// }
/// ```
pub trait Application
where
    Self: Sync + Send + 'static,
{
    fn call(
        &self,
        env: &mut Environment<'_>,
    ) -> impl Future<Output = Result<Reply, AppError>> + Send;
}

/// An HTTP/1.x server running one task per accepted connection.
///
/// Built with [`Server::builder`]; see [`limits`](crate::limits) for a
/// configured example.
pub struct Server<A: Application> {
    listener: TcpListener,
    app: Arc<A>,

    server_limits: ServerLimits,
    conn_limits: ConnLimits,
}

impl<A: Application> Server<A> {
    #[inline]
    pub fn builder() -> ServerBuilder<A> {
        ServerBuilder {
            listener: None,
            app: None,

            server_limits: None,
            connection_limits: None,
        }
    }

    /// Address the server accepts connections on.
    #[inline]
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections forever.
    ///
    /// Accept failures are logged and skipped. A connection that ends with
    /// an error is logged by its own task and does not affect the others.
    pub async fn launch(self) {
        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, "accepting connections");
        }

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(value) => value,
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    continue;
                }
            };

            if let Err(err) = stream.set_nodelay(self.server_limits.nodelay) {
                debug!(%peer, error = %err, "could not set TCP_NODELAY");
            }

            let connection =
                HttpConnection::new(Arc::clone(&self.app), stream, self.conn_limits.clone());

            tokio::spawn(async move {
                debug!(%peer, "connection opened");
                match connection.run().await {
                    Ok(()) => debug!(%peer, "connection closed"),
                    Err(err) => warn!(%peer, error = %err, "connection failed"),
                }
            });
        }
    }
}

//

pub struct ServerBuilder<A: Application> {
    listener: Option<TcpListener>,
    app: Option<Arc<A>>,

    server_limits: Option<ServerLimits>,
    connection_limits: Option<ConnLimits>,
}

impl<A: Application> ServerBuilder<A> {
    /// Uses an already bound listener.
    ///
    /// Either this or [`bind`](Self::bind) is required.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # appgate::impt_default_application!{ MyApp }
    /// # #[tokio::main]
    /// # async fn main() {
    /// use tokio::net::TcpListener;
    /// use appgate::Server;
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .application(MyApp)
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Creates the listener, applying the socket options of
    /// [`ServerLimits`]. Set [`server_limits`](Self::server_limits) first.
    ///
    /// Fails when the address cannot be bound or listened on.
    pub async fn bind(mut self, addr: SocketAddr) -> Result<Self, Error> {
        let limits = self.server_limits.clone().unwrap_or_default();

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        if let Some(size) = limits.recv_buffer_size {
            socket.set_recv_buffer_size(size)?;
        }
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(limits.backlog)?;

        self.listener = Some(TcpListener::from_std(socket.into())?);
        debug!(%addr, backlog = limits.backlog, "listener bound");
        Ok(self)
    }

    /// Sets the application answering requests.
    ///
    /// **This is a required component.**
    ///
    /// A [`Router`](crate::router::Router) is an application too.
    #[inline(always)]
    pub fn application(mut self, app: A) -> Self {
        self.app = Some(Arc::new(app));
        self
    }

    /// Configures the listener socket and accepted streams.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # appgate::impt_default_application!{ MyApp }
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), appgate::Error> {
    /// use appgate::{Server, limits::ServerLimits};
    ///
    /// let server = Server::builder()
    ///     .server_limits(ServerLimits {
    ///         // Your changes
    ///         backlog: 128,
    ///         recv_buffer_size: Some(256 * 1024),
    ///         ..ServerLimits::default() // Required line
    ///     })
    ///     .bind("127.0.0.1:8080".parse().unwrap())
    ///     .await?
    ///     .application(MyApp)
    ///     .build()?;
    /// # Ok(())
    /// # }
    /// ```
    #[inline(always)]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    /// Configures per-connection timeouts and request head limits.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # appgate::impt_default_application!{ MyApp }
    /// # #[tokio::main]
    /// # async fn main() {
    /// use appgate::{Server, limits::ConnLimits};
    /// use tokio::net::TcpListener;
    /// use std::time::Duration;
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .application(MyApp)
    ///     .connection_limits(ConnLimits {
    ///         // Your changes
    ///         socket_read_timeout: Duration::from_secs(5),
    ///         socket_write_timeout: Duration::from_secs(2),
    ///         ..ConnLimits::default() // Required line
    ///     })
    ///     .build();
    /// # }
    /// ```
    #[inline(always)]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.connection_limits = Some(limits);
        self
    }

    /// Builds the server.
    ///
    /// Fails with [`Error::Incomplete`] when the listener or the application
    /// was not provided.
    pub fn build(self) -> Result<Server<A>, Error> {
        Ok(Server {
            listener: self.listener.ok_or(Error::Incomplete("listener"))?,
            app: self.app.ok_or(Error::Incomplete("application"))?,

            server_limits: self.server_limits.unwrap_or_default(),
            conn_limits: self.connection_limits.unwrap_or_default(),
        })
    }
}
