//! appgate - a small HTTP/1.x application gateway
//!
//! Accepts TCP connections, parses HTTP/1.0 and HTTP/1.1 request heads and
//! hands each request to an [`Application`] as a per-request [`Environment`].
//! The returned [`Reply`] is framed (`Content-Length`, chunked transfer
//! encoding, `Date`, `Server`, `Connection`) and written back, keeping the
//! connection open when the protocol allows it.
//!
//! # Features
//!
//! - **Persistent connections** - one request at a time, keep-alive decided
//!   per request from the protocol version and the `Connection` header
//! - **Streaming bodies** - replies may pull their body from a producer,
//!   sent chunked on HTTP/1.1
//! - **Socket-bound request bodies** - the application reads exactly the
//!   bytes it wants, the rest is discarded before the next request
//! - **[Routing](router)** - ordered route table with exact, prefix and
//!   regex path patterns
//! - **[Multipart forms](multipart)** - incremental `multipart/form-data`
//!   decoder with per-part callbacks
//! - **Failure isolation** - application errors and panics become
//!   `500 Internal Server Error` and only end their own connection
//!
//! # Examples
//!
//! Quick start:
//! ```no_run
//! use appgate::{AppError, Application, Environment, Reply, Server, StatusCode};
//!
//! struct Hello;
//!
//! impl Application for Hello {
//!     async fn call(&self, _: &mut Environment<'_>) -> Result<Reply, AppError> {
//!         Ok(Reply::new(StatusCode::Ok).body("Hello World!"))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), appgate::Error> {
//!     Server::builder()
//!         .bind("127.0.0.1:8080".parse().unwrap())
//!         .await?
//!         .application(Hello)
//!         .build()?
//!         .launch()
//!         .await;
//!     Ok(())
//! }
//! ```
//! With a route table:
//! ```no_run
//! use appgate::{
//!     router::{PathPattern, Router},
//!     AppError, Application, Environment, Reply, Server, StatusCode,
//! };
//!
//! struct Echo;
//!
//! impl Application for Echo {
//!     async fn call(&self, env: &mut Environment<'_>) -> Result<Reply, AppError> {
//!         let body = env.body().read_to_end().await?;
//!         Ok(Reply::new(StatusCode::Ok).body(body))
//!     }
//! }
//!
//! struct Version;
//!
//! impl Application for Version {
//!     async fn call(&self, _: &mut Environment<'_>) -> Result<Reply, AppError> {
//!         Ok(Reply::new(StatusCode::Ok).body(env!("CARGO_PKG_VERSION")))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let router = Router::new()
//!         .post("/echo", appgate::boxed(Echo))
//!         .get(PathPattern::matches(r"/v(ersion)?")?, appgate::boxed(Version));
//!
//!     Server::builder()
//!         .bind("127.0.0.1:8080".parse()?)
//!         .await?
//!         .application(router)
//!         .build()?
//!         .launch()
//!         .await;
//!     Ok(())
//! }
//! ```
//!
//! Socket options and connection limits are described in [`limits`].

pub(crate) mod http {
    pub mod multipart;
    pub mod query;
    pub(crate) mod request;
    pub(crate) mod response;
    pub mod router;
    pub(crate) mod types;
}
pub(crate) mod server {
    pub(crate) mod connection;
    pub(crate) mod server_impl;
    pub(crate) mod transport;
}
pub(crate) mod errors;
pub mod limits;

pub use crate::{
    errors::{AppError, BodyError, Error},
    http::{
        multipart, query,
        request::{BodyReader, Environment, EnvironmentBuilder},
        response::{Body, Producer, Pull, Reply, SERVER_TOKEN},
        router::{self, boxed},
        types::{HeaderValue, Status, StatusCode, Version},
    },
    server::server_impl::{Application, Server, ServerBuilder},
};

#[doc(hidden)]
#[macro_export]
macro_rules! impt_default_application {
    ($name:ident) => {
        use appgate::{AppError, Application, Environment, Reply, StatusCode};
        struct $name;

        impl Application for $name {
            async fn call(&self, _: &mut Environment<'_>) -> Result<Reply, AppError> {
                Ok(Reply::new(StatusCode::Ok).body("Hello world!"))
            }
        }
    };
}
