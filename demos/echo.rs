use appgate::{AppError, Application, Environment, Reply, Server, StatusCode};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

struct Echo;

impl Application for Echo {
    async fn call(&self, env: &mut Environment<'_>) -> Result<Reply, AppError> {
        let body = env.body().read_to_end().await?;
        let body = match body.is_empty() {
            true => String::new(),
            false => format!(r#", "body": {:?}"#, String::from_utf8_lossy(&body)),
        };

        let headers = env
            .http_headers()
            .iter()
            .map(|(name, value)| format!("{name:?}: {value:?}"))
            .collect::<Vec<_>>()
            .join(", ");

        let result = format!(
            r#"{{"method": {:?}, "path": {:?}, "query": {:?}, "protocol": {:?}, "headers": {{{headers}}}{body}}}"#,
            env.request_method(),
            env.path(),
            env.query().unwrap_or(""),
            env.request_protocol(),
        );

        Ok(Reply::new(StatusCode::Ok)
            .header("Content-Type", "application/json")
            .body(result))
    }
}

#[tokio::main]
async fn main() -> Result<(), appgate::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    Server::builder()
        .listener(TcpListener::bind("127.0.0.1:8080").await?)
        .application(Echo)
        .build()?
        .launch()
        .await;
    Ok(())
}
