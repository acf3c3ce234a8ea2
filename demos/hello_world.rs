use appgate::{AppError, Application, Environment, Reply, Server, StatusCode};
use tracing_subscriber::EnvFilter;

struct HelloWorld;

impl Application for HelloWorld {
    async fn call(&self, _: &mut Environment<'_>) -> Result<Reply, AppError> {
        Ok(Reply::new(StatusCode::Ok)
            .header("Content-Type", "text/plain")
            .body("Hello, world!"))
    }
}

#[tokio::main]
async fn main() -> Result<(), appgate::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    Server::builder()
        .bind("127.0.0.1:8080".parse().unwrap())
        .await?
        .application(HelloWorld)
        .build()?
        .launch()
        .await;
    Ok(())
}
