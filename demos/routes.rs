use appgate::{
    boxed,
    router::{PathPattern, Router},
    AppError, Application, Environment, Reply, Server, StatusCode,
};
use tracing_subscriber::EnvFilter;

struct Index;

impl Application for Index {
    async fn call(&self, _: &mut Environment<'_>) -> Result<Reply, AppError> {
        Ok(Reply::new(StatusCode::Ok).body("index\n"))
    }
}

/// Greets `/hello/<name>`.
struct Hello;

impl Application for Hello {
    async fn call(&self, env: &mut Environment<'_>) -> Result<Reply, AppError> {
        let name = env.path().trim_start_matches("/hello/");
        Ok(Reply::new(StatusCode::Ok).body(format!("hello, {name}\n")))
    }
}

struct Static;

impl Application for Static {
    async fn call(&self, env: &mut Environment<'_>) -> Result<Reply, AppError> {
        Ok(Reply::new(StatusCode::Ok)
            .header("Cache-Control", "max-age=3600")
            .body(format!("pretend this is {}\n", env.path())))
    }
}

struct NotFound;

impl Application for NotFound {
    async fn call(&self, env: &mut Environment<'_>) -> Result<Reply, AppError> {
        Ok(Reply::new(StatusCode::NotFound)
            .header("Content-Type", "text/plain")
            .body(format!("nothing at {}\n", env.request_path())))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let router = Router::new()
        .get("/", boxed(Index))
        .get(PathPattern::matches(r"/hello/[A-Za-z]+")?, boxed(Hello))
        .any(PathPattern::starts_with("/static/"), boxed(Static))
        .not_found(boxed(NotFound));

    Server::builder()
        .bind("127.0.0.1:8080".parse()?)
        .await?
        .application(router)
        .build()?
        .launch()
        .await;
    Ok(())
}
