use appgate::{AppError, Application, Body, Environment, Pull, Reply, Server, StatusCode};
use tracing_subscriber::EnvFilter;

/// Counts down from `?from=<n>` (default 10), one line per chunk.
struct Countdown;

impl Application for Countdown {
    async fn call(&self, env: &mut Environment<'_>) -> Result<Reply, AppError> {
        let from = env
            .query_params(16)?
            .into_iter()
            .find(|(key, _)| *key == "from")
            .and_then(|(_, value)| value.parse::<u32>().ok())
            .unwrap_or(10);

        let mut next = from;
        let body = Body::stream(move || match next {
            0 => Pull::Last(b"liftoff\n".to_vec()),
            n => {
                next -= 1;
                Pull::Continue(format!("{n}\n").into_bytes())
            }
        });

        Ok(Reply::new(StatusCode::Ok)
            .header("Content-Type", "text/plain")
            .body(body))
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
        .application(Countdown)
        .build()?
        .launch()
        .await;
    Ok(())
}
