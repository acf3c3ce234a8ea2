//! Accepts `multipart/form-data` uploads on `POST /upload` and describes
//! the stored parts. Parts named `password` are dropped unread.
//!
//! curl -F title=notes -F file=@Cargo.toml -F password=hunter2 localhost:8080/upload

use appgate::{
    boxed,
    multipart::{self, Decoder, Disposition},
    router::Router,
    AppError, Application, Environment, Reply, Server, StatusCode,
};
use std::fmt::Write;
use tracing_subscriber::EnvFilter;

struct Upload;

impl Application for Upload {
    async fn call(&self, env: &mut Environment<'_>) -> Result<Reply, AppError> {
        let Ok(boundary) = multipart::boundary_from_content_type(env.content_type().unwrap_or("")) else {
            return Ok(Reply::new(StatusCode::UnsupportedMediaType).body("expected multipart/form-data\n"));
        };

        let mut decoder = Decoder::with_callback(
            boundary,
            |part, mut skipped: Vec<String>| match part.name {
                "password" => {
                    skipped.push(part.name.to_owned());
                    Disposition::Skip(skipped)
                }
                _ => Disposition::Continue(skipped),
            },
            Vec::new(),
        )?;
        multipart::read_form(env, &mut decoder).await?;

        let mut summary = String::new();
        for (name, part) in decoder.form_data() {
            let _ = match part.filename() {
                Some(filename) => writeln!(summary, "{name}: file {filename:?}, {} bytes", part.body.len()),
                None => writeln!(summary, "{name}: {:?}", part.text().unwrap_or("<binary>")),
            };
        }
        for name in decoder.user_data().into_iter().flatten() {
            let _ = writeln!(summary, "{name}: skipped");
        }

        Ok(Reply::new(StatusCode::Ok)
            .header("Content-Type", "text/plain")
            .body(summary))
    }
}

#[tokio::main]
async fn main() -> Result<(), appgate::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let router = Router::new().post("/upload", boxed(Upload));

    Server::builder()
        .bind("127.0.0.1:8080".parse().unwrap())
        .await?
        .application(router)
        .build()?
        .launch()
        .await;
    Ok(())
}
