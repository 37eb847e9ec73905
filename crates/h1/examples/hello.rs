use std::sync::Arc;

use async_trait::async_trait;
use http_body_util::BodyExt;
use micro_h1::connection::{ConnectionInfo, HttpConnection};
use micro_h1::frame::Features;
use micro_h1::handler::{Application, ApplicationErrors, BoxError};
use micro_h1::options::ServerOptions;
use tokio::net::TcpListener;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

struct HelloWorld;

#[async_trait]
impl Application for HelloWorld {
    type Context = Features;

    fn create_context(&self, features: Features) -> Self::Context {
        features
    }

    async fn process_request(&self, features: &mut Features) -> Result<(), BoxError> {
        info!(method = %features.method(), path = features.path(), "receiving request");

        if let Some(body) = features.take_body() {
            let body = body.collect().await?.to_bytes();
            if !body.is_empty() {
                info!(size = body.len(), "received request body");
            }
        }

        let body = "Hello World!\r\n";
        features.response_headers().set("Content-Type", "text/plain")?;
        features.response_headers().set_content_length(Some(body.len() as u64))?;
        features.write(body).await?;
        Ok(())
    }

    fn dispose_context(&self, features: Features, errors: &ApplicationErrors) {
        for e in errors.iter() {
            warn!(cause = %e, path = features.path(), "request failed");
        }
    }
}

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    info!(port = 8080, "start listening");
    let tcp_listener = match TcpListener::bind("127.0.0.1:8080").await {
        Ok(tcp_listener) => tcp_listener,
        Err(e) => {
            error!(cause = %e, "bind server error");
            return;
        }
    };

    let options = Arc::new(ServerOptions::default());
    let application = Arc::new(HelloWorld);
    loop {
        let (tcp_stream, remote_addr) = match tcp_listener.accept().await {
            Ok(stream_and_addr) => stream_and_addr,
            Err(e) => {
                warn!(cause = %e, "failed to accept");
                continue;
            }
        };

        let info = ConnectionInfo::new(Some(remote_addr), tcp_stream.local_addr().ok());
        let options = Arc::clone(&options);
        let application = Arc::clone(&application);
        tokio::spawn(async move {
            let (reader, writer) = tcp_stream.into_split();
            let connection = HttpConnection::new(reader, writer, options).with_info(info);
            match connection.process(application).await {
                Ok(()) => info!("finished process, connection shutdown"),
                Err(e) => error!(cause = %e, "connection shutdown with error"),
            }
        });
    }
}
