use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::select;
use tracing::{Instrument, debug, error, info_span, trace};

use super::ConnectionInfo;
use super::input::SocketInput;
use super::output::SocketOutput;
use crate::buffer::SegmentPool;
use crate::clock::DateCache;
use crate::frame::{Frame, FrameControl};
use crate::handler::Application;
use crate::options::ServerOptions;
use crate::protocol::{HttpError, SendError};

/// An HTTP/1.x connection over a pair of async byte streams.
///
/// `process` drives four tasks on the caller's task until the connection ends:
///
/// - the reader, copying transport bytes into the inbound queue,
/// - the request loop, parsing requests and running the application,
/// - the writer, copying flushed response bytes to the transport,
/// - the timer, enforcing keep-alive, header and execution timeouts.
///
/// # Type Parameters
///
/// * `R`: The async readable stream type
/// * `W`: The async writable stream type
#[derive(Debug)]
pub struct HttpConnection<R, W> {
    reader: R,
    writer: W,
    options: Arc<ServerOptions>,
    dates: Arc<DateCache>,
    pool: SegmentPool,
    info: ConnectionInfo,
}

impl<R, W> HttpConnection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W, options: Arc<ServerOptions>) -> Self {
        Self { reader, writer, options, dates: DateCache::system(), pool: SegmentPool::default(), info: ConnectionInfo::default() }
    }

    /// Uses `dates` for the `Date` header instead of the system clock.
    pub fn with_dates(mut self, dates: Arc<DateCache>) -> Self {
        self.dates = dates;
        self
    }

    /// Shares a segment pool between connections.
    pub fn with_pool(mut self, pool: SegmentPool) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_info(mut self, info: ConnectionInfo) -> Self {
        self.info = info;
        self
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    /// Serves requests until the client leaves, the connection times out or
    /// a request is rejected.
    pub async fn process<A: Application>(self, application: Arc<A>) -> Result<(), HttpError> {
        let (control, process) = self.start(application);
        drop(control);
        process.await
    }

    /// Like [`HttpConnection::process`], but also returns the connection's
    /// [`FrameControl`] so the host can stop or abort it from elsewhere.
    pub fn start<A: Application>(self, application: Arc<A>) -> (Arc<FrameControl>, impl Future<Output = Result<(), HttpError>>) {
        let Self { reader, writer, options, dates, pool, info } = self;
        let span = info_span!("connection", id = info.id());

        let read_limits = ReadLimits { buffer_size: options.read_buffer_size(), max_buffered: options.max_buffered_input() };
        let input = Arc::new(SocketInput::new(pool));
        let (output, receiver) = SocketOutput::channel(options.output_capacity());
        let control = Arc::new(FrameControl::new(options, dates, input, Arc::clone(&output)));
        let frame = Frame::new(application, Arc::clone(&control), Arc::new(info));

        let process = {
            let control = Arc::clone(&control);
            async move {
                trace!("connection started");
                let write = async {
                    let written = receiver.pump(&output, writer).await;
                    if let Err(e) = &written {
                        debug!(cause = %e, "failed to write to the transport");
                        control.abort("transport write failed");
                    }
                    written
                };

                let (processed, (), written, ()) =
                    tokio::join!(frame.run(), read_transport(reader, &control, read_limits), write, control.run_timer());

                match (processed, written) {
                    (Err(e), _) => {
                        debug!(cause = %e, "connection closed with error");
                        Err(e)
                    }
                    (Ok(()), Err(e)) => Err(SendError::io(e).into()),
                    (Ok(()), Ok(())) => {
                        trace!("connection closed");
                        Ok(())
                    }
                }
            }
            .instrument(span)
        };

        (control, process)
    }
}

#[derive(Debug, Clone, Copy)]
struct ReadLimits {
    buffer_size: usize,
    max_buffered: usize,
}

/// Copies transport bytes into the inbound queue until end of stream, a read
/// error, or the connection closing. Reading pauses while the queue holds
/// `max_buffered` unconsumed bytes or more.
async fn read_transport<R>(mut reader: R, control: &FrameControl, limits: ReadLimits)
where
    R: AsyncRead + Unpin,
{
    let input = control.input();
    let mut buffer = BytesMut::with_capacity(limits.buffer_size);
    loop {
        if input.buffered() >= limits.max_buffered {
            trace!(buffered = input.buffered(), "inbound queue full, pausing reads");
            select! {
                () = input.wait_below(limits.max_buffered) => trace!("resuming reads"),
                () = control.closed_token().cancelled() => return,
                () = control.aborted_token().cancelled_owned() => return,
            }
        }

        buffer.clear();
        buffer.reserve(limits.buffer_size);
        let read = select! {
            read = reader.read_buf(&mut buffer) => read,
            () = control.closed_token().cancelled() => return,
            () = control.aborted_token().cancelled_owned() => return,
        };

        match read {
            Ok(0) => {
                trace!("transport reached end of stream");
                input.incoming_data(&[]);
                return;
            }
            Ok(size) => {
                trace!(size, "read from transport");
                input.incoming_data(&buffer);
            }
            Err(e) => {
                error!(cause = %e, "failed to read from the transport");
                input.incoming_error(e);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use http::{Method, StatusCode};
    use http_body_util::BodyExt;
    use indoc::indoc;
    use tokio::io::{AsyncWriteExt, DuplexStream, duplex};
    use tokio::task::JoinHandle;

    use super::*;
    use crate::clock::ManualClock;
    use crate::frame::Features;
    use crate::handler::{BoxError, make_application};
    use crate::protocol::HeaderError;
    use crate::protocol::headers::KnownHeader;

    const DATE: &str = "Sun, 06 Nov 1994 08:49:37 GMT";

    fn serve<A: Application>(application: A, options: ServerOptions) -> (DuplexStream, JoinHandle<Result<(), HttpError>>) {
        let (client, server) = duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(server);
        let clock = ManualClock::new(Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap());
        let connection =
            HttpConnection::new(reader, writer, Arc::new(options)).with_dates(Arc::new(DateCache::new(Arc::new(clock))));
        let handle = tokio::spawn(connection.process(Arc::new(application)));
        (client, handle)
    }

    fn quiet_options() -> ServerOptions {
        ServerOptions::builder().server_header(None::<String>).build().unwrap()
    }

    async fn send_and_close(client: &mut DuplexStream, request: &str) -> String {
        client.write_all(request.as_bytes()).await.unwrap();
        client.shutdown().await.unwrap();
        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        response
    }

    struct Response {
        status: u16,
        headers: Vec<(String, String)>,
        body: String,
    }

    impl Response {
        fn header(&self, name: &str) -> Option<&str> {
            self.headers.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
        }
    }

    /// Splits a byte stream of responses whose bodies are `Content-Length`
    /// framed, chunked, or run to the end of the stream.
    fn parse_responses(mut raw: &str) -> Vec<Response> {
        let mut responses = Vec::new();
        while !raw.is_empty() {
            let mut headers = [httparse::EMPTY_HEADER; 32];
            let mut response = httparse::Response::new(&mut headers);
            let head_len = match response.parse(raw.as_bytes()).unwrap() {
                httparse::Status::Complete(len) => len,
                httparse::Status::Partial => panic!("truncated response: {raw:?}"),
            };
            let status = response.code.unwrap();
            let headers: Vec<(String, String)> = response
                .headers
                .iter()
                .map(|h| (h.name.to_owned(), String::from_utf8(h.value.to_vec()).unwrap()))
                .collect();
            let mut parsed = Response { status, headers, body: String::new() };
            raw = &raw[head_len..];

            if status == 100 {
                responses.push(parsed);
                continue;
            }
            if let Some(length) = parsed.header("content-length") {
                let length: usize = length.parse().unwrap();
                parsed.body = raw[..length].to_owned();
                raw = &raw[length..];
            } else if parsed.header("transfer-encoding") == Some("chunked") {
                loop {
                    let line_end = raw.find("\r\n").unwrap();
                    let size = usize::from_str_radix(&raw[..line_end], 16).unwrap();
                    raw = &raw[line_end + 2..];
                    if size == 0 {
                        raw = &raw[2..];
                        break;
                    }
                    parsed.body.push_str(&raw[..size]);
                    raw = &raw[size + 2..];
                }
            } else {
                parsed.body = raw.to_owned();
                raw = "";
            }
            responses.push(parsed);
        }
        responses
    }

    async fn echo_path(features: Features) -> Result<(), BoxError> {
        let body = format!("{} {}{}", features.method(), features.path(), features.query_string());
        features.response_headers().set_content_length(Some(body.len() as u64))?;
        features.write(body).await?;
        Ok(())
    }

    #[tokio::test]
    async fn serves_pipelined_requests_on_one_connection() {
        let (mut client, handle) = serve(make_application(echo_path), quiet_options());
        let response = send_and_close(
            &mut client,
            indoc! {"
                GET /first?a=1 HTTP/1.1\r
                Host: localhost\r
                \r
                POST /second HTTP/1.1\r
                Host: localhost\r
                Content-Length: 5\r
                \r
                helloDELETE /third HTTP/1.1\r
                Host: localhost\r
                \r
            "},
        )
        .await;
        handle.await.unwrap().unwrap();

        let responses = parse_responses(&response);
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0].body, "GET /first?a=1");
        assert_eq!(responses[1].body, "POST /second");
        assert_eq!(responses[2].body, "DELETE /third");
        for response in &responses {
            assert_eq!(response.status, 200);
            assert_eq!(response.header("date"), Some(DATE));
            assert_eq!(response.header("server"), None);
            assert_eq!(response.header("connection"), None);
        }
    }

    #[tokio::test]
    async fn writes_without_length_are_chunked() {
        let application = make_application(|features: Features| async move {
            features.write("Hello ").await?;
            features.write("World!").await?;
            Ok::<_, BoxError>(())
        });
        let (mut client, handle) = serve(application, quiet_options());
        let response = send_and_close(&mut client, "GET / HTTP/1.1\r\nHost: a\r\n\r\n").await;
        handle.await.unwrap().unwrap();

        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
        assert!(response.contains("Transfer-Encoding: chunked\r\n"));
        assert!(response.ends_with("\r\n\r\n6\r\nHello \r\n6\r\nWorld!\r\n0\r\n\r\n"), "{response}");
    }

    #[tokio::test]
    async fn http_10_body_runs_to_close() {
        let application = make_application(|features: Features| async move {
            features.write("legacy").await?;
            Ok::<_, BoxError>(())
        });
        let (mut client, handle) = serve(application, quiet_options());
        let response = send_and_close(&mut client, "GET / HTTP/1.0\r\n\r\n").await;
        handle.await.unwrap().unwrap();

        let responses = parse_responses(&response);
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].header("connection"), Some("close"));
        assert_eq!(responses[0].header("transfer-encoding"), None);
        assert_eq!(responses[0].body, "legacy");
    }

    #[tokio::test]
    async fn empty_response_gets_zero_length() {
        let (mut client, handle) =
            serve(make_application(|_features: Features| async { Ok::<_, BoxError>(()) }), quiet_options());
        let response = send_and_close(&mut client, "GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n").await;
        handle.await.unwrap().unwrap();

        let responses = parse_responses(&response);
        assert_eq!(responses[0].status, 200);
        assert_eq!(responses[0].header("content-length"), Some("0"));
        assert_eq!(responses[0].header("connection"), Some("keep-alive"));
    }

    #[tokio::test]
    async fn malformed_request_line_gets_400_and_close() {
        let (mut client, handle) = serve(make_application(echo_path), quiet_options());
        let response = send_and_close(&mut client, "( / HTTP/1.0\r\n\r\n").await;

        let error = handle.await.unwrap().unwrap_err();
        assert!(matches!(error, HttpError::RequestError { .. }));
        let responses = parse_responses(&response);
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].status, 400);
        assert_eq!(responses[0].header("connection"), Some("close"));
        assert_eq!(responses[0].header("content-length"), Some("0"));
    }

    #[tokio::test]
    async fn post_without_length_gets_411() {
        let (mut client, handle) = serve(make_application(echo_path), quiet_options());
        let response = send_and_close(&mut client, "POST / HTTP/1.1\r\nHost: a\r\n\r\n").await;
        assert!(handle.await.unwrap().is_err());
        assert!(response.starts_with("HTTP/1.1 411 Length Required\r\n"), "{response}");
    }

    #[tokio::test]
    async fn application_error_becomes_500() {
        let application = make_application(|features: Features| async move {
            features.response_headers().set("X-Partial", "yes")?;
            Err::<(), BoxError>("boom".into())
        });
        let (mut client, handle) = serve(application, quiet_options());
        let response = send_and_close(&mut client, "GET / HTTP/1.1\r\nHost: a\r\n\r\n").await;
        handle.await.unwrap().unwrap();

        let responses = parse_responses(&response);
        assert_eq!(responses[0].status, 500);
        assert_eq!(responses[0].header("x-partial"), None);
        assert_eq!(responses[0].header("content-length"), Some("0"));
        assert_eq!(responses[0].header("connection"), Some("close"));
    }

    #[tokio::test]
    async fn head_response_has_no_body() {
        let application = make_application(|features: Features| async move {
            assert_eq!(features.method(), Method::HEAD);
            features.response_headers().set_content_length(Some(42))?;
            Ok::<_, BoxError>(())
        });
        let (mut client, handle) = serve(application, quiet_options());
        let response = send_and_close(&mut client, "HEAD / HTTP/1.1\r\nHost: a\r\n\r\n").await;
        handle.await.unwrap().unwrap();

        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("Content-Length: 42\r\n"));
        assert!(response.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn expect_continue_is_sent_on_first_body_read() {
        let application = make_application(|mut features: Features| async move {
            let body = features.take_body().unwrap().collect().await?.to_bytes();
            features.set_status(StatusCode::CREATED)?;
            features.response_headers().set_content_length(Some(body.len() as u64))?;
            features.write(body).await?;
            Ok::<_, BoxError>(())
        });
        let (mut client, handle) = serve(application, quiet_options());

        client
            .write_all(b"PUT /upload HTTP/1.1\r\nHost: a\r\nExpect: 100-continue\r\nContent-Length: 4\r\n\r\n")
            .await
            .unwrap();
        let mut interim = vec![0; 25];
        client.read_exact(&mut interim).await.unwrap();
        assert_eq!(interim, b"HTTP/1.1 100 Continue\r\n\r\n");

        let response = send_and_close(&mut client, "data").await;
        handle.await.unwrap().unwrap();
        let responses = parse_responses(&response);
        assert_eq!(responses[0].status, 201);
        assert_eq!(responses[0].body, "data");
    }

    #[tokio::test]
    async fn unread_chunked_body_is_drained_for_keep_alive() {
        let (mut client, handle) = serve(make_application(echo_path), quiet_options());
        let response = send_and_close(
            &mut client,
            "POST /a HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n0\r\n\r\nGET /b HTTP/1.1\r\n\r\n",
        )
        .await;
        handle.await.unwrap().unwrap();

        let responses = parse_responses(&response);
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].body, "POST /a");
        assert_eq!(responses[1].body, "GET /b");
    }

    #[tokio::test]
    async fn callbacks_run_in_reverse_order() {
        let (order_tx, mut order_rx) = tokio::sync::mpsc::unbounded_channel();
        let application = make_application(move |features: Features| {
            let order_tx = order_tx.clone();
            async move {
                for name in ["first", "second"] {
                    let tx = order_tx.clone();
                    features.on_starting(move || async move {
                        tx.send(format!("starting {name}")).unwrap();
                        Ok(())
                    })?;
                    let tx = order_tx.clone();
                    features.on_completed(move || async move {
                        tx.send(format!("completed {name}")).unwrap();
                        Ok(())
                    });
                }
                Ok::<_, BoxError>(())
            }
        });
        let (mut client, handle) = serve(application, quiet_options());
        send_and_close(&mut client, "GET / HTTP/1.1\r\n\r\n").await;
        handle.await.unwrap().unwrap();

        let mut order = Vec::new();
        while let Ok(entry) = order_rx.try_recv() {
            order.push(entry);
        }
        assert_eq!(order, ["starting second", "starting first", "completed second", "completed first"]);
    }

    #[tokio::test]
    async fn too_few_bytes_aborts_the_connection() {
        let application = make_application(|features: Features| async move {
            features.response_headers().set_content_length(Some(10))?;
            features.write("short").await?;
            Ok::<_, BoxError>(())
        });
        let (mut client, handle) = serve(application, quiet_options());
        let response = send_and_close(&mut client, "GET / HTTP/1.1\r\n\r\nGET / HTTP/1.1\r\n\r\n").await;
        handle.await.unwrap().unwrap();

        // the abort may drop what was still queued, but never serves the second request
        assert!(response.matches("HTTP/1.1 200 OK").count() <= 1);
        assert!(!response.contains("0\r\n\r\n"));
    }

    #[tokio::test]
    async fn upgrade_hands_over_the_stream() {
        let application = make_application(|mut features: Features| async move {
            assert!(features.is_upgradable());
            let mut upgraded = features.upgrade().await?;
            while let Some(bytes) = upgraded.read().await? {
                upgraded.write(&bytes).await?;
            }
            Ok::<_, BoxError>(())
        });
        let (mut client, handle) = serve(application, quiet_options());
        let response =
            send_and_close(&mut client, "GET /ws HTTP/1.1\r\nConnection: Upgrade\r\nUpgrade: echo\r\n\r\nping").await;
        handle.await.unwrap().unwrap();

        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"), "{response}");
        assert!(response.contains("Connection: Upgrade\r\n"));
        assert!(response.ends_with("\r\n\r\nping"), "{response}");
    }

    #[tokio::test]
    async fn set_status_fails_after_start() {
        let application = make_application(|features: Features| async move {
            features.start().await?;
            assert!(features.has_started());
            assert!(features.set_status(StatusCode::NOT_FOUND).is_err());
            assert!(features.response_headers().set_known(KnownHeader::Server, "late").is_err());
            Ok::<_, BoxError>(())
        });
        let (mut client, handle) = serve(application, quiet_options());
        let response = send_and_close(&mut client, "GET / HTTP/1.1\r\n\r\n").await;
        handle.await.unwrap().unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_headers_get_408() {
        let options = ServerOptions::builder()
            .server_header(None::<String>)
            .request_headers_timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        let (mut client, handle) = serve(make_application(echo_path), options);
        client.write_all(b"GET / HTTP/1.1\r\nHost:").await.unwrap();

        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        handle.await.unwrap().unwrap();
        assert!(response.starts_with("HTTP/1.1 408 Request Timeout\r\n"), "{response}");
        assert!(response.contains("Connection: close\r\n"));
    }

    #[tokio::test]
    async fn reading_pauses_while_the_body_is_not_consumed() {
        const LIMIT: usize = 48 * 1024;
        const BODY: usize = 256 * 1024;

        let gate = Arc::new(tokio::sync::Notify::new());
        let application = make_application({
            let gate = Arc::clone(&gate);
            move |mut features: Features| {
                let gate = Arc::clone(&gate);
                async move {
                    gate.notified().await;
                    let body = features.take_body().unwrap().collect().await?.to_bytes();
                    let text = body.len().to_string();
                    features.response_headers().set_content_length(Some(text.len() as u64))?;
                    features.write(text).await?;
                    Ok::<_, BoxError>(())
                }
            }
        });

        let options = ServerOptions::builder()
            .server_header(None::<String>)
            .read_buffer_size(4096)
            .max_buffered_input(LIMIT)
            .build()
            .unwrap();
        let (client, server) = duplex(1024);
        let (reader, writer) = tokio::io::split(server);
        let connection = HttpConnection::new(reader, writer, Arc::new(options));
        let (control, process) = connection.start(Arc::new(application));
        let handle = tokio::spawn(process);

        let (mut client_read, mut client_write) = tokio::io::split(client);
        let sender = tokio::spawn(async move {
            let head = format!("POST / HTTP/1.1\r\nHost: a\r\nContent-Length: {BODY}\r\n\r\n");
            client_write.write_all(head.as_bytes()).await.unwrap();
            client_write.write_all(&vec![b'b'; BODY]).await.unwrap();
            client_write
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        let buffered = control.input().buffered();
        assert!(buffered >= LIMIT - 4096, "{buffered}");
        assert!(buffered < LIMIT + 4096, "{buffered}");
        assert!(!sender.is_finished());

        gate.notify_one();
        let mut client_write = sender.await.unwrap();
        client_write.shutdown().await.unwrap();

        let mut response = String::new();
        client_read.read_to_string(&mut response).await.unwrap();
        handle.await.unwrap().unwrap();
        let responses = parse_responses(&response);
        assert_eq!(responses[0].status, 200);
        assert_eq!(responses[0].body, BODY.to_string());
    }

    #[tokio::test]
    async fn injected_line_breaks_never_reach_the_wire() {
        let application = make_application(|features: Features| async move {
            assert_eq!(features.set_reason("OK\r\nSet-Cookie: evil=1"), Err(HeaderError::InvalidReason));
            assert!(features.response_headers().set("X-A", "ok\r\nSet-Cookie: evil=1").is_err());
            features.set_reason("Fine")?;
            features.write("done").await?;
            Ok::<_, BoxError>(())
        });
        let (mut client, handle) = serve(application, quiet_options());
        let response = send_and_close(&mut client, "GET / HTTP/1.1\r\nHost: a\r\n\r\n").await;
        handle.await.unwrap().unwrap();

        assert!(response.starts_with("HTTP/1.1 200 Fine\r\n"), "{response}");
        assert!(!response.contains("Set-Cookie"), "{response}");
        assert!(!response.contains("X-A"), "{response}");
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn abort_while_idle_ends_the_loop_with_a_log_line() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer({
                let logs = logs.clone();
                move || logs.clone()
            })
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let (client, server) = duplex(1024);
        let (reader, writer) = tokio::io::split(server);
        let connection = HttpConnection::new(reader, writer, Arc::new(quiet_options()));
        let (control, process) = connection.start(Arc::new(make_application(echo_path)));
        let handle = tokio::spawn(process);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert!(control.abort("idle test"));
        handle.await.unwrap().unwrap();
        drop(client);

        let logs = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("connection aborted while waiting for a request"), "{logs}");
    }

    #[tokio::test]
    async fn stop_closes_an_idle_connection() {
        let (client, server) = duplex(1024);
        let (reader, writer) = tokio::io::split(server);
        let connection = HttpConnection::new(reader, writer, Arc::new(quiet_options()));
        let (control, process) = connection.start(Arc::new(make_application(echo_path)));
        let handle = tokio::spawn(process);

        control.stop().await;
        handle.await.unwrap().unwrap();
        drop(client);
    }
}
