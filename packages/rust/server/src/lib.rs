//! One-shot HTTP download server.
//!
//! [`Server`] accepts connections one at a time and answers every `GET`
//! (on any path) with the offered file as an attachment, until the configured
//! number of downloads has completed. `HEAD` is answered but not counted,
//! other methods get `405`, and requests hyper cannot parse get `400`.

mod response;

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use http::header::USER_AGENT;
use http::{Method, Request, Response, StatusCode};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use woof_shared::{Result, WoofError};

use crate::response::ServeBody;

/// The file being offered and the name clients should save it under.
#[derive(Debug, Clone)]
pub struct FileOffer {
    /// File on disk streamed as the response body.
    pub path: PathBuf,
    /// Name sent in `Content-Disposition`.
    pub download_name: String,
    /// Size in bytes, sent as `Content-Length`. The body never exceeds it.
    pub size: u64,
}

/// Knobs for [`Server::serve`].
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// Completed downloads after which `serve` returns.
    pub count: u32,
    /// Deadline for a client to send its request head.
    pub read_timeout: Duration,
    /// Longest a client may go without accepting more of the response.
    pub write_timeout: Duration,
    /// Streaming buffer size.
    pub buffer_size: usize,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            count: 1,
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            buffer_size: 8 * 1024,
        }
    }
}

/// Counters collected over a [`Server::serve`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServeStats {
    /// `GET` responses written completely.
    pub downloads: u32,
    /// `HEAD` requests answered.
    pub head_requests: u32,
    /// Requests answered with a 4xx status.
    pub rejected: u32,
    /// Connections that errored, stalled or timed out.
    pub failed: u32,
    /// Body bytes written across all completed downloads.
    pub bytes_sent: u64,
    /// Serving stopped on shutdown before `count` downloads completed.
    pub interrupted: bool,
}

/// Callbacks for reporting server activity.
pub trait ServeProgress: Send + Sync {
    /// A client connected.
    fn client_connected(&self, peer: SocketAddr);
    /// Body bytes handed to the current client so far.
    fn bytes_sent(&self, sent: u64, total: u64);
    /// A download completed; `served` of `count` are done.
    fn download_complete(&self, peer: SocketAddr, served: u32, count: u32);
}

/// No-op progress for headless/test usage.
pub struct SilentProgress;

impl ServeProgress for SilentProgress {
    fn client_connected(&self, _peer: SocketAddr) {}
    fn bytes_sent(&self, _sent: u64, _total: u64) {}
    fn download_complete(&self, _peer: SocketAddr, _served: u32, _count: u32) {}
}

/// What happened on a single connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Downloaded { bytes: u64 },
    Head,
    Rejected(StatusCode),
    Closed,
}

/// A bound listener ready to serve one [`FileOffer`].
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Bind to `addr` (`ip:port`).
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| WoofError::bind(addr, e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| WoofError::bind(addr, e))?;

        debug!(%local_addr, "listener bound");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Address actually bound (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve `offer` until `opts.count` downloads have completed or
    /// `shutdown` resolves.
    ///
    /// On shutdown the counters gathered so far are returned with
    /// `interrupted` set. A transfer in flight at that moment is dropped and
    /// not counted.
    #[instrument(skip_all, fields(addr = %self.local_addr, file = %offer.download_name, count = opts.count))]
    pub async fn serve<F>(
        &self,
        offer: &FileOffer,
        opts: &ServeOptions,
        progress: &dyn ServeProgress,
        shutdown: F,
    ) -> Result<ServeStats>
    where
        F: Future<Output = ()>,
    {
        let mut stats = ServeStats::default();
        tokio::pin!(shutdown);

        while stats.downloads < opts.count {
            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                () = &mut shutdown => {
                    stats.interrupted = true;
                    break;
                }
            };

            let (stream, peer) = match accepted {
                Ok(conn) => conn,
                Err(e) if is_transient_accept_error(&e) => {
                    warn!(error = %e, "accept failed, retrying");
                    continue;
                }
                Err(e) => return Err(WoofError::http(format!("accept failed: {e}"))),
            };

            progress.client_connected(peer);

            let outcome = tokio::select! {
                biased;
                outcome = handle_connection(stream, peer, offer, opts, progress) => outcome,
                () = &mut shutdown => {
                    debug!(%peer, "transfer dropped on shutdown");
                    stats.interrupted = true;
                    break;
                }
            };

            match outcome {
                Ok(Outcome::Downloaded { bytes }) => {
                    stats.downloads += 1;
                    stats.bytes_sent += bytes;
                    info!(%peer, bytes, served = stats.downloads, "download complete");
                    progress.download_complete(peer, stats.downloads, opts.count);
                }
                Ok(Outcome::Head) => stats.head_requests += 1,
                Ok(Outcome::Rejected(status)) => {
                    debug!(%peer, %status, "request rejected");
                    stats.rejected += 1;
                }
                Ok(Outcome::Closed) => debug!(%peer, "client closed without a request"),
                Err(e) => {
                    warn!(%peer, error = %e, "connection failed");
                    stats.failed += 1;
                }
            }
        }

        if stats.interrupted {
            info!(
                downloads = stats.downloads,
                "shutdown requested, stopping server"
            );
        }

        Ok(stats)
    }
}

fn is_transient_accept_error(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        e.kind(),
        ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset | ErrorKind::Interrupted
    )
}

// ---------------------------------------------------------------------------
// Per-connection handling
// ---------------------------------------------------------------------------

/// How the request on a connection was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reply {
    Download,
    Head,
    Rejected(StatusCode),
}

/// Reported by the request handler and the body stream while hyper drives
/// the connection.
#[derive(Debug)]
enum Event {
    Responded(Reply),
    Sent(u64),
}

/// What the connection driver has learned about the exchange so far.
#[derive(Debug, Default)]
struct Exchange {
    reply: Option<Reply>,
    sent: u64,
}

impl Exchange {
    fn record(&mut self, event: Event, total: u64, progress: &dyn ServeProgress) {
        match event {
            Event::Responded(reply) => self.reply = Some(reply),
            Event::Sent(sent) => {
                self.sent = sent;
                progress.bytes_sent(sent, total);
            }
        }
    }

    /// A download counts only if hyper finished the connection cleanly and
    /// the whole body went out.
    fn finish(self, result: std::result::Result<(), hyper::Error>, size: u64) -> Result<Outcome> {
        match (self.reply, result) {
            (Some(Reply::Download), Ok(())) if self.sent == size => {
                Ok(Outcome::Downloaded { bytes: self.sent })
            }
            (Some(Reply::Download), Ok(())) => Err(WoofError::http(format!(
                "body ended after {} of {size} bytes",
                self.sent
            ))),
            (Some(Reply::Head), Ok(())) => Ok(Outcome::Head),
            (Some(Reply::Rejected(status)), _) => Ok(Outcome::Rejected(status)),
            (None, Ok(())) => Ok(Outcome::Closed),
            (None, Err(e)) if e.is_parse_too_large() => {
                Ok(Outcome::Rejected(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE))
            }
            (None, Err(e)) if e.is_parse() => Ok(Outcome::Rejected(StatusCode::BAD_REQUEST)),
            (_, Err(e)) => Err(WoofError::http(e.to_string())),
        }
    }
}

/// Serve one request on `stream` with hyper and classify the result.
///
/// Until the response starts, the connection may stay silent for
/// `read_timeout`. After that every chunk the client accepts pushes the
/// deadline out by `write_timeout`.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    offer: &FileOffer,
    opts: &ServeOptions,
    progress: &dyn ServeProgress,
) -> Result<Outcome> {
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let sender = &events_tx;
    let buffer_size = opts.buffer_size;
    let service = service_fn(move |req| respond(req, offer, buffer_size, sender));

    let mut builder = http1::Builder::new();
    builder
        .timer(TokioTimer::new())
        .header_read_timeout(opts.read_timeout)
        .keep_alive(false)
        .title_case_headers(true);

    let conn = builder.serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);

    let deadline = tokio::time::sleep(opts.read_timeout);
    tokio::pin!(deadline);

    let mut exchange = Exchange::default();
    let result = loop {
        tokio::select! {
            result = &mut conn => break result,
            Some(event) = events.recv() => {
                exchange.record(event, offer.size, progress);
                deadline.as_mut().reset(Instant::now() + opts.write_timeout);
            }
            () = &mut deadline => {
                return Err(WoofError::http(format!(
                    "no progress from {peer} within the deadline, closing"
                )));
            }
        }
    };

    while let Ok(event) = events.try_recv() {
        exchange.record(event, offer.size, progress);
    }

    exchange.finish(result, offer.size)
}

async fn respond(
    req: Request<Incoming>,
    offer: &FileOffer,
    buffer_size: usize,
    events: &UnboundedSender<Event>,
) -> Result<Response<ServeBody>> {
    debug!(
        method = %req.method(),
        target = %req.uri(),
        version = ?req.version(),
        user_agent = req
            .headers()
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-"),
        "request"
    );

    let (reply, response) = match *req.method() {
        Method::GET => {
            let file = tokio::fs::File::open(&offer.path)
                .await
                .map_err(|e| WoofError::io(&offer.path, e))?;
            let progress_tx = events.clone();
            let body = response::file_body(file, offer.size, buffer_size, move |sent| {
                let _ = progress_tx.send(Event::Sent(sent));
            });
            (Reply::Download, response::download(offer, body))
        }
        Method::HEAD => (Reply::Head, response::head(offer)),
        _ => (
            Reply::Rejected(StatusCode::METHOD_NOT_ALLOWED),
            response::rejection(StatusCode::METHOD_NOT_ALLOWED),
        ),
    };

    let response = response.map_err(|e| WoofError::http(format!("building response: {e}")))?;
    let _ = events.send(Event::Responded(reply));
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    struct Fixture {
        dir: PathBuf,
        offer: FileOffer,
    }

    impl Fixture {
        fn new(contents: &[u8]) -> Self {
            let dir =
                std::env::temp_dir().join(format!("woof-server-test-{}", uuid::Uuid::now_v7()));
            std::fs::create_dir_all(&dir).unwrap();
            let path = dir.join("payload.bin");
            std::fs::write(&path, contents).unwrap();
            Self {
                dir,
                offer: FileOffer {
                    path,
                    download_name: "payload.bin".into(),
                    size: contents.len() as u64,
                },
            }
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    /// Send a raw request and read the full response.
    async fn raw_request(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        response
    }

    fn split_response(response: &[u8]) -> (String, Vec<u8>) {
        let pos = response
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .expect("header terminator");
        let head = String::from_utf8(response[..pos].to_vec()).unwrap();
        (head, response[pos + 4..].to_vec())
    }

    fn spawn_server(
        server: Server,
        offer: FileOffer,
        opts: ServeOptions,
    ) -> tokio::task::JoinHandle<Result<ServeStats>> {
        tokio::spawn(async move {
            server
                .serve(&offer, &opts, &SilentProgress, std::future::pending())
                .await
        })
    }

    #[tokio::test]
    async fn bind_reports_resolved_port() {
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        assert_ne!(server.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn bind_failure_names_address() {
        let first = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = first.local_addr().to_string();

        let err = Server::bind(&addr).await.err().expect("second bind must fail");
        assert!(matches!(err, WoofError::Bind { .. }));
        assert!(err.to_string().contains(&addr));
    }

    #[tokio::test]
    async fn serves_file_once_then_stops() {
        let fixture = Fixture::new(b"hello over the wire");
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();
        let handle = spawn_server(server, fixture.offer.clone(), ServeOptions::default());

        let response = raw_request(addr, b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
        let (head, body) = split_response(&response);

        assert!(head.starts_with("HTTP/1.1 200 OK"));
        assert!(head.contains("Content-Type: application/octet-stream"));
        assert!(head.contains("Content-Disposition: attachment; filename=\"payload.bin\""));
        assert!(head.contains("Content-Length: 19"));
        assert_eq!(body, b"hello over the wire");

        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.downloads, 1);
        assert_eq!(stats.bytes_sent, 19);
    }

    #[tokio::test]
    async fn streams_payload_larger_than_buffer() {
        let contents: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let fixture = Fixture::new(&contents);
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();
        let opts = ServeOptions {
            buffer_size: 1024,
            ..ServeOptions::default()
        };
        let handle = spawn_server(server, fixture.offer.clone(), opts);

        let response = raw_request(addr, b"GET /anything HTTP/1.0\r\n\r\n").await;
        let (_, body) = split_response(&response);
        assert_eq!(body, contents);

        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn rejected_requests_do_not_count() {
        let fixture = Fixture::new(b"payload");
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();
        let handle = spawn_server(server, fixture.offer.clone(), ServeOptions::default());

        let response = raw_request(addr, b"POST / HTTP/1.1\r\nContent-Length: 0\r\n\r\n").await;
        let (head, _) = split_response(&response);
        assert!(head.starts_with("HTTP/1.1 405 Method Not Allowed"));
        assert!(head.contains("Allow: GET, HEAD"));

        let response = raw_request(addr, b"NONSENSE\r\n\r\n").await;
        let (head, _) = split_response(&response);
        assert!(head.starts_with("HTTP/1.1 400 Bad Request"));

        let response = raw_request(addr, b"GET / HTTP/2.0\r\n\r\n").await;
        let (head, _) = split_response(&response);
        assert!(head.starts_with("HTTP/1.1 400"));

        let response = raw_request(addr, b"HEAD / HTTP/1.1\r\n\r\n").await;
        let (head, body) = split_response(&response);
        assert!(head.contains("Content-Length: 7"));
        assert!(body.is_empty());

        assert!(!handle.is_finished());

        let response = raw_request(addr, b"GET / HTTP/1.1\r\n\r\n").await;
        let (_, body) = split_response(&response);
        assert_eq!(body, b"payload");

        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.downloads, 1);
        assert_eq!(stats.rejected, 3);
        assert_eq!(stats.head_requests, 1);
    }

    #[tokio::test]
    async fn slow_client_times_out_without_stopping_server() {
        let fixture = Fixture::new(b"data");
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();
        let opts = ServeOptions {
            read_timeout: Duration::from_millis(100),
            ..ServeOptions::default()
        };
        let handle = spawn_server(server, fixture.offer.clone(), opts);

        // connect but never send a full line
        let mut idle = TcpStream::connect(addr).await.unwrap();
        idle.write_all(b"GET / HT").await.unwrap();
        let mut sink = Vec::new();
        let _ = idle.read_to_end(&mut sink).await;

        let response = raw_request(addr, b"GET / HTTP/1.1\r\n\r\n").await;
        let (_, body) = split_response(&response);
        assert_eq!(body, b"data");

        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.downloads, 1);
    }

    #[derive(Default)]
    struct Recorder {
        completed: Mutex<Vec<(u32, u32)>>,
        connected: Mutex<u32>,
    }

    impl ServeProgress for Recorder {
        fn client_connected(&self, _peer: SocketAddr) {
            *self.connected.lock().unwrap() += 1;
        }
        fn bytes_sent(&self, _sent: u64, _total: u64) {}
        fn download_complete(&self, _peer: SocketAddr, served: u32, count: u32) {
            self.completed.lock().unwrap().push((served, count));
        }
    }

    #[tokio::test]
    async fn serves_count_downloads_to_http_clients() {
        let fixture = Fixture::new(b"shared with two people");
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();
        let offer = fixture.offer.clone();
        let recorder = std::sync::Arc::new(Recorder::default());
        let progress = recorder.clone();

        let handle = tokio::spawn(async move {
            let opts = ServeOptions {
                count: 2,
                ..ServeOptions::default()
            };
            server
                .serve(&offer, &opts, progress.as_ref(), std::future::pending())
                .await
        });

        let client = reqwest::Client::new();
        for _ in 0..2 {
            let resp = client.get(format!("http://{addr}/")).send().await.unwrap();
            assert_eq!(resp.status().as_u16(), 200);
            assert_eq!(
                resp.headers()["content-disposition"],
                "attachment; filename=\"payload.bin\""
            );
            assert_eq!(resp.bytes().await.unwrap().as_ref(), b"shared with two people");
        }

        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.downloads, 2);
        assert_eq!(*recorder.completed.lock().unwrap(), vec![(1, 2), (2, 2)]);
        assert_eq!(*recorder.connected.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn shutdown_keeps_downloads_already_served() {
        let fixture = Fixture::new(b"partial");
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();
        let offer = fixture.offer.clone();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let opts = ServeOptions {
                count: 2,
                ..ServeOptions::default()
            };
            let shutdown = async {
                let _ = stop_rx.await;
            };
            server.serve(&offer, &opts, &SilentProgress, shutdown).await
        });

        let response = raw_request(addr, b"GET / HTTP/1.1\r\n\r\n").await;
        let (_, body) = split_response(&response);
        assert_eq!(body, b"partial");

        stop_tx.send(()).unwrap();
        let stats = handle.await.unwrap().unwrap();
        assert_eq!(
            stats,
            ServeStats {
                downloads: 1,
                bytes_sent: 7,
                interrupted: true,
                ..ServeStats::default()
            }
        );
    }

    #[tokio::test]
    async fn stalled_reader_does_not_block_next_client() {
        let contents: Vec<u8> = (0..32 * 1024 * 1024u32).map(|i| (i % 253) as u8).collect();
        let fixture = Fixture::new(&contents);
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();
        let opts = ServeOptions {
            write_timeout: Duration::from_millis(300),
            buffer_size: 64 * 1024,
            ..ServeOptions::default()
        };
        let handle = spawn_server(server, fixture.offer.clone(), opts);

        // asks for the file and never reads the response
        let mut stalled = TcpStream::connect(addr).await.unwrap();
        stalled.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let response = raw_request(addr, b"GET / HTTP/1.1\r\n\r\n").await;
        let (_, body) = split_response(&response);
        assert_eq!(body.len(), contents.len());
        assert!(body == contents);

        let stats = tokio::time::timeout(Duration::from_secs(30), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.downloads, 1);
        drop(stalled);
    }

    #[tokio::test]
    async fn body_never_exceeds_offered_size() {
        let fixture = Fixture::new(b"0123456789");
        let mut offer = fixture.offer.clone();
        // the file grew after the offer was measured
        offer.size = 4;

        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();
        let handle = spawn_server(server, offer, ServeOptions::default());

        let response = raw_request(addr, b"GET / HTTP/1.1\r\n\r\n").await;
        let (head, body) = split_response(&response);
        assert!(head.contains("Content-Length: 4"));
        assert_eq!(body, b"0123");

        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.downloads, 1);
        assert_eq!(stats.bytes_sent, 4);
    }
}
