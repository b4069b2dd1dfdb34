//! End-to-end `share` pipeline: paths → payload → server → cleanup.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use tracing::{info, instrument, warn};
use url::Url;

use woof_server::{ServeOptions, ServeProgress, ServeStats, Server};
use woof_shared::{PayloadKind, Result, ShareConfig, WoofError};

use crate::payload::{self, Payload};

/// Result of a finished share.
#[derive(Debug, Clone)]
pub struct ShareResult {
    /// URL the payload was offered at.
    pub url: Url,
    /// LAN-reachable URL when bound to an unspecified address.
    pub lan_url: Option<Url>,
    /// Name the payload was offered under.
    pub download_name: String,
    /// Plain file or generated archive.
    pub kind: PayloadKind,
    /// Payload size in bytes.
    pub size: u64,
    /// Hex SHA-256 of the payload.
    pub sha256: String,
    /// Server counters.
    pub stats: ServeStats,
    /// Whether the share was stopped before `count` downloads completed.
    pub interrupted: bool,
    /// Total elapsed time.
    pub elapsed: Duration,
}

/// Progress callback for reporting share status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called once the payload is ready to serve.
    fn payload_ready(&self, payload: &Payload);
    /// Called once the server is listening.
    fn listening(&self, url: &Url, lan_url: Option<&Url>);
    /// Called when a client connects.
    fn client_connected(&self, peer: SocketAddr);
    /// Called as body bytes go out to the current client.
    fn bytes_sent(&self, sent: u64, total: u64);
    /// Called after each completed download.
    fn download_complete(&self, peer: SocketAddr, served: u32, count: u32);
    /// Called when the share completes.
    fn done(&self, result: &ShareResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn payload_ready(&self, _payload: &Payload) {}
    fn listening(&self, _url: &Url, _lan_url: Option<&Url>) {}
    fn client_connected(&self, _peer: SocketAddr) {}
    fn bytes_sent(&self, _sent: u64, _total: u64) {}
    fn download_complete(&self, _peer: SocketAddr, _served: u32, _count: u32) {}
    fn done(&self, _result: &ShareResult) {}
}

/// A prepared payload plus a bound server, not yet serving.
pub struct Share {
    payload: Payload,
    server: Server,
    url: Url,
    lan_url: Option<Url>,
    options: ServeOptions,
    started: Instant,
}

impl Share {
    /// Prepare the payload and bind the listener.
    ///
    /// If binding fails the payload is dropped, which removes any archive
    /// that was just generated.
    #[instrument(skip_all, fields(addr = %config.bind_addr()))]
    pub async fn start(config: &ShareConfig, progress: &dyn ProgressReporter) -> Result<Self> {
        let started = Instant::now();
        config.validate()?;

        progress.phase("Preparing payload");
        let payload = payload::prepare(config).await?;
        for path in &payload.skipped {
            warn!(path = %path.display(), "skipped: not a file or directory");
        }
        progress.payload_ready(&payload);

        progress.phase("Starting server");
        let server = Server::bind(&config.bind_addr()).await?;
        let local_addr = server.local_addr();
        let url = http_url(local_addr)?;
        let lan_url = lan_url_for(local_addr);

        info!(%url, lan_url = lan_url.as_ref().map(Url::as_str), file = %payload.download_name, "serving");

        Ok(Self {
            payload,
            server,
            url,
            lan_url,
            options: ServeOptions {
                count: config.count,
                read_timeout: config.read_timeout,
                write_timeout: config.write_timeout,
                buffer_size: config.buffer_size,
            },
            started,
        })
    }

    /// URL the payload is offered at.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The prepared payload.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Serve until `count` downloads complete or `shutdown` resolves.
    ///
    /// The payload is dropped before returning, so any generated archive is
    /// gone by the time the result is reported.
    pub async fn run<F>(self, progress: &dyn ProgressReporter, shutdown: F) -> Result<ShareResult>
    where
        F: Future<Output = ()>,
    {
        progress.listening(&self.url, self.lan_url.as_ref());

        let offer = self.payload.offer();
        let serve_progress = PipelineServeProgress { inner: progress };

        let stats = self
            .server
            .serve(&offer, &self.options, &serve_progress, shutdown)
            .await?;
        let interrupted = stats.interrupted;

        let Self {
            payload,
            url,
            lan_url,
            started,
            ..
        } = self;

        let result = ShareResult {
            url,
            lan_url,
            download_name: payload.download_name.clone(),
            kind: payload.kind.clone(),
            size: payload.size,
            sha256: payload.sha256.clone(),
            stats,
            interrupted,
            elapsed: started.elapsed(),
        };
        drop(payload);

        progress.done(&result);

        info!(
            downloads = result.stats.downloads,
            bytes = result.stats.bytes_sent,
            interrupted = result.interrupted,
            elapsed_ms = result.elapsed.as_millis(),
            "share complete"
        );

        Ok(result)
    }
}

/// Run the full share pipeline.
///
/// 1. Prepare the payload (single file or tar.gz)
/// 2. Bind the server
/// 3. Serve `count` downloads, or stop early when `shutdown` resolves
/// 4. Remove any generated archive
pub async fn share<F>(
    config: &ShareConfig,
    progress: &dyn ProgressReporter,
    shutdown: F,
) -> Result<ShareResult>
where
    F: Future<Output = ()>,
{
    Share::start(config, progress).await?.run(progress, shutdown).await
}

// ---------------------------------------------------------------------------
// Server progress adapter
// ---------------------------------------------------------------------------

/// Adapts a `ProgressReporter` to the server's `ServeProgress` interface.
struct PipelineServeProgress<'a> {
    inner: &'a dyn ProgressReporter,
}

impl ServeProgress for PipelineServeProgress<'_> {
    fn client_connected(&self, peer: SocketAddr) {
        self.inner.client_connected(peer);
    }

    fn bytes_sent(&self, sent: u64, total: u64) {
        self.inner.bytes_sent(sent, total);
    }

    fn download_complete(&self, peer: SocketAddr, served: u32, count: u32) {
        self.inner.download_complete(peer, served, count);
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn http_url(addr: SocketAddr) -> Result<Url> {
    Url::parse(&format!("http://{addr}/"))
        .map_err(|e| WoofError::http(format!("cannot form URL for {addr}: {e}")))
}

/// When listening on `0.0.0.0`/`::` the bound address is useless to a
/// downloader, so look up the machine's LAN address instead.
fn lan_url_for(addr: SocketAddr) -> Option<Url> {
    if !addr.ip().is_unspecified() {
        return None;
    }

    let lookup = match addr.ip() {
        IpAddr::V4(_) => local_ip_address::local_ip(),
        IpAddr::V6(_) => local_ip_address::local_ipv6(),
    };

    match lookup {
        Ok(ip) => http_url(SocketAddr::new(ip, addr.port())).ok(),
        Err(e) => {
            warn!(error = %e, "could not determine LAN address");
            None
        }
    }
}
