use crate::config::ApiSettings;
use crate::feeds::Surveillance;
use crate::stream::MULTIPART_CONTENT_TYPE;
use anyhow::{anyhow, Result};
use serde_json::json;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const MAX_REQUEST_BYTES: usize = 8192;
const STREAM_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub max_streams: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8000".to_string(),
            max_streams: 16,
        }
    }
}

impl From<&ApiSettings> for ApiConfig {
    fn from(settings: &ApiSettings) -> Self {
        Self {
            addr: settings.addr.clone(),
            max_streams: settings.max_streams,
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    /// Stop accepting, close every open stream, and join all threads.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

/// Counts open video streams against `max_streams`.
#[derive(Clone, Debug)]
struct StreamSlots {
    active: Arc<AtomicUsize>,
    max: usize,
}

struct StreamSlot {
    active: Arc<AtomicUsize>,
}

impl StreamSlots {
    fn new(max: usize) -> Self {
        Self {
            active: Arc::new(AtomicUsize::new(0)),
            max,
        }
    }

    fn try_acquire(&self) -> Option<StreamSlot> {
        self.active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.max).then_some(n + 1)
            })
            .ok()
            .map(|_| StreamSlot {
                active: self.active.clone(),
            })
    }
}

impl Drop for StreamSlot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    app: Arc<Surveillance>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, app: Arc<Surveillance>) -> Self {
        Self { cfg, app }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .map_err(|e| anyhow!("invalid api address '{}': {}", self.cfg.addr, e))?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let slots = StreamSlots::new(self.cfg.max_streams);
        let app = self.app;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, app, slots, shutdown_thread) {
                log::error!("surveillance api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    app: Arc<Surveillance>,
    slots: StreamSlots,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let mut workers: Vec<JoinHandle<()>> = Vec::new();
    let result = loop {
        if shutdown.load(Ordering::SeqCst) {
            break Ok(());
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let app = app.clone();
                let slots = slots.clone();
                let shutdown = shutdown.clone();
                workers.push(std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &app, &slots, shutdown) {
                        log::warn!("surveillance api request from {} rejected: {}", peer, err);
                    }
                }));
                reap_finished(&mut workers);
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                reap_finished(&mut workers);
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => break Err(err.into()),
        }
    };
    shutdown.store(true, Ordering::SeqCst);
    for worker in workers {
        if worker.join().is_err() {
            log::warn!("surveillance api worker panicked");
        }
    }
    result
}

fn reap_finished(workers: &mut Vec<JoinHandle<()>>) {
    let mut index = 0;
    while index < workers.len() {
        if workers[index].is_finished() {
            let worker = workers.swap_remove(index);
            if worker.join().is_err() {
                log::warn!("surveillance api worker panicked");
            }
        } else {
            index += 1;
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Route {
    Index,
    Health,
    Stats,
    FeedStats(String),
    ResetStats,
    VideoFeed(Option<String>),
}

impl Route {
    fn parse(path: &str) -> Option<Self> {
        let path = match path.trim_end_matches('/') {
            "" => "/",
            trimmed => trimmed,
        };
        match path {
            "/" => Some(Route::Index),
            "/health" => Some(Route::Health),
            "/stats" => Some(Route::Stats),
            "/reset_stats" => Some(Route::ResetStats),
            "/video_feed" => Some(Route::VideoFeed(None)),
            _ => {
                if let Some(feed) = single_segment(path, "/stats/") {
                    Some(Route::FeedStats(feed))
                } else {
                    single_segment(path, "/video_feed/").map(|feed| Route::VideoFeed(Some(feed)))
                }
            }
        }
    }

    fn method(&self) -> &'static str {
        match self {
            Route::ResetStats => "POST",
            _ => "GET",
        }
    }
}

fn single_segment(path: &str, prefix: &str) -> Option<String> {
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() || rest.contains('/') {
        return None;
    }
    Some(rest.to_string())
}

fn handle_connection(
    mut stream: TcpStream,
    app: &Surveillance,
    slots: &StreamSlots,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            write_json_response(&mut stream, 400, r#"{"error":"bad_request"}"#)?;
            return Err(err);
        }
    };
    if request.method == "OPTIONS" {
        write_response(&mut stream, 204, "text/plain", &[])?;
        return Ok(());
    }
    let Some(route) = Route::parse(&request.path) else {
        write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#)?;
        return Ok(());
    };
    if route.method() != request.method {
        write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        return Ok(());
    }

    match route {
        Route::Index => {
            let body = json!({
                "message": "Drone Surveillance System API",
                "endpoints": {
                    "/video_feed/{feed}": "annotated MJPEG stream for one feed",
                    "/video_feed": format!("alias for /video_feed/{}", app.default_feed()),
                    "/stats": "detection counts summed over all feeds",
                    "/stats/{feed}": "detection counts for one feed",
                    "/reset_stats": "POST to clear all counts",
                    "/health": "liveness probe",
                },
                "feeds": app.feeds().iter().map(|feed| feed.name.as_str()).collect::<Vec<_>>(),
                "default_feed": app.default_feed(),
            });
            write_response(&mut stream, 200, "application/json", &serde_json::to_vec(&body)?)
        }
        Route::Health => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
        Route::Stats => {
            let snapshot = app.stats().snapshot()?;
            write_response(
                &mut stream,
                200,
                "application/json",
                &serde_json::to_vec(&snapshot)?,
            )
        }
        Route::FeedStats(feed) => match app.stats().feed_snapshot(&feed)? {
            Some(snapshot) => write_response(
                &mut stream,
                200,
                "application/json",
                &serde_json::to_vec(&snapshot)?,
            ),
            None => write_json_response(&mut stream, 404, r#"{"error":"unknown_feed"}"#),
        },
        Route::ResetStats => {
            app.stats().reset()?;
            log::info!("stats reset by {}", peer_label(&stream));
            write_json_response(&mut stream, 200, r#"{"message":"Stats reset successfully"}"#)
        }
        Route::VideoFeed(feed) => {
            let feed = feed.unwrap_or_else(|| app.default_feed().to_string());
            serve_stream(stream, app, &feed, slots, shutdown)
        }
    }
}

fn serve_stream(
    mut stream: TcpStream,
    app: &Surveillance,
    feed: &str,
    slots: &StreamSlots,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    if app.feed(feed).is_none() {
        return write_json_response(&mut stream, 404, r#"{"error":"unknown_feed"}"#);
    }
    let Some(_slot) = slots.try_acquire() else {
        log::warn!("feed {}: rejecting viewer {}, stream limit reached", feed, peer_label(&stream));
        return write_json_response(&mut stream, 503, r#"{"error":"too_many_streams"}"#);
    };
    let mut publisher = match app.open_publisher(feed, shutdown) {
        Ok(publisher) => publisher,
        Err(err) => {
            write_json_response(&mut stream, 500, r#"{"error":"pipeline_unavailable"}"#)?;
            return Err(err);
        }
    };
    if publisher.open().is_err() {
        return write_json_response(&mut stream, 503, r#"{"error":"source_unavailable"}"#);
    }

    let peer = peer_label(&stream);
    stream.set_write_timeout(Some(STREAM_WRITE_TIMEOUT))?;
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {MULTIPART_CONTENT_TYPE}\r\nCache-Control: no-store\r\nConnection: close\r\nAccess-Control-Allow-Origin: *\r\n\r\n"
    );
    stream.write_all(header.as_bytes())?;
    log::info!("feed {}: viewer {} connected", feed, peer);
    let summary = publisher.stream(&mut stream);
    log::info!(
        "feed {}: viewer {} finished ({:?}, {} frames sent)",
        feed,
        peer,
        publisher.state(),
        summary.frames_sent
    );
    Ok(())
}

fn peer_label(stream: &TcpStream) -> String {
    stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let request_line = text
        .split("\r\n")
        .next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_ascii_uppercase(),
        path,
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        204 => "HTTP/1.1 204 No Content",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n{cors}\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len(),
        cors = CORS_HEADERS,
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}

const CORS_HEADERS: &str = "Access-Control-Allow-Origin: *\r\nAccess-Control-Allow-Methods: GET, POST, OPTIONS\r\nAccess-Control-Allow-Headers: *\r\n";

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_routes() {
        assert_eq!(Route::parse("/"), Some(Route::Index));
        assert_eq!(Route::parse("/stats/"), Some(Route::Stats));
        assert_eq!(
            Route::parse("/stats/soldier"),
            Some(Route::FeedStats("soldier".to_string()))
        );
        assert_eq!(Route::parse("/video_feed"), Some(Route::VideoFeed(None)));
        assert_eq!(
            Route::parse("/video_feed/civilian"),
            Some(Route::VideoFeed(Some("civilian".to_string())))
        );
        assert_eq!(Route::parse("/video_feed/a/b"), None);
        assert_eq!(Route::parse("/events"), None);
        assert_eq!(Route::ResetStats.method(), "POST");
    }

    #[test]
    fn stream_slots_enforce_limit() {
        let slots = StreamSlots::new(1);
        let first = slots.try_acquire();
        assert!(first.is_some());
        assert!(slots.try_acquire().is_none());
        drop(first);
        assert!(slots.try_acquire().is_some());
    }
}
