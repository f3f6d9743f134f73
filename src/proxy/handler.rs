use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::cache::{CacheRegistry, FileCache};
use crate::common::errors::ProxyError;
use crate::http_framing::{
    write_ok_headers, write_partial_headers, write_range_unsatisfiable, write_status_only,
    ParsedRequest,
};
use crate::origin::OriginClient;

const BLOCK_SIZE: usize = 8 * 1024;
const RETRY_BUFFER_SIZE: usize = 16 * 1024;
const CLIENT_WRITE_RETRIES: u32 = 3;

/// Callbacks the handler fires as a download progresses, fanned out by the
/// `Manager` facade to whichever listener registered for this URL.
pub trait CacheListener: Send + Sync {
    fn on_progress(&self, _url: &str, _percent: f64, _bytes_per_sec: f64) {}
    fn on_available(&self, _url: &str, _cache_file: &std::path::Path) {}
    fn on_error(&self, _url: &str, _err: &ProxyError) {}
}

pub struct ProgressiveHandler {
    registry: Arc<CacheRegistry>,
    origin: Arc<OriginClient>,
    listener: Option<Arc<dyn CacheListener>>,
}

impl ProgressiveHandler {
    pub fn new(
        registry: Arc<CacheRegistry>,
        origin: Arc<OriginClient>,
        listener: Option<Arc<dyn CacheListener>>,
    ) -> Self {
        Self {
            registry,
            origin,
            listener,
        }
    }

    pub fn handle(&self, mut stream: TcpStream) {
        let request = match ParsedRequest::read_from(&stream) {
            Ok(r) => r,
            Err(_) => return,
        };
        let url = request.target_url();
        let cache = match self.registry.get_file_cache(&url) {
            Ok(c) => c,
            Err(e) => {
                let _ = write_status_only(&mut stream, 500, "Internal Server Error", &e.to_string());
                return;
            }
        };

        let result = if cache.exists() {
            self.serve_cached(&mut stream, &cache, &request)
        } else {
            self.serve_fetch(&mut stream, &cache, &url, &request)
        };

        if let Err(e) = result {
            debug!(%url, error = %e, "progressive handler finished with an error");
            if let Some(listener) = &self.listener {
                listener.on_error(&url, &e);
            }
        }
    }

    fn content_type_for(url: &str) -> &'static str {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        if path.ends_with(".webm") {
            "video/webm"
        } else {
            "video/mp4"
        }
    }

    fn serve_cached(
        &self,
        stream: &mut TcpStream,
        cache: &FileCache,
        request: &ParsedRequest,
    ) -> Result<(), ProxyError> {
        let length = cache.length();
        let content_type = Self::content_type_for(&request.target_url());
        let is_webm = content_type == "video/webm";

        let (mut start, mut end) = match request.range() {
            Some(r) => (r.start, r.end.unwrap_or(length.saturating_sub(1))),
            None => (0, length.saturating_sub(1)),
        };

        if start >= length {
            if is_webm {
                start = 0;
                end = length.saturating_sub(1);
            } else {
                write_range_unsatisfiable(stream, length)?;
                return Ok(());
            }
        }
        start = start.min(length.saturating_sub(1));
        end = end.clamp(start, length.saturating_sub(1));

        write_partial_headers(stream, content_type, start, end, length)?;

        let mut pos = start;
        while pos <= end {
            let chunk_len = ((end - pos + 1) as usize).min(BLOCK_SIZE);
            let data = cache.read(pos, chunk_len)?;
            if data.is_empty() {
                break;
            }
            self.write_cached_with_retry(stream, &data)?;
            pos += data.len() as u64;
        }
        Ok(())
    }

    fn serve_fetch(
        &self,
        stream: &mut TcpStream,
        cache: &FileCache,
        url: &str,
        request: &ParsedRequest,
    ) -> Result<(), ProxyError> {
        let mut content_type = Self::content_type_for(url).to_string();
        let is_webm = content_type == "video/webm";
        let requested_range = request.range();

        let range_header = if is_webm {
            None
        } else {
            requested_range.map(|r| match r.end {
                Some(e) => format!("bytes={}-{}", r.start, e),
                None => format!("bytes={}-", r.start),
            })
        };

        let origin_response = self
            .origin
            .get(url, range_header.as_deref(), crate::origin::ORIGIN_TIMEOUT)?;
        if origin_response.status >= 400 {
            let status = origin_response.status;
            let mut body = String::new();
            let _ = origin_response.response.take(4096).read_to_string(&mut body);
            if !body.is_empty() {
                warn!(%url, status, body, "origin returned an error");
            }
            write_status_only(stream, status, &origin_response.status_text, "")?;
            return Err(ProxyError::UpstreamStatus(status));
        }

        if let Some(ct) = &origin_response.content_type {
            if ct.contains("webm") {
                content_type = "video/webm".to_string();
            } else if ct.contains("mp4") {
                content_type = "video/mp4".to_string();
            }
        }
        let is_webm = is_webm || content_type == "video/webm";
        let content_length = origin_response.content_length;

        if is_webm
            && cache.exists()
            && let Some(expected) = content_length
            && cache.length() != expected
        {
            cache.invalidate()?;
        }

        let start_pos = requested_range.map(|r| r.start).unwrap_or(0);
        if !is_webm && requested_range.is_some() && origin_response.status == 206 {
            let (range_start, range_end, total) = parse_or_fabricate_content_range(
                origin_response.content_range.as_deref(),
                start_pos,
                content_length.unwrap_or(0),
            );
            write_partial_headers(stream, &content_type, range_start, range_end, total)?;
        } else {
            write_ok_headers(stream, &content_type, content_length.unwrap_or(0))?;
        }

        self.tee_loop(
            stream,
            cache,
            url,
            origin_response.response,
            start_pos,
            content_length,
            is_webm,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn tee_loop(
        &self,
        stream: &mut TcpStream,
        cache: &FileCache,
        url: &str,
        mut origin: reqwest::blocking::Response,
        start_pos: u64,
        content_length: Option<u64>,
        is_webm: bool,
    ) -> Result<(), ProxyError> {
        let mut position = start_pos;
        let mut total_read: u64 = 0;
        let mut retry_buffer: Vec<u8> = Vec::with_capacity(RETRY_BUFFER_SIZE);
        let mut buf = [0u8; BLOCK_SIZE];
        let mut last_progress = Instant::now();
        let mut client_alive = true;

        loop {
            let n = match origin.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => return Err(ProxyError::Io(e)),
            };
            let chunk = &buf[..n];

            cache.write(chunk, position)?;
            position += n as u64;
            total_read += n as u64;

            retry_buffer.extend_from_slice(chunk);
            if retry_buffer.len() > RETRY_BUFFER_SIZE {
                let excess = retry_buffer.len() - RETRY_BUFFER_SIZE;
                retry_buffer.drain(0..excess);
            }

            if client_alive {
                let write_result = stream.write_all(chunk).and_then(|_| stream.flush());
                let outcome = match write_result {
                    Ok(()) => Ok(()),
                    Err(_) => self.write_tee_with_retry(stream, &retry_buffer),
                };
                match outcome {
                    Ok(()) => {}
                    Err(_) if is_webm => {
                        client_alive = false;
                        warn!(%url, "client disconnected, continuing download into cache only");
                    }
                    Err(e) => return Err(e),
                }
            }

            if last_progress.elapsed() >= Duration::from_secs(1) {
                let percent = match content_length {
                    Some(total) if total > 0 => (total_read * 100) as f64 / total as f64,
                    _ => (total_read / BLOCK_SIZE as u64) as f64,
                };
                let speed = total_read as f64 / last_progress.elapsed().as_secs_f64().max(1.0);
                if let Some(listener) = &self.listener {
                    listener.on_progress(url, percent, speed);
                }
                last_progress = Instant::now();
            }
        }

        if is_webm
            && let Some(expected) = content_length
            && expected > 0
            && cache.length() != expected
        {
            cache.invalidate()?;
            return Err(ProxyError::IncompleteDownload);
        }

        if let Some(total) = content_length
            && total > 0
            && total_read >= total
            && let Some(listener) = &self.listener
        {
            listener.on_available(url, cache.cache_file());
        }
        Ok(())
    }

    /// Retries a client write up to `CLIENT_WRITE_RETRIES` times with a fixed
    /// 100 ms sleep between attempts, flushing after every attempt. Used for
    /// the cached-serve path.
    fn write_cached_with_retry(&self, stream: &mut TcpStream, data: &[u8]) -> Result<(), ProxyError> {
        for attempt in 1..=CLIENT_WRITE_RETRIES {
            match stream.write_all(data).and_then(|_| stream.flush()) {
                Ok(()) => return Ok(()),
                Err(e) if attempt == CLIENT_WRITE_RETRIES => return Err(ProxyError::Io(e)),
                Err(_) => std::thread::sleep(Duration::from_millis(100)),
            }
        }
        Err(ProxyError::ClientDisconnect)
    }

    /// Retries a failed tee-loop client write by resending the whole
    /// retry-buffer (not just the chunk that failed), with a `1 s × attempt`
    /// back-off between attempts, so the client re-syncs on whatever bytes
    /// it may have missed.
    fn write_tee_with_retry(&self, stream: &mut TcpStream, retry_buffer: &[u8]) -> Result<(), ProxyError> {
        for attempt in 1..=CLIENT_WRITE_RETRIES {
            std::thread::sleep(Duration::from_secs(attempt as u64));
            match stream.write_all(retry_buffer).and_then(|_| stream.flush()) {
                Ok(()) => return Ok(()),
                Err(e) if attempt == CLIENT_WRITE_RETRIES => return Err(ProxyError::Io(e)),
                Err(_) => {}
            }
        }
        Err(ProxyError::ClientDisconnect)
    }
}

/// Parses an upstream `Content-Range: bytes s-e/total` header, falling back
/// to a fabricated range built from the request's own start offset when the
/// origin didn't send one. Fabricating here can misrepresent the actually
/// served range if the origin's behaviour doesn't match ours; this matches
/// the specified fallback rather than failing the request.
fn parse_or_fabricate_content_range(
    header: Option<&str>,
    fallback_start: u64,
    content_length: u64,
) -> (u64, u64, u64) {
    if let Some(h) = header
        && let Some(spec) = h.strip_prefix("bytes ")
            && let Some((range, total)) = spec.split_once('/')
                && let Some((s, e)) = range.split_once('-')
                    && let (Ok(s), Ok(e), Ok(t)) = (s.parse(), e.parse(), total.parse()) {
                        return (s, e, t);
                    }
    let end = fallback_start + content_length.saturating_sub(1);
    (fallback_start, end, fallback_start + content_length)
}
