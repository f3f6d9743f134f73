use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use vidcache::configs::Config;
use vidcache::Manager;

/// A minimal HTTP/1.1 origin that always answers with a fixed body,
/// ignoring any request headers. Good enough to drive the proxy's fetch
/// path without needing a real remote server.
fn spawn_stub_origin(body: &'static [u8], content_type: &'static str) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_clone = hits.clone();

    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            hits_clone.fetch_add(1, Ordering::SeqCst);
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf);
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\n\r\n",
                body.len()
            );
            let _ = stream.write_all(response.as_bytes());
            let _ = stream.write_all(body);
        }
    });

    (format!("http://127.0.0.1:{port}/video.mp4"), hits)
}

fn raw_get(port: u16, target: &str, extra_headers: &[&str]) -> (u16, Vec<u8>) {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    let mut request = format!("GET /{target} HTTP/1.1\r\nHost: 127.0.0.1\r\n");
    for header in extra_headers {
        request.push_str(header);
        request.push_str("\r\n");
    }
    request.push_str("\r\n");
    stream.write_all(request.as_bytes()).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).unwrap();

    let header_end = raw.windows(4).position(|w| w == b"\r\n\r\n").unwrap();
    let header_text = String::from_utf8_lossy(&raw[..header_end]);
    let status: u16 = header_text
        .lines()
        .next()
        .unwrap()
        .split_whitespace()
        .nth(1)
        .unwrap()
        .parse()
        .unwrap();
    let body = raw[header_end + 4..].to_vec();
    (status, body)
}

fn test_manager() -> (Arc<Manager>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.cache.dir = Some(dir.path().to_path_buf());
    let manager = Manager::init(&config).unwrap();
    (manager, dir)
}

#[test]
fn cold_fetch_streams_full_body_and_populates_cache() {
    let body = vec![0x41u8; 1024];
    let body_static: &'static [u8] = Box::leak(body.into_boxed_slice());
    let (origin_url, hits) = spawn_stub_origin(body_static, "video/mp4");
    let (manager, _dir) = test_manager();

    let proxy_url = manager.get_proxy_url(&origin_url);
    let target = proxy_url.splitn(4, '/').nth(3).unwrap();

    let (status, returned_body) = raw_get(manager.port(), target, &[]);
    assert_eq!(status, 200);
    assert_eq!(returned_body, body_static);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    manager.release();
}

#[test]
fn range_hit_serves_from_cache_without_a_second_origin_request() {
    let body = vec![0x42u8; 1000];
    let body_static: &'static [u8] = Box::leak(body.into_boxed_slice());
    let (origin_url, hits) = spawn_stub_origin(body_static, "video/mp4");
    let (manager, _dir) = test_manager();

    let proxy_url = manager.get_proxy_url(&origin_url);
    let target = proxy_url.splitn(4, '/').nth(3).unwrap();

    let (status, _) = raw_get(manager.port(), target, &[]);
    assert_eq!(status, 200);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let (status, body) = raw_get(manager.port(), target, &["Range: bytes=100-199"]);
    assert_eq!(status, 206);
    assert_eq!(body.len(), 100);
    assert_eq!(body, &body_static[100..200]);
    // Served from the cache file, not a second origin round-trip.
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    manager.release();
}
