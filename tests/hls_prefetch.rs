use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use vidcache::hls::{HlsListener, M3u8Cache};
use vidcache::origin::OriginClient;

const SEGMENT_COUNT: usize = 5;

/// Serves a fixed media playlist plus `SEGMENT_COUNT` `.ts` segments, each
/// request handled on its own thread so concurrent prefetch workers don't
/// serialize on a single connection.
fn spawn_stub_origin() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            std::thread::spawn(move || {
                let mut buf = [0u8; 4096];
                let n = stream.read(&mut buf).unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]);
                let path = request
                    .lines()
                    .next()
                    .and_then(|l| l.split_whitespace().nth(1))
                    .unwrap_or("/");

                if path.ends_with("playlist.m3u8") {
                    let mut body = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
                    for i in 0..SEGMENT_COUNT {
                        body.push_str("#EXTINF:4.0,\n");
                        body.push_str(&format!("seg{i}.ts\n"));
                    }
                    body.push_str("#EXT-X-ENDLIST\n");
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/vnd.apple.mpegurl\r\nContent-Length: {}\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = stream.write_all(response.as_bytes());
                } else {
                    let body = vec![0x7Eu8; 256];
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: video/mp2t\r\nContent-Length: {}\r\n\r\n",
                        body.len()
                    );
                    let _ = stream.write_all(response.as_bytes());
                    if !request.starts_with("HEAD") {
                        let _ = stream.write_all(&body);
                    }
                }
            });
        }
    });

    format!("http://127.0.0.1:{port}/playlist.m3u8")
}

#[derive(Default)]
struct RecordingListener {
    ready: AtomicBool,
    completed: AtomicUsize,
    total: AtomicUsize,
    done: Mutex<bool>,
    success: AtomicBool,
    cvar: Condvar,
}

impl HlsListener for RecordingListener {
    fn on_ready_for_playback(&self, _playlist_path: &std::path::Path) {
        self.ready.store(true, Ordering::SeqCst);
    }

    fn on_progress(&self, completed: usize, total: usize) {
        self.completed.store(completed, Ordering::SeqCst);
        self.total.store(total, Ordering::SeqCst);
    }

    fn on_complete(&self, success: bool) {
        self.success.store(success, Ordering::SeqCst);
        *self.done.lock().unwrap() = true;
        self.cvar.notify_all();
    }
}

impl RecordingListener {
    fn wait_for_completion(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = self.done.lock().unwrap();
        while !*done {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let (guard, result) = self.cvar.wait_timeout(done, remaining).unwrap();
            done = guard;
            if result.timed_out() && !*done {
                return false;
            }
        }
        true
    }
}

#[test]
fn hls_run_downloads_every_segment_and_signals_playback_ready() {
    let playlist_url = spawn_stub_origin();
    let origin = Arc::new(OriginClient::new(false).unwrap());
    let dir = tempfile::tempdir().unwrap();
    let listener = Arc::new(RecordingListener::default());

    let cache = M3u8Cache::start(
        origin,
        &playlist_url,
        dir.path().to_path_buf(),
        Vec::new(),
        Some(listener.clone() as Arc<dyn HlsListener>),
    )
    .unwrap();

    assert!(
        listener.wait_for_completion(Duration::from_secs(10)),
        "hls run did not complete in time"
    );

    assert!(listener.ready.load(Ordering::SeqCst));
    assert!(listener.success.load(Ordering::SeqCst));
    assert_eq!(listener.completed.load(Ordering::SeqCst), SEGMENT_COUNT);
    assert!(cache.is_completed());

    let playlist_text = std::fs::read_to_string(cache.playlist_path()).unwrap();
    for i in 0..SEGMENT_COUNT {
        assert!(playlist_text.contains(&format!("seg{i}.ts")));
        assert!(cache.playlist_path().parent().unwrap().join(format!("seg{i}.ts")).exists());
    }

    assert!(cache.playlist_path().parent().unwrap().join("empty.ts").exists());
}

#[test]
fn repeated_set_current_playing_segment_does_not_double_count_completed() {
    let playlist_url = spawn_stub_origin();
    let origin = Arc::new(OriginClient::new(false).unwrap());
    let dir = tempfile::tempdir().unwrap();
    let listener = Arc::new(RecordingListener::default());

    let cache = M3u8Cache::start(
        origin,
        &playlist_url,
        dir.path().to_path_buf(),
        Vec::new(),
        Some(listener.clone() as Arc<dyn HlsListener>),
    )
    .unwrap();

    assert!(listener.wait_for_completion(Duration::from_secs(10)));
    assert_eq!(listener.completed.load(Ordering::SeqCst), SEGMENT_COUNT);

    // Normal playback advances the playhead with overlapping windows;
    // this must not re-enqueue or re-count already-finished segments.
    for i in 0..SEGMENT_COUNT {
        cache.set_current_playing_segment(i);
    }
    std::thread::sleep(Duration::from_millis(200));

    assert_eq!(listener.completed.load(Ordering::SeqCst), SEGMENT_COUNT);
    assert!(cache.is_completed());
}
