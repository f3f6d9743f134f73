use std::collections::{BinaryHeap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use crate::common::errors::ProxyError;
use crate::hls::resolver::resolve_playlist;
use crate::hls::rewriter::{ensure_empty_ts, save_local_m3u8_partial};
use crate::hls::types::{Priority, PrioritizedSegment};
use crate::origin::OriginClient;

const WORKER_COUNT: usize = 5;
const MAX_WORKER_COUNT: usize = 8;
const MINIMUM_SEGMENTS_FOR_PLAYBACK: usize = 3;
const BUFFER_SEGMENTS_AHEAD: usize = 8;
const MAX_RETRY_COUNT: u32 = 3;
const MAX_CONSECUTIVE_FAILURES: usize = 3;
const MAX_TOTAL_FAILURES: usize = 10;
const SEGMENT_BLOCK_SIZE: usize = 8 * 1024;

/// Callbacks fired as an HLS cache run progresses.
pub trait HlsListener: Send + Sync {
    fn on_ready_for_playback(&self, _playlist_path: &std::path::Path) {}
    fn on_progress(&self, _completed: usize, _total: usize) {}
    fn on_error(&self, _message: &str) {}
    fn on_complete(&self, _success: bool) {}
}

struct TaskQueue {
    heap: Mutex<BinaryHeap<PrioritizedSegment>>,
    cvar: Condvar,
}

impl TaskQueue {
    fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            cvar: Condvar::new(),
        }
    }

    fn push(&self, task: PrioritizedSegment) {
        let mut heap = self.heap.lock().unwrap();
        heap.push(task);
        self.cvar.notify_one();
    }

    /// Blocks until a task is available or `done` becomes true.
    fn pop(&self, done: &AtomicBool) -> Option<PrioritizedSegment> {
        let mut heap = self.heap.lock().unwrap();
        loop {
            if let Some(task) = heap.pop() {
                return Some(task);
            }
            if done.load(Ordering::SeqCst) {
                return None;
            }
            let (guard, _timeout) = self
                .cvar
                .wait_timeout(heap, Duration::from_millis(200))
                .unwrap();
            heap = guard;
        }
    }
}

struct Shared {
    origin: Arc<OriginClient>,
    cache_dir: PathBuf,
    segments_dir: PathBuf,
    playlist_path: PathBuf,
    fallback_base_urls: Vec<String>,
    ts_urls: Vec<String>,
    filenames: Vec<String>,
    durations: Vec<f64>,
    queue: TaskQueue,
    /// Indices ever handed to `enqueue`, so repeated, overlapping calls to
    /// `ensure_segments_cached` (the normal shape of `set_current_playing_segment`
    /// usage) never push the same segment onto the queue twice.
    claimed: Mutex<HashSet<usize>>,
    /// Indices already counted into `completed`/`failed`, so a segment whose
    /// file turns out to already exist on disk is never double-counted.
    finished: Mutex<HashSet<usize>>,
    completed: AtomicUsize,
    failed: AtomicUsize,
    consecutive_failures: AtomicUsize,
    canceled: AtomicBool,
    done: AtomicBool,
    ready_notified: AtomicBool,
    current_playing_segment: AtomicUsize,
    listener: Option<Arc<dyn HlsListener>>,
}

/// Orchestrates prioritized, parallel download of an HLS media playlist's
/// segments into a per-URL cache directory, rewriting `index.m3u8` as
/// segments land.
pub struct M3u8Cache {
    shared: Arc<Shared>,
    workers: Vec<std::thread::JoinHandle<()>>,
}

impl M3u8Cache {
    /// Resolves `url` (following a master playlist to its best variant if
    /// necessary), then spawns the worker pool and returns once enough
    /// segments for the fixed-size local queue have been scheduled.
    pub fn start(
        origin: Arc<OriginClient>,
        url: &str,
        cache_dir: PathBuf,
        fallback_base_urls: Vec<String>,
        listener: Option<Arc<dyn HlsListener>>,
    ) -> Result<Self, ProxyError> {
        let resolved = resolve_playlist(&origin, url)?;
        if resolved.segments.is_empty() {
            return Err(ProxyError::PrefetchAborted("playlist had no segments".into()));
        }

        let segments_dir = cache_dir.join("m3u8");
        std::fs::create_dir_all(&segments_dir)?;
        ensure_empty_ts(&segments_dir)?;
        let playlist_path = segments_dir.join("index.m3u8");

        let ts_urls: Vec<String> = resolved.segments.iter().map(|s| s.url.clone()).collect();
        let durations: Vec<f64> = resolved.segments.iter().map(|s| s.duration).collect();
        let filenames: Vec<String> = ts_urls.iter().map(|u| segment_filename(u)).collect();

        let shared = Arc::new(Shared {
            origin,
            cache_dir: cache_dir.clone(),
            segments_dir,
            playlist_path,
            fallback_base_urls,
            ts_urls,
            filenames,
            durations,
            queue: TaskQueue::new(),
            claimed: Mutex::new(HashSet::new()),
            finished: Mutex::new(HashSet::new()),
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            consecutive_failures: AtomicUsize::new(0),
            canceled: AtomicBool::new(false),
            done: AtomicBool::new(false),
            ready_notified: AtomicBool::new(false),
            current_playing_segment: AtomicUsize::new(0),
            listener,
        });

        let worker_count = WORKER_COUNT.min(MAX_WORKER_COUNT).min(shared.ts_urls.len().max(1));
        let workers = (0..worker_count)
            .map(|id| {
                let shared = shared.clone();
                std::thread::Builder::new()
                    .name(format!("hls-worker-{id}"))
                    .spawn(move || worker_loop(shared))
                    .expect("failed to spawn hls worker thread")
            })
            .collect();

        let cache = Self { shared, workers };
        cache.ensure_segments_cached(0, BUFFER_SEGMENTS_AHEAD);
        Ok(cache)
    }

    /// Enqueues `[start, end]` at high priority and the following window at
    /// medium priority; every other segment is enqueued once, lazily, at
    /// low priority the first time this is called for a run.
    pub fn ensure_segments_cached(&self, start: usize, end: usize) {
        let total = self.shared.ts_urls.len();
        let high_end = end.min(total);
        for i in start..high_end {
            self.enqueue(i, Priority::High);
        }
        let medium_end = (high_end + BUFFER_SEGMENTS_AHEAD).min(total);
        for i in high_end..medium_end {
            self.enqueue(i, Priority::Medium);
        }
        if start == 0 {
            for i in medium_end..total {
                self.enqueue(i, Priority::Low);
            }
        }
    }

    fn enqueue(&self, index: usize, priority: Priority) {
        if !self.shared.claimed.lock().unwrap().insert(index) {
            return;
        }
        let filename = self.shared.filenames[index].clone();
        let tie_break = crate::hls::utils::segment_tie_break_index(&filename);
        self.shared.queue.push(PrioritizedSegment {
            priority,
            index,
            tie_break,
            url: self.shared.ts_urls[index].clone(),
            filename,
        });
    }

    pub fn set_current_playing_segment(&self, index: usize) {
        self.shared.current_playing_segment.store(index, Ordering::SeqCst);
        self.ensure_segments_cached(index, index + BUFFER_SEGMENTS_AHEAD);
    }

    pub fn is_completed(&self) -> bool {
        let total = self.shared.ts_urls.len();
        self.shared.completed.load(Ordering::SeqCst) + self.shared.failed.load(Ordering::SeqCst) >= total
    }

    pub fn playlist_path(&self) -> &std::path::Path {
        &self.shared.playlist_path
    }

    pub fn cancel(&self) {
        self.shared.canceled.store(true, Ordering::SeqCst);
        self.shared.done.store(true, Ordering::SeqCst);
        self.shared.queue.cvar.notify_all();
    }

    pub fn cache_dir(&self) -> &std::path::Path {
        &self.shared.cache_dir
    }
}

impl Drop for M3u8Cache {
    fn drop(&mut self) {
        self.cancel();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn segment_filename(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or("segment.ts").to_string()
}

fn worker_loop(shared: Arc<Shared>) {
    while let Some(task) = shared.queue.pop(&shared.done) {
        if shared.canceled.load(Ordering::SeqCst) {
            break;
        }
        if task.priority as u8 > Priority::High as u8 {
            let delay_ms = 50 + (task.index as u64 % 20) * 50;
            std::thread::sleep(Duration::from_millis(delay_ms.min(1000)));
        }
        download_segment(&shared, &task);

        if shared.canceled.load(Ordering::SeqCst) {
            break;
        }
        if is_gated(&shared) {
            break;
        }
        if shared.completed.load(Ordering::SeqCst) + shared.failed.load(Ordering::SeqCst)
            >= shared.ts_urls.len()
        {
            shared.done.store(true, Ordering::SeqCst);
            shared.queue.cvar.notify_all();
            if let Some(listener) = &shared.listener {
                listener.on_complete(shared.failed.load(Ordering::SeqCst) == 0);
            }
            break;
        }
    }
}

fn is_gated(shared: &Shared) -> bool {
    let consecutive = shared.consecutive_failures.load(Ordering::SeqCst);
    let total_failed = shared.failed.load(Ordering::SeqCst);
    if consecutive >= MAX_CONSECUTIVE_FAILURES {
        shared.canceled.store(true, Ordering::SeqCst);
        shared.done.store(true, Ordering::SeqCst);
        shared.queue.cvar.notify_all();
        if let Some(listener) = &shared.listener {
            listener.on_error(&format!(
                "continuous {MAX_CONSECUTIVE_FAILURES} downloads failed, stop caching"
            ));
        }
        return true;
    }
    if total_failed >= MAX_TOTAL_FAILURES {
        shared.canceled.store(true, Ordering::SeqCst);
        shared.done.store(true, Ordering::SeqCst);
        shared.queue.cvar.notify_all();
        if let Some(listener) = &shared.listener {
            listener.on_error(&format!("{MAX_TOTAL_FAILURES} total segment failures, stop caching"));
        }
        return true;
    }
    false
}

/// Records `index` as finished at most once, returning whether this call
/// was the one that claimed it. Guards `completed`/`failed` against being
/// incremented twice for the same segment.
fn mark_finished(shared: &Shared, index: usize) -> bool {
    shared.finished.lock().unwrap().insert(index)
}

fn download_segment(shared: &Shared, task: &PrioritizedSegment) {
    let final_path = shared.segments_dir.join(&task.filename);
    if final_path.exists() && final_path.metadata().map(|m| m.len() > 0).unwrap_or(false) {
        if mark_finished(shared, task.index) {
            shared.completed.fetch_add(1, Ordering::SeqCst);
            after_segment_done(shared);
        }
        return;
    }

    let url = find_working_url(shared, &task.url).unwrap_or_else(|| task.url.clone());
    let tmp_path = final_path.with_extension("ts.tmp");

    for attempt in 1..=MAX_RETRY_COUNT {
        if shared.canceled.load(Ordering::SeqCst) {
            let _ = std::fs::remove_file(&tmp_path);
            return;
        }
        match fetch_segment_to_file(shared, &url, &tmp_path) {
            Ok(size) if size > 0 => {
                if std::fs::rename(&tmp_path, &final_path).is_ok() {
                    shared.consecutive_failures.store(0, Ordering::SeqCst);
                    if mark_finished(shared, task.index) {
                        shared.completed.fetch_add(1, Ordering::SeqCst);
                        after_segment_done(shared);
                    }
                    return;
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(url = %url, attempt, error = %e, "hls segment fetch failed");
            }
        }
        let _ = std::fs::remove_file(&tmp_path);
    }

    if mark_finished(shared, task.index) {
        shared.failed.fetch_add(1, Ordering::SeqCst);
        shared.consecutive_failures.fetch_add(1, Ordering::SeqCst);
    }
}

fn after_segment_done(shared: &Shared) {
    let _ = save_local_m3u8_partial(&shared.playlist_path, &shared.filenames, &shared.durations);
    if let Some(listener) = &shared.listener {
        listener.on_progress(shared.completed.load(Ordering::SeqCst), shared.ts_urls.len());
    }
    if !shared.ready_notified.load(Ordering::SeqCst)
        && shared.completed.load(Ordering::SeqCst) >= MINIMUM_SEGMENTS_FOR_PLAYBACK.min(shared.ts_urls.len())
    {
        shared.ready_notified.store(true, Ordering::SeqCst);
        if let Some(listener) = &shared.listener {
            listener.on_ready_for_playback(&shared.playlist_path);
        }
    }
}

fn fetch_segment_to_file(shared: &Shared, url: &str, tmp_path: &PathBuf) -> Result<u64, ProxyError> {
    use std::io::{Read, Write};

    let response = shared.origin.get(url, None, crate::origin::SEGMENT_TIMEOUT)?;
    if response.status >= 400 {
        return Err(ProxyError::UpstreamStatus(response.status));
    }
    let mut origin = response.response;
    let mut file = std::fs::File::create(tmp_path)?;
    let mut buf = [0u8; SEGMENT_BLOCK_SIZE];
    let mut total = 0u64;
    loop {
        let n = origin.read(&mut buf).map_err(ProxyError::Io)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])?;
        total += n as u64;
    }
    Ok(total)
}

/// Validates `primary` is reachable via `HEAD`; if not, tries each fallback
/// base URL's equivalent path in order, returning the first that answers.
fn find_working_url(shared: &Shared, primary: &str) -> Option<String> {
    let timeout = Duration::from_secs(5);
    if shared.origin.head_ok(primary, timeout) {
        return Some(primary.to_string());
    }
    let suffix = primary.rsplit('/').next()?;
    for base in &shared.fallback_base_urls {
        let candidate = format!("{}/{}", base.trim_end_matches('/'), suffix);
        if shared.origin.head_ok(&candidate, timeout) {
            debug!(primary, candidate, "hls: using fallback host");
            return Some(candidate);
        }
    }
    None
}
