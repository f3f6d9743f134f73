use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::cache::CacheRegistry;
use crate::common::errors::ProxyError;
use crate::common::types::AnyResult;
use crate::configs::Config;
use crate::hls::{HlsListener, M3u8Cache};
use crate::origin::OriginClient;
use crate::proxy::{CacheListener, ProgressiveHandler, ProxyServer};

type ListenerMap = DashMap<String, Arc<dyn CacheListener>>;

/// Routes the proxy's per-connection callbacks to whichever listener
/// registered interest in that URL, if any.
struct FanoutListener {
    listeners: Arc<ListenerMap>,
}

impl CacheListener for FanoutListener {
    fn on_progress(&self, url: &str, percent: f64, bytes_per_sec: f64) {
        if let Some(l) = self.listeners.get(url) {
            l.on_progress(url, percent, bytes_per_sec);
        }
    }
    fn on_available(&self, url: &str, cache_file: &std::path::Path) {
        if let Some(l) = self.listeners.get(url) {
            l.on_available(url, cache_file);
        }
    }
    fn on_error(&self, url: &str, err: &ProxyError) {
        if let Some(l) = self.listeners.get(url) {
            l.on_error(url, err);
        }
    }
}

/// The process-wide facade: owns the cache registry, origin client and
/// embedded proxy server, and maps original URLs to local proxy URLs.
pub struct Manager {
    registry: Arc<CacheRegistry>,
    origin: Arc<OriginClient>,
    server: Arc<ProxyServer>,
    listeners: Arc<ListenerMap>,
}

impl Manager {
    pub fn init(config: &Config) -> AnyResult<Arc<Self>> {
        let cache_dir = config.cache.dir.clone().unwrap_or_else(default_cache_dir);
        let registry = CacheRegistry::new(cache_dir)?;
        let origin = Arc::new(OriginClient::new(config.tls.trust_all)?);
        let listeners: Arc<ListenerMap> = Arc::new(DashMap::new());

        let fanout = Arc::new(FanoutListener {
            listeners: listeners.clone(),
        });
        let handler = Arc::new(ProgressiveHandler::new(
            registry.clone(),
            origin.clone(),
            Some(fanout as Arc<dyn CacheListener>),
        ));
        let server = Arc::new(ProxyServer::bind(&config.server.host, config.server.port, handler)?);
        server.start();

        Ok(Arc::new(Self {
            registry,
            origin,
            server,
            listeners,
        }))
    }

    pub fn port(&self) -> u16 {
        self.server.port()
    }

    /// Maps an original URL to the local proxy URL the player should use
    /// instead. Only the `https://` scheme is stripped, since that's the
    /// scheme the handler restores by default when none is present; an
    /// `http://` URL keeps its scheme so round-tripping stays lossless.
    pub fn get_proxy_url(&self, url: &str) -> String {
        let stripped = url.strip_prefix("https://").unwrap_or(url);
        let encoded = urlencoding::encode(stripped);
        format!("http://127.0.0.1:{}/{}", self.server.port(), encoded)
    }

    pub fn register_cache_listener(&self, url: &str, listener: Arc<dyn CacheListener>) {
        self.listeners.insert(url.to_string(), listener);
    }

    pub fn cache_dir(&self) -> &std::path::Path {
        self.registry.cache_dir()
    }

    pub fn start_hls(
        &self,
        url: &str,
        fallback_base_urls: Vec<String>,
        listener: Option<Arc<dyn HlsListener>>,
    ) -> AnyResult<M3u8Cache> {
        let dir = self
            .registry
            .cache_dir()
            .join(crate::cache::key::cache_filename(url));
        let cache = M3u8Cache::start(self.origin.clone(), url, dir, fallback_base_urls, listener)?;
        Ok(cache)
    }

    pub fn release(&self) {
        self.server.stop();
        self.registry.release();
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("video-cache")
}
