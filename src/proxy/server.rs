use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info};

use crate::proxy::handler::ProgressiveHandler;
use crate::proxy::pool::WorkerPool;

const POOL_SIZE: usize = 16;

/// The embedded proxy's accept loop. Binds to loopback on the configured
/// port when available, otherwise any ephemeral port.
pub struct ProxyServer {
    listener: TcpListener,
    port: u16,
    running: Arc<AtomicBool>,
    pool: parking_lot::Mutex<WorkerPool>,
    handler: Arc<ProgressiveHandler>,
}

impl ProxyServer {
    pub fn bind(host: &str, port: u16, handler: Arc<ProgressiveHandler>) -> std::io::Result<Self> {
        let listener = TcpListener::bind((host, port)).or_else(|_| TcpListener::bind((host, 0)))?;
        let port = listener.local_addr()?.port();
        Ok(Self {
            listener,
            port,
            running: Arc::new(AtomicBool::new(false)),
            pool: parking_lot::Mutex::new(WorkerPool::new(POOL_SIZE)),
            handler,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Spawns the accept loop on a dedicated thread and returns immediately.
    pub fn start(self: &Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        let this = self.clone();
        std::thread::Builder::new()
            .name("proxy-accept".into())
            .spawn(move || this.accept_loop())
            .expect("failed to spawn proxy accept thread");
        info!(port = self.port, "proxy server listening");
    }

    fn accept_loop(self: Arc<Self>) {
        for stream in self.listener.incoming() {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            match stream {
                Ok(stream) => self.dispatch(stream),
                Err(e) => {
                    if self.running.load(Ordering::SeqCst) {
                        error!(error = %e, "accept failed");
                    }
                }
            }
        }
    }

    fn dispatch(&self, stream: TcpStream) {
        let handler = self.handler.clone();
        self.pool.lock().dispatch(move || handler.handle(stream));
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Ok(addr) = self.listener.local_addr() {
            let _ = TcpStream::connect(addr);
        }
        self.pool.lock().shutdown();
    }
}
