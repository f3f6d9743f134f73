pub mod handler;
pub mod pool;
pub mod server;

pub use handler::{CacheListener, ProgressiveHandler};
pub use server::ProxyServer;
