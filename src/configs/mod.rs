pub mod base;
pub mod cache;
pub mod logging;
pub mod server;
pub mod tls;

pub use base::Config;
pub use cache::CacheConfig;
pub use logging::{LogFileConfig, LoggingConfig};
pub use server::ServerConfig;
pub use tls::TlsConfig;
