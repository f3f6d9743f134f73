pub mod cache;
pub mod common;
pub mod configs;
pub mod hls;
pub mod http_framing;
pub mod manager;
pub mod origin;
pub mod proxy;

pub use manager::Manager;
