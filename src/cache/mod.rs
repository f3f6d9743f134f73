pub mod file;
pub mod key;
pub mod registry;

pub use file::FileCache;
pub use registry::CacheRegistry;
