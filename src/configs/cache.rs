use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct CacheConfig {
    /// Overrides the cache root directory. Defaults to the OS cache dir
    /// (e.g. `~/.cache`) plus `video-cache` when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}
