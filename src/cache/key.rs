use md5::{Digest, Md5};

/// Derives the on-disk filename for a cached URL: the hex MD5 digest of the
/// URL, suffixed with the URL's own path extension when it's short enough to
/// plausibly be one (`.mp4`, `.webm`, `.ts`, ...). The extension is cosmetic
/// only — the digest is what makes the name stable and collision-resistant.
pub fn cache_filename(url: &str) -> String {
    let digest = Md5::digest(url.as_bytes());
    let hex = hex::encode(digest);

    match extension_of(url) {
        Some(ext) => format!("{hex}.{ext}"),
        None => hex,
    }
}

fn extension_of(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last_segment = path.rsplit('/').next().unwrap_or(path);
    let ext = last_segment.rsplit('.').next()?;
    if ext.len() <= 4 && ext != last_segment && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        Some(ext)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_short_extension() {
        let name = cache_filename("https://example.com/video/v.mp4");
        assert!(name.ends_with(".mp4"));
        assert_eq!(name.len(), 32 + 4);
    }

    #[test]
    fn drops_long_or_missing_extension() {
        let name = cache_filename("https://example.com/video/stream");
        assert_eq!(name.len(), 32);
    }

    #[test]
    fn ignores_query_string() {
        let a = cache_filename("https://example.com/v.mp4?token=abc");
        let b = cache_filename("https://example.com/v.mp4?token=xyz");
        assert_ne!(a, b, "digest is over the full url, including the query");
        assert!(a.ends_with(".mp4"));
    }

    #[test]
    fn is_stable_for_same_url() {
        let a = cache_filename("https://example.com/a.webm");
        let b = cache_filename("https://example.com/a.webm");
        assert_eq!(a, b);
    }
}
