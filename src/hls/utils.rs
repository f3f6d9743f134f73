pub fn extract_attr_u64(line: &str, key: &str) -> Option<u64> {
    extract_attr_str(line, key)?.parse().ok()
}

pub fn extract_attr_str(line: &str, key: &str) -> Option<String> {
    let key_eq = format!("{}=", key);
    let pos = line
        .find(&format!(":{}", key_eq))
        .map(|p| p + 1)
        .or_else(|| line.find(&format!(",{}", key_eq)).map(|p| p + 1))?;

    let rest = &line[pos + key_eq.len()..];

    if let Some(quoted) = rest.strip_prefix('"') {
        let end = quoted.find('"')?;
        Some(quoted[..end].to_string())
    } else {
        let end = rest.find(',').unwrap_or(rest.len());
        Some(rest[..end].trim().to_string())
    }
}

/// Resolves a possibly-relative playlist/segment URI against `base`,
/// stripping the base's own query string and fragment first so that
/// short-lived auth tokens in the base URL don't leak into the resolved
/// path.
pub fn resolve_url(base: &str, maybe_relative: &str) -> String {
    if maybe_relative.starts_with("http://") || maybe_relative.starts_with("https://") {
        return maybe_relative.to_string();
    }

    let base_clean = base.split('?').next().unwrap_or(base);
    let base_clean = base_clean.split('#').next().unwrap_or(base_clean);

    if maybe_relative.starts_with('/')
        && let Some(scheme_end) = base_clean.find("://") {
            let host_start = scheme_end + 3;
            let host_end = base_clean[host_start..]
                .find('/')
                .map(|p| host_start + p)
                .unwrap_or(base_clean.len());
            return format!("{}{}", &base_clean[..host_end], maybe_relative);
        }

    let base_dir = base_clean
        .rfind('/')
        .map(|i| &base_clean[..=i])
        .unwrap_or(base_clean);
    format!("{}{}", base_dir, maybe_relative)
}

/// Parses a segment's scheduling tie-break index out of its filename:
/// the digits following the last `_` before the last `.`, else all digits
/// in the filename, else `999999` when none are found.
pub fn segment_tie_break_index(filename: &str) -> usize {
    let stem = match filename.rfind('.') {
        Some(dot) => &filename[..dot],
        None => filename,
    };
    let digits = match stem.rfind('_') {
        Some(underscore) => &stem[underscore + 1..],
        None => stem,
    };
    let digits: String = digits.chars().filter(char::is_ascii_digit).collect();
    if !digits.is_empty()
        && let Ok(n) = digits.parse()
    {
        return n;
    }
    let all_digits: String = filename.chars().filter(char::is_ascii_digit).collect();
    all_digits.parse().unwrap_or(999_999)
}

/// Resolves the directory a playlist's own relative segment URIs are
/// anchored to: the base URL with its last path component stripped.
pub fn base_dir(url: &str) -> String {
    let clean = url.split(['?', '#']).next().unwrap_or(url);
    match clean.rfind('/') {
        Some(i) => clean[..=i].to_string(),
        None => clean.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_relative_segment() {
        assert_eq!(
            resolve_url("https://host/a/index.m3u8", "seg_0.ts"),
            "https://host/a/seg_0.ts"
        );
    }

    #[test]
    fn resolves_absolute_path() {
        assert_eq!(
            resolve_url("https://host/a/index.m3u8", "/other/seg.ts"),
            "https://host/other/seg.ts"
        );
    }

    #[test]
    fn passes_through_absolute_url() {
        assert_eq!(
            resolve_url("https://host/a/index.m3u8", "https://cdn/seg.ts"),
            "https://cdn/seg.ts"
        );
    }

    #[test]
    fn strips_query_string_from_base_before_resolving() {
        assert_eq!(
            resolve_url("https://host/a/index.m3u8?token=xyz", "seg.ts"),
            "https://host/a/seg.ts"
        );
    }

    #[test]
    fn tie_break_parses_digits_after_last_underscore() {
        assert_eq!(segment_tie_break_index("segment_042.ts"), 42);
        assert_eq!(segment_tie_break_index("low_res_7.ts"), 7);
    }

    #[test]
    fn tie_break_falls_back_to_all_digits_without_underscore() {
        assert_eq!(segment_tie_break_index("seg12.ts"), 12);
    }

    #[test]
    fn tie_break_is_999999_when_no_digits_present() {
        assert_eq!(segment_tie_break_index("segment.ts"), 999_999);
    }
}
