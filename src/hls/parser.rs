use crate::hls::types::{M3u8Playlist, Segment, Variant};
use crate::hls::utils::{extract_attr_u64, resolve_url};

const DEFAULT_SEGMENT_DURATION: f64 = 10.0;

/// Parses master or media playlist text. Distinguishes the two by the
/// presence of `#EXT-X-STREAM-INF`.
pub fn parse_m3u8(text: &str, base_url: &str) -> M3u8Playlist {
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    let is_master = lines.iter().any(|l| l.starts_with("#EXT-X-STREAM-INF"));

    if is_master {
        parse_master(&lines, base_url)
    } else {
        parse_media(&lines, base_url)
    }
}

fn parse_master(lines: &[&str], base_url: &str) -> M3u8Playlist {
    let mut variants = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        if line.starts_with("#EXT-X-STREAM-INF") {
            let bandwidth = extract_attr_u64(line, "BANDWIDTH").unwrap_or(0);
            let mut j = i + 1;
            while j < lines.len() && lines[j].starts_with('#') {
                j += 1;
            }
            if j < lines.len() && !lines[j].is_empty() {
                variants.push(Variant {
                    url: resolve_url(base_url, lines[j]),
                    bandwidth,
                });
            }
            i = j + 1;
        } else {
            i += 1;
        }
    }
    M3u8Playlist::Master { variants }
}

fn parse_media(lines: &[&str], base_url: &str) -> M3u8Playlist {
    let mut segments = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        if line.starts_with("#EXTINF:") {
            let duration = line
                .strip_prefix("#EXTINF:")
                .and_then(|rest| rest.split(',').next())
                .and_then(|d| d.trim().parse::<f64>().ok())
                .unwrap_or(DEFAULT_SEGMENT_DURATION);

            let mut j = i + 1;
            while j < lines.len() && lines[j].starts_with('#') {
                j += 1;
            }
            if j < lines.len() && !lines[j].is_empty() {
                segments.push(Segment {
                    url: resolve_url(base_url, lines[j]),
                    duration,
                });
            }
            i = j + 1;
        } else {
            i += 1;
        }
    }
    M3u8Playlist::Media { segments }
}

/// Picks the highest-`BANDWIDTH` variant from a master playlist.
pub fn best_variant(variants: &[Variant]) -> Option<&Variant> {
    variants.iter().max_by_key(|v| v.bandwidth)
}
