use crate::common::errors::ProxyError;
use crate::hls::parser::{best_variant, parse_m3u8};
use crate::hls::types::{M3u8Playlist, ParsedMediaPlaylist};
use crate::hls::utils::base_dir;
use crate::origin::OriginClient;

/// Downloads `url` and, if it's a master playlist, follows the
/// highest-bandwidth variant down to its media playlist. Returns the
/// resolved segment list plus the base URL later relative lookups (and
/// fallback host substitution) should use.
pub fn resolve_playlist(
    client: &OriginClient,
    url: &str,
) -> Result<ParsedMediaPlaylist, ProxyError> {
    let text = fetch_text(client, url)?;
    let base = base_dir(url);
    match parse_m3u8(&text, &base) {
        M3u8Playlist::Media { segments } => Ok(ParsedMediaPlaylist {
            segments,
            base_url: base,
        }),
        M3u8Playlist::Master { variants } => {
            let variant = best_variant(&variants)
                .ok_or_else(|| ProxyError::PrefetchAborted("master playlist has no variants".into()))?;
            let media_text = fetch_text(client, &variant.url)?;
            let media_base = base_dir(&variant.url);
            match parse_m3u8(&media_text, &media_base) {
                M3u8Playlist::Media { segments } => Ok(ParsedMediaPlaylist {
                    segments,
                    base_url: media_base,
                }),
                M3u8Playlist::Master { .. } => Err(ProxyError::PrefetchAborted(
                    "variant playlist was itself a master playlist".into(),
                )),
            }
        }
    }
}

fn fetch_text(client: &OriginClient, url: &str) -> Result<String, ProxyError> {
    let response = client.get(url, None, crate::origin::SEGMENT_TIMEOUT)?;
    if response.status >= 400 {
        return Err(ProxyError::UpstreamStatus(response.status));
    }
    response
        .response
        .text()
        .map_err(|e| ProxyError::SegmentFetchFailed(e.to_string()))
}
