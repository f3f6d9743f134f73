use std::path::Path;

use crate::common::errors::ProxyError;

/// Writes the always-present local playlist: every segment is listed (by
/// filename) whether or not it has finished downloading yet, so that the
/// sum of `#EXTINF` durations never drifts from the source playlist. A
/// player that requests a not-yet-downloaded segment will see a fetch
/// error; this only guards against duration/seek-bar drift, not against
/// fetching ahead of the download.
pub fn save_local_m3u8_partial(
    path: &Path,
    filenames: &[String],
    durations: &[f64],
) -> std::io::Result<()> {
    let body = render(filenames, durations);
    write_atomic(path, &body)
}

/// Writes the local playlist containing only segments that have finished
/// downloading, sorted in playlist order. Fails if any segment is missing
/// from disk.
pub fn save_local_m3u8_final(
    path: &Path,
    dir: &Path,
    filenames: &[String],
    durations: &[f64],
) -> Result<(), ProxyError> {
    for name in filenames {
        if !dir.join(name).exists() {
            return Err(ProxyError::MissingSegments);
        }
    }
    let body = render(filenames, durations);
    write_atomic(path, &body)?;
    Ok(())
}

fn render(filenames: &[String], durations: &[f64]) -> String {
    let target_duration = durations.iter().cloned().fold(0.0_f64, f64::max).ceil() as u64;
    let mut out = String::new();
    out.push_str("#EXTM3U\n");
    out.push_str("#EXT-X-VERSION:3\n");
    out.push_str(&format!("#EXT-X-TARGETDURATION:{}\n", target_duration.max(1)));
    out.push_str("#EXT-X-MEDIA-SEQUENCE:0\n");
    out.push_str("#EXT-X-PLAYLIST-TYPE:VOD\n");
    out.push_str("#EXT-X-START:TIME-OFFSET=0\n");

    for (name, duration) in filenames.iter().zip(durations.iter()) {
        out.push_str(&format!("#EXTINF:{:.3},\n", duration));
        out.push_str(name);
        out.push('\n');
    }
    out.push_str("#EXT-X-ENDLIST\n");
    out
}

fn write_atomic(path: &Path, body: &str) -> std::io::Result<()> {
    let tmp = path.with_extension("m3u8.tmp");
    std::fs::write(&tmp, body)?;
    std::fs::rename(&tmp, path)
}

const TS_PACKET_SIZE: usize = 188;
const TS_SYNC_BYTE: u8 = 0x47;
const NULL_PID: u16 = 0x1FFF;
const EMPTY_TS_PACKET_COUNT: usize = 1000;

/// Writes `dir/empty.ts`, a historical placeholder left over from when a
/// not-yet-downloaded segment was served as a null-PID filler instead of
/// erroring. Left in place once written; callers never need to remove it.
pub fn ensure_empty_ts(dir: &Path) -> std::io::Result<()> {
    let path = dir.join("empty.ts");
    if path.exists() {
        return Ok(());
    }
    let mut packet = [0xFFu8; TS_PACKET_SIZE];
    packet[0] = TS_SYNC_BYTE;
    packet[1] = (NULL_PID >> 8) as u8;
    packet[2] = (NULL_PID & 0xFF) as u8;
    packet[3] = 0x10;
    let mut body = Vec::with_capacity(TS_PACKET_SIZE * EMPTY_TS_PACKET_COUNT);
    for _ in 0..EMPTY_TS_PACKET_COUNT {
        body.extend_from_slice(&packet);
    }
    let tmp = path.with_extension("ts.tmp");
    std::fs::write(&tmp, &body)?;
    std::fs::rename(&tmp, &path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_rewrite_lists_every_segment_regardless_of_download_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.m3u8");
        let filenames = vec!["a.ts".to_string(), "b.ts".to_string()];
        let durations = vec![6.0, 6.0];
        save_local_m3u8_partial(&path, &filenames, &durations).unwrap();
        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.contains("a.ts"));
        assert!(body.contains("b.ts"));
        assert!(body.ends_with("#EXT-X-ENDLIST\n"));
    }

    #[test]
    fn duration_sum_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.m3u8");
        let filenames = vec!["a.ts".to_string(), "b.ts".to_string()];
        let durations = vec![5.5, 7.25];
        save_local_m3u8_partial(&path, &filenames, &durations).unwrap();
        let body = std::fs::read_to_string(&path).unwrap();
        let sum: f64 = body
            .lines()
            .filter_map(|l| l.strip_prefix("#EXTINF:"))
            .filter_map(|l| l.trim_end_matches(',').parse::<f64>().ok())
            .sum();
        assert!((sum - 12.75).abs() < 1e-9);
    }

    #[test]
    fn repeated_partial_writes_are_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.m3u8");
        let filenames = vec!["a.ts".to_string()];
        let durations = vec![6.0];
        save_local_m3u8_partial(&path, &filenames, &durations).unwrap();
        let first = std::fs::read_to_string(&path).unwrap();
        save_local_m3u8_partial(&path, &filenames, &durations).unwrap();
        let second = std::fs::read_to_string(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn empty_ts_is_a_thousand_null_pid_packets() {
        let dir = tempfile::tempdir().unwrap();
        ensure_empty_ts(dir.path()).unwrap();
        let body = std::fs::read(dir.path().join("empty.ts")).unwrap();
        assert_eq!(body.len(), TS_PACKET_SIZE * EMPTY_TS_PACKET_COUNT);
        for packet in body.chunks(TS_PACKET_SIZE) {
            assert_eq!(packet[0], TS_SYNC_BYTE);
            let pid = (u16::from(packet[1] & 0x1F) << 8) | u16::from(packet[2]);
            assert_eq!(pid, NULL_PID);
        }
    }

    #[test]
    fn empty_ts_is_written_only_once() {
        let dir = tempfile::tempdir().unwrap();
        ensure_empty_ts(dir.path()).unwrap();
        let first = std::fs::metadata(dir.path().join("empty.ts")).unwrap().modified().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        ensure_empty_ts(dir.path()).unwrap();
        let second = std::fs::metadata(dir.path().join("empty.ts")).unwrap().modified().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn final_rewrite_fails_when_segment_missing_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.m3u8");
        let filenames = vec!["missing.ts".to_string()];
        let durations = vec![6.0];
        let err = save_local_m3u8_final(&path, dir.path(), &filenames, &durations).unwrap_err();
        assert!(matches!(err, ProxyError::MissingSegments));
    }
}
