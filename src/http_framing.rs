use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;

use crate::common::errors::ProxyError;

/// A parsed byte range from a client's `Range: bytes=s-e` header.
#[derive(Debug, Clone, Copy)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

/// The request line plus headers of one client request, parsed just enough
/// to dispatch it: method, target, and raw header lines for case-insensitive
/// lookup.
pub struct ParsedRequest {
    pub method: String,
    pub target: String,
    raw_lines: Vec<String>,
}

impl ParsedRequest {
    /// Reads a request line followed by headers terminated by a blank line.
    /// Returns `RequestEmpty` if the client closed before sending anything.
    pub fn read_from(stream: &TcpStream) -> Result<Self, ProxyError> {
        let mut reader = BufReader::new(stream.try_clone()?);
        let mut raw_lines = Vec::new();

        loop {
            let mut line = String::new();
            let n = reader.read_line(&mut line)?;
            if n == 0 {
                if raw_lines.is_empty() {
                    return Err(ProxyError::RequestEmpty);
                }
                break;
            }
            let trimmed = line.trim_end_matches(['\r', '\n']).to_string();
            if trimmed.is_empty() {
                break;
            }
            raw_lines.push(trimmed);
        }

        let request_line = raw_lines
            .first()
            .ok_or(ProxyError::RequestEmpty)?
            .clone();
        let mut parts = request_line.splitn(3, ' ');
        let method = parts
            .next()
            .ok_or_else(|| ProxyError::RequestMalformed(request_line.clone()))?
            .to_string();
        let target = parts
            .next()
            .ok_or_else(|| ProxyError::RequestMalformed(request_line.clone()))?
            .to_string();

        Ok(Self {
            method,
            target,
            raw_lines,
        })
    }

    /// Case-insensitive header lookup by prefix match on each raw line.
    pub fn header(&self, name: &str) -> Option<&str> {
        let prefix = format!("{name}:");
        self.raw_lines.iter().find_map(|line| {
            if line.len() >= prefix.len() && line[..prefix.len()].eq_ignore_ascii_case(&prefix) {
                Some(line[prefix.len()..].trim())
            } else {
                None
            }
        })
    }

    /// Decodes the request target into an absolute URL: strips the leading
    /// `/`, percent-decodes, and prepends `https://` if no scheme is present.
    pub fn target_url(&self) -> String {
        let stripped = self.target.trim_start_matches('/');
        let decoded = urlencoding::decode(stripped)
            .map(|c| c.into_owned())
            .unwrap_or_else(|_| stripped.to_string());
        if decoded.starts_with("http://") || decoded.starts_with("https://") {
            decoded
        } else {
            format!("https://{decoded}")
        }
    }

    pub fn range(&self) -> Option<ByteRange> {
        parse_range_header(self.header("Range")?)
    }
}

/// Parses a `bytes=s-[e]` range header value.
pub fn parse_range_header(value: &str) -> Option<ByteRange> {
    let spec = value.strip_prefix("bytes=")?;
    let (start_str, end_str) = spec.split_once('-')?;
    let start = start_str.trim().parse().ok()?;
    let end = if end_str.trim().is_empty() {
        None
    } else {
        end_str.trim().parse().ok()
    };
    Some(ByteRange { start, end })
}

/// Writes a `200 OK` status line plus the proxy's standard header set.
pub fn write_ok_headers(
    out: &mut impl Write,
    content_type: &str,
    content_length: u64,
) -> std::io::Result<()> {
    write!(
        out,
        "HTTP/1.1 200 OK\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {content_length}\r\n\
         Connection: keep-alive\r\n\
         Accept-Ranges: bytes\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Cache-Control: no-cache\r\n\r\n"
    )
}

/// Writes a `206 Partial Content` status line plus standard headers and a
/// `Content-Range`.
pub fn write_partial_headers(
    out: &mut impl Write,
    content_type: &str,
    range_start: u64,
    range_end: u64,
    total: u64,
) -> std::io::Result<()> {
    let content_length = range_end - range_start + 1;
    write!(
        out,
        "HTTP/1.1 206 Partial Content\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {content_length}\r\n\
         Content-Range: bytes {range_start}-{range_end}/{total}\r\n\
         Connection: keep-alive\r\n\
         Accept-Ranges: bytes\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Cache-Control: no-cache\r\n\r\n"
    )
}

/// Writes a `416 Requested Range Not Satisfiable` response.
pub fn write_range_unsatisfiable(out: &mut impl Write, total: u64) -> std::io::Result<()> {
    write!(
        out,
        "HTTP/1.1 416 Requested Range Not Satisfiable\r\n\
         Content-Range: bytes */{total}\r\n\
         Connection: close\r\n\r\n"
    )
}

/// Writes a bare status line (used to forward an upstream error status, or
/// to report an internal failure) with an optional plain-text body.
pub fn write_status_only(out: &mut impl Write, code: u16, reason: &str, body: &str) -> std::io::Result<()> {
    write!(out, "HTTP/1.1 {code} {reason}\r\nConnection: close\r\n\r\n{body}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_open_ended_range() {
        let r = parse_range_header("bytes=100-").unwrap();
        assert_eq!(r.start, 100);
        assert_eq!(r.end, None);
    }

    #[test]
    fn parses_closed_range() {
        let r = parse_range_header("bytes=0-99").unwrap();
        assert_eq!(r.start, 0);
        assert_eq!(r.end, Some(99));
    }

    #[test]
    fn rejects_missing_bytes_prefix() {
        assert!(parse_range_header("chars=0-99").is_none());
    }
}
