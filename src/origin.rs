use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::tls::Version;

use crate::common::errors::ProxyError;
use crate::common::http::HttpClient;

/// TLS versions attempted in order, newest first, matching this crate's
/// "stop at the first one that connects" fallback policy.
const TLS_VERSIONS: [Version; 4] = [Version::TLS_1_3, Version::TLS_1_2, Version::TLS_1_1, Version::TLS_1_0];

/// Connect/read timeout for progressive-proxy origin fetches.
pub const ORIGIN_TIMEOUT: Duration = Duration::from_secs(30);
/// Connect/read timeout for HLS segment (`.ts`) fetches, matching the
/// teacher's `audio/hls/mod.rs` HLS client construction.
pub const SEGMENT_TIMEOUT: Duration = Duration::from_secs(15);

/// A minimal GET client for origin servers: builds one `reqwest` client per
/// TLS version and tries each in turn so that origins stuck on an older
/// handshake still work.
pub struct OriginClient {
    clients: Vec<Client>,
    trust_all: bool,
}

pub struct OriginResponse {
    pub response: Response,
    pub status: u16,
    pub status_text: String,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub content_range: Option<String>,
}

impl OriginClient {
    pub fn new(trust_all: bool) -> Result<Self, ProxyError> {
        let clients = TLS_VERSIONS
            .iter()
            .filter_map(|&v| {
                Client::builder()
                    .user_agent(HttpClient::USER_AGENT)
                    .connect_timeout(Duration::from_secs(30))
                    .timeout(Duration::from_secs(30))
                    .danger_accept_invalid_certs(trust_all)
                    .danger_accept_invalid_hostnames(trust_all)
                    .min_tls_version(v)
                    .max_tls_version(v)
                    .build()
                    .ok()
            })
            .collect();
        Ok(Self { clients, trust_all })
    }

    pub fn trust_all(&self) -> bool {
        self.trust_all
    }

    /// GETs `url`, forwarding `range` as a `Range: bytes=...` header when
    /// present, bounded by `timeout` for both connect and read. Tries each
    /// configured TLS version until one connects.
    pub fn get(&self, url: &str, range: Option<&str>, timeout: Duration) -> Result<OriginResponse, ProxyError> {
        let mut last_err = None;
        for client in &self.clients {
            let mut req = client
                .get(url)
                .timeout(timeout)
                .header("Accept", "*/*")
                .header("Accept-Encoding", "identity")
                .header("Connection", "keep-alive");
            if let Some(r) = range {
                req = req.header("Range", r);
            }
            match req.send() {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let status_text = response
                        .status()
                        .canonical_reason()
                        .unwrap_or("")
                        .to_string();
                    let content_type = response
                        .headers()
                        .get("Content-Type")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    let content_length = response
                        .headers()
                        .get("Content-Length")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.parse().ok());
                    let content_range = response
                        .headers()
                        .get("Content-Range")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    return Ok(OriginResponse {
                        response,
                        status,
                        status_text,
                        content_type,
                        content_length,
                        content_range,
                    });
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(ProxyError::UpstreamConnectError(
            last_err.map(|e| e.to_string()).unwrap_or_else(|| "no TLS client available".into()),
        ))
    }

    /// Issues a `HEAD` request, used to validate a segment URL (or a
    /// fallback host) is reachable before enqueueing a download.
    pub fn head_ok(&self, url: &str, timeout: Duration) -> bool {
        let Some(client) = self.clients.first() else {
            return false;
        };
        client
            .head(url)
            .timeout(timeout)
            .send()
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}
