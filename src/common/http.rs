use std::time::Duration;

use reqwest::blocking;

/// Shared fixed request headers used when talking to origin servers.
pub struct HttpClient;

impl HttpClient {
    /// A fixed desktop-browser UA string; several origins refuse requests
    /// from anything that doesn't look like a browser.
    pub const USER_AGENT: &'static str =
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/134.0.0.0 Safari/537.36";

    pub fn new_blocking(connect_timeout: Duration, trust_all: bool) -> reqwest::Result<blocking::Client> {
        let builder = blocking::Client::builder()
            .user_agent(Self::USER_AGENT)
            .connect_timeout(connect_timeout)
            .timeout(connect_timeout)
            .danger_accept_invalid_certs(trust_all)
            .danger_accept_invalid_hostnames(trust_all);
        builder.build()
    }
}
