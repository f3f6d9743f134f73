use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct TlsConfig {
    /// Accept any certificate/hostname from origin servers. Opt-in only,
    /// intended for local testing against self-signed origins — never the
    /// default.
    #[serde(default)]
    pub trust_all: bool,
}
