//! Probe options and results.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default bound on a whole probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default number of redirects followed.
pub const DEFAULT_MAX_REDIRECTS: usize = 5;

/// Method used for the first request of a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeMethod {
    #[default]
    Head,
    Get,
}

impl From<ProbeMethod> for reqwest::Method {
    fn from(value: ProbeMethod) -> Self {
        match value {
            ProbeMethod::Head => Self::HEAD,
            ProbeMethod::Get => Self::GET,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProbeOptions {
    pub timeout: Duration,
    pub max_redirects: usize,
    pub method: ProbeMethod,
    pub user_agent: Option<String>,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_PROBE_TIMEOUT,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            method: ProbeMethod::Head,
            user_agent: None,
        }
    }
}

/// One followed redirect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectHop {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

/// What the TLS handshake revealed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alpn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sni: Option<String>,
}

/// Failure class of a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeErrorType {
    Timeout,
    Dns,
    Tls,
    Net,
    Http4xx,
    Http5xx,
    Unknown,
}

impl ProbeErrorType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Dns => "dns",
            Self::Tls => "tls",
            Self::Net => "net",
            Self::Http4xx => "http4xx",
            Self::Http5xx => "http5xx",
            Self::Unknown => "unknown",
        }
    }

    /// Classify a final HTTP status that did not count as reachable.
    pub const fn from_status(status: u16) -> Self {
        if status >= 500 { Self::Http5xx } else { Self::Http4xx }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default)]
    pub redirects: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<RedirectHop>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ProbeErrorType>,
}

impl ProbeResult {
    /// A probe that never got a response.
    pub fn failed(error_type: ProbeErrorType, elapsed_ms: u64) -> Self {
        Self {
            ok: false,
            status: None,
            redirects: 0,
            final_url: None,
            elapsed_ms,
            history: Vec::new(),
            tls: None,
            error_type: Some(error_type),
        }
    }

    /// A probe that ended on `status` at `url` without redirects.
    pub fn with_status(url: impl Into<String>, status: u16, elapsed_ms: u64) -> Self {
        let ok = status < 400;
        Self {
            ok,
            status: Some(status),
            redirects: 0,
            final_url: Some(url.into()),
            elapsed_ms,
            history: Vec::new(),
            tls: None,
            error_type: (!ok).then(|| ProbeErrorType::from_status(status)),
        }
    }

    /// Tag used when counting failures in a batch report.
    pub fn error_tag(&self) -> Option<&'static str> {
        if self.ok {
            return None;
        }
        Some(self.error_type.map_or("unknown", ProbeErrorType::as_str))
    }
}
