//! HTTP/HTTPS reachability probing.

pub mod probe;
pub mod tls;
pub mod types;

pub use probe::{HttpProbe, HttpProber, classify_message};
pub use tls::{TLS_TIMEOUT, issuer_name, tls_info};
pub use types::{
    DEFAULT_MAX_REDIRECTS, DEFAULT_PROBE_TIMEOUT, ProbeErrorType, ProbeMethod, ProbeOptions,
    ProbeResult, RedirectHop, TlsInfo,
};
