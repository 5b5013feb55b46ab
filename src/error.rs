//! Error types for dnsweeper.
//!
//! Only batch-fatal conditions surface as [`Error`]. Per-domain network
//! failures are folded into classified results and never reach this type.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Main error type for dnsweeper operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("ruleset error: {0}")]
    Ruleset(#[from] RulesetError),

    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("metrics error: {0}")]
    Metrics(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[source] io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
}

/// Validation errors for configuration values.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("analyze.concurrency must be greater than 0")]
    ZeroConcurrency,

    #[error("analyze.timeoutMs must be greater than 0")]
    ZeroTimeout,

    #[error("analyze.dnsTimeoutMs must be greater than 0")]
    ZeroDnsTimeout,

    #[error("analyze.progressIntervalMs must be at least 200")]
    ProgressIntervalTooShort,

    #[error("analyze.snapshotEvery must be greater than 0")]
    ZeroSnapshotEvery,

    #[error("analyze.dnsTypes must name at least one record type")]
    EmptyDnsTypes,

    #[error("analyze.dohEndpoint must start with http:// or https://: {0:?}")]
    InvalidDohEndpoint(String),

    #[error("cache.maxEntries must be greater than 0")]
    ZeroCacheEntries,

    #[error("cache.ttlMs must be greater than 0")]
    ZeroCacheTtl,

    #[error("risk.nxdomainSubMin ({min}) must not exceed risk.nxdomainSubMax ({max})")]
    NxdomainRange { min: u32, max: u32 },
}

/// Errors raised while loading a ruleset overlay.
#[derive(Debug, Error)]
pub enum RulesetError {
    #[error("failed to read ruleset {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse ruleset {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid regex {pattern:?} in ruleset {name:?}")]
    InvalidRegex {
        name: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Errors raised while reading a resume snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to read snapshot {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed snapshot {path:?}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;
