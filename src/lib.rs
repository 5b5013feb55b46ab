//! dnsweeper - audit large domain inventories for stale DNS records.
//!
//! Every domain is resolved over DNS-over-HTTPS, probed over HTTPS and HTTP,
//! scored by a rule registry, optionally adjusted by a declarative ruleset
//! and finally classified as `keep`, `review` or `delete`.
//!
//! # Architecture
//!
//! - [`config`]: Configuration loading and validation
//! - [`cache`]: In-memory LRU and persistent append-only answer caches
//! - [`dns`]: DoH resolution, status classification and aggregation
//! - [`http`]: Reachability probing with redirect and TLS introspection
//! - [`risk`]: Weighted rule registry
//! - [`ruleset`]: Declarative risk overlay and ruleset fingerprints
//! - [`sweep`]: Stale-record classification
//! - [`jobs`]: Batch orchestration, pacing, progress and snapshots
//! - [`net`]: Private name and address filters
//! - [`error`]: Error types
//!
//! # Testing
//!
//! The orchestrator is generic over [`dns::DnsResolver`] and
//! [`http::HttpProber`], so whole batches run against in-memory mocks.
//! Rule evaluation needs no network at all:
//!
//! ```rust
//! use dnsweeper::risk::{RiskContext, RiskEngine, RiskLevel};
//!
//! let engine = RiskEngine::default();
//! let item = engine.evaluate(&RiskContext::new("old-backup.example.com"), None);
//! assert_eq!(item.score, 15);
//! assert_eq!(item.level, RiskLevel::Low);
//! ```

pub mod cache;
pub mod config;
pub mod dns;
pub mod error;
pub mod http;
pub mod jobs;
pub mod metrics;
pub mod net;
pub mod risk;
pub mod ruleset;
pub mod sweep;

pub use config::Config;
pub use error::{Error, Result};
