//! DNS-over-HTTPS resolution.

pub mod resolver;
pub mod stats;
pub mod summary;
pub mod types;

pub use resolver::{DnsResolver, DohOptions, DohResolver, backoff_delay};
pub use stats::{DohStats, StatsCollector};
pub use summary::{DnsSummary, QuerySummary, aggregate_status};
pub use types::{DnsStatus, Hop, QType, ResolveQuery, ResolveResult, UnknownQType, min_ttl, type_name};
