//! Aggregated view over the per-type lookups of one name.

use serde::{Deserialize, Serialize};

use super::types::{DnsStatus, Hop, QType, ResolveResult};

/// One per-type lookup as reported in results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySummary {
    #[serde(rename = "type")]
    pub qtype: QType,
    pub status: DnsStatus,
    pub elapsed_ms: u64,
    pub answers: usize,
}

impl From<&ResolveResult> for QuerySummary {
    fn from(result: &ResolveResult) -> Self {
        Self {
            qtype: result.qtype,
            status: result.status,
            elapsed_ms: result.elapsed_ms,
            answers: result.chain.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsSummary {
    pub status: DnsStatus,
    pub chain: Vec<Hop>,
    pub elapsed_ms: u64,
    pub queries: Vec<QuerySummary>,
    /// Status of the first MX/NS target's A lookup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_status: Option<DnsStatus>,
}

impl DnsSummary {
    /// Fold several lookups of the same name.
    ///
    /// Any NOERROR wins, then all-NXDOMAIN, then any TIMEOUT, else SERVFAIL.
    /// An empty slice is treated as SERVFAIL.
    pub fn aggregate(results: &[ResolveResult]) -> Self {
        Self {
            status: aggregate_status(results.iter().map(|r| r.status)),
            chain: results.iter().flat_map(|r| r.chain.iter().cloned()).collect(),
            elapsed_ms: results.iter().map(|r| r.elapsed_ms).sum(),
            queries: results.iter().map(QuerySummary::from).collect(),
            target_status: None,
        }
    }

    /// Number of per-type lookups that did not succeed.
    pub fn failed_queries(&self) -> u32 {
        let failed = self
            .queries
            .iter()
            .filter(|query| query.status != DnsStatus::NoError)
            .count();
        u32::try_from(failed).unwrap_or(u32::MAX)
    }

    /// True when every lookup answered NXDOMAIN.
    pub fn all_nxdomain(&self) -> bool {
        !self.queries.is_empty()
            && self
                .queries
                .iter()
                .all(|query| query.status == DnsStatus::NxDomain)
    }

    pub fn hops(&self, qtype: QType) -> impl Iterator<Item = &Hop> {
        self.chain.iter().filter(move |hop| hop.is(qtype))
    }
}

pub fn aggregate_status(statuses: impl IntoIterator<Item = DnsStatus>) -> DnsStatus {
    let statuses: Vec<_> = statuses.into_iter().collect();
    if statuses.contains(&DnsStatus::NoError) {
        DnsStatus::NoError
    } else if !statuses.is_empty() && statuses.iter().all(|s| *s == DnsStatus::NxDomain) {
        DnsStatus::NxDomain
    } else if statuses.contains(&DnsStatus::Timeout) {
        DnsStatus::Timeout
    } else {
        DnsStatus::ServFail
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(qtype: QType, status: DnsStatus, chain: Vec<Hop>, elapsed_ms: u64) -> ResolveResult {
        ResolveResult {
            chain,
            ..ResolveResult::empty("www.example.com", qtype, status, elapsed_ms)
        }
    }

    #[test]
    fn should_prefer_noerror() {
        let summary = DnsSummary::aggregate(&[
            result(QType::A, DnsStatus::NxDomain, vec![], 10),
            result(QType::Txt, DnsStatus::NoError, vec![Hop::new("TXT", "\"x\"", Some(60))], 15),
            result(QType::Aaaa, DnsStatus::Timeout, vec![], 20),
        ]);
        assert_eq!(summary.status, DnsStatus::NoError);
        assert_eq!(summary.elapsed_ms, 45);
        assert_eq!(summary.chain.len(), 1);
        assert_eq!(summary.failed_queries(), 2);
        assert!(!summary.all_nxdomain());
    }

    #[test]
    fn should_report_nxdomain_only_when_unanimous() {
        let all = DnsSummary::aggregate(&[
            result(QType::A, DnsStatus::NxDomain, vec![], 1),
            result(QType::Aaaa, DnsStatus::NxDomain, vec![], 1),
        ]);
        assert_eq!(all.status, DnsStatus::NxDomain);
        assert!(all.all_nxdomain());

        let mixed = DnsSummary::aggregate(&[
            result(QType::A, DnsStatus::NxDomain, vec![], 1),
            result(QType::Aaaa, DnsStatus::Timeout, vec![], 1),
        ]);
        assert_eq!(mixed.status, DnsStatus::Timeout);
    }

    #[test]
    fn should_fall_back_to_servfail() {
        assert_eq!(
            aggregate_status([DnsStatus::NxDomain, DnsStatus::ServFail]),
            DnsStatus::ServFail
        );
        assert_eq!(aggregate_status([]), DnsStatus::ServFail);
    }

    #[test]
    fn should_serialize_queries_in_camel_case() {
        let summary = DnsSummary::aggregate(&[result(QType::Mx, DnsStatus::NoError, vec![], 7)]);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["queries"][0]["type"], "MX");
        assert_eq!(json["queries"][0]["elapsedMs"], 7);
        assert!(json.get("targetStatus").is_none());
    }
}
