//! DoH query and answer types.

use std::fmt;
use std::str::FromStr;

use hickory_proto::op::ResponseCode;
use hickory_proto::rr::RecordType;
use serde::{Deserialize, Serialize};

/// Record types the auditor knows how to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QType {
    A,
    Aaaa,
    Cname,
    Txt,
    Srv,
    Caa,
    Mx,
    Ns,
    Ptr,
}

impl QType {
    pub const ALL: [Self; 9] = [
        Self::A,
        Self::Aaaa,
        Self::Cname,
        Self::Txt,
        Self::Srv,
        Self::Caa,
        Self::Mx,
        Self::Ns,
        Self::Ptr,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::Aaaa => "AAAA",
            Self::Cname => "CNAME",
            Self::Txt => "TXT",
            Self::Srv => "SRV",
            Self::Caa => "CAA",
            Self::Mx => "MX",
            Self::Ns => "NS",
            Self::Ptr => "PTR",
        }
    }

    /// MX and NS answers point at other names.
    pub const fn is_referential(self) -> bool {
        matches!(self, Self::Mx | Self::Ns)
    }
}

impl From<QType> for RecordType {
    fn from(value: QType) -> Self {
        match value {
            QType::A => Self::A,
            QType::Aaaa => Self::AAAA,
            QType::Cname => Self::CNAME,
            QType::Txt => Self::TXT,
            QType::Srv => Self::SRV,
            QType::Caa => Self::CAA,
            QType::Mx => Self::MX,
            QType::Ns => Self::NS,
            QType::Ptr => Self::PTR,
        }
    }
}

impl TryFrom<RecordType> for QType {
    type Error = RecordType;

    fn try_from(value: RecordType) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|qtype| RecordType::from(*qtype) == value)
            .ok_or(value)
    }
}

impl fmt::Display for QType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unsupported record type name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported record type: {0:?}")]
pub struct UnknownQType(pub String);

impl FromStr for QType {
    type Err = UnknownQType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|qtype| qtype.as_str() == upper)
            .ok_or(UnknownQType(s.to_string()))
    }
}

/// Name of a numeric answer type as it appears in a resolution chain.
///
/// Known types use their mnemonic, anything else its decimal code.
pub fn type_name(code: u16) -> String {
    QType::try_from(RecordType::from(code))
        .map(|qtype| qtype.as_str().to_string())
        .unwrap_or_else(|_| code.to_string())
}

/// Outcome class of a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DnsStatus {
    #[serde(rename = "NOERROR")]
    NoError,
    #[serde(rename = "NXDOMAIN")]
    NxDomain,
    #[serde(rename = "SERVFAIL")]
    ServFail,
    #[serde(rename = "TIMEOUT")]
    Timeout,
}

impl DnsStatus {
    /// Map a DoH `Status` field.
    pub fn from_doh_code(code: u16) -> Self {
        let rcode: ResponseCode = code.into();
        match rcode {
            ResponseCode::NoError => Self::NoError,
            ResponseCode::NXDomain => Self::NxDomain,
            _ => Self::ServFail,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoError => "NOERROR",
            Self::NxDomain => "NXDOMAIN",
            Self::ServFail => "SERVFAIL",
            Self::Timeout => "TIMEOUT",
        }
    }

    /// NXDOMAIN and TIMEOUT mark a name as gone or unreachable.
    pub const fn is_dead(self) -> bool {
        matches!(self, Self::NxDomain | Self::Timeout)
    }

    pub const fn is_failure(self) -> bool {
        matches!(self, Self::ServFail | Self::Timeout)
    }
}

impl fmt::Display for DnsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One answer record in a resolution chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hop {
    #[serde(rename = "type")]
    pub record_type: String,
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
}

impl Hop {
    pub fn new(record_type: impl Into<String>, data: impl Into<String>, ttl: Option<u32>) -> Self {
        Self {
            record_type: record_type.into(),
            data: data.into(),
            ttl,
        }
    }

    pub fn is(&self, qtype: QType) -> bool {
        self.record_type.eq_ignore_ascii_case(qtype.as_str())
    }

    pub fn is_address(&self) -> bool {
        self.is(QType::A) || self.is(QType::Aaaa)
    }
}

/// A single name/type lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolveQuery {
    pub qname: String,
    pub qtype: QType,
}

/// Classified result of one DoH lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveResult {
    pub qname: String,
    pub qtype: QType,
    pub status: DnsStatus,
    #[serde(default)]
    pub chain: Vec<Hop>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ad: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cd: Option<bool>,
    pub elapsed_ms: u64,
}

impl ResolveResult {
    /// A result with an empty chain, used for failures and tests.
    pub fn empty(qname: impl Into<String>, qtype: QType, status: DnsStatus, elapsed_ms: u64) -> Self {
        Self {
            qname: qname.into(),
            qtype,
            status,
            chain: Vec::new(),
            ad: None,
            cd: None,
            elapsed_ms,
        }
    }

    /// Smallest TTL across the chain, if any hop carries one.
    pub fn min_ttl(&self) -> Option<u32> {
        min_ttl(&self.chain)
    }
}

/// Smallest TTL across a chain, if any hop carries one.
pub fn min_ttl(chain: &[Hop]) -> Option<u32> {
    chain.iter().filter_map(|hop| hop.ttl).min()
}
