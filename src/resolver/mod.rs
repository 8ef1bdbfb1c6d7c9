//! Name resolution backends.
//!
//! A [`Resolver`] turns a domain name into a set of addresses. The classifier
//! treats every backend the same way: it rate-limits calls, retries failures
//! a bounded number of times and records exhaustion as "no addresses".

mod doh;
mod system;

pub use doh::DohResolver;
pub use system::SystemResolver;

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;

use crate::error::ResolveError;

/// A name resolution capability.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Resolve `domain` to the addresses it currently points at.
    ///
    /// An empty set is a valid answer (NXDOMAIN, no records). Errors are
    /// transient failures the caller may retry.
    async fn resolve(&self, domain: &str) -> Result<BTreeSet<IpAddr>, ResolveError>;
}

/// DNS record types queried for addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum RecordType {
    A,
    #[serde(rename = "AAAA")]
    Aaaa,
}

impl RecordType {
    /// Query-string name of the type.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
        }
    }

    /// Numeric RR type as it appears in JSON answers.
    pub fn code(&self) -> u16 {
        match self {
            RecordType::A => 1,
            RecordType::Aaaa => 28,
        }
    }

    /// Parse a record type (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "A" => Some(RecordType::A),
            "AAAA" => Some(RecordType::Aaaa),
            _ => None,
        }
    }

    /// Both address record types.
    pub fn all() -> Vec<RecordType> {
        vec![RecordType::A, RecordType::Aaaa]
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Well-known JSON DNS-over-HTTPS endpoints.
pub const DOH_PRESETS: &[(&str, &str)] = &[
    ("cloudflare", "https://cloudflare-dns.com/dns-query"),
    ("google", "https://dns.google/resolve"),
    ("dns.sb", "https://doh.sb/dns-query"),
];

/// Look up a preset endpoint by name.
pub fn preset_endpoint(name: &str) -> Option<&'static str> {
    let name = name.trim().to_lowercase();
    let name = if name == "sb" { "dns.sb" } else { name.as_str() };
    DOH_PRESETS
        .iter()
        .find(|(preset, _)| *preset == name)
        .map(|(_, endpoint)| *endpoint)
}
