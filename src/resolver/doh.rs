//! JSON DNS-over-HTTPS resolver.

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::time::Duration;

use super::{RecordType, Resolver};
use crate::error::ResolveError;

const DNS_JSON: &str = "application/dns-json";
const RCODE_NOERROR: u32 = 0;
const RCODE_NXDOMAIN: u32 = 3;

/// JSON DNS response body (`application/dns-json`).
#[derive(Debug, Deserialize)]
struct DnsJsonResponse {
    #[serde(rename = "Status", default)]
    status: u32,
    #[serde(rename = "Answer", default)]
    answer: Vec<DnsJsonAnswer>,
}

#[derive(Debug, Deserialize)]
struct DnsJsonAnswer {
    #[serde(rename = "type")]
    record_type: u16,
    #[serde(default)]
    data: String,
}

/// Resolver querying a JSON DoH endpoint such as `https://dns.google/resolve`.
///
/// Each lookup issues one GET per configured record type with `name` and
/// `type` query parameters. Only A/AAAA answers whose data parses as an
/// address are kept; CNAME chains in the answer section are ignored. If one
/// record type fails, the addresses of the others are still returned.
///
/// # Examples
/// ```no_run
/// use cidrsift::resolver::DohResolver;
/// use std::time::Duration;
///
/// let resolver = DohResolver::new("google", "https://dns.google/resolve", Duration::from_secs(5))?;
/// # Ok::<(), cidrsift::Error>(())
/// ```
pub struct DohResolver {
    name: String,
    endpoint: String,
    record_types: Vec<RecordType>,
    client: reqwest::Client,
}

impl DohResolver {
    /// Create a resolver with its own HTTP client.
    pub fn new(name: &str, endpoint: &str, timeout: Duration) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("cidrsift/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(name, endpoint, client))
    }

    /// Create a resolver sharing an existing HTTP client.
    pub fn with_client(name: &str, endpoint: &str, client: reqwest::Client) -> Self {
        Self {
            name: name.to_string(),
            endpoint: endpoint.to_string(),
            record_types: RecordType::all(),
            client,
        }
    }

    /// Restrict which record types are queried (A and AAAA by default).
    pub fn with_record_types(mut self, record_types: Vec<RecordType>) -> Self {
        if !record_types.is_empty() {
            self.record_types = record_types;
        }
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn query(&self, domain: &str, record_type: RecordType) -> Result<Vec<IpAddr>, ResolveError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("name", domain), ("type", record_type.as_str())])
            .header(ACCEPT, DNS_JSON)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResolveError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        extract_addresses(&body, record_type)
    }
}

/// Decode a JSON DNS body and collect addresses of the requested type.
fn extract_addresses(body: &[u8], record_type: RecordType) -> Result<Vec<IpAddr>, ResolveError> {
    let response: DnsJsonResponse =
        serde_json::from_slice(body).map_err(|e| ResolveError::Decode(e.to_string()))?;

    match response.status {
        RCODE_NOERROR => {}
        RCODE_NXDOMAIN => return Ok(Vec::new()),
        rcode => return Err(ResolveError::Rcode(rcode)),
    }

    Ok(response
        .answer
        .iter()
        .filter(|answer| answer.record_type == record_type.code())
        .filter_map(|answer| answer.data.trim().parse::<IpAddr>().ok())
        .collect())
}

#[async_trait]
impl Resolver for DohResolver {
    fn name(&self) -> &str {
        &self.name
    }

    /// Query every record type and union the answers.
    ///
    /// A failed type does not discard the others: the lookup fails only when
    /// no record type could be answered.
    async fn resolve(&self, domain: &str) -> Result<BTreeSet<IpAddr>, ResolveError> {
        let mut addresses = BTreeSet::new();
        let mut answered = false;
        let mut last_error = None;
        for &record_type in &self.record_types {
            match self.query(domain, record_type).await {
                Ok(found) => {
                    answered = true;
                    addresses.extend(found);
                }
                Err(e) => {
                    log::debug!("{}: {} query for {} failed: {}", self.name, record_type, domain, e);
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) if !answered => Err(e),
            _ => Ok(addresses),
        }
    }
}
