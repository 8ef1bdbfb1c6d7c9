//! Operating-system resolver backend.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::io;
use std::net::IpAddr;
use std::time::Duration;

use super::Resolver;
use crate::error::ResolveError;

/// Resolver delegating to the host's resolver through `getaddrinfo`.
///
/// A name that does not exist resolves to no addresses, like an NXDOMAIN
/// answer from a DoH backend. Other lookup failures are retryable errors.
#[derive(Debug, Clone)]
pub struct SystemResolver {
    timeout: Duration,
}

impl SystemResolver {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl Resolver for SystemResolver {
    fn name(&self) -> &str {
        "system"
    }

    async fn resolve(&self, domain: &str) -> Result<BTreeSet<IpAddr>, ResolveError> {
        let lookup = tokio::time::timeout(self.timeout, tokio::net::lookup_host((domain, 0)))
            .await
            .map_err(|_| ResolveError::Timeout)?;
        match lookup {
            Ok(addrs) => Ok(addrs.map(|addr| addr.ip()).collect()),
            Err(e) if is_nonexistent(&e) => {
                log::debug!("system: {} does not exist: {}", domain, e);
                Ok(BTreeSet::new())
            }
            Err(e) => Err(ResolveError::Lookup(e)),
        }
    }
}

/// Whether a lookup error means the name has no addresses (`EAI_NONAME`,
/// `EAI_NODATA`, `WSAHOST_NOT_FOUND`) rather than a transient failure.
///
/// tokio reports `getaddrinfo` failures as `io::ErrorKind::Other` with the
/// `gai_strerror` text, so the message is the only signal.
fn is_nonexistent(err: &io::Error) -> bool {
    const NONEXISTENT: [&str; 4] = [
        "Name or service not known",
        "nodename nor servname provided",
        "No address associated with hostname",
        "No such host is known",
    ];
    if err.raw_os_error() == Some(11001) && cfg!(windows) {
        return true;
    }
    let message = err.to_string();
    NONEXISTENT.iter().any(|text| message.contains(text))
}
