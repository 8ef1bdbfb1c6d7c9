//! Error types for cidrsift.

use thiserror::Error;

/// Error type for cidrsift operations.
///
/// Only input fetching, configuration and output writing surface here.
/// Malformed lines and failed lookups degrade to counts and empty results.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport error while fetching an input
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Input source answered with a non-success status
    #[error("fetching {url} failed with HTTP status {status}")]
    HttpStatus { url: String, status: u16 },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// GeoIP database could not be read
    #[error("GeoIP database error: {0}")]
    GeoIp(String),

    /// Atomic output file could not be moved into place
    #[error("failed to persist output file: {0}")]
    Persist(#[from] tempfile::PersistError),

    /// Run was cancelled before completion
    #[error("run cancelled")]
    Cancelled,

    /// A resolution task panicked or was aborted
    #[error("resolution task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result type alias for cidrsift operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for prefix parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PrefixError {
    /// Not of the shape `address` or `address/length`
    #[error("malformed CIDR: {0}")]
    Malformed(String),

    /// Address part is not an IPv4 or IPv6 address
    #[error("invalid IP address: {0}")]
    InvalidAddress(String),

    /// Prefix length out of range for the address family
    #[error("invalid prefix length {len} (max {max})")]
    InvalidLength { len: u8, max: u8 },
}

/// Error type for a single resolution attempt.
#[derive(Error, Debug)]
pub enum ResolveError {
    /// Transport-level failure talking to the resolver
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Resolver answered with a non-success HTTP status
    #[error("resolver returned HTTP status {0}")]
    Status(u16),

    /// DNS response code other than NOERROR/NXDOMAIN
    #[error("resolver returned DNS rcode {0}")]
    Rcode(u32),

    /// Response body could not be decoded
    #[error("undecodable response: {0}")]
    Decode(String),

    /// Lookup did not complete in time
    #[error("lookup timed out")]
    Timeout,

    /// System resolver failure
    #[error("lookup failed: {0}")]
    Lookup(#[from] std::io::Error),
}
