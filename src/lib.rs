//! cidrsift - canonical CIDR aggregation and domain classification.
//!
//! This crate answers two questions about network lists:
//!
//! 1. Given many overlapping CIDRs, what is the smallest non-overlapping set
//!    of prefixes covering exactly the same addresses?
//! 2. Given many domain names, which of them currently resolve into that set?
//!
//! # Features
//!
//! - **Canonical prefixes**: IPv4 and IPv6 prefixes as fixed-width integers
//! - **Aggregation**: duplicate and subset removal, optional sibling merging
//! - **Classification**: concurrent resolution through pluggable backends
//! - **Rate limiting**: one token bucket per resolver backend
//! - **Bounded retries**: failed lookups degrade to "no addresses"
//! - **GeoIP sources**: per-country networks from MaxMind `.mmdb` files
//! - **Rule exclusion**: drop classified rules from a larger rule list
//!
//! # Quick Start
//!
//! ```
//! use cidrsift::{aggregate, AggregateOptions};
//!
//! let result = aggregate(
//!     ["1.1.1.0/24", "1.1.1.0/25", "1.1.2.0/24"],
//!     AggregateOptions { merge_adjacent: false },
//! );
//! assert_eq!(result.set.to_lines(), vec!["1.1.1.0/24", "1.1.2.0/24"]);
//! assert!(result.set.is_member("1.1.1.200".parse().unwrap()));
//! ```
//!
//! # Classification
//!
//! ```ignore
//! use cidrsift::{Classifier, ClassifierConfig, Schedule};
//! use cidrsift::resolver::{DohResolver, Resolver};
//! use std::sync::Arc;
//!
//! let resolvers: Vec<Arc<dyn Resolver>> = vec![
//!     Arc::new(DohResolver::new("sb", "https://doh.sb/dns-query", timeout)?),
//!     Arc::new(DohResolver::new("google", "https://dns.google/resolve", timeout)?),
//! ];
//! let config = ClassifierConfig { schedule: Schedule::Sharded, ..Default::default() };
//! let result = Classifier::new(config)
//!     .classify(domains, Arc::new(prefixes), resolvers)
//!     .await?;
//! for outcome in result.matched() {
//!     println!("{}", outcome.domain.to_rule_line());
//! }
//! ```
//!
//! # Input Formats
//!
//! - **CIDR lists**: one CIDR or bare address per line, `#` comments,
//!   Clash `IP-CIDR,<cidr>` lines
//! - **GeoIP databases**: MaxMind country `.mmdb`, selected by ISO code
//! - **Domain lists**: `DOMAIN,<name>`, `DOMAIN-SUFFIX,<name>` or bare names

mod error;
mod limiter;

pub mod aggregate;
pub mod classify;
pub mod config;
pub mod exclude;
pub mod fetch;
pub mod geoip;
pub mod input;
pub mod output;
pub mod pipeline;
pub mod prefix;
pub mod resolver;

// Re-export core types
pub use error::{Error, PrefixError, ResolveError, Result};
pub use limiter::TokenBucket;
pub use prefix::{Family, Prefix, PrefixSet};

// Re-export aggregation and classification entry points
pub use aggregate::{aggregate, aggregate_labeled, AggregateOptions, AggregateStats, Aggregation};
pub use classify::{
    Classification, ClassificationOutcome, Classifier, ClassifierConfig, ClassifyStats,
    RetryPolicy, Schedule,
};
pub use input::{parse_cidr_lines, parse_domain_lines, DomainEntry, DomainList};

// Re-export configuration and pipeline
pub use config::{Config, ResolverConfig};
pub use exclude::{exclude_rules, Exclusion};
pub use pipeline::{
    run_aggregate, run_classify, run_config, run_exclude, AggregateJob, CidrSource, ClassifyJob,
    ExcludeJob,
};
