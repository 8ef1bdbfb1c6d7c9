//! Concurrent, rate-limited domain classification against a prefix set.
//!
//! Every domain is resolved exactly once by exactly one resolver. Work is
//! either sharded into one contiguous chunk per resolver, or pulled from a
//! shared queue by a fixed pool of workers. Each resolver has its own
//! [`TokenBucket`]; the [`PrefixSet`] is shared read-only. Outcomes flow to a
//! single collector and are sorted by name once all tasks finish.

use ahash::AHashSet;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::{BTreeSet, VecDeque};
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::input::DomainEntry;
use crate::limiter::TokenBucket;
use crate::prefix::PrefixSet;
use crate::resolver::Resolver;
use crate::{Error, Result};

/// How domains are distributed over resolvers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum Schedule {
    /// One sequential task per resolver, each owning a contiguous chunk.
    #[default]
    Sharded,
    /// A fixed number of workers pulling from a shared queue; worker `i`
    /// uses resolver `i % resolvers`.
    Pool { workers: usize },
}

/// Bounded retry policy for a single domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub attempts: u32,
    /// Pause between attempts
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Slowest accepted rate: one query every 1000 seconds.
pub const MIN_RATE_PER_SECOND: f64 = 0.001;

/// Classifier configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierConfig {
    pub schedule: Schedule,
    /// Queries per second allowed through each resolver
    pub rate_per_second: f64,
    /// Token bucket capacity; defaults to `rate_per_second`
    pub burst: Option<f64>,
    pub retry: RetryPolicy,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            schedule: Schedule::Sharded,
            rate_per_second: 10.0,
            burst: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl ClassifierConfig {
    /// Reject settings that could never make progress.
    pub fn validate(&self) -> Result<()> {
        if !(self.rate_per_second.is_finite() && self.rate_per_second >= MIN_RATE_PER_SECOND) {
            return Err(Error::Config(format!(
                "rate_per_second must be at least {}, got {}",
                MIN_RATE_PER_SECOND, self.rate_per_second
            )));
        }
        if let Some(burst) = self.burst {
            if !(burst.is_finite() && burst >= 1.0) {
                return Err(Error::Config(format!("burst must be at least 1, got {}", burst)));
            }
        }
        if self.retry.attempts == 0 {
            return Err(Error::Config("retry attempts must be at least 1".to_string()));
        }
        if let Schedule::Pool { workers: 0 } = self.schedule {
            return Err(Error::Config("worker pool needs at least one worker".to_string()));
        }
        Ok(())
    }
}

/// Final verdict for one domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationOutcome {
    pub domain: DomainEntry,
    /// Number of distinct addresses the domain resolved to
    pub addresses: usize,
    /// True iff at least one address is inside the prefix set
    pub matched: bool,
}

/// Counters reported for one classification run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassifyStats {
    pub processed: usize,
    pub matched: usize,
    /// Domains that ended with no addresses
    pub unresolved: usize,
}

/// Outcomes sorted by domain name, plus counters.
#[derive(Debug, Clone, Default)]
pub struct Classification {
    pub outcomes: Vec<ClassificationOutcome>,
    pub stats: ClassifyStats,
}

impl Classification {
    /// Matched outcomes in name order.
    pub fn matched(&self) -> impl Iterator<Item = &ClassificationOutcome> {
        self.outcomes.iter().filter(|o| o.matched)
    }
}

/// Check whether any of `addresses` falls inside `prefixes`.
pub fn any_member(addresses: &BTreeSet<IpAddr>, prefixes: &PrefixSet) -> bool {
    addresses.iter().any(|addr| prefixes.is_member(*addr))
}

/// A resolver together with the bucket that paces it.
struct Lane {
    resolver: Arc<dyn Resolver>,
    limiter: TokenBucket,
}

impl Lane {
    /// Resolve with bounded retries; exhaustion yields an empty set.
    async fn resolve(&self, domain: &str, retry: RetryPolicy) -> BTreeSet<IpAddr> {
        for attempt in 1..=retry.attempts {
            self.limiter.acquire().await;
            match self.resolver.resolve(domain).await {
                Ok(addresses) => return addresses,
                Err(e) if attempt < retry.attempts => {
                    log::debug!(
                        "{}: attempt {}/{} for {} failed: {}",
                        self.resolver.name(),
                        attempt,
                        retry.attempts,
                        domain,
                        e
                    );
                    tokio::time::sleep(retry.backoff).await;
                }
                Err(e) => {
                    log::warn!(
                        "{}: giving up on {} after {} attempts: {}",
                        self.resolver.name(),
                        domain,
                        retry.attempts,
                        e
                    );
                }
            }
        }
        BTreeSet::new()
    }

    async fn classify(
        &self,
        entry: DomainEntry,
        prefixes: &PrefixSet,
        retry: RetryPolicy,
    ) -> ClassificationOutcome {
        let addresses = self.resolve(&entry.name, retry).await;
        ClassificationOutcome {
            matched: any_member(&addresses, prefixes),
            addresses: addresses.len(),
            domain: entry,
        }
    }
}

/// Split `items` into exactly `parts` contiguous chunks of `ceil(n / parts)`.
///
/// Trailing chunks may be short or empty.
pub fn shard<T>(items: Vec<T>, parts: usize) -> Vec<Vec<T>> {
    if parts == 0 {
        return Vec::new();
    }
    let size = items.len().div_ceil(parts);
    let mut iter = items.into_iter();
    (0..parts).map(|_| iter.by_ref().take(size).collect()).collect()
}

/// Domain classifier.
///
/// # Examples
/// ```no_run
/// # async fn demo(prefixes: cidrsift::PrefixSet, domains: Vec<cidrsift::DomainEntry>) -> cidrsift::Result<()> {
/// use cidrsift::resolver::{Resolver, SystemResolver};
/// use cidrsift::{Classifier, ClassifierConfig};
/// use std::sync::Arc;
///
/// let resolvers: Vec<Arc<dyn Resolver>> = vec![Arc::new(SystemResolver::default())];
/// let result = Classifier::new(ClassifierConfig::default())
///     .classify(domains, Arc::new(prefixes), resolvers)
///     .await?;
/// println!("{} matched", result.stats.matched);
/// # Ok(())
/// # }
/// ```
pub struct Classifier {
    config: ClassifierConfig,
}

impl Classifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Resolve and classify every domain.
    ///
    /// Dropping the returned future aborts all in-flight resolution tasks
    /// and discards their results.
    pub async fn classify(
        &self,
        domains: Vec<DomainEntry>,
        prefixes: Arc<PrefixSet>,
        resolvers: Vec<Arc<dyn Resolver>>,
    ) -> Result<Classification> {
        self.config.validate()?;
        if resolvers.is_empty() {
            return Err(Error::Config("at least one resolver is required".to_string()));
        }

        let domains = dedup_by_name(domains);
        let total = domains.len();
        let retry = self.config.retry;
        let capacity = self.config.burst.unwrap_or(self.config.rate_per_second);

        let lanes: Vec<Arc<Lane>> = resolvers
            .into_iter()
            .map(|resolver| {
                Arc::new(Lane {
                    resolver,
                    limiter: TokenBucket::with_capacity(self.config.rate_per_second, capacity),
                })
            })
            .collect();

        log::info!(
            "Classifying {} domains with {} resolver(s), {:?}, {}/s per resolver",
            total,
            lanes.len(),
            self.config.schedule,
            self.config.rate_per_second
        );

        let (tx, mut rx) = mpsc::unbounded_channel::<ClassificationOutcome>();
        let mut tasks = JoinSet::new();

        match self.config.schedule {
            Schedule::Sharded => {
                for (lane, chunk) in lanes.iter().zip(shard(domains, lanes.len())) {
                    let lane = lane.clone();
                    let prefixes = prefixes.clone();
                    let tx = tx.clone();
                    tasks.spawn(async move {
                        for entry in chunk {
                            let outcome = lane.classify(entry, &prefixes, retry).await;
                            if tx.send(outcome).is_err() {
                                break;
                            }
                        }
                    });
                }
            }
            Schedule::Pool { workers } => {
                let queue = Arc::new(Mutex::new(VecDeque::from(domains)));
                for worker in 0..workers {
                    let lane = lanes[worker % lanes.len()].clone();
                    let queue = queue.clone();
                    let prefixes = prefixes.clone();
                    let tx = tx.clone();
                    tasks.spawn(async move {
                        loop {
                            let next = queue.lock().pop_front();
                            let Some(entry) = next else { break };
                            let outcome = lane.classify(entry, &prefixes, retry).await;
                            if tx.send(outcome).is_err() {
                                break;
                            }
                        }
                    });
                }
            }
        }
        drop(tx);

        let mut outcomes = Vec::with_capacity(total);
        while let Some(outcome) = rx.recv().await {
            outcomes.push(outcome);
            if outcomes.len() % 500 == 0 {
                log::info!("Resolved {}/{} domains", outcomes.len(), total);
            }
        }
        while let Some(joined) = tasks.join_next().await {
            joined?;
        }

        outcomes.sort_by(|a, b| a.domain.name.cmp(&b.domain.name));

        let stats = ClassifyStats {
            processed: outcomes.len(),
            matched: outcomes.iter().filter(|o| o.matched).count(),
            unresolved: outcomes.iter().filter(|o| o.addresses == 0).count(),
        };
        log::info!(
            "Classification done: {} processed, {} matched, {} unresolved",
            stats.processed,
            stats.matched,
            stats.unresolved
        );

        Ok(Classification { outcomes, stats })
    }

    /// Like [`Classifier::classify`], but abandons the run when `shutdown`
    /// completes first. Partial results are discarded.
    pub async fn classify_until<F>(
        &self,
        domains: Vec<DomainEntry>,
        prefixes: Arc<PrefixSet>,
        resolvers: Vec<Arc<dyn Resolver>>,
        shutdown: F,
    ) -> Result<Classification>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            result = self.classify(domains, prefixes, resolvers) => result,
            _ = shutdown => {
                log::warn!("Classification cancelled, discarding partial results");
                Err(Error::Cancelled)
            }
        }
    }
}

/// Keep the first entry for each name.
fn dedup_by_name(domains: Vec<DomainEntry>) -> Vec<DomainEntry> {
    let mut seen = AHashSet::with_capacity(domains.len());
    domains
        .into_iter()
        .filter(|entry| {
            let fresh = seen.insert(entry.name.clone());
            if !fresh {
                log::debug!("Skipping duplicate domain {}", entry.name);
            }
            fresh
        })
        .collect()
}
