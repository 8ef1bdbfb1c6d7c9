//! End-to-end runs: fetch inputs, aggregate, classify, write outputs.
//!
//! Every run fetches all of its inputs before anything is written. A fetch
//! failure aborts the run with no output; a successful fetch always produces
//! output files, even when nothing matched.

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::aggregate::{aggregate, aggregate_labeled, AggregateOptions, AggregateStats};
use crate::classify::{Classification, Classifier, ClassifierConfig, ClassifyStats};
use crate::config::{Config, ResolverConfig};
use crate::exclude::exclude_rules;
use crate::fetch::{fetch_all, fetch_bytes, fetch_text, http_client};
use crate::geoip::{extract_countries, normalize_country};
use crate::input::{parse_cidr_lines, parse_domain_lines, DomainList};
use crate::output::{render_classification, render_lines, render_prefix_files, write_atomic, write_files};
use crate::resolver::{RecordType, Resolver};
use crate::{Error, Result};

/// Stem of the file holding every label's prefixes combined.
pub const COMBINED_STEM: &str = "all";

/// Where a label's CIDRs come from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum CidrSource {
    /// CIDR list at a path or URL
    List(String),
    /// Networks of one country in a MaxMind `.mmdb` database (path or URL)
    GeoIp { mmdb: String, country: String },
}

impl From<&str> for CidrSource {
    fn from(source: &str) -> Self {
        CidrSource::List(source.to_string())
    }
}

/// Aggregate labelled CIDR sources into canonical prefix files.
#[derive(Debug, Clone)]
pub struct AggregateJob {
    /// Label -> sources
    pub sources: BTreeMap<String, Vec<CidrSource>>,
    pub options: AggregateOptions,
    pub output_dir: PathBuf,
    /// Timeout for each download
    pub timeout: Duration,
}

/// Per-label counts of an aggregate run.
#[derive(Debug, Clone, Default)]
pub struct AggregateSummary {
    pub labels: BTreeMap<String, AggregateStats>,
    /// Counts for all labels aggregated together, when more than one label ran
    pub combined: Option<AggregateStats>,
    pub files: Vec<PathBuf>,
}

/// Classify domain lists against CIDR sources.
#[derive(Debug, Clone)]
pub struct ClassifyJob {
    pub cidr_sources: Vec<CidrSource>,
    pub domain_sources: Vec<String>,
    pub resolvers: Vec<ResolverConfig>,
    pub record_types: Vec<RecordType>,
    pub classifier: ClassifierConfig,
    pub options: AggregateOptions,
    pub output_dir: PathBuf,
    /// File stem for `<stem>.list` and `<stem>.txt`
    pub stem: String,
    /// Timeout for each download and each lookup
    pub timeout: Duration,
}

impl ClassifyJob {
    /// Instantiate the configured resolver backends.
    pub fn build_resolvers(&self) -> Result<Vec<Arc<dyn Resolver>>> {
        self.resolvers
            .iter()
            .map(|config| config.build(self.timeout, &self.record_types))
            .collect()
    }
}

/// Counts of a classify run.
#[derive(Debug, Clone, Default)]
pub struct ClassifySummary {
    pub prefixes: AggregateStats,
    /// Domain lines that could not be used
    pub skipped_domains: usize,
    pub classify: ClassifyStats,
    pub files: Vec<PathBuf>,
}

/// Remove matched rules from a rule list, except those on a keep list.
#[derive(Debug, Clone)]
pub struct ExcludeJob {
    /// Rule list sources to filter
    pub rules: Vec<String>,
    /// Matched rule lists, usually a previous `<stem>.list`
    pub matched: Vec<String>,
    /// Rules that survive even when matched
    pub keep: Vec<String>,
    pub output: PathBuf,
    pub timeout: Duration,
}

/// Counts of an exclude run.
#[derive(Debug, Clone, Default)]
pub struct ExcludeSummary {
    pub kept: usize,
    pub removed: usize,
    pub file: PathBuf,
}

/// Everything a configuration-file run produced.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub aggregate: Option<AggregateSummary>,
    pub classify: Option<ClassifySummary>,
    pub exclude: Option<ExcludeSummary>,
    pub files: Vec<PathBuf>,
}

/// Fetch every label's sources and return raw CIDR candidates per label.
///
/// Each GeoIP database is fetched and walked once, however many labels
/// draw on it.
async fn load_labels(
    client: &reqwest::Client,
    sources: &BTreeMap<String, Vec<CidrSource>>,
) -> Result<BTreeMap<String, Vec<String>>> {
    let mut databases: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
    for source in sources.values().flatten() {
        if let CidrSource::GeoIp { mmdb, country } = source {
            databases
                .entry(mmdb.as_str())
                .or_default()
                .insert(normalize_country(country));
        }
    }

    let mut countries: BTreeMap<&str, BTreeMap<String, Vec<String>>> = BTreeMap::new();
    for (mmdb, codes) in databases {
        let data = fetch_bytes(client, mmdb).await?;
        log::info!("Fetched {} ({} bytes)", mmdb, data.len());
        let codes: Vec<String> = codes.into_iter().collect();
        let extracted = tokio::task::spawn_blocking(move || extract_countries(data, &codes)).await??;
        countries.insert(mmdb, extracted);
    }

    let mut raw = BTreeMap::new();
    for (label, label_sources) in sources {
        let mut cidrs = Vec::new();
        for source in label_sources {
            match source {
                CidrSource::List(source) => {
                    let text = fetch_text(client, source).await?;
                    log::info!("Fetched {} ({} lines)", source, text.lines().count());
                    let (parsed, skipped) = parse_cidr_lines(&text);
                    if skipped > 0 {
                        log::debug!("{}: skipped {} non-CIDR rule lines", label, skipped);
                    }
                    cidrs.extend(parsed);
                }
                CidrSource::GeoIp { mmdb, country } => {
                    let networks = countries
                        .get(mmdb.as_str())
                        .and_then(|extracted| extracted.get(&normalize_country(country)));
                    if let Some(networks) = networks {
                        cidrs.extend(networks.iter().cloned());
                    }
                }
            }
        }
        raw.insert(label.clone(), cidrs);
    }
    Ok(raw)
}

/// Aggregate fetched labels and render their prefix files.
fn render_aggregate(
    raw: &BTreeMap<String, Vec<String>>,
    options: AggregateOptions,
) -> (AggregateSummary, Vec<(String, String)>) {
    let results = aggregate_labeled(raw, options);
    let mut summary = AggregateSummary::default();
    let mut files = Vec::new();
    for (label, result) in &results {
        log::info!(
            "{}: {} prefixes before, {} after aggregation ({} invalid)",
            label,
            result.stats.input,
            result.stats.output,
            result.stats.invalid
        );
        files.extend(render_prefix_files(label, &result.set));
        summary.labels.insert(label.clone(), result.stats);
    }

    if results.len() > 1 {
        let combined = aggregate(raw.values().flatten(), options);
        log::info!(
            "{}: {} prefixes before, {} after aggregation",
            COMBINED_STEM,
            combined.stats.input,
            combined.stats.output
        );
        files.extend(render_prefix_files(COMBINED_STEM, &combined.set));
        summary.combined = Some(combined.stats);
    }

    (summary, files)
}

/// Fetch, aggregate and write every label of `job`.
pub async fn run_aggregate(job: &AggregateJob) -> Result<AggregateSummary> {
    if job.sources.is_empty() {
        return Err(Error::Config("no CIDR sources configured".to_string()));
    }

    let client = http_client(job.timeout)?;
    let raw = load_labels(&client, &job.sources).await?;

    let (mut summary, files) = render_aggregate(&raw, job.options);
    summary.files = write_files(&job.output_dir, &files)?;
    Ok(summary)
}

/// Aggregate fetched CIDRs and classify fetched domains.
async fn classify_loaded<F>(
    classifier: &ClassifierConfig,
    options: AggregateOptions,
    cidrs: &[String],
    domains: DomainList,
    resolvers: Vec<Arc<dyn Resolver>>,
    shutdown: F,
) -> Result<(ClassifySummary, Classification)>
where
    F: Future<Output = ()>,
{
    let aggregated = aggregate(cidrs, options);
    log::info!(
        "Prefixes: {} before, {} after aggregation ({} invalid)",
        aggregated.stats.input,
        aggregated.stats.output,
        aggregated.stats.invalid
    );
    log::info!(
        "Domains: {} unique, {} lines skipped",
        domains.entries.len(),
        domains.skipped
    );

    let result = Classifier::new(classifier.clone())
        .classify_until(domains.entries, Arc::new(aggregated.set), resolvers, shutdown)
        .await?;

    log::info!(
        "Summary: {} domains processed, {} matched, {} unresolved",
        result.stats.processed,
        result.stats.matched,
        result.stats.unresolved
    );

    let summary = ClassifySummary {
        prefixes: aggregated.stats,
        skipped_domains: domains.skipped,
        classify: result.stats,
        files: Vec::new(),
    };
    Ok((summary, result))
}

/// Fetch inputs, classify every domain and write the matched lists.
///
/// `resolvers` are used in place of the job's configured backends. When
/// `shutdown` completes first the run is abandoned and nothing is written.
pub async fn run_classify<F>(
    job: &ClassifyJob,
    resolvers: Vec<Arc<dyn Resolver>>,
    shutdown: F,
) -> Result<ClassifySummary>
where
    F: Future<Output = ()>,
{
    if job.cidr_sources.is_empty() {
        return Err(Error::Config("no CIDR sources configured".to_string()));
    }
    if job.domain_sources.is_empty() {
        return Err(Error::Config("no domain sources configured".to_string()));
    }

    let client = http_client(job.timeout)?;
    let mut labels = BTreeMap::new();
    labels.insert(job.stem.clone(), job.cidr_sources.clone());
    let cidrs = load_labels(&client, &labels).await?.remove(&job.stem).unwrap_or_default();
    let domains = parse_domain_lines(&fetch_all(&client, &job.domain_sources).await?);

    let (mut summary, result) = classify_loaded(
        &job.classifier,
        job.options,
        &cidrs,
        domains,
        resolvers,
        shutdown,
    )
    .await?;

    summary.files = write_files(&job.output_dir, &render_classification(&job.stem, &result))?;
    Ok(summary)
}

/// Fetch the three lists of `job`, filter, and write the surviving rules.
pub async fn run_exclude(job: &ExcludeJob) -> Result<ExcludeSummary> {
    if job.rules.is_empty() {
        return Err(Error::Config("no rule sources configured".to_string()));
    }

    let client = http_client(job.timeout)?;
    let rules = fetch_all(&client, &job.rules).await?;
    let matched = fetch_all(&client, &job.matched).await?;
    let keep = fetch_all(&client, &job.keep).await?;

    let result = exclude_rules(&rules, &matched, &keep);
    log::info!("Exclusion: {} rules kept, {} removed", result.lines.len(), result.removed);

    write_atomic(&job.output, &render_lines(&result.lines))?;
    Ok(ExcludeSummary {
        kept: result.lines.len(),
        removed: result.removed,
        file: job.output.clone(),
    })
}

/// Run everything a configuration file describes.
///
/// All inputs of every stage are fetched first; outputs are written only
/// after aggregation, classification and exclusion have all succeeded.
pub async fn run_config<F>(
    config: &Config,
    resolvers: Vec<Arc<dyn Resolver>>,
    shutdown: F,
) -> Result<RunSummary>
where
    F: Future<Output = ()>,
{
    if config.cidrs.is_empty() && config.exclude.is_none() {
        return Err(Error::Config("nothing to do: no cidrs or exclude configured".to_string()));
    }
    if !config.domains.is_empty() && config.cidrs.is_empty() {
        return Err(Error::Config("domains need at least one CIDR label".to_string()));
    }

    let client = http_client(config.timeout())?;

    let sources = config.cidr_labels();
    let raw = if sources.is_empty() {
        BTreeMap::new()
    } else {
        load_labels(&client, &sources).await?
    };
    let domains = if config.domains.is_empty() {
        None
    } else {
        Some(parse_domain_lines(&fetch_all(&client, &config.domains).await?))
    };
    let exclude_inputs = match &config.exclude {
        Some(exclude) => {
            let rules = fetch_all(&client, &exclude.rules).await?;
            let matched = fetch_all(&client, &exclude.matched).await?;
            let keep = fetch_all(&client, &exclude.keep).await?;
            Some((exclude, rules, matched, keep))
        }
        None => None,
    };

    let mut summary = RunSummary::default();
    let mut files = Vec::new();

    if !raw.is_empty() {
        let (aggregate_summary, rendered) = render_aggregate(&raw, config.options());
        files.extend(rendered);
        summary.aggregate = Some(aggregate_summary);
    }

    let mut matched_rules = String::new();
    if let Some(domains) = domains {
        let cidrs: Vec<String> = raw.values().flatten().cloned().collect();
        let (classify_summary, result) = classify_loaded(
            &config.classifier(),
            config.options(),
            &cidrs,
            domains,
            resolvers,
            shutdown,
        )
        .await?;
        let rendered = render_classification(&config.stem, &result);
        if let Some((_, rules)) = rendered.first() {
            matched_rules = rules.clone();
        }
        files.extend(rendered);
        summary.classify = Some(classify_summary);
    }

    if let Some((exclude, rules, matched, keep)) = exclude_inputs {
        matched_rules.push_str(&matched);
        let result = exclude_rules(&rules, &matched_rules, &keep);
        log::info!("Exclusion: {} rules kept, {} removed", result.lines.len(), result.removed);
        let name = exclude.output.to_string_lossy().into_owned();
        files.push((name, render_lines(&result.lines)));
        summary.exclude = Some(ExcludeSummary {
            kept: result.lines.len(),
            removed: result.removed,
            file: config.output_dir.join(&exclude.output),
        });
    }

    summary.files = write_files(&config.output_dir, &files)?;
    Ok(summary)
}
