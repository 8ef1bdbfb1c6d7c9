//! YAML run configuration.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::aggregate::AggregateOptions;
use crate::classify::{ClassifierConfig, RetryPolicy, Schedule};
use crate::pipeline::{AggregateJob, CidrSource, ClassifyJob};
use crate::resolver::{preset_endpoint, DohResolver, RecordType, Resolver, SystemResolver};
use crate::{Error, Result};

/// One resolver backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ResolverConfig {
    /// JSON DNS-over-HTTPS, by explicit endpoint or preset name
    Doh {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        endpoint: Option<String>,
        #[serde(default)]
        preset: Option<String>,
    },
    /// The operating system resolver
    System,
}

impl ResolverConfig {
    /// Parse a command-line resolver spec: `system`, a preset name, or a URL.
    pub fn parse_spec(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        if spec.eq_ignore_ascii_case("system") {
            return Ok(ResolverConfig::System);
        }
        if spec.starts_with("https://") || spec.starts_with("http://") {
            return Ok(ResolverConfig::Doh {
                name: None,
                endpoint: Some(spec.to_string()),
                preset: None,
            });
        }
        if preset_endpoint(spec).is_some() {
            return Ok(ResolverConfig::Doh {
                name: Some(spec.to_lowercase()),
                endpoint: None,
                preset: Some(spec.to_string()),
            });
        }
        Err(Error::Config(format!(
            "unknown resolver {:?} (expected system, a preset or a DoH URL)",
            spec
        )))
    }

    /// Instantiate the backend.
    pub fn build(&self, timeout: Duration, record_types: &[RecordType]) -> Result<Arc<dyn Resolver>> {
        match self {
            ResolverConfig::System => Ok(Arc::new(SystemResolver::new(timeout))),
            ResolverConfig::Doh {
                name,
                endpoint,
                preset,
            } => {
                let endpoint = match (endpoint, preset) {
                    (Some(endpoint), _) => endpoint.clone(),
                    (None, Some(preset)) => preset_endpoint(preset)
                        .ok_or_else(|| Error::Config(format!("unknown DoH preset {:?}", preset)))?
                        .to_string(),
                    (None, None) => {
                        return Err(Error::Config(
                            "doh resolver needs an endpoint or a preset".to_string(),
                        ))
                    }
                };
                let name = name.clone().or_else(|| preset.clone()).unwrap_or_else(|| endpoint.clone());
                let resolver = DohResolver::new(&name, &endpoint, timeout)?
                    .with_record_types(record_types.to_vec());
                Ok(Arc::new(resolver))
            }
        }
    }
}

/// Default resolvers: two public DoH providers sharing the load.
pub fn default_resolvers() -> Vec<ResolverConfig> {
    ["dns.sb", "google"]
        .iter()
        .map(|preset| ResolverConfig::Doh {
            name: Some(preset.to_string()),
            endpoint: None,
            preset: Some(preset.to_string()),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            attempts: policy.attempts,
            backoff_ms: policy.backoff.as_millis() as u64,
        }
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(config: RetryConfig) -> Self {
        RetryPolicy {
            attempts: config.attempts,
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }
}

/// Sources of one label: a single source or a list of them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "OneOrMany")]
pub struct CidrSources(pub Vec<CidrSource>);

// `Many` first: a two-element list would otherwise also fit a GeoIP source.
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<CidrSource>),
    One(CidrSource),
}

impl From<OneOrMany> for CidrSources {
    fn from(value: OneOrMany) -> Self {
        match value {
            OneOrMany::One(source) => CidrSources(vec![source]),
            OneOrMany::Many(sources) => CidrSources(sources),
        }
    }
}

/// Rule-list exclusion settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExcludeConfig {
    /// Rule lists to filter
    pub rules: Vec<String>,
    /// Extra matched lists; the run's own classification is always included
    #[serde(default)]
    pub matched: Vec<String>,
    /// Rules kept even when matched
    #[serde(default)]
    pub keep: Vec<String>,
    /// Output file, relative to `output_dir`
    pub output: PathBuf,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_true() -> bool {
    true
}

fn default_rate() -> f64 {
    10.0
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_record_types() -> Vec<RecordType> {
    RecordType::all()
}

fn default_stem() -> String {
    "matched".to_string()
}

/// Complete run configuration, as loaded from YAML.
///
/// ```yaml
/// output_dir: out
/// cidrs:
///   cloudflare: [https://example.org/cloudflare.txt]
///   HK: { mmdb: Country.mmdb, country: HK }
/// domains: [Global.list]
/// resolvers:
///   - { kind: doh, preset: google }
///   - { kind: system }
/// schedule: { mode: pool, workers: 32 }
/// rate_per_second: 10
/// retry: { attempts: 3, backoff_ms: 500 }
/// exclude:
///   rules: [Global.list]
///   keep: [gfw.list]
///   output: cloudflare_gfw.list
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_true")]
    pub merge_adjacent: bool,
    /// Label -> CIDR sources (paths, URLs or GeoIP countries)
    #[serde(default)]
    pub cidrs: BTreeMap<String, CidrSources>,
    /// Domain list sources (paths or URLs)
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default = "default_resolvers")]
    pub resolvers: Vec<ResolverConfig>,
    #[serde(default)]
    pub schedule: Schedule,
    #[serde(default = "default_rate")]
    pub rate_per_second: f64,
    #[serde(default)]
    pub burst: Option<f64>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_record_types")]
    pub record_types: Vec<RecordType>,
    /// File stem for classification outputs
    #[serde(default = "default_stem")]
    pub stem: String,
    #[serde(default)]
    pub exclude: Option<ExcludeConfig>,
}

impl Config {
    /// Load a configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(text)?;
        config.classifier().validate()?;
        Ok(config)
    }

    pub(crate) fn options(&self) -> AggregateOptions {
        AggregateOptions {
            merge_adjacent: self.merge_adjacent,
        }
    }

    pub(crate) fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Classifier settings from this configuration.
    pub fn classifier(&self) -> ClassifierConfig {
        ClassifierConfig {
            schedule: self.schedule,
            rate_per_second: self.rate_per_second,
            burst: self.burst,
            retry: self.retry.into(),
        }
    }

    /// Label -> sources, flattened.
    pub fn cidr_labels(&self) -> BTreeMap<String, Vec<CidrSource>> {
        self.cidrs
            .iter()
            .map(|(label, sources)| (label.clone(), sources.0.clone()))
            .collect()
    }

    /// Job aggregating every configured label.
    pub fn aggregate_job(&self) -> AggregateJob {
        AggregateJob {
            sources: self.cidr_labels(),
            options: self.options(),
            output_dir: self.output_dir.clone(),
            timeout: self.timeout(),
        }
    }

    /// Job classifying the configured domains against all configured CIDRs.
    pub fn classify_job(&self) -> ClassifyJob {
        ClassifyJob {
            cidr_sources: self.cidrs.values().flat_map(|s| s.0.iter().cloned()).collect(),
            domain_sources: self.domains.clone(),
            resolvers: self.resolvers.clone(),
            record_types: self.record_types.clone(),
            classifier: self.classifier(),
            options: self.options(),
            output_dir: self.output_dir.clone(),
            stem: self.stem.clone(),
            timeout: self.timeout(),
        }
    }
}
