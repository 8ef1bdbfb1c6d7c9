//! cidrsift: CLI for CIDR aggregation and domain classification.

use clap::{Parser, Subcommand};
use cidrsift::classify::{ClassifierConfig, RetryPolicy, Schedule};
use cidrsift::config::default_resolvers;
use cidrsift::pipeline::{
    self, run_aggregate, run_classify, run_exclude, AggregateJob, CidrSource, ClassifyJob,
    ExcludeJob,
};
use cidrsift::resolver::RecordType;
use cidrsift::{AggregateOptions, Config, Error, ResolverConfig};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "cidrsift")]
#[command(author = "Kaitu.io")]
#[command(version = "0.1.0")]
#[command(about = "Aggregate CIDR lists and classify domains against them", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reduce CIDR lists to canonical, non-overlapping prefix files
    Aggregate {
        /// CIDR list sources (paths or URLs)
        #[arg(short, long)]
        input: Vec<String>,

        /// Label used as the output file stem
        #[arg(short, long, default_value = "cidr")]
        label: String,

        /// MaxMind country database (path or URL) for `--country`
        #[arg(long)]
        mmdb: Option<String>,

        /// ISO country code to extract from `--mmdb`; each becomes its own label
        #[arg(long)]
        country: Vec<String>,

        /// Output directory
        #[arg(short, long, default_value = "output")]
        output_dir: PathBuf,

        /// Only remove duplicates and subsets, do not merge siblings
        #[arg(long)]
        no_merge: bool,

        /// Download timeout in milliseconds
        #[arg(long, default_value_t = 30000)]
        timeout_ms: u64,
    },

    /// Resolve domains and keep those pointing into the CIDR lists
    Classify {
        /// CIDR list sources (paths or URLs)
        #[arg(short, long, required = true)]
        cidrs: Vec<String>,

        /// Domain list sources (paths or URLs)
        #[arg(short, long, required = true)]
        domains: Vec<String>,

        /// Resolver: `system`, a preset (cloudflare, google, dns.sb) or a DoH URL
        #[arg(short, long)]
        resolver: Vec<String>,

        /// Use a worker pool of this size instead of one task per resolver
        #[arg(short, long)]
        workers: Option<usize>,

        /// Queries per second per resolver
        #[arg(long, default_value_t = 10.0)]
        rate: f64,

        /// Token bucket capacity (defaults to the rate)
        #[arg(long)]
        burst: Option<f64>,

        /// Attempts per domain
        #[arg(long, default_value_t = 3)]
        attempts: u32,

        /// Pause between attempts in milliseconds
        #[arg(long, default_value_t = 500)]
        backoff_ms: u64,

        /// Per-request timeout in milliseconds
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,

        /// Record types to query (A, AAAA)
        #[arg(long = "record-type", default_values = ["A", "AAAA"])]
        record_types: Vec<String>,

        /// Only remove duplicates and subsets, do not merge siblings
        #[arg(long)]
        no_merge: bool,

        /// Output directory
        #[arg(short, long, default_value = "output")]
        output_dir: PathBuf,

        /// Output file stem
        #[arg(long, default_value = "matched")]
        stem: String,
    },

    /// Drop matched rules from a rule list, except those on a keep list
    Exclude {
        /// Rule list sources to filter (paths or URLs)
        #[arg(short, long, required = true)]
        rules: Vec<String>,

        /// Matched rule lists, such as a `<stem>.list` from `classify`
        #[arg(short, long, required = true)]
        matched: Vec<String>,

        /// Rules kept even when matched
        #[arg(short, long)]
        keep: Vec<String>,

        /// Output rule file
        #[arg(short, long)]
        output: PathBuf,

        /// Download timeout in milliseconds
        #[arg(long, default_value_t = 30000)]
        timeout_ms: u64,
    },

    /// Aggregate, classify and exclude as described by a YAML config file
    Run {
        /// Config file
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Aggregate {
            input,
            label,
            mmdb,
            country,
            output_dir,
            no_merge,
            timeout_ms,
        } => match aggregate_sources(input, label, mmdb, country) {
            Ok(sources) => {
                let job = AggregateJob {
                    sources,
                    options: AggregateOptions {
                        merge_adjacent: !no_merge,
                    },
                    output_dir,
                    timeout: Duration::from_millis(timeout_ms),
                };
                aggregate(&job).await
            }
            Err(e) => Err(e),
        },
        Commands::Classify {
            cidrs,
            domains,
            resolver,
            workers,
            rate,
            burst,
            attempts,
            backoff_ms,
            timeout_ms,
            record_types,
            no_merge,
            output_dir,
            stem,
        } => match build_classify_job(
            cidrs,
            domains,
            resolver,
            workers,
            rate,
            burst,
            RetryPolicy {
                attempts,
                backoff: Duration::from_millis(backoff_ms),
            },
            timeout_ms,
            record_types,
            !no_merge,
            output_dir,
            stem,
        ) {
            Ok(job) => classify(&job).await,
            Err(e) => Err(e),
        },
        Commands::Exclude {
            rules,
            matched,
            keep,
            output,
            timeout_ms,
        } => {
            let job = ExcludeJob {
                rules,
                matched,
                keep,
                output,
                timeout: Duration::from_millis(timeout_ms),
            };
            exclude(&job).await
        }
        Commands::Run { config } => run_config(&config).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Label -> sources for the `aggregate` subcommand.
fn aggregate_sources(
    input: Vec<String>,
    label: String,
    mmdb: Option<String>,
    countries: Vec<String>,
) -> Result<BTreeMap<String, Vec<CidrSource>>, Error> {
    let mut sources = BTreeMap::new();
    if !input.is_empty() {
        sources.insert(label, input.into_iter().map(CidrSource::List).collect());
    }
    if !countries.is_empty() {
        let mmdb = mmdb.ok_or_else(|| Error::Config("--country requires --mmdb".to_string()))?;
        for country in countries {
            let source = CidrSource::GeoIp {
                mmdb: mmdb.clone(),
                country: country.clone(),
            };
            sources.entry(country).or_insert_with(Vec::new).push(source);
        }
    }
    if sources.is_empty() {
        return Err(Error::Config("give --input or --mmdb with --country".to_string()));
    }
    Ok(sources)
}

#[allow(clippy::too_many_arguments)]
fn build_classify_job(
    cidrs: Vec<String>,
    domains: Vec<String>,
    resolver_specs: Vec<String>,
    workers: Option<usize>,
    rate: f64,
    burst: Option<f64>,
    retry: RetryPolicy,
    timeout_ms: u64,
    record_types: Vec<String>,
    merge_adjacent: bool,
    output_dir: PathBuf,
    stem: String,
) -> Result<ClassifyJob, Error> {
    let resolvers = if resolver_specs.is_empty() {
        default_resolvers()
    } else {
        resolver_specs
            .iter()
            .map(|spec| ResolverConfig::parse_spec(spec))
            .collect::<Result<Vec<_>, _>>()?
    };

    let record_types = record_types
        .iter()
        .map(|t| {
            RecordType::parse(t).ok_or_else(|| Error::Config(format!("unknown record type {:?}", t)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let schedule = match workers {
        Some(workers) => Schedule::Pool { workers },
        None => Schedule::Sharded,
    };

    Ok(ClassifyJob {
        cidr_sources: cidrs.into_iter().map(CidrSource::List).collect(),
        domain_sources: domains,
        resolvers,
        record_types,
        classifier: ClassifierConfig {
            schedule,
            rate_per_second: rate,
            burst,
            retry,
        },
        options: AggregateOptions { merge_adjacent },
        output_dir,
        stem,
        timeout: Duration::from_millis(timeout_ms),
    })
}

fn shutdown_signal() -> impl std::future::Future<Output = ()> {
    async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn aggregate(job: &AggregateJob) -> Result<(), Error> {
    let summary = run_aggregate(job).await?;
    for (label, stats) in &summary.labels {
        println!("{}: {} -> {} prefixes", label, stats.input, stats.output);
    }
    Ok(())
}

async fn classify(job: &ClassifyJob) -> Result<(), Error> {
    let resolvers = job.build_resolvers()?;
    let summary = run_classify(job, resolvers, shutdown_signal()).await?;
    println!(
        "{} domains processed, {} matched, {} unresolved; prefixes {} -> {}",
        summary.classify.processed,
        summary.classify.matched,
        summary.classify.unresolved,
        summary.prefixes.input,
        summary.prefixes.output
    );
    Ok(())
}

async fn exclude(job: &ExcludeJob) -> Result<(), Error> {
    let summary = run_exclude(job).await?;
    println!(
        "{}: {} rules kept, {} removed",
        summary.file.display(),
        summary.kept,
        summary.removed
    );
    Ok(())
}

async fn run_config(path: &Path) -> Result<(), Error> {
    let config = Config::from_file(path)?;
    let resolvers = if config.domains.is_empty() {
        Vec::new()
    } else {
        config.classify_job().build_resolvers()?
    };

    let summary = pipeline::run_config(&config, resolvers, shutdown_signal()).await?;
    if let Some(aggregate) = &summary.aggregate {
        for (label, stats) in &aggregate.labels {
            println!("{}: {} -> {} prefixes", label, stats.input, stats.output);
        }
    }
    if let Some(classify) = &summary.classify {
        println!(
            "{} domains processed, {} matched, {} unresolved",
            classify.classify.processed, classify.classify.matched, classify.classify.unresolved
        );
    }
    if let Some(exclude) = &summary.exclude {
        println!(
            "{}: {} rules kept, {} removed",
            exclude.file.display(),
            exclude.kept,
            exclude.removed
        );
    }
    Ok(())
}
