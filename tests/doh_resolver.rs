//! DNS-over-HTTPS resolver against a local JSON endpoint.

mod common;

use cidrsift::resolver::{DohResolver, RecordType, Resolver};
use cidrsift::{aggregate, AggregateOptions, Classifier, ClassifierConfig, DomainEntry, ResolveError, RetryPolicy};
use common::{direct_client, query_param, serve};
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn dns_json(answers: &[(u16, &str)]) -> String {
    let answers: Vec<String> = answers
        .iter()
        .map(|(t, data)| format!(r#"{{"name":"x.","type":{},"TTL":60,"data":"{}"}}"#, t, data))
        .collect();
    format!(r#"{{"Status":0,"Answer":[{}]}}"#, answers.join(","))
}

#[tokio::test]
async fn test_resolves_both_families() {
    let base = serve(|target| {
        assert_eq!(query_param(target, "name").as_deref(), Some("cdn.example.com"));
        match query_param(target, "type").as_deref() {
            Some("A") => (200, dns_json(&[(5, "edge.example.net."), (1, "104.16.1.1")])),
            Some("AAAA") => (200, dns_json(&[(28, "2606:4700::6810:101")])),
            _ => (400, String::new()),
        }
    })
    .await;

    let resolver = DohResolver::with_client("local", &format!("{}/dns-query", base), direct_client());
    let addrs = resolver.resolve("cdn.example.com").await.unwrap();

    let expected: Vec<IpAddr> = vec!["104.16.1.1".parse().unwrap(), "2606:4700::6810:101".parse().unwrap()];
    assert_eq!(addrs.into_iter().collect::<Vec<_>>(), expected);
}

#[tokio::test]
async fn test_record_types_restrict_queries() {
    let queries = Arc::new(AtomicUsize::new(0));
    let seen = queries.clone();
    let base = serve(move |target| {
        seen.fetch_add(1, Ordering::SeqCst);
        assert_eq!(query_param(target, "type").as_deref(), Some("A"));
        (200, dns_json(&[(1, "192.0.2.1")]))
    })
    .await;

    let resolver = DohResolver::with_client("local", &base, direct_client())
        .with_record_types(vec![RecordType::A]);
    let addrs = resolver.resolve("v4only.example.com").await.unwrap();
    assert_eq!(addrs.len(), 1);
    assert_eq!(queries.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_http_error_status() {
    let base = serve(|_| (503, "busy".to_string())).await;
    let resolver = DohResolver::with_client("local", &base, direct_client());
    assert!(matches!(
        resolver.resolve("example.com").await,
        Err(ResolveError::Status(503))
    ));
}

#[tokio::test]
async fn test_nxdomain_resolves_to_nothing() {
    let base = serve(|_| (200, r#"{"Status":3}"#.to_string())).await;
    let resolver = DohResolver::with_client("local", &base, direct_client());
    assert!(resolver.resolve("missing.example.com").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_classifier_with_doh_backend() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let base = serve(move |target| {
        let name = query_param(target, "name").unwrap_or_default();
        if name == "example.com" {
            return (200, dns_json(&[(1, "8.8.8.8")]));
        }
        counter.fetch_add(1, Ordering::SeqCst);
        (502, String::new())
    })
    .await;

    let resolver = DohResolver::with_client("local", &base, direct_client())
        .with_record_types(vec![RecordType::A]);
    let prefixes = aggregate(["8.8.8.0/24"], AggregateOptions::default()).set;
    let config = ClassifierConfig {
        rate_per_second: 100.0,
        retry: RetryPolicy {
            attempts: 3,
            backoff: Duration::from_millis(5),
        },
        ..ClassifierConfig::default()
    };

    let result = Classifier::new(config)
        .classify(
            vec![DomainEntry::new("example.com", None), DomainEntry::new("other.com", None)],
            Arc::new(prefixes),
            vec![Arc::new(resolver) as Arc<dyn Resolver>],
        )
        .await
        .unwrap();

    assert!(result.outcomes[0].matched);
    assert_eq!(result.outcomes[1].domain.name, "other.com");
    assert!(!result.outcomes[1].matched);
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_failed_record_type_keeps_other_answers() {
    let base = serve(|target| match query_param(target, "type").as_deref() {
        Some("A") => (200, dns_json(&[(1, "8.8.8.8")])),
        _ => (500, String::new()),
    })
    .await;

    let resolver = DohResolver::with_client("local", &base, direct_client());
    let addrs = resolver.resolve("example.com").await.unwrap();
    assert_eq!(addrs.into_iter().collect::<Vec<_>>(), vec!["8.8.8.8".parse::<IpAddr>().unwrap()]);

    let prefixes = aggregate(["8.8.8.0/24"], AggregateOptions::default()).set;
    let config = ClassifierConfig {
        rate_per_second: 100.0,
        retry: RetryPolicy {
            attempts: 1,
            backoff: Duration::from_millis(1),
        },
        ..ClassifierConfig::default()
    };
    let result = Classifier::new(config)
        .classify(
            vec![DomainEntry::new("example.com", None)],
            Arc::new(prefixes),
            vec![Arc::new(resolver) as Arc<dyn Resolver>],
        )
        .await
        .unwrap();

    assert!(result.outcomes[0].matched);
    assert_eq!(result.outcomes[0].addresses, 1);
}
