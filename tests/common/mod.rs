//! Shared helpers for integration tests.

#![allow(dead_code)]

pub mod mmdb;

use async_trait::async_trait;
use cidrsift::resolver::Resolver;
use cidrsift::ResolveError;
use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Start a one-response-per-connection HTTP server on localhost.
///
/// `handler` receives the request target (path and query) and returns the
/// status code and body. Returns the base URL.
pub async fn serve<F>(handler: F) -> String
where
    F: Fn(&str) -> (u16, String) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handler = Arc::new(handler);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let handler = handler.clone();
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut chunk = [0u8; 1024];
                loop {
                    let n = socket.read(&mut chunk).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&chunk[..n]);
                    if request.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }

                let request = String::from_utf8_lossy(&request);
                let target = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                let (status, body) = handler(&target);
                let response = format!(
                    "HTTP/1.1 {} Test\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    format!("http://{}", addr)
}

/// Value of a query parameter in a request target.
pub fn query_param(target: &str, key: &str) -> Option<String> {
    let (_, query) = target.split_once('?')?;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v.to_string())
}

/// HTTP client that never goes through an environment proxy.
pub fn direct_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Resolver answering from a fixed table; unknown names time out.
pub struct TableResolver {
    name: String,
    table: HashMap<String, Vec<IpAddr>>,
    pub calls: AtomicUsize,
}

impl TableResolver {
    /// `entries` maps names to comma-separated addresses.
    pub fn new(name: &str, entries: &[(&str, &str)]) -> Self {
        let table = entries
            .iter()
            .map(|(domain, addrs)| {
                let addrs = addrs
                    .split(',')
                    .filter(|a| !a.is_empty())
                    .map(|a| a.parse().unwrap())
                    .collect();
                (domain.to_string(), addrs)
            })
            .collect();
        Self {
            name: name.to_string(),
            table,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Resolver for TableResolver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn resolve(&self, domain: &str) -> Result<BTreeSet<IpAddr>, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.table.get(domain) {
            Some(addrs) => Ok(addrs.iter().copied().collect()),
            None => Err(ResolveError::Timeout),
        }
    }
}
