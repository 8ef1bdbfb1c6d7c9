//! Input fetching from URLs or local files.

use std::time::Duration;

use crate::{Error, Result};

/// Build the HTTP client used for input downloads.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("cidrsift/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Fetch one input as raw bytes.
///
/// `source` is an `http(s)://` URL or a local path. Any failure, including a
/// non-success HTTP status, is returned to the caller; inputs are required.
pub async fn fetch_bytes(client: &reqwest::Client, source: &str) -> Result<Vec<u8>> {
    if !is_url(source) {
        log::debug!("Reading {}", source);
        return Ok(tokio::fs::read(source).await?);
    }

    log::debug!("Downloading {}", source);
    let response = client.get(source).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::HttpStatus {
            url: source.to_string(),
            status: status.as_u16(),
        });
    }
    Ok(response.bytes().await?.to_vec())
}

/// Fetch one input as text. Invalid UTF-8 is replaced, not rejected.
pub async fn fetch_text(client: &reqwest::Client, source: &str) -> Result<String> {
    let bytes = fetch_bytes(client, source).await?;
    Ok(match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    })
}

/// Fetch several inputs and join them into one newline-separated text.
///
/// Fails on the first source that cannot be fetched.
pub async fn fetch_all(client: &reqwest::Client, sources: &[String]) -> Result<String> {
    let mut combined = String::new();
    for source in sources {
        let text = fetch_text(client, source).await?;
        log::info!("Fetched {} ({} lines)", source, text.lines().count());
        combined.push_str(&text);
        if !combined.ends_with('\n') {
            combined.push('\n');
        }
    }
    Ok(combined)
}
