// src/utils/http.rs

//! HTTP client utilities.

use std::time::Duration;

use scraper::Html;

use crate::error::Result;

/// Create a client for the long-lived feed connection.
///
/// Only connecting is bounded; the body may stream forever.
pub fn create_stream_client(user_agent: &str) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(user_agent)
        .connect_timeout(Duration::from_secs(30))
        .build()?;
    Ok(client)
}

/// Create a client with an overall request timeout.
pub fn create_client(user_agent: &str, timeout_secs: u64) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(Duration::from_secs(timeout_secs))
        .build()?;
    Ok(client)
}

/// Fetch a page and parse it as HTML.
pub async fn fetch_page(client: &reqwest::Client, url: &str) -> Result<Html> {
    let text = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    Ok(Html::parse_document(&text))
}
