use anyhow::{Context, Result};
use skinmatch_catalog::{CatalogRefresher, FeedSource, RefreshSummary};
use skinmatch_matcher::ResolverConfig;
use std::path::Path;
use std::time::Duration;

const FETCH_TIMEOUT: Duration = Duration::from_secs(120);

/// Download every feed, merge them and rewrite the catalog and alias
/// artifacts. A feed that cannot be fetched or parsed is skipped.
pub(crate) async fn refresh_catalog(
    config: &ResolverConfig,
    sources: &[FeedSource],
) -> Result<RefreshSummary> {
    let client = reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")?;

    let mut refresher = CatalogRefresher::new();
    for source in sources {
        let body = match fetch(&client, &source.url).await {
            Ok(body) => body,
            Err(err) => {
                log::warn!("Skipping feed '{}': {err:#}", source.locale);
                continue;
            }
        };
        match refresher.ingest_feed(&source.locale, &body) {
            Ok(items) => log::info!("Feed '{}': {items} items", source.locale),
            Err(err) => log::warn!("Skipping feed '{}': {err}", source.locale),
        }
    }

    refresher
        .write(&config.catalog_path, &config.alias_path)
        .context("Failed to write catalog artifacts")
}

/// `http(s)://` URLs are downloaded; anything else is read as a local path.
async fn fetch(client: &reqwest::Client, url: &str) -> Result<String> {
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        let path = Path::new(url.strip_prefix("file://").unwrap_or(url));
        return tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()));
    }

    log::info!("Downloading {url}");
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Request to {url} failed"))?
        .error_for_status()
        .with_context(|| format!("Bad response from {url}"))?;
    response
        .text()
        .await
        .with_context(|| format!("Failed to read body from {url}"))
}
