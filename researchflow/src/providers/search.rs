//! HTTP search provider backed by the DuckDuckGo HTML endpoint.

use super::{fetch_text, HttpConfig};
use crate::collaborators::{SearchHit, SearchProvider};
use crate::errors::PipelineError;
use async_trait::async_trait;
use scraper::{Html, Selector};

const SEARCH_ENDPOINT: &str = "https://html.duckduckgo.com/html/";

/// A [`SearchProvider`] that scrapes the DuckDuckGo HTML results page.
///
/// No API key required; result quality and markup stability are best-effort.
#[derive(Debug, Clone)]
pub struct HttpSearchProvider {
    client: reqwest::Client,
    config: HttpConfig,
}

impl HttpSearchProvider {
    /// Creates a provider with the given HTTP configuration.
    pub fn new(config: HttpConfig) -> Result<Self, PipelineError> {
        let client = config.build_client()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl SearchProvider for HttpSearchProvider {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        filters: Option<&serde_json::Value>,
    ) -> Result<Vec<SearchHit>, PipelineError> {
        if query.trim().is_empty() {
            return Err(PipelineError::validation("search query must be non-empty"));
        }

        let query = compose_query(query, filters);
        tracing::debug!(query = query.as_str(), max_results, "Running web search");

        let request = self
            .client
            .get(SEARCH_ENDPOINT)
            .query(&[("q", query.as_str())]);
        let body = fetch_text(request, self.config.max_response_size).await?;
        Ok(parse_results(&body, max_results))
    }
}

/// Appends string-valued filter entries as search operators
/// (`{"site": "example.com"}` becomes `... site:example.com`).
/// Non-string values are ignored.
fn compose_query(query: &str, filters: Option<&serde_json::Value>) -> String {
    let mut composed = query.to_string();
    if let Some(serde_json::Value::Object(map)) = filters {
        for (key, value) in map {
            if let Some(value) = value.as_str() {
                composed.push_str(&format!(" {key}:{value}"));
            }
        }
    }
    composed
}

/// Parses the results page. Synchronous on purpose: `Html` is not `Send`
/// and must never be held across an await point.
fn parse_results(body: &str, max_results: usize) -> Vec<SearchHit> {
    let document = Html::parse_document(body);
    let result = Selector::parse(".result").expect("static selector is valid");
    let title = Selector::parse(".result__a").expect("static selector is valid");
    let snippet = Selector::parse(".result__snippet").expect("static selector is valid");

    document
        .select(&result)
        .filter_map(|node| {
            let anchor = node.select(&title).next()?;
            let url = anchor.value().attr("href")?.to_string();
            Some(SearchHit {
                url,
                title: anchor.text().collect::<String>().trim().to_string(),
                snippet: node
                    .select(&snippet)
                    .next()
                    .map(|s| s.text().collect::<String>().trim().to_string())
                    .unwrap_or_default(),
            })
        })
        .take(max_results)
        .collect()
}
