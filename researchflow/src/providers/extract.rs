//! HTTP content extractor built on reqwest and scraper.

use super::{fetch_text, HttpConfig};
use crate::collaborators::{ContentExtractor, ExtractedContent};
use crate::errors::PipelineError;
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::collections::HashMap;

/// A [`ContentExtractor`] that fetches a page and pulls text out of the DOM.
///
/// Caller-supplied CSS selectors are tried in order; when none match (or
/// none are given) the extractor falls back to paragraph text.
#[derive(Debug, Clone)]
pub struct HttpContentExtractor {
    client: reqwest::Client,
    config: HttpConfig,
}

impl HttpContentExtractor {
    /// Creates an extractor with the given HTTP configuration.
    pub fn new(config: HttpConfig) -> Result<Self, PipelineError> {
        let client = config.build_client()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl ContentExtractor for HttpContentExtractor {
    async fn extract(
        &self,
        url: &str,
        selectors: &[String],
        max_length: usize,
    ) -> Result<ExtractedContent, PipelineError> {
        tracing::debug!(url, selector_count = selectors.len(), "Extracting page content");

        let body = fetch_text(self.client.get(url), self.config.max_response_size).await?;
        extract_from_html(&body, selectors, max_length)
    }
}

/// Parses the document and extracts title, content, and metadata.
/// Synchronous on purpose: `Html` is not `Send` and must never be held
/// across an await point.
fn extract_from_html(
    body: &str,
    selectors: &[String],
    max_length: usize,
) -> Result<ExtractedContent, PipelineError> {
    let document = Html::parse_document(body);

    let mut content = String::new();
    for raw in selectors {
        let selector = Selector::parse(raw).map_err(|_| {
            PipelineError::validation(format!("invalid CSS selector '{raw}'"))
        })?;
        for node in document.select(&selector) {
            push_text(&mut content, &node.text().collect::<String>());
        }
        if !content.is_empty() {
            break;
        }
    }

    if content.is_empty() {
        let paragraphs = Selector::parse("p").expect("static selector is valid");
        for node in document.select(&paragraphs) {
            push_text(&mut content, &node.text().collect::<String>());
        }
    }

    truncate_to_boundary(&mut content, max_length);

    Ok(ExtractedContent {
        title: select_text(&document, "title").unwrap_or_default(),
        content,
        metadata: collect_metadata(&document),
    })
}

fn push_text(content: &mut String, text: &str) {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return;
    }
    if !content.is_empty() {
        content.push('\n');
    }
    content.push_str(trimmed);
}

fn truncate_to_boundary(content: &mut String, max_length: usize) {
    if content.len() > max_length {
        let mut cut = max_length;
        while !content.is_char_boundary(cut) {
            cut -= 1;
        }
        content.truncate(cut);
    }
}

fn select_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .next()
        .map(|node| node.text().collect::<String>().trim().to_string())
}

fn collect_metadata(document: &Html) -> HashMap<String, String> {
    let meta = Selector::parse("meta[name][content]").expect("static selector is valid");
    let canonical = Selector::parse("link[rel=canonical]").expect("static selector is valid");

    let mut metadata = HashMap::new();
    for node in document.select(&meta) {
        if let (Some(name), Some(value)) =
            (node.value().attr("name"), node.value().attr("content"))
        {
            metadata.insert(name.to_string(), value.to_string());
        }
    }
    if let Some(href) = document
        .select(&canonical)
        .next()
        .and_then(|node| node.value().attr("href"))
    {
        metadata.insert("canonical".to_string(), href.to_string());
    }
    metadata
}
