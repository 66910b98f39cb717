//! Document extraction clients
//!
//! Wraps the document intelligence service behind a trait so the pipeline
//! never sees HTTP. The Azure client drives the async analyze/poll flow of
//! the `prebuilt-read` model; the mock serves tests and local development.

use crate::errors::{ExtractionErrorKind, PipelineError, Result};
use async_trait::async_trait;
use kycflow_common::config::ExtractionConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const ANALYZE_API_VERSION: &str = "2024-11-30";

/// One extracted key/value pair, verbatim from the document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeyValuePair {
    pub key: String,
    pub value: String,
}

/// Raw extraction output; transient, discarded once mapping has run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedDocument {
    /// Full concatenated text content
    pub content: String,
    /// Tables as row-major cell grids
    pub tables: Vec<Vec<Vec<String>>>,
    /// Labeled key/value pairs, in document order
    pub key_value_pairs: Vec<KeyValuePair>,
    /// Paragraph texts, in document order
    pub paragraphs: Vec<String>,
}

/// Trait for document extraction backends
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    /// Run one extraction over the raw document bytes
    async fn extract(&self, document: &[u8]) -> Result<ExtractedDocument>;

    /// Backend name for logging
    fn provider_name(&self) -> &str;
}

/// Create an extractor based on configuration
pub fn create_extractor(config: &ExtractionConfig) -> Result<Arc<dyn DocumentExtractor>> {
    match config.provider.as_str() {
        "mock" => Ok(Arc::new(MockExtractor::default())),
        _ => {
            let endpoint = config.endpoint.clone().ok_or_else(|| {
                PipelineError::Extraction {
                    kind: ExtractionErrorKind::Auth,
                    message: "extraction endpoint not configured".to_string(),
                }
            })?;
            let api_key = config.api_key.clone().ok_or_else(|| {
                PipelineError::Extraction {
                    kind: ExtractionErrorKind::Auth,
                    message: "extraction api key not configured".to_string(),
                }
            })?;
            Ok(Arc::new(AzureDocumentExtractor::new(
                endpoint,
                api_key,
                config.model.clone(),
                Duration::from_secs(config.timeout_secs),
                Duration::from_millis(config.poll_interval_ms),
            )))
        }
    }
}

// ============================================================================
// Azure Document Intelligence
// ============================================================================

/// Client for the Azure Document Intelligence REST API.
///
/// Analysis is asynchronous on the service side: submit returns 202 with an
/// Operation-Location header, which is then polled until the result is ready
/// or the overall deadline elapses.
pub struct AzureDocumentExtractor {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    deadline: Duration,
    poll_interval: Duration,
}

impl AzureDocumentExtractor {
    pub fn new(
        endpoint: String,
        api_key: String,
        model: String,
        deadline: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
            model,
            deadline,
            poll_interval,
        }
    }

    fn analyze_url(&self) -> String {
        format!(
            "{}/documentintelligence/documentModels/{}:analyze?api-version={}",
            self.endpoint, self.model, ANALYZE_API_VERSION
        )
    }

    fn classify_status(status: reqwest::StatusCode, body: &str) -> PipelineError {
        let kind = match status.as_u16() {
            401 | 403 => ExtractionErrorKind::Auth,
            400 | 415 | 422 => ExtractionErrorKind::UnsupportedFormat,
            _ => ExtractionErrorKind::Transport,
        };
        PipelineError::Extraction {
            kind,
            message: format!("service returned {}: {}", status, body),
        }
    }

    async fn submit(&self, document: &[u8]) -> Result<String> {
        let response = self
            .client
            .post(self.analyze_url())
            .header("Ocp-Apim-Subscription-Key", &self.api_key)
            .header("Content-Type", "application/octet-stream")
            .body(document.to_vec())
            .send()
            .await
            .map_err(|e| PipelineError::Extraction {
                kind: ExtractionErrorKind::Transport,
                message: e.to_string(),
            })?;

        let status = response.status();
        if status != reqwest::StatusCode::ACCEPTED {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, &body));
        }

        response
            .headers()
            .get("operation-location")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .ok_or_else(|| PipelineError::Extraction {
                kind: ExtractionErrorKind::Transport,
                message: "analyze accepted without an operation location".to_string(),
            })
    }

    async fn poll(&self, operation_url: &str, started: Instant) -> Result<AnalyzeResult> {
        loop {
            if started.elapsed() >= self.deadline {
                return Err(PipelineError::Extraction {
                    kind: ExtractionErrorKind::Timeout,
                    message: format!(
                        "no result within {}s",
                        self.deadline.as_secs()
                    ),
                });
            }

            tokio::time::sleep(self.poll_interval).await;

            let response = self
                .client
                .get(operation_url)
                .header("Ocp-Apim-Subscription-Key", &self.api_key)
                .send()
                .await
                .map_err(|e| PipelineError::Extraction {
                    kind: ExtractionErrorKind::Transport,
                    message: e.to_string(),
                })?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(Self::classify_status(status, &body));
            }

            let operation: AnalyzeOperation =
                response
                    .json()
                    .await
                    .map_err(|e| PipelineError::Extraction {
                        kind: ExtractionErrorKind::Transport,
                        message: format!("bad analyze response: {}", e),
                    })?;

            match operation.status.as_str() {
                "succeeded" => {
                    return operation.analyze_result.ok_or_else(|| {
                        PipelineError::Extraction {
                            kind: ExtractionErrorKind::Transport,
                            message: "succeeded without a result payload".to_string(),
                        }
                    })
                }
                "failed" => {
                    let message = operation
                        .error
                        .map(|e| e.message)
                        .unwrap_or_else(|| "analysis failed".to_string());
                    return Err(PipelineError::Extraction {
                        kind: ExtractionErrorKind::UnsupportedFormat,
                        message,
                    });
                }
                other => {
                    debug!(status = other, "Analysis still running");
                }
            }
        }
    }
}

#[async_trait]
impl DocumentExtractor for AzureDocumentExtractor {
    async fn extract(&self, document: &[u8]) -> Result<ExtractedDocument> {
        let started = Instant::now();

        let operation_url = self.submit(document).await?;
        let result = self.poll(&operation_url, started).await?;

        Ok(result.into_document())
    }

    fn provider_name(&self) -> &str {
        "azure"
    }
}

// Wire types for the analyze operation payload

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeOperation {
    status: String,
    analyze_result: Option<AnalyzeResult>,
    error: Option<AnalyzeError>,
}

#[derive(Debug, Deserialize)]
struct AnalyzeError {
    message: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResult {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tables: Vec<AnalyzeTable>,
    #[serde(default)]
    key_value_pairs: Vec<AnalyzeKeyValuePair>,
    #[serde(default)]
    paragraphs: Vec<AnalyzeParagraph>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeTable {
    row_count: usize,
    column_count: usize,
    #[serde(default)]
    cells: Vec<AnalyzeCell>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeCell {
    row_index: usize,
    column_index: usize,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnalyzeKeyValuePair {
    key: Option<AnalyzeContent>,
    value: Option<AnalyzeContent>,
}

#[derive(Debug, Deserialize)]
struct AnalyzeContent {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnalyzeParagraph {
    #[serde(default)]
    content: String,
}

impl AnalyzeResult {
    fn into_document(self) -> ExtractedDocument {
        let tables = self
            .tables
            .into_iter()
            .map(|table| {
                let mut grid = vec![vec![String::new(); table.column_count]; table.row_count];
                for cell in table.cells {
                    if cell.row_index < table.row_count && cell.column_index < table.column_count {
                        grid[cell.row_index][cell.column_index] = cell.content;
                    }
                }
                grid
            })
            .collect();

        let key_value_pairs = self
            .key_value_pairs
            .into_iter()
            .filter_map(|pair| {
                let key = pair.key?.content;
                if key.trim().is_empty() {
                    warn!("Dropping key/value pair with an empty key");
                    return None;
                }
                Some(KeyValuePair {
                    key,
                    value: pair.value.map(|v| v.content).unwrap_or_default(),
                })
            })
            .collect();

        ExtractedDocument {
            content: self.content,
            tables,
            key_value_pairs,
            paragraphs: self.paragraphs.into_iter().map(|p| p.content).collect(),
        }
    }
}

// ============================================================================
// Mock Extractor (for testing)
// ============================================================================

/// Mock extractor that hands back a canned document or a canned error
#[derive(Default)]
pub struct MockExtractor {
    document: std::sync::Mutex<Option<ExtractedDocument>>,
    fail_with: std::sync::Mutex<Option<ExtractionErrorKind>>,
}

impl MockExtractor {
    pub fn returning(document: ExtractedDocument) -> Arc<Self> {
        let mock = Self::default();
        *mock.document.lock().unwrap() = Some(document);
        Arc::new(mock)
    }

    pub fn failing(kind: ExtractionErrorKind) -> Arc<Self> {
        let mock = Self::default();
        *mock.fail_with.lock().unwrap() = Some(kind);
        Arc::new(mock)
    }
}

#[async_trait]
impl DocumentExtractor for MockExtractor {
    async fn extract(&self, _document: &[u8]) -> Result<ExtractedDocument> {
        if let Some(kind) = *self.fail_with.lock().unwrap() {
            return Err(PipelineError::Extraction {
                kind,
                message: "mock failure".to_string(),
            });
        }
        Ok(self.document.lock().unwrap().clone().unwrap_or_default())
    }

    fn provider_name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let auth = AzureDocumentExtractor::classify_status(
            reqwest::StatusCode::UNAUTHORIZED,
            "bad key",
        );
        assert!(matches!(
            auth,
            PipelineError::Extraction {
                kind: ExtractionErrorKind::Auth,
                ..
            }
        ));

        let format = AzureDocumentExtractor::classify_status(
            reqwest::StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "not a pdf",
        );
        assert!(matches!(
            format,
            PipelineError::Extraction {
                kind: ExtractionErrorKind::UnsupportedFormat,
                ..
            }
        ));

        let transport = AzureDocumentExtractor::classify_status(
            reqwest::StatusCode::BAD_GATEWAY,
            "upstream down",
        );
        assert!(matches!(
            transport,
            PipelineError::Extraction {
                kind: ExtractionErrorKind::Transport,
                ..
            }
        ));
    }

    #[test]
    fn test_analyze_result_into_document() {
        let result: AnalyzeResult = serde_json::from_value(serde_json::json!({
            "content": "Entity Legal Name: Acme Corp",
            "tables": [{
                "rowCount": 2,
                "columnCount": 2,
                "cells": [
                    {"rowIndex": 0, "columnIndex": 0, "content": "Field"},
                    {"rowIndex": 0, "columnIndex": 1, "content": "Value"},
                    {"rowIndex": 1, "columnIndex": 0, "content": "Phone"},
                    {"rowIndex": 1, "columnIndex": 1, "content": "555-0100"}
                ]
            }],
            "keyValuePairs": [
                {"key": {"content": "Entity Legal Name:"}, "value": {"content": "Acme Corp"}},
                {"key": {"content": ""}, "value": {"content": "orphan"}}
            ],
            "paragraphs": [{"content": "Certificate of Incorporation"}]
        }))
        .unwrap();

        let document = result.into_document();
        assert_eq!(document.tables[0][1][1], "555-0100");
        // Empty keys are dropped
        assert_eq!(document.key_value_pairs.len(), 1);
        assert_eq!(document.key_value_pairs[0].value, "Acme Corp");
        assert_eq!(document.paragraphs[0], "Certificate of Incorporation");
    }

    #[tokio::test]
    async fn test_mock_extractor() {
        let mock = MockExtractor::returning(ExtractedDocument {
            content: "hello".to_string(),
            ..Default::default()
        });
        let document = mock.extract(b"ignored").await.unwrap();
        assert_eq!(document.content, "hello");

        let failing = MockExtractor::failing(ExtractionErrorKind::Timeout);
        let err = failing.extract(b"ignored").await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Extraction {
                kind: ExtractionErrorKind::Timeout,
                ..
            }
        ));
    }
}
