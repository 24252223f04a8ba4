use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::engine::ConversionDirection;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionResult {
    pub converted_text: String,
    #[serde(default)]
    pub key_terms: Vec<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

/// Stateless text conversion between legal and plain language. Failures are
/// treated as transient by callers.
#[async_trait]
pub trait ConversionProvider: Send + Sync + 'static {
    async fn convert(&self, text: &str, direction: ConversionDirection)
        -> Result<ConversionResult>;
}

pub struct HttpConversionProvider {
    client: Client,
    endpoint: String,
}

impl HttpConversionProvider {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build conversion HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[derive(Serialize)]
struct ConversionRequestBody<'a> {
    text: &'a str,
    direction: ConversionDirection,
}

#[async_trait]
impl ConversionProvider for HttpConversionProvider {
    async fn convert(
        &self,
        text: &str,
        direction: ConversionDirection,
    ) -> Result<ConversionResult> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&ConversionRequestBody { text, direction })
            .send()
            .await
            .context("conversion request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("conversion provider returned {status}: {body}");
        }

        let result: ConversionResult = response
            .json()
            .await
            .context("failed to decode conversion response")?;
        if result.converted_text.trim().is_empty() {
            bail!("conversion provider returned empty text");
        }
        Ok(result)
    }
}

/// Used when no provider endpoint is configured; every call fails so jobs
/// end up failed instead of silently succeeding.
pub struct UnconfiguredConversionProvider;

#[async_trait]
impl ConversionProvider for UnconfiguredConversionProvider {
    async fn convert(
        &self,
        _text: &str,
        _direction: ConversionDirection,
    ) -> Result<ConversionResult> {
        bail!("CONVERSION_ENDPOINT is not configured")
    }
}

/// Picks the HTTP provider when an endpoint is configured.
pub fn provider_from_config(config: &AppConfig) -> Result<Arc<dyn ConversionProvider>> {
    match config.conversion_endpoint.as_deref() {
        Some(endpoint) => Ok(Arc::new(HttpConversionProvider::new(
            endpoint,
            Duration::from_secs(config.conversion_timeout_secs),
        )?)),
        None => Ok(Arc::new(UnconfiguredConversionProvider)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_camel_case_response_with_optional_fields() {
        let full: ConversionResult = serde_json::from_str(
            r#"{"convertedText":"plain","keyTerms":["lessee"],"summary":"short"}"#,
        )
        .unwrap();
        assert_eq!(full.converted_text, "plain");
        assert_eq!(full.key_terms, vec!["lessee".to_string()]);
        assert_eq!(full.summary.as_deref(), Some("short"));

        let minimal: ConversionResult =
            serde_json::from_str(r#"{"convertedText":"plain"}"#).unwrap();
        assert!(minimal.key_terms.is_empty());
        assert!(minimal.summary.is_none());
    }

    #[test]
    fn request_body_uses_snake_case_direction() {
        let body = serde_json::to_value(ConversionRequestBody {
            text: "whereas",
            direction: ConversionDirection::LegalToPlain,
        })
        .unwrap();
        assert_eq!(body["direction"], "legal_to_plain");
        assert_eq!(body["text"], "whereas");
    }
}
