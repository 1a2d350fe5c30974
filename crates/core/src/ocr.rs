//! OCR fallback decision and engine seam.
//!
//! The decider is a pure function of the extraction statistics and the
//! configured thresholds, so the same inputs always yield the same page
//! list. The engine is an async trait; the shipped implementation posts
//! the source document to an OCR service that rasterizes the requested
//! page at the requested DPI and returns recognized text plus an optional
//! confidence estimate.

use crate::config::{OcrConfig, OcrMode};
use crate::error::IngestError;
use crate::extractor::RawPage;
use crate::models::DocumentFormat;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, PartialEq)]
pub struct OcrDecision {
    /// Pages whose own character count fell below the per-page threshold;
    /// empty when fallback did not trigger.
    pub pages_to_ocr: Vec<u32>,
    pub reason: Option<String>,
}

impl OcrDecision {
    pub fn triggered(&self) -> bool {
        !self.pages_to_ocr.is_empty()
    }

    fn skip() -> Self {
        Self {
            pages_to_ocr: Vec::new(),
            reason: None,
        }
    }
}

/// Decide whether OCR must run and for which pages.
///
/// Fallback triggers when the document-level average characters per page
/// or the text-to-bytes ratio falls below its threshold; only pages whose
/// own `char_count` is below `min_chars_per_page` are then listed, so a
/// mixed text/scan document keeps its good native text untouched.
pub fn needs_ocr(pages: &[RawPage], total_bytes: u64, config: &OcrConfig) -> OcrDecision {
    if !config.enabled || pages.is_empty() {
        return OcrDecision::skip();
    }

    if config.mode == OcrMode::Force {
        return OcrDecision {
            pages_to_ocr: pages.iter().map(|page| page.page_number).collect(),
            reason: Some("ocr mode is force".to_string()),
        };
    }

    let total_chars: usize = pages.iter().map(|page| page.char_count).sum();
    let avg_chars_per_page = total_chars as f64 / pages.len() as f64;
    let text_ratio = total_chars as f64 / total_bytes.max(1) as f64;
    let thresholds = &config.thresholds;

    let below_avg = avg_chars_per_page < thresholds.min_chars_per_page as f64;
    let below_ratio = text_ratio < thresholds.min_text_ratio;
    if !below_avg && !below_ratio {
        return OcrDecision::skip();
    }

    let pages_to_ocr: Vec<u32> = pages
        .iter()
        .filter(|page| page.char_count < thresholds.min_chars_per_page)
        .map(|page| page.page_number)
        .collect();

    if pages_to_ocr.is_empty() {
        return OcrDecision::skip();
    }

    OcrDecision {
        pages_to_ocr,
        reason: Some(format!(
            "avg_chars_per_page={avg_chars_per_page:.1} text_ratio={text_ratio:.6} below thresholds (min_chars_per_page={}, min_text_ratio={})",
            thresholds.min_chars_per_page, thresholds.min_text_ratio
        )),
    }
}

/// Recognized text for one page. An unreadable page comes back with empty
/// text rather than an error; transport failures are errors and retryable.
#[derive(Debug, Clone)]
pub struct OcrPageText {
    pub text: String,
    /// Engine-reported confidence in [0,1] when available.
    pub confidence: Option<f32>,
}

#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize_page(
        &self,
        source: &[u8],
        format: DocumentFormat,
        page_number: u32,
        dpi: u32,
    ) -> Result<OcrPageText, IngestError>;
}

#[derive(Debug, Clone, Serialize)]
struct OcrRequest<'a> {
    source_base64: String,
    format: &'a str,
    page: u32,
    dpi: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct OcrResponse {
    text: Option<String>,
    confidence: Option<f32>,
}

/// OCR over HTTP: base64 source + page + dpi out, text + confidence back.
pub struct HttpOcrEngine {
    endpoint: Url,
    api_key: Option<String>,
    client: Client,
}

impl HttpOcrEngine {
    pub fn new(
        endpoint: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, IngestError> {
        let endpoint = Url::parse(endpoint)?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint,
            api_key,
            client,
        })
    }
}

#[async_trait]
impl OcrEngine for HttpOcrEngine {
    async fn recognize_page(
        &self,
        source: &[u8],
        format: DocumentFormat,
        page_number: u32,
        dpi: u32,
    ) -> Result<OcrPageText, IngestError> {
        let payload = OcrRequest {
            source_base64: STANDARD.encode(source),
            format: format.as_str(),
            page: page_number,
            dpi,
        };

        let mut request = self.client.post(self.endpoint.clone()).json(&payload);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_client_error() {
            // The service refused this page specifically; not retryable,
            // the pipeline degrades the page instead.
            return Err(IngestError::OcrFailed(format!(
                "ocr endpoint rejected page {page_number}: {status}"
            )));
        }
        let response = response.error_for_status()?;

        let body: OcrResponse = response.json().await?;
        let confidence = body.confidence.map(|value| value.clamp(0.0, 1.0));
        Ok(OcrPageText {
            text: body.text.unwrap_or_default(),
            confidence,
        })
    }
}
