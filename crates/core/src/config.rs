//! Pipeline and retrieval configuration.
//!
//! Every threshold the pipeline consults lives here and is passed in
//! explicitly, so a run's behavior is a pure function of (input, config).

use crate::error::IngestError;
use std::time::Duration;

/// Thresholds for deciding whether native text extraction was sufficient.
#[derive(Debug, Clone)]
pub struct OcrThresholds {
    /// Documents averaging fewer extracted characters per page than this
    /// trigger OCR fallback.
    pub min_chars_per_page: usize,
    /// Documents whose extracted-characters-to-file-bytes ratio falls below
    /// this trigger OCR fallback (catches image-heavy PDFs with token text).
    pub min_text_ratio: f64,
}

impl Default for OcrThresholds {
    fn default() -> Self {
        Self {
            min_chars_per_page: 200,
            min_text_ratio: 0.001,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrMode {
    /// Run OCR only when extraction statistics fall below the thresholds.
    FallbackOnly,
    /// Always OCR every page.
    Force,
}

#[derive(Debug, Clone)]
pub struct OcrConfig {
    pub enabled: bool,
    pub mode: OcrMode,
    pub thresholds: OcrThresholds,
    /// Page rasterization density handed to the OCR engine.
    pub dpi: u32,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: OcrMode::FallbackOnly,
            thresholds: OcrThresholds::default(),
            dpi: 300,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CanonicalizeConfig {
    /// Fraction of pages a line must appear on (in the same edge region)
    /// before it is treated as boilerplate and stripped.
    pub boilerplate_threshold: f64,
    /// Below this page count no boilerplate is ever stripped.
    pub min_pages_for_boilerplate: usize,
    /// How many non-blank lines at each page edge are candidates.
    pub edge_lines: usize,
    /// Lines shorter than this never qualify as boilerplate.
    pub min_line_chars: usize,
}

impl Default for CanonicalizeConfig {
    fn default() -> Self {
        Self {
            boilerplate_threshold: 0.7,
            min_pages_for_boilerplate: 3,
            edge_lines: 3,
            min_line_chars: 6,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    pub target_min_tokens: usize,
    pub target_max_tokens: usize,
    pub overlap_tokens: usize,
    /// A chunk may grow to `target_max_tokens * hard_cap_factor` before a
    /// paragraph is force-split.
    pub hard_cap_factor: f64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_min_tokens: 800,
            target_max_tokens: 1200,
            overlap_tokens: 100,
            hard_cap_factor: 1.5,
        }
    }
}

impl ChunkingConfig {
    pub fn hard_max_tokens(&self) -> usize {
        (self.target_max_tokens as f64 * self.hard_cap_factor).ceil() as usize
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.target_min_tokens == 0 || self.target_min_tokens > self.target_max_tokens {
            return Err(IngestError::InvalidChunkConfig(format!(
                "target range {}..{} is empty",
                self.target_min_tokens, self.target_max_tokens
            )));
        }
        if self.overlap_tokens >= self.target_min_tokens {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than target minimum {}",
                self.overlap_tokens, self.target_min_tokens
            )));
        }
        if self.hard_cap_factor < 1.0 {
            return Err(IngestError::InvalidChunkConfig(format!(
                "hard cap factor {} must be >= 1.0",
                self.hard_cap_factor
            )));
        }
        Ok(())
    }
}

/// Bounded exponential backoff for transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following `attempt` (0-based), doubling each
    /// time up to `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub ocr: OcrConfig,
    pub canonicalize: CanonicalizeConfig,
    pub chunking: ChunkingConfig,
    pub retry: RetryPolicy,
}

/// Hybrid scoring weights. 0.7 dense / 0.3 lexical is the default policy;
/// callers must not assume it and should read the values from here.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub dense_weight: f64,
    pub lexical_weight: f64,
    /// How many candidates each path fetches before merging. Kept far above
    /// any sane top_k so path-level truncation cannot bias the merge; the
    /// in-memory index ignores it and returns every match.
    pub candidate_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            dense_weight: 0.7,
            lexical_weight: 0.3,
            candidate_limit: 256,
        }
    }
}
