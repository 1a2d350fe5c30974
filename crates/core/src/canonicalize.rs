//! Text canonicalization between extraction and chunking.
//!
//! Strips boilerplate lines that repeat at page edges (letterhead,
//! page-number footers), collapses whitespace, and normalizes common OCR
//! artifacts on OCR-applied pages. Page boundaries are preserved exactly:
//! the output has the same page count as the input, because citation page
//! numbers are keyed to this stage's indices.

use crate::config::CanonicalizeConfig;
use crate::error::IngestError;
use crate::models::SourcePage;
use regex::Regex;
use std::collections::{HashMap, HashSet};

/// A page after canonicalization. Paragraphs are separated by single
/// newlines; whitespace within a paragraph is collapsed to single spaces.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalPage {
    pub page_number: u32,
    pub text: String,
    pub ocr_applied: bool,
}

pub struct Canonicalizer {
    config: CanonicalizeConfig,
    digit_confusion: Regex,
    letter_zero: Regex,
    currency_gap: Regex,
    thousands_gap: Regex,
}

impl Canonicalizer {
    pub fn new(config: CanonicalizeConfig) -> Result<Self, IngestError> {
        Ok(Self {
            config,
            digit_confusion: Regex::new(r"[l|](\d)")?,
            letter_zero: Regex::new(r"([A-Za-z])0([A-Za-z])")?,
            currency_gap: Regex::new(r"\$\s+(\d)")?,
            thousands_gap: Regex::new(r"(\d)\s*,\s*(\d{3})")?,
        })
    }

    pub fn canonicalize(&self, pages: &[SourcePage]) -> Vec<CanonicalPage> {
        let (headers, footers) = self.repeated_edge_lines(pages);

        pages
            .iter()
            .map(|page| {
                let stripped = self.strip_edges(&page.text, &headers, &footers);
                let collapsed = collapse_whitespace(&stripped);
                let text = if page.ocr_applied {
                    self.normalize_ocr_artifacts(&collapsed)
                } else {
                    collapsed
                };
                CanonicalPage {
                    page_number: page.page_number,
                    text,
                    ocr_applied: page.ocr_applied,
                }
            })
            .collect()
    }

    /// Lines repeating near the top (headers) or bottom (footers) of at
    /// least `boilerplate_threshold` of pages. Short documents are left
    /// alone entirely.
    fn repeated_edge_lines(&self, pages: &[SourcePage]) -> (HashSet<String>, HashSet<String>) {
        if pages.len() < self.config.min_pages_for_boilerplate {
            return (HashSet::new(), HashSet::new());
        }

        let mut header_counts: HashMap<String, usize> = HashMap::new();
        let mut footer_counts: HashMap<String, usize> = HashMap::new();

        for page in pages {
            let lines: Vec<&str> = page
                .text
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .collect();

            // A line counts once per page per region.
            let mut seen_headers = HashSet::new();
            for line in lines.iter().take(self.config.edge_lines) {
                if seen_headers.insert(*line) {
                    *header_counts.entry((*line).to_string()).or_insert(0) += 1;
                }
            }
            let tail_start = lines.len().saturating_sub(self.config.edge_lines);
            let mut seen_footers = HashSet::new();
            for line in lines.iter().skip(tail_start) {
                if seen_footers.insert(*line) {
                    *footer_counts.entry((*line).to_string()).or_insert(0) += 1;
                }
            }
        }

        let min_occurrences =
            (pages.len() as f64 * self.config.boilerplate_threshold).ceil() as usize;
        let qualify = |counts: HashMap<String, usize>| -> HashSet<String> {
            counts
                .into_iter()
                .filter(|(line, count)| {
                    *count >= min_occurrences && line.chars().count() >= self.config.min_line_chars
                })
                .map(|(line, _)| line)
                .collect()
        };

        (qualify(header_counts), qualify(footer_counts))
    }

    /// Drop boilerplate matches, but only where they were detected: within
    /// the first or last `edge_lines` non-blank lines of the page.
    fn strip_edges(
        &self,
        text: &str,
        headers: &HashSet<String>,
        footers: &HashSet<String>,
    ) -> String {
        if headers.is_empty() && footers.is_empty() {
            return text.to_string();
        }

        let lines: Vec<&str> = text.lines().collect();
        let content_indices: Vec<usize> = lines
            .iter()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(index, _)| index)
            .collect();

        let head: HashSet<usize> = content_indices
            .iter()
            .take(self.config.edge_lines)
            .copied()
            .collect();
        let tail: HashSet<usize> = content_indices
            .iter()
            .rev()
            .take(self.config.edge_lines)
            .copied()
            .collect();

        lines
            .iter()
            .enumerate()
            .filter(|(index, line)| {
                let trimmed = line.trim();
                if head.contains(index) && headers.contains(trimmed) {
                    return false;
                }
                if tail.contains(index) && footers.contains(trimmed) {
                    return false;
                }
                true
            })
            .map(|(_, line)| *line)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Common recognizer confusions seen in tax documents: `l`/`|` for `1`
    /// before digits, `0` for `O` inside words, spaced dollar signs, and
    /// spaced thousands separators.
    fn normalize_ocr_artifacts(&self, text: &str) -> String {
        let text = self.digit_confusion.replace_all(text, "1${1}");
        let text = self.letter_zero.replace_all(&text, "${1}O${2}");
        let text = self.currency_gap.replace_all(&text, "$$${1}");
        let text = self.thousands_gap.replace_all(&text, "${1},${2}");
        text.into_owned()
    }
}

/// Collapse runs of spaces/tabs and soft line wraps to single spaces;
/// blank-line paragraph breaks become single newlines.
pub fn collapse_whitespace(text: &str) -> String {
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(join_words(&current));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(join_words(&current));
    }

    paragraphs.join("\n")
}

fn join_words(lines: &[&str]) -> String {
    lines
        .iter()
        .flat_map(|line| line.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_page(number: u32, text: &str) -> SourcePage {
        SourcePage {
            page_number: number,
            text: text.to_string(),
            char_count: text.trim().chars().count(),
            ocr_applied: false,
            ocr_confidence: None,
        }
    }

    fn canonicalizer() -> Canonicalizer {
        Canonicalizer::new(CanonicalizeConfig::default()).unwrap()
    }

    #[test]
    fn whitespace_collapses_but_paragraph_breaks_survive() {
        let collapsed = collapse_whitespace("A  \t lot\nof   spacing\n\nNext paragraph");
        assert_eq!(collapsed, "A lot of spacing\nNext paragraph");
    }

    #[test]
    fn repeated_header_is_stripped_above_threshold() {
        let pages: Vec<SourcePage> = (1..=4)
            .map(|number| {
                source_page(
                    number,
                    &format!("Acme Tax Advisors LLP\n\nPage body {number} with details."),
                )
            })
            .collect();

        let canonical = canonicalizer().canonicalize(&pages);
        assert_eq!(canonical.len(), 4);
        for page in &canonical {
            assert!(!page.text.contains("Acme Tax Advisors LLP"));
            assert!(page.text.contains("Page body"));
        }
    }

    #[test]
    fn line_below_threshold_fraction_is_kept() {
        // The candidate header appears on 2 of 4 pages; under the default
        // 0.7 threshold it must survive.
        let mut pages = vec![
            source_page(1, "Quarterly Estimate\n\nBody one."),
            source_page(2, "Quarterly Estimate\n\nBody two."),
        ];
        pages.push(source_page(3, "Different heading\n\nBody three."));
        pages.push(source_page(4, "Another heading\n\nBody four."));

        let canonical = canonicalizer().canonicalize(&pages);
        assert!(canonical[0].text.contains("Quarterly Estimate"));
    }

    #[test]
    fn short_documents_are_never_stripped() {
        let pages = vec![
            source_page(1, "Repeated line here\n\nBody."),
            source_page(2, "Repeated line here\n\nBody."),
        ];
        let canonical = canonicalizer().canonicalize(&pages);
        assert!(canonical[0].text.contains("Repeated line here"));
        assert!(canonical[1].text.contains("Repeated line here"));
    }

    #[test]
    fn repeated_footer_is_only_removed_from_the_bottom_region() {
        let footer = "Confidential - Acme Tax Advisors";
        let pages: Vec<SourcePage> = (1..=4)
            .map(|number| {
                source_page(
                    number,
                    &format!(
                        "Opening paragraph {number} mentions {footer} mid-document.\n\
                         Body details for page {number} follow here.\n\
                         More narrative for page {number} in the middle.\n\
                         Closing notes for page {number} near the end.\n\
                         {footer}"
                    ),
                )
            })
            .collect();

        let canonical = canonicalizer().canonicalize(&pages);
        // The inline mention survives; the trailing footer line is gone.
        assert!(canonical[0].text.contains("mid-document"));
        assert!(!canonical[0].text.ends_with(footer));
    }

    #[test]
    fn page_count_and_numbers_are_preserved() {
        let pages = vec![
            source_page(1, "First"),
            source_page(2, ""),
            source_page(3, "Third"),
        ];
        let canonical = canonicalizer().canonicalize(&pages);
        assert_eq!(canonical.len(), 3);
        assert_eq!(canonical[1].page_number, 2);
        assert_eq!(canonical[1].text, "");
    }

    #[test]
    fn ocr_artifacts_are_normalized_only_on_ocr_pages() {
        let mut ocr_page = source_page(1, "Amount due: $ 1,234 for form W-2, box l2");
        ocr_page.ocr_applied = true;
        let native_page = source_page(2, "Amount due: $ 1,234 for form W-2, box l2");

        let canonical = canonicalizer().canonicalize(&[ocr_page, native_page]);
        assert!(canonical[0].text.contains("$1,234"));
        assert!(canonical[0].text.contains("box 12"));
        assert!(canonical[1].text.contains("$ 1,234"));
        assert!(canonical[1].text.contains("box l2"));
    }
}
