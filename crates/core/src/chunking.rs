//! Splits canonical pages into overlapping token-bounded chunks.
//!
//! The chunker walks pages in order, accumulating whole paragraphs until
//! the running token estimate reaches the target range, then emits a chunk
//! and seeds the next one with the tail of the previous chunk (sliding
//! window). A paragraph is never split unless it alone exceeds the hard
//! cap, in which case it is force-split with overlap. The overlap seed is
//! always an exact suffix of the previous chunk's text, so the
//! concatenation of chunks (overlap deduplicated) reconstructs the
//! canonical text losslessly.

use crate::canonicalize::CanonicalPage;
use crate::config::ChunkingConfig;
use crate::error::IngestError;
use crate::models::Chunk;
use regex::Regex;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Rough chars-per-token factor used for all token estimates.
pub const CHARS_PER_TOKEN: usize = 4;

pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

#[derive(Debug, Clone)]
struct Paragraph {
    page: u32,
    is_ocr: bool,
    text: String,
}

#[derive(Debug)]
struct ChunkBuilder {
    text: String,
    start_page: u32,
    end_page: u32,
    any_ocr: bool,
    last_ocr: bool,
    /// Whether anything beyond the overlap seed has been appended. A
    /// builder holding only seed text is never emitted.
    has_new: bool,
    started: bool,
}

impl ChunkBuilder {
    fn empty() -> Self {
        Self {
            text: String::new(),
            start_page: 0,
            end_page: 0,
            any_ocr: false,
            last_ocr: false,
            has_new: false,
            started: false,
        }
    }

    fn seeded(seed: String, page: u32, is_ocr: bool) -> Self {
        if seed.is_empty() {
            return Self::empty();
        }
        Self {
            text: seed,
            start_page: page,
            end_page: page,
            any_ocr: is_ocr,
            last_ocr: is_ocr,
            has_new: false,
            started: true,
        }
    }

    fn append(&mut self, paragraph: &Paragraph) {
        if self.started {
            self.text.push('\n');
        } else {
            self.start_page = paragraph.page;
            self.started = true;
        }
        self.text.push_str(&paragraph.text);
        self.end_page = paragraph.page;
        self.any_ocr |= paragraph.is_ocr;
        self.last_ocr = paragraph.is_ocr;
        self.has_new = true;
    }

    fn tokens(&self) -> usize {
        estimate_tokens(&self.text)
    }
}

pub fn chunk_pages(
    document_id: Uuid,
    pages: &[CanonicalPage],
    config: &ChunkingConfig,
) -> Result<Vec<Chunk>, IngestError> {
    config.validate()?;

    let heading = Regex::new(r"^(#{1,6}\s+.+|[A-Z][A-Z0-9 ,&\-/]{5,})$")?;
    let hard_max = config.hard_max_tokens();
    let window_chars = hard_max * CHARS_PER_TOKEN;
    let overlap_chars = config.overlap_tokens * CHARS_PER_TOKEN;

    // Empty pages contribute no paragraphs but their numbers still appear
    // in chunk ranges whenever a chunk spans across them.
    let mut paragraphs = Vec::new();
    for page in pages {
        for text in page.text.split('\n') {
            if !text.trim().is_empty() {
                paragraphs.push(Paragraph {
                    page: page.page_number,
                    is_ocr: page.ocr_applied,
                    text: text.to_string(),
                });
            }
        }
    }

    let mut chunks: Vec<Chunk> = Vec::new();
    let mut current = ChunkBuilder::empty();
    let mut index: u64 = 0;

    for paragraph in &paragraphs {
        let paragraph_tokens = estimate_tokens(&paragraph.text);

        if paragraph_tokens > hard_max {
            if current.has_new {
                let done = std::mem::replace(&mut current, ChunkBuilder::empty());
                index = push_chunk(&mut chunks, document_id, index, done, &heading);
            }

            let pieces = force_split(&paragraph.text, window_chars, overlap_chars);
            let mut last_piece = String::new();
            for piece in pieces {
                let builder = ChunkBuilder {
                    text: piece.clone(),
                    start_page: paragraph.page,
                    end_page: paragraph.page,
                    any_ocr: paragraph.is_ocr,
                    last_ocr: paragraph.is_ocr,
                    has_new: true,
                    started: true,
                };
                index = push_chunk(&mut chunks, document_id, index, builder, &heading);
                last_piece = piece;
            }

            current = ChunkBuilder::seeded(
                overlap_suffix(&last_piece, overlap_chars),
                paragraph.page,
                paragraph.is_ocr,
            );
            continue;
        }

        if !current.started {
            current.append(paragraph);
            continue;
        }

        let tokens = current.tokens();
        let prospective = tokens + paragraph_tokens;
        let must_flush = prospective > hard_max
            || (tokens >= config.target_min_tokens && prospective > config.target_max_tokens);

        if must_flush {
            if current.has_new {
                let done = std::mem::replace(&mut current, ChunkBuilder::empty());
                let seed = overlap_suffix(&done.text, overlap_chars);
                let seed_page = done.end_page;
                let seed_ocr = done.last_ocr;
                index = push_chunk(&mut chunks, document_id, index, done, &heading);
                current = ChunkBuilder::seeded(seed, seed_page, seed_ocr);
                if current.started && current.tokens() + paragraph_tokens > hard_max {
                    current = ChunkBuilder::empty();
                }
            } else {
                // Only an overlap seed is present and it cannot host this
                // paragraph; drop the seed.
                current = ChunkBuilder::empty();
            }
        }

        current.append(paragraph);
    }

    if current.has_new {
        push_chunk(&mut chunks, document_id, index, current, &heading);
    }

    Ok(chunks)
}

fn push_chunk(
    chunks: &mut Vec<Chunk>,
    document_id: Uuid,
    index: u64,
    builder: ChunkBuilder,
    heading: &Regex,
) -> u64 {
    let token_count = estimate_tokens(&builder.text);
    let first_line = builder.text.lines().next().unwrap_or("").trim();
    let section_header = if heading.is_match(first_line) {
        Some(first_line.chars().take(255).collect())
    } else {
        None
    };

    let chunk_id = make_chunk_id(document_id, index, &builder.text);
    chunks.push(Chunk {
        chunk_id,
        document_id,
        chunk_index: index,
        content: builder.text,
        page_start: builder.start_page,
        page_end: builder.end_page,
        token_count,
        is_ocr: builder.any_ocr,
        section_header,
    });
    index + 1
}

pub fn make_chunk_id(document_id: Uuid, index: u64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(index.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Exact suffix of `text` covering roughly `overlap_chars`, advanced to a
/// word boundary when one falls inside the window.
fn overlap_suffix(text: &str, overlap_chars: usize) -> String {
    if overlap_chars == 0 {
        return String::new();
    }
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= overlap_chars {
        return text.to_string();
    }

    let mut start = chars.len() - overlap_chars;
    let mut aligned = start;
    while aligned < chars.len() && !chars[aligned - 1].is_whitespace() {
        aligned += 1;
    }
    if aligned < chars.len() {
        start = aligned;
    }
    chars[start..].iter().collect()
}

fn force_split(text: &str, window_chars: usize, overlap_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let step = window_chars.saturating_sub(overlap_chars).max(1);

    let mut pieces = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + window_chars).min(chars.len());
        pieces.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    pieces
}
