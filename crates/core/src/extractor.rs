//! Format-specific text extraction.
//!
//! One extractor per supported format, selected by a `DocumentFormat` tag
//! at the pipeline entry point. Extractors record every page, including
//! pages with zero extractable characters, so the OCR decider can spot
//! image-only pages.

use crate::error::IngestError;
use crate::models::DocumentFormat;
use calamine::{Data, Reader, Xlsx};
use docx_rs::{DocumentChild, ParagraphChild, RunChild, TableCellContent, TableChild, TableRowChild};
use lopdf::Document;
use std::io::Cursor;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RawPage {
    pub page_number: u32,
    pub text: String,
    pub char_count: usize,
}

impl RawPage {
    fn new(page_number: u32, text: String) -> Self {
        let char_count = text.trim().chars().count();
        Self {
            page_number,
            text,
            char_count,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub pages: Vec<RawPage>,
    pub total_bytes: u64,
}

pub trait TextExtractor: Send + Sync {
    fn format(&self) -> DocumentFormat;

    fn extract(&self, bytes: &[u8]) -> Result<ExtractedDocument, IngestError>;
}

/// The extractor handling a given format tag.
pub fn extractor_for(format: DocumentFormat) -> Box<dyn TextExtractor> {
    match format {
        DocumentFormat::Pdf => Box::new(PdfTextExtractor),
        DocumentFormat::Docx => Box::new(DocxTextExtractor),
        DocumentFormat::Xlsx => Box::new(XlsxTextExtractor),
    }
}

fn corrupt(format: DocumentFormat, details: impl ToString) -> IngestError {
    IngestError::UnsupportedOrCorruptFile {
        format: format.as_str().to_string(),
        details: details.to_string(),
    }
}

/// Per-page PDF extraction via lopdf. A page whose own text extraction
/// fails is recorded empty rather than failing the document; only a
/// document-level parse failure is fatal.
#[derive(Default)]
pub struct PdfTextExtractor;

impl TextExtractor for PdfTextExtractor {
    fn format(&self) -> DocumentFormat {
        DocumentFormat::Pdf
    }

    fn extract(&self, bytes: &[u8]) -> Result<ExtractedDocument, IngestError> {
        let document =
            Document::load_mem(bytes).map_err(|error| corrupt(DocumentFormat::Pdf, error))?;

        let page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
        if page_numbers.is_empty() {
            return Err(corrupt(DocumentFormat::Pdf, "pdf has no pages"));
        }

        let mut pages = Vec::with_capacity(page_numbers.len());
        for page_number in page_numbers {
            let text = match document.extract_text(&[page_number]) {
                Ok(text) => text,
                Err(error) => {
                    warn!(page = page_number, %error, "page text extraction failed, recording empty page");
                    String::new()
                }
            };
            pages.push(RawPage::new(page_number, text));
        }

        Ok(ExtractedDocument {
            pages,
            total_bytes: bytes.len() as u64,
        })
    }
}

/// DOCX body extraction via docx-rs: paragraphs and table cell text in
/// document order, as a single logical page.
#[derive(Default)]
pub struct DocxTextExtractor;

impl TextExtractor for DocxTextExtractor {
    fn format(&self) -> DocumentFormat {
        DocumentFormat::Docx
    }

    fn extract(&self, bytes: &[u8]) -> Result<ExtractedDocument, IngestError> {
        let docx =
            docx_rs::read_docx(bytes).map_err(|error| corrupt(DocumentFormat::Docx, error))?;

        let mut blocks: Vec<String> = Vec::new();
        for child in &docx.document.children {
            match child {
                DocumentChild::Paragraph(paragraph) => {
                    let text = paragraph_text(paragraph);
                    if !text.is_empty() {
                        blocks.push(text);
                    }
                }
                DocumentChild::Table(table) => {
                    for row_text in table_rows(table) {
                        blocks.push(row_text);
                    }
                }
                _ => {}
            }
        }

        let text = blocks.join("\n\n");
        Ok(ExtractedDocument {
            pages: vec![RawPage::new(1, text)],
            total_bytes: bytes.len() as u64,
        })
    }
}

fn paragraph_text(paragraph: &docx_rs::Paragraph) -> String {
    let mut out = String::new();
    for child in &paragraph.children {
        if let ParagraphChild::Run(run) = child {
            for run_child in &run.children {
                match run_child {
                    RunChild::Text(text) => out.push_str(&text.text),
                    RunChild::Tab(_) => out.push(' '),
                    _ => {}
                }
            }
        }
    }
    out.trim().to_string()
}

fn table_rows(table: &docx_rs::Table) -> Vec<String> {
    let mut rows = Vec::new();
    for table_child in &table.rows {
        let TableChild::TableRow(row) = table_child;
        let mut cells = Vec::new();
        for row_child in &row.cells {
            let TableRowChild::TableCell(cell) = row_child;
            let mut cell_text = String::new();
            for content in &cell.children {
                if let TableCellContent::Paragraph(paragraph) = content {
                    let text = paragraph_text(paragraph);
                    if !text.is_empty() {
                        if !cell_text.is_empty() {
                            cell_text.push(' ');
                        }
                        cell_text.push_str(&text);
                    }
                }
            }
            if !cell_text.is_empty() {
                cells.push(cell_text);
            }
        }
        if !cells.is_empty() {
            rows.push(cells.join(" "));
        }
    }
    rows
}

/// XLSX extraction via calamine: one page per sheet, cells serialized
/// row-major and whitespace-joined, empty cells skipped.
#[derive(Default)]
pub struct XlsxTextExtractor;

impl TextExtractor for XlsxTextExtractor {
    fn format(&self) -> DocumentFormat {
        DocumentFormat::Xlsx
    }

    fn extract(&self, bytes: &[u8]) -> Result<ExtractedDocument, IngestError> {
        let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes.to_vec()))
            .map_err(|error| corrupt(DocumentFormat::Xlsx, error))?;

        let sheet_names = workbook.sheet_names().to_owned();
        if sheet_names.is_empty() {
            return Err(corrupt(DocumentFormat::Xlsx, "workbook has no sheets"));
        }

        let mut pages = Vec::with_capacity(sheet_names.len());
        for (index, name) in sheet_names.iter().enumerate() {
            let range = workbook
                .worksheet_range(name)
                .map_err(|error| corrupt(DocumentFormat::Xlsx, error))?;

            let mut lines = Vec::new();
            for row in range.rows() {
                let cells: Vec<String> = row
                    .iter()
                    .filter(|cell| !matches!(cell, Data::Empty))
                    .map(|cell| cell.to_string())
                    .filter(|value| !value.trim().is_empty())
                    .collect();
                if !cells.is_empty() {
                    lines.push(cells.join(" "));
                }
            }

            pages.push(RawPage::new(index as u32 + 1, lines.join("\n")));
        }

        Ok(ExtractedDocument {
            pages,
            total_bytes: bytes.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docx_rs::{Docx, Paragraph, Run};

    #[test]
    fn extractor_selection_follows_format_tag() {
        assert_eq!(extractor_for(DocumentFormat::Pdf).format(), DocumentFormat::Pdf);
        assert_eq!(extractor_for(DocumentFormat::Docx).format(), DocumentFormat::Docx);
        assert_eq!(extractor_for(DocumentFormat::Xlsx).format(), DocumentFormat::Xlsx);
    }

    #[test]
    fn corrupt_pdf_is_fatal() {
        let result = PdfTextExtractor.extract(b"%PDF-1.4\n%broken");
        assert!(matches!(
            result,
            Err(IngestError::UnsupportedOrCorruptFile { .. })
        ));
    }

    #[test]
    fn corrupt_docx_is_fatal() {
        let result = DocxTextExtractor.extract(b"not a zip archive");
        assert!(matches!(
            result,
            Err(IngestError::UnsupportedOrCorruptFile { .. })
        ));
    }

    #[test]
    fn corrupt_xlsx_is_fatal() {
        let result = XlsxTextExtractor.extract(b"not a zip archive");
        assert!(matches!(
            result,
            Err(IngestError::UnsupportedOrCorruptFile { .. })
        ));
    }

    #[test]
    fn docx_body_is_a_single_logical_page() {
        let docx = Docx::new()
            .add_paragraph(Paragraph::new().add_run(Run::new().add_text("Engagement letter")))
            .add_paragraph(Paragraph::new().add_run(Run::new().add_text("Tax year 2025")));

        let mut buffer = Cursor::new(Vec::new());
        docx.build().pack(&mut buffer).expect("pack docx");
        let bytes = buffer.into_inner();

        let extracted = DocxTextExtractor.extract(&bytes).expect("extract docx");
        assert_eq!(extracted.pages.len(), 1);
        assert_eq!(extracted.pages[0].page_number, 1);
        assert!(extracted.pages[0].text.contains("Engagement letter"));
        assert!(extracted.pages[0].text.contains("Tax year 2025"));
        assert!(extracted.pages[0].char_count > 0);
        assert_eq!(extracted.total_bytes, bytes.len() as u64);
    }

    #[test]
    fn raw_page_counts_trimmed_characters() {
        let page = RawPage::new(1, "  \n\t ".to_string());
        assert_eq!(page.char_count, 0);

        let page = RawPage::new(2, " abc ".to_string());
        assert_eq!(page.char_count, 3);
    }
}
