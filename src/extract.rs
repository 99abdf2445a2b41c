//! Text extraction for source documents (PDF, EPUB).
//!
//! The [`TextExtractor`] trait is the seam between the pipeline and the
//! format codecs: the cache supplies a [`SourceLocator`], this module returns
//! normalized plain UTF-8 text. Extraction is synchronous; the cache runs it
//! on a blocking task under a timeout.

use std::io::Read;
use std::path::PathBuf;

use crate::error::ExtractionError;
use crate::models::SourceFormat;

/// Files smaller than this are almost certainly empty or truncated.
const MIN_FILE_SIZE_BYTES: u64 = 100;

const PDF_MAGIC: &[u8] = b"%PDF";
/// EPUB containers are ZIP archives.
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Maximum decompressed bytes to read from a single EPUB entry (zip-bomb
/// protection).
const MAX_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Where a document's bytes live and how to decode them.
#[derive(Debug, Clone)]
pub struct SourceLocator {
    pub path: PathBuf,
    pub format: SourceFormat,
}

/// Turns a source document into normalized plain text.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, locator: &SourceLocator) -> Result<String, ExtractionError>;
}

/// Default extractor reading from the local filesystem.
pub struct FileExtractor {
    max_file_size_bytes: u64,
}

impl FileExtractor {
    pub fn new(max_file_size_mb: u64) -> Self {
        Self {
            max_file_size_bytes: max_file_size_mb * 1024 * 1024,
        }
    }
}

impl TextExtractor for FileExtractor {
    fn extract(&self, locator: &SourceLocator) -> Result<String, ExtractionError> {
        let meta = std::fs::metadata(&locator.path)?;
        if meta.len() < MIN_FILE_SIZE_BYTES {
            return Err(ExtractionError::FileTooSmall(meta.len()));
        }
        if meta.len() > self.max_file_size_bytes {
            return Err(ExtractionError::FileTooLarge {
                size: meta.len(),
                limit: self.max_file_size_bytes,
            });
        }

        let bytes = std::fs::read(&locator.path)?;
        let raw = match locator.format {
            SourceFormat::Pdf => {
                if !bytes.starts_with(PDF_MAGIC) {
                    return Err(ExtractionError::BadMagic("PDF"));
                }
                extract_pdf(&bytes)?
            }
            SourceFormat::Epub => {
                if !bytes.starts_with(ZIP_MAGIC) {
                    return Err(ExtractionError::BadMagic("EPUB"));
                }
                extract_epub(&bytes)?
            }
        };

        let text = normalize_text(&raw);
        if text.is_empty() {
            return Err(ExtractionError::NoText);
        }
        Ok(text)
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractionError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractionError::Pdf(e.to_string()))
}

/// Pull text from every XHTML content entry of the EPUB container, in
/// package order. Block-level elements become paragraph breaks.
fn extract_epub(bytes: &[u8]) -> Result<String, ExtractionError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractionError::Epub(e.to_string()))?;

    let mut content_names: Vec<String> = archive
        .file_names()
        .filter(|n| {
            let lower = n.to_lowercase();
            lower.ends_with(".xhtml") || lower.ends_with(".html") || lower.ends_with(".htm")
        })
        .map(|s| s.to_string())
        .collect();
    content_names.sort();

    if content_names.is_empty() {
        return Err(ExtractionError::Epub(
            "no XHTML content entries found".to_string(),
        ));
    }

    let mut out = String::new();
    for name in content_names {
        let entry = archive
            .by_name(&name)
            .map_err(|e| ExtractionError::Epub(e.to_string()))?;
        let mut xml = Vec::new();
        entry
            .take(MAX_ENTRY_BYTES)
            .read_to_end(&mut xml)
            .map_err(|e| ExtractionError::Epub(e.to_string()))?;
        if xml.len() as u64 >= MAX_ENTRY_BYTES {
            return Err(ExtractionError::Epub(format!(
                "entry {name} exceeds size limit ({MAX_ENTRY_BYTES} bytes)"
            )));
        }
        let text = extract_xhtml_text(&xml)?;
        if !text.trim().is_empty() {
            if !out.is_empty() {
                out.push_str("\n\n");
            }
            out.push_str(&text);
        }
    }
    Ok(out)
}

/// Elements whose close marks a paragraph break in the flattened text.
fn is_block_element(name: &[u8]) -> bool {
    matches!(
        name,
        b"p" | b"div"
            | b"h1"
            | b"h2"
            | b"h3"
            | b"h4"
            | b"h5"
            | b"h6"
            | b"li"
            | b"blockquote"
            | b"section"
    )
}

fn extract_xhtml_text(xml: &[u8]) -> Result<String, ExtractionError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    // EPUB content is often HTML-ish rather than strict XML
    reader.config_mut().check_end_names = false;
    let mut buf = Vec::new();
    let mut skip_depth = 0usize;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                let name = e.local_name();
                if matches!(name.as_ref(), b"script" | b"style" | b"head") {
                    skip_depth += 1;
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                let name = e.local_name();
                if matches!(name.as_ref(), b"script" | b"style" | b"head") {
                    skip_depth = skip_depth.saturating_sub(1);
                } else if is_block_element(name.as_ref()) && !out.ends_with("\n\n") && !out.is_empty()
                {
                    out.push_str("\n\n");
                }
            }
            Ok(quick_xml::events::Event::Empty(e)) => {
                if e.local_name().as_ref() == b"br" && !out.ends_with('\n') && !out.is_empty() {
                    out.push('\n');
                }
            }
            Ok(quick_xml::events::Event::Text(t)) if skip_depth == 0 => {
                let piece = t.unescape().unwrap_or_default();
                let piece = piece.trim();
                if !piece.is_empty() {
                    if !out.is_empty() && !out.ends_with(char::is_whitespace) {
                        out.push(' ');
                    }
                    out.push_str(piece);
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractionError::Epub(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

/// Clean up raw extracted text: unify newlines, collapse runs of spaces,
/// rejoin words hyphenated across line breaks, and squash blank-line runs so
/// paragraph boundaries are exactly one blank line.
pub fn normalize_text(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n").replace('\r', "\n");

    // Rejoin hyphenated line breaks: "exam-\nple" -> "example"
    let mut joined = String::with_capacity(unified.len());
    let mut chars = unified.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '-' {
            // Peek past the newline run for a lowercase continuation
            let mut lookahead = chars.clone();
            let mut saw_newline = false;
            while matches!(lookahead.peek(), Some('\n') | Some(' ') | Some('\t')) {
                if lookahead.peek() == Some(&'\n') {
                    saw_newline = true;
                }
                lookahead.next();
            }
            if saw_newline && matches!(lookahead.peek(), Some(next) if next.is_lowercase()) {
                chars = lookahead;
                continue;
            }
        }
        joined.push(c);
    }

    // Per-line whitespace cleanup, then rebuild with single blank lines
    let mut lines: Vec<String> = Vec::new();
    for line in joined.split('\n') {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if !collapsed.is_empty() {
            lines.push(collapsed);
        } else if lines.last().is_some_and(|l| !l.is_empty()) {
            lines.push(String::new());
        }
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }

    lines.join("\n").trim().to_string()
}
