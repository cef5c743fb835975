//! Attachment text extraction.
//!
//! The attachment pipeline hands an extractor a file path and content
//! type and gets back plain UTF-8 text plus a metadata object. Two
//! implementations exist:
//!
//! - [`LocalExtractor`]: in-process, for PDF, DOCX, PPTX, XLSX and
//!   plain-text-like types.
//! - [`TikaExtractor`](crate::tika::TikaExtractor): Apache Tika server,
//!   for everything Tika understands.

use std::io::Read;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

const XLSX_MAX_SHEETS: usize = 100;
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Zip-bomb guard for a single archive entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Text pulled out of one attachment.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub content: String,
    /// JSON object stored alongside every chunk.
    pub meta: Value,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported content-type: {0}")]
    UnsupportedContentType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("Tika request failed: {0}")]
    Tika(String),
    #[error("Tika transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("extraction task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Turns an attachment file into searchable text.
#[async_trait]
pub trait AttachmentTextExtractor: Send + Sync {
    async fn extract(&self, path: &Path, content_type: &str) -> Result<Extracted, ExtractError>;
}

/// In-process extractor built on pdf-extract, zip and quick-xml.
#[derive(Debug, Default, Clone)]
pub struct LocalExtractor;

#[async_trait]
impl AttachmentTextExtractor for LocalExtractor {
    async fn extract(&self, path: &Path, content_type: &str) -> Result<Extracted, ExtractError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| ExtractError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let content_type = match content_type {
            "" | "application/octet-stream" => guess_content_type(path)
                .unwrap_or("application/octet-stream")
                .to_string(),
            ct => ct.to_string(),
        };

        let ct = content_type.clone();
        let content = tokio::task::spawn_blocking(move || extract_bytes(&bytes, &ct)).await??;

        Ok(Extracted {
            content,
            meta: json!({ "Content-Type": content_type, "X-Extractor": "local" }),
        })
    }
}

/// Content type implied by a file extension, for untyped uploads.
pub fn guess_content_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let ct = match ext.as_str() {
        "pdf" => MIME_PDF,
        "docx" => MIME_DOCX,
        "pptx" => MIME_PPTX,
        "xlsx" => MIME_XLSX,
        "txt" | "log" | "md" | "diff" | "patch" => "text/plain",
        "csv" => "text/csv",
        "json" => "application/json",
        "xml" => "application/xml",
        _ => return None,
    };
    Some(ct)
}

fn is_plain_text(content_type: &str) -> bool {
    content_type.starts_with("text/")
        || content_type == "application/json"
        || content_type == "application/xml"
        || content_type.ends_with("+json")
        || content_type.ends_with("+xml")
}

/// Extract plain text from `bytes` of the given content type.
pub fn extract_bytes(bytes: &[u8], content_type: &str) -> Result<String, ExtractError> {
    match content_type {
        MIME_PDF => {
            pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
        }
        MIME_DOCX => {
            let mut archive = open_archive(bytes)?;
            let xml = read_entry(&mut archive, "word/document.xml")?;
            collect_text_runs(&xml)
        }
        MIME_PPTX => {
            let mut archive = open_archive(bytes)?;
            let slides = numbered_entries(&archive, "ppt/slides/slide");
            let mut parts = Vec::with_capacity(slides.len());
            for name in slides {
                let xml = read_entry(&mut archive, &name)?;
                parts.push(collect_text_runs(&xml)?);
            }
            Ok(join_non_empty(parts))
        }
        MIME_XLSX => extract_xlsx(bytes),
        ct if is_plain_text(ct) => Ok(String::from_utf8_lossy(bytes).into_owned()),
        other => Err(ExtractError::UnsupportedContentType(other.to_string())),
    }
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_entry(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(format!(
            "{} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

/// Entries named `<prefix><n>.xml`, ordered by `n`.
fn numbered_entries(archive: &Archive<'_>, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .map(str::to_string)
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches(prefix)
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

/// Text of every `<w:t>` / `<a:t>` run, in document order. Runs inside
/// a paragraph are joined as written (they carry their own spaces);
/// paragraph ends, line breaks and tabs become a single space.
fn collect_text_runs(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut inside = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => inside = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => inside = false,
                b"p" => push_break(&mut out),
                _ => {}
            },
            Ok(Event::Empty(e)) if matches!(e.local_name().as_ref(), b"br" | b"tab" | b"cr") => {
                push_break(&mut out)
            }
            Ok(Event::Text(t)) if inside => {
                out.push_str(t.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim().to_string())
}

fn push_break(out: &mut String) {
    if !out.is_empty() && !out.ends_with(char::is_whitespace) {
        out.push(' ');
    }
}

fn join_non_empty(parts: Vec<String>) -> String {
    parts
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let shared: Vec<String> = match read_entry(&mut archive, "xl/sharedStrings.xml") {
        Ok(xml) => shared_strings(&xml)?,
        Err(_) => Vec::new(),
    };
    let sheets = numbered_entries(&archive, "xl/worksheets/sheet");
    let mut parts = Vec::new();
    for name in sheets.into_iter().take(XLSX_MAX_SHEETS) {
        let xml = read_entry(&mut archive, &name)?;
        parts.push(sheet_cells(&xml, &shared)?);
    }
    Ok(join_non_empty(parts))
}

fn shared_strings(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    use quick_xml::events::Event;

    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                _ => {}
            },
            Ok(Event::Text(t)) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(t.unescape().unwrap_or_default().as_ref());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.extend(current.take()),
                b"t" => in_t = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Cell values of one worksheet; shared-string cells are resolved,
/// inline and numeric values are kept as written.
fn sheet_cells(xml: &[u8], shared: &[String]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut cells: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut shared_cell = false;
    let mut in_value = false;
    while cells.len() < XLSX_MAX_CELLS_PER_SHEET {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    shared_cell = e.attributes().flatten().any(|a| {
                        a.key.as_ref() == b"t" && a.value.as_ref() == b"s"
                    });
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Text(t)) if in_value => {
                let raw = t.unescape().unwrap_or_default();
                let value = raw.trim();
                if shared_cell {
                    if let Some(s) = value.parse::<usize>().ok().and_then(|i| shared.get(i)) {
                        cells.push(s.trim().to_string());
                    }
                } else if !value.is_empty() {
                    cells.push(value.to_string());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => shared_cell = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(cells.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn ooxml(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut cursor);
            let opts = zip::write::SimpleFileOptions::default();
            for (name, body) in entries {
                zip.start_file(*name, opts).unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_unsupported_content_type() {
        let err = extract_bytes(b"\x00\x01", "application/octet-stream").unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedContentType(_)));
    }

    #[test]
    fn test_invalid_pdf() {
        let err = extract_bytes(b"not a pdf", MIME_PDF).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn test_invalid_zip() {
        let err = extract_bytes(b"not a zip", MIME_DOCX).unwrap_err();
        assert!(matches!(err, ExtractError::Ooxml(_)));
    }

    #[test]
    fn test_plain_text_types() {
        assert_eq!(extract_bytes(b"stack trace", "text/plain").unwrap(), "stack trace");
        assert_eq!(extract_bytes(b"{\"a\":1}", "application/json").unwrap(), "{\"a\":1}");
        assert_eq!(extract_bytes(b"caf\xff", "text/csv").unwrap(), "caf\u{fffd}");
    }

    #[test]
    fn test_docx_text() {
        let bytes = ooxml(&[(
            "word/document.xml",
            r#"<w:document xmlns:w="w"><w:body><w:p><w:r><w:t>Disk </w:t></w:r><w:r><w:t>full</w:t></w:r></w:p></w:body></w:document>"#,
        )]);
        assert_eq!(extract_bytes(&bytes, MIME_DOCX).unwrap(), "Disk full");
    }

    #[test]
    fn test_docx_paragraphs_stay_separate_words() {
        let bytes = ooxml(&[(
            "word/document.xml",
            r#"<w:document xmlns:w="w"><w:body>
<w:p><w:r><w:t>database connection</w:t></w:r></w:p>
<w:p><w:r><w:t xml:space="preserve">timeout </w:t></w:r><w:r><w:t>occurred</w:t><w:br/><w:t>after</w:t><w:tab/><w:t>retry</w:t></w:r></w:p>
</w:body></w:document>"#,
        )]);
        assert_eq!(
            extract_bytes(&bytes, MIME_DOCX).unwrap(),
            "database connection timeout occurred after retry"
        );
    }

    #[test]
    fn test_pptx_paragraphs_within_slide() {
        let bytes = ooxml(&[(
            "ppt/slides/slide1.xml",
            r#"<p:sld xmlns:a="a" xmlns:p="p"><a:p><a:r><a:t>Root cause</a:t></a:r></a:p><a:p><a:r><a:t>Deadlock</a:t></a:r></a:p></p:sld>"#,
        )]);
        assert_eq!(extract_bytes(&bytes, MIME_PPTX).unwrap(), "Root cause Deadlock");
    }

    #[test]
    fn test_pptx_slides_in_order() {
        let bytes = ooxml(&[
            ("ppt/slides/slide10.xml", r#"<p:sld xmlns:a="a"><a:t>ten</a:t></p:sld>"#),
            ("ppt/slides/slide2.xml", r#"<p:sld xmlns:a="a"><a:t>two</a:t></p:sld>"#),
        ]);
        assert_eq!(extract_bytes(&bytes, MIME_PPTX).unwrap(), "two ten");
    }

    #[test]
    fn test_xlsx_cells() {
        let bytes = ooxml(&[
            (
                "xl/sharedStrings.xml",
                r#"<sst><si><t>timeout</t></si><si><t>retry</t></si></sst>"#,
            ),
            (
                "xl/worksheets/sheet1.xml",
                r#"<worksheet><sheetData><row><c t="s"><v>1</v></c><c><v>42</v></c><c t="s"><v>0</v></c></row></sheetData></worksheet>"#,
            ),
        ]);
        assert_eq!(extract_bytes(&bytes, MIME_XLSX).unwrap(), "retry 42 timeout");
    }

    #[test]
    fn test_xlsx_rich_text_runs_keep_spaces() {
        let bytes = ooxml(&[
            (
                "xl/sharedStrings.xml",
                r#"<sst><si><r><t xml:space="preserve">disk </t></r><r><t>full</t></r></si></sst>"#,
            ),
            (
                "xl/worksheets/sheet1.xml",
                r#"<worksheet><sheetData><row><c t="s"><v>0</v></c></row></sheetData></worksheet>"#,
            ),
        ]);
        assert_eq!(extract_bytes(&bytes, MIME_XLSX).unwrap(), "disk full");
    }

    #[test]
    fn test_guess_content_type() {
        assert_eq!(guess_content_type(Path::new("a/b/report.PDF")), Some(MIME_PDF));
        assert_eq!(guess_content_type(Path::new("trace.log")), Some("text/plain"));
        assert_eq!(guess_content_type(Path::new("blob")), None);
    }

    #[tokio::test]
    async fn test_local_extractor_reads_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "kernel panic at boot").unwrap();

        let out = LocalExtractor.extract(&path, "").await.unwrap();
        assert_eq!(out.content, "kernel panic at boot");
        assert_eq!(out.meta["Content-Type"], "text/plain");

        let err = LocalExtractor
            .extract(&dir.path().join("missing.txt"), "text/plain")
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Io { .. }));
    }
}
