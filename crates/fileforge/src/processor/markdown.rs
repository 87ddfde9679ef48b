//! Markdown converter.
//!
//! Accepts DOCX, HTML, PDF and plain text/markdown inputs, converts each to
//! a markdown section and joins the sections with a horizontal rule into one
//! document. Conversion is deliberately lenient: a file that fails to parse
//! becomes a warning and the remaining files still convert; the job only
//! fails when no input yields a section. A `meta.json` summary (stats,
//! warnings, timing) is written next to the output for inspection but is
//! informational only, never a declared output.
//!
//! DOCX is read straight from `word/document.xml` inside the archive; HTML
//! goes through a small tag-to-markdown event walk; PDF text comes from the
//! page content streams, with a warning when extraction yields almost
//! nothing (scanned documents).

use std::io::Read;
use std::path::Path;
use std::time::Instant;

use chrono::Utc;
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::ProcessError;
use crate::sanitize;

use super::{output_key, OutputFile, ProcessContext, ProcessResult, Processor};

const DEFAULT_OUTPUT_NAME: &str = "output.md";
const SECTION_SEPARATOR: &str = "\n\n---\n\n";

/// Extractions shorter than this are probably scanned/image-only PDFs.
const SHORT_TEXT_THRESHOLD: usize = 100;

pub struct MarkdownProcessor;

impl Processor for MarkdownProcessor {
    fn slug(&self) -> &'static str {
        "markdown-converter"
    }

    fn process(&self, ctx: &ProcessContext) -> Result<ProcessResult, ProcessError> {
        let _span = tracing::info_span!("processor.markdown", job_id = %ctx.job_id).entered();
        let started = Instant::now();

        let mut sections: Vec<String> = Vec::new();
        let mut source_names: Vec<String> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();

        for path in &ctx.input_files {
            let filename = sanitize::redact_path(path);
            source_names.push(filename.clone());
            let extension = path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("")
                .to_lowercase();

            let converted = match extension.as_str() {
                "md" | "markdown" | "txt" => read_text(path),
                "html" | "htm" => read_text(path).map(|html| html_to_markdown(&html)),
                "docx" => extract_docx(path),
                "pdf" => extract_pdf(path),
                other => {
                    let warning =
                        format!("Unsupported file type '{}', skipped: {}", other, filename);
                    tracing::warn!("{}", warning);
                    warnings.push(warning);
                    continue;
                }
            };

            match converted {
                Ok(text) => {
                    if extension == "pdf" && text.chars().count() < SHORT_TEXT_THRESHOLD {
                        let warning = format!(
                            "Very little text extracted from {}; it may be a scanned document",
                            filename
                        );
                        tracing::warn!("{}", warning);
                        warnings.push(warning);
                    }
                    sections.push(text.trim().to_string());
                }
                // A broken file becomes a warning; the remaining inputs still
                // convert.
                Err(e) => {
                    let warning = format!("Failed to process {}: {}", filename, e);
                    tracing::warn!("{}", warning);
                    warnings.push(warning);
                }
            }
        }

        if sections.is_empty() {
            return Err(ProcessError::NoValidInput);
        }

        let body = sections.join(SECTION_SEPARATOR);
        let front_matter = ctx.param_bool("frontMatter") != Some(false);
        let content = if front_matter {
            format!(
                "---\njob_id: {}\nconverted_at: {}\nsource_files: {}\n---\n\n{}",
                ctx.job_id,
                Utc::now().to_rfc3339(),
                source_names.join(", "),
                body
            )
        } else {
            body
        };

        let filename = sanitize::safe_filename(
            ctx.param_str("outputName").unwrap_or(DEFAULT_OUTPUT_NAME),
        );
        let output_path = ctx.working_dir.join(&filename);
        std::fs::write(&output_path, &content).map_err(|e| ProcessError::WriteOutput {
            path: output_path.clone(),
            source: e,
        })?;

        let meta = serde_json::json!({
            "status": "completed",
            "tool": {
                "name": self.slug(),
                "version": env!("CARGO_PKG_VERSION"),
            },
            "stats": {
                "char_count": content.chars().count(),
                "file_count": sections.len(),
            },
            "warnings": warnings,
            "timing_ms": {
                "total": started.elapsed().as_millis() as u64,
            },
        });
        let meta_path = ctx.working_dir.join("meta.json");
        std::fs::write(&meta_path, serde_json::to_vec_pretty(&meta).unwrap_or_default())
            .map_err(|e| ProcessError::WriteOutput {
                path: meta_path,
                source: e,
            })?;

        Ok(ProcessResult {
            outputs: vec![OutputFile {
                storage_key: output_key(&ctx.job_id, &filename),
                filename,
                mime_type: "text/markdown".to_string(),
            }],
            warnings,
        })
    }
}

fn read_text(path: &Path) -> Result<String, ProcessError> {
    std::fs::read_to_string(path).map_err(|e| ProcessError::ReadInput {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Extracts paragraph text from the main document part of a DOCX archive.
fn extract_docx(path: &Path) -> Result<String, ProcessError> {
    let filename = sanitize::redact_path(path);

    let file = std::fs::File::open(path).map_err(|e| ProcessError::ReadInput {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| ProcessError::FileFailed {
        filename: filename.clone(),
        reason: format!("not a valid DOCX archive: {}", e),
    })?;

    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| ProcessError::FileFailed {
            filename: filename.clone(),
            reason: format!("missing word/document.xml: {}", e),
        })?
        .read_to_string(&mut xml)
        .map_err(|e| ProcessError::FileFailed {
            filename: filename.clone(),
            reason: format!("failed to read word/document.xml: {}", e),
        })?;

    let mut reader = Reader::from_str(&xml);
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event() {
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"w:t" => in_text = true,
                b"w:tab" => current.push('\t'),
                b"w:br" => current.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"w:tab" => current.push('\t'),
                b"w:br" => current.push('\n'),
                _ => {}
            },
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" => {
                    if !current.trim().is_empty() {
                        paragraphs.push(current.trim_end().to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Text(e)) if in_text => current.push_str(&unescape_text(&e)),
            Ok(_) => {}
            Err(e) => {
                return Err(ProcessError::DocxProcessing(format!(
                    "malformed document XML in {}: {}",
                    filename, e
                )));
            }
        }
    }

    Ok(paragraphs.join("\n\n"))
}

fn extract_pdf(path: &Path) -> Result<String, ProcessError> {
    let filename = sanitize::redact_path(path);

    let doc = lopdf::Document::load(path).map_err(|e| ProcessError::FileFailed {
        filename: filename.clone(),
        reason: format!("failed to load PDF: {}", e),
    })?;

    let pages: Vec<u32> = doc.get_pages().keys().copied().collect();
    let text = doc
        .extract_text(&pages)
        .map_err(|e| ProcessError::FileFailed {
            filename,
            reason: format!("failed to extract text: {}", e),
        })?;

    Ok(text)
}

fn unescape_text(e: &quick_xml::events::BytesText) -> String {
    match e.xml_content() {
        Ok(t) => t.into_owned(),
        Err(_) => String::from_utf8_lossy(e.as_ref()).into_owned(),
    }
}

fn attribute(e: &quick_xml::events::BytesStart, name: &str) -> String {
    match e.try_get_attribute(name) {
        Ok(Some(attr)) => match attr.unescape_value() {
            Ok(v) => v.into_owned(),
            Err(_) => String::from_utf8_lossy(&attr.value).into_owned(),
        },
        _ => String::new(),
    }
}

/// Best-effort HTML to markdown conversion.
///
/// Covers the block and inline elements that matter for document content:
/// headings, paragraphs, lists, links, images, emphasis, code and
/// blockquotes. Unknown tags pass through as their text content.
pub(crate) fn html_to_markdown(html: &str) -> String {
    let mut reader = Reader::from_str(html);
    // Real-world HTML: unmatched and mis-nested closers are the norm.
    reader.config_mut().check_end_names = false;

    let mut out = String::new();
    // None entry = unordered list level, Some(n) = ordered with counter.
    let mut lists: Vec<Option<u64>> = Vec::new();
    let mut links: Vec<String> = Vec::new();
    let mut in_pre = false;
    let mut skip_depth: usize = 0;

    loop {
        let event = match reader.read_event() {
            Ok(Event::Eof) => break,
            Ok(event) => event,
            Err(_) => break,
        };

        match event {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_lowercase();
                match name.as_str() {
                    "script" | "style" | "head" => skip_depth += 1,
                    _ if skip_depth > 0 => {}
                    "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                        ensure_blank_line(&mut out);
                        let level = name.as_bytes()[1] - b'0';
                        for _ in 0..level {
                            out.push('#');
                        }
                        out.push(' ');
                    }
                    "p" | "div" => ensure_blank_line(&mut out),
                    "br" => out.push('\n'),
                    "strong" | "b" => out.push_str("**"),
                    "em" | "i" => out.push('*'),
                    "code" if !in_pre => out.push('`'),
                    "pre" => {
                        ensure_blank_line(&mut out);
                        out.push_str("```\n");
                        in_pre = true;
                    }
                    "blockquote" => {
                        ensure_blank_line(&mut out);
                        out.push_str("> ");
                    }
                    "ul" => {
                        if lists.is_empty() {
                            ensure_blank_line(&mut out);
                        }
                        lists.push(None);
                    }
                    "ol" => {
                        if lists.is_empty() {
                            ensure_blank_line(&mut out);
                        }
                        lists.push(Some(0));
                    }
                    "li" => {
                        if !out.is_empty() && !out.ends_with('\n') {
                            out.push('\n');
                        }
                        let depth = lists.len().saturating_sub(1);
                        for _ in 0..depth {
                            out.push_str("  ");
                        }
                        match lists.last_mut() {
                            Some(Some(counter)) => {
                                *counter += 1;
                                out.push_str(&format!("{}. ", counter));
                            }
                            _ => out.push_str("- "),
                        }
                    }
                    "a" => {
                        links.push(attribute(&e, "href"));
                        out.push('[');
                    }
                    "img" => push_image(&mut out, &e),
                    _ => {}
                }
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_lowercase();
                match name.as_str() {
                    "script" | "style" | "head" => skip_depth = skip_depth.saturating_sub(1),
                    _ if skip_depth > 0 => {}
                    "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "p" | "div" | "blockquote" => {
                        ensure_blank_line(&mut out)
                    }
                    "strong" | "b" => out.push_str("**"),
                    "em" | "i" => out.push('*'),
                    "code" if !in_pre => out.push('`'),
                    "pre" => {
                        if !out.ends_with('\n') {
                            out.push('\n');
                        }
                        out.push_str("```");
                        ensure_blank_line(&mut out);
                        in_pre = false;
                    }
                    "ul" | "ol" => {
                        lists.pop();
                        if lists.is_empty() {
                            ensure_blank_line(&mut out);
                        }
                    }
                    "li" => {
                        if !out.ends_with('\n') {
                            out.push('\n');
                        }
                    }
                    "a" => {
                        if let Some(href) = links.pop() {
                            out.push_str(&format!("]({})", href));
                        }
                    }
                    _ => {}
                }
            }
            Event::Empty(e) => {
                if skip_depth > 0 {
                    continue;
                }
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_lowercase();
                match name.as_str() {
                    "br" => out.push('\n'),
                    "img" => push_image(&mut out, &e),
                    _ => {}
                }
            }
            Event::Text(e) => {
                if skip_depth > 0 {
                    continue;
                }
                let text = unescape_text(&e);
                if in_pre {
                    out.push_str(&text);
                    continue;
                }
                let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
                if collapsed.is_empty() {
                    continue;
                }
                if text.starts_with(char::is_whitespace)
                    && !out.is_empty()
                    && !out.ends_with(char::is_whitespace)
                    && !out.ends_with('[')
                {
                    out.push(' ');
                }
                out.push_str(&collapsed);
                if text.ends_with(char::is_whitespace) {
                    out.push(' ');
                }
            }
            _ => {}
        }
    }

    out.trim().to_string()
}

fn push_image(out: &mut String, e: &quick_xml::events::BytesStart) {
    let src = attribute(e, "src");
    if !src.is_empty() {
        let alt = attribute(e, "alt");
        out.push_str(&format!("![{}]({})", alt, src));
    }
}

fn ensure_blank_line(out: &mut String) {
    while out.ends_with(' ') || out.ends_with('\t') {
        out.pop();
    }
    if out.is_empty() {
        return;
    }
    while !out.ends_with("\n\n") {
        out.push('\n');
    }
}
