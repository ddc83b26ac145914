//! Document renderer — fills `{{name}}` placeholders in a DOCX template.
//!
//! Placeholders are matched against the text of a paragraph's `<w:t>` runs
//! joined together, so a tag the word processor split across several runs
//! still binds. The value lands in the run where the tag opens and the
//! remaining tag characters are removed from the following runs.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use quick_xml::Reader;
use quick_xml::events::Event;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::RenderError;
use crate::form::session::Answers;

/// Main body part; a DOCX without it is rejected.
const DOCUMENT_PART: &str = "word/document.xml";

const TAG_OPEN: &str = "{{";
const TAG_CLOSE: &str = "}}";

/// Line break inserted for `\n` inside a value.
const LINE_BREAK: &str = "</w:t><w:br/><w:t xml:space=\"preserve\">";

/// Render `template` (DOCX bytes) with `answers`.
///
/// Fails if any placeholder has no answer, if a tag is unbalanced, or if
/// the bytes are not a DOCX archive. Output is deterministic for a given
/// template and answer set.
pub fn render(template: &[u8], answers: &Answers) -> Result<Vec<u8>, RenderError> {
    let mut archive = ZipArchive::new(Cursor::new(template))?;
    if !archive.file_names().any(|n| n == DOCUMENT_PART) {
        return Err(RenderError::NotADocx(DOCUMENT_PART.to_string()));
    }

    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default());
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let mut missing = Vec::new();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let name = entry.name().to_string();

        if !is_text_part(&name) {
            writer.raw_copy_file(entry)?;
            continue;
        }

        let mut xml = String::new();
        entry.read_to_string(&mut xml)?;
        let filled = fill_part(&xml, answers, &mut missing)?;

        writer.start_file(name.as_str(), options)?;
        writer.write_all(filled.as_bytes())?;
    }

    if !missing.is_empty() {
        return Err(RenderError::MissingData { names: missing });
    }

    Ok(writer.finish()?.into_inner())
}

/// Renders the template stored at a fixed path, re-reading it on every call.
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    template_path: PathBuf,
}

impl TemplateRenderer {
    pub fn new(template_path: impl Into<PathBuf>) -> Self {
        Self {
            template_path: template_path.into(),
        }
    }

    pub fn template_path(&self) -> &Path {
        &self.template_path
    }

    pub async fn render(&self, answers: &Answers) -> Result<Vec<u8>, RenderError> {
        let template = tokio::fs::read(&self.template_path).await?;
        render(&template, answers)
    }
}

/// Archive entries that may carry placeholders.
fn is_text_part(name: &str) -> bool {
    if matches!(name, DOCUMENT_PART | "word/footnotes.xml" | "word/endnotes.xml") {
        return true;
    }
    (name.starts_with("word/header") || name.starts_with("word/footer")) && name.ends_with(".xml")
}

/// A `<w:t>` element inside a part.
struct TextRun {
    /// Byte range of the whole element in the part.
    start: usize,
    end: usize,
    /// Unescaped text content.
    text: String,
    /// Innermost enclosing `<w:p>`; a run outside any paragraph gets its own.
    paragraph: usize,
}

/// A placeholder located in a paragraph's joined text.
struct Tag<'a> {
    start: usize,
    end: usize,
    value: &'a str,
}

/// Substitute every placeholder in one XML part. Unknown names are pushed
/// onto `missing` (once each) and rendered empty.
fn fill_part(xml: &str, answers: &Answers, missing: &mut Vec<String>) -> Result<String, RenderError> {
    let runs = text_runs(xml)?;

    let mut paragraphs: BTreeMap<usize, Vec<(usize, &TextRun)>> = BTreeMap::new();
    for (index, run) in runs.iter().enumerate() {
        paragraphs.entry(run.paragraph).or_default().push((index, run));
    }

    let mut replacements: Vec<(usize, String)> = Vec::new();
    for group in paragraphs.values() {
        replacements.extend(fill_paragraph(group, answers, missing)?);
    }

    if replacements.is_empty() {
        return Ok(xml.to_string());
    }
    replacements.sort_by_key(|(index, _)| *index);

    let mut out = String::with_capacity(xml.len());
    let mut copied = 0;
    for (index, text) in replacements {
        let run = &runs[index];
        out.push_str(&xml[copied..run.start]);
        out.push_str(&text_element(&text));
        copied = run.end;
    }
    out.push_str(&xml[copied..]);
    Ok(out)
}

/// Collect the `<w:t>` elements of a part in document order, each tagged
/// with the innermost paragraph that contains it. Paragraphs nested in text
/// boxes get their own id, so the outer paragraph's runs stay together.
fn text_runs(xml: &str) -> Result<Vec<TextRun>, RenderError> {
    let mut reader = Reader::from_str(xml);
    let mut open_paragraphs: Vec<usize> = Vec::new();
    let mut next_paragraph = 0;
    // Element start and content start of the `<w:t>` being read.
    let mut open_text: Option<(usize, usize)> = None;
    let mut runs = Vec::new();

    loop {
        let before = position(&reader);
        let event = reader
            .read_event()
            .map_err(|e| RenderError::Malformed(format!("invalid XML at byte {before}: {e}")))?;
        match event {
            Event::Start(e) if e.name().as_ref() == b"w:p" => {
                open_paragraphs.push(next_paragraph);
                next_paragraph += 1;
            }
            Event::End(e) if e.name().as_ref() == b"w:p" => {
                open_paragraphs.pop();
            }
            Event::Start(e) if e.name().as_ref() == b"w:t" => {
                open_text = Some((before, position(&reader)));
            }
            Event::End(e) if e.name().as_ref() == b"w:t" => {
                let Some((start, content_start)) = open_text.take() else {
                    continue;
                };
                let text = quick_xml::escape::unescape(&xml[content_start..before])
                    .map_err(|e| RenderError::Malformed(format!("bad text escape: {e}")))?;
                let paragraph = match open_paragraphs.last() {
                    Some(&id) => id,
                    None => {
                        next_paragraph += 1;
                        next_paragraph - 1
                    }
                };
                runs.push(TextRun {
                    start,
                    end: position(&reader),
                    text: text.into_owned(),
                    paragraph,
                });
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(runs)
}

fn position(reader: &Reader<&[u8]>) -> usize {
    reader.buffer_position() as usize
}

/// Rewrite the runs of one paragraph. Returns `(run index, new text)` for
/// every run when the paragraph holds at least one tag, nothing otherwise.
fn fill_paragraph(
    runs: &[(usize, &TextRun)],
    answers: &Answers,
    missing: &mut Vec<String>,
) -> Result<Vec<(usize, String)>, RenderError> {
    let mut joined = String::new();
    let mut offsets = Vec::with_capacity(runs.len());
    for (_, run) in runs {
        offsets.push(joined.len());
        joined.push_str(&run.text);
    }

    let tags = find_tags(&joined, answers, missing)?;
    if tags.is_empty() {
        return Ok(Vec::new());
    }

    let mut rewritten = Vec::with_capacity(runs.len());
    for (i, (index, run)) in runs.iter().enumerate() {
        let run_start = offsets[i];
        let run_end = run_start + run.text.len();

        let mut text = String::new();
        let mut pos = run_start;
        for tag in tags.iter().filter(|t| t.start < run_end && t.end > run_start) {
            if tag.start >= run_start {
                text.push_str(&joined[pos..tag.start]);
                text.push_str(tag.value);
            }
            pos = pos.max(tag.end.min(run_end));
        }
        text.push_str(&joined[pos..run_end]);

        rewritten.push((*index, text));
    }

    Ok(rewritten)
}

fn find_tags<'a>(
    joined: &str,
    answers: &'a Answers,
    missing: &mut Vec<String>,
) -> Result<Vec<Tag<'a>>, RenderError> {
    let mut tags = Vec::new();
    let mut pos = 0;

    loop {
        let rest = &joined[pos..];
        let open = rest.find(TAG_OPEN);
        let close = rest.find(TAG_CLOSE);

        let open = match (open, close) {
            (None, None) => break,
            (Some(o), Some(c)) if c < o => {
                return Err(RenderError::Malformed(format!("unopened tag in \"{joined}\"")));
            }
            (None, Some(_)) => {
                return Err(RenderError::Malformed(format!("unopened tag in \"{joined}\"")));
            }
            (Some(o), _) => pos + o,
        };

        let inner_start = open + TAG_OPEN.len();
        let Some(len) = joined[inner_start..].find(TAG_CLOSE) else {
            return Err(RenderError::Malformed(format!("unclosed tag in \"{joined}\"")));
        };
        let inner = &joined[inner_start..inner_start + len];
        if inner.contains(TAG_OPEN) {
            return Err(RenderError::Malformed(format!("unclosed tag in \"{joined}\"")));
        }

        let name = inner.trim();
        if name.is_empty() {
            return Err(RenderError::Malformed("empty tag".into()));
        }

        let value = match answers.get(name) {
            Some(v) => v.as_str(),
            None => {
                if !missing.iter().any(|m| m == name) {
                    missing.push(name.to_string());
                }
                ""
            }
        };

        let end = inner_start + len + TAG_CLOSE.len();
        tags.push(Tag {
            start: open,
            end,
            value,
        });
        pos = end;
    }

    Ok(tags)
}

/// Serialize text as a `<w:t>` element, turning newlines into `<w:br/>`.
fn text_element(text: &str) -> String {
    let normalized = text.replace("\r\n", "\n");
    let body = normalized
        .split('\n')
        .map(|line| quick_xml::escape::escape(line).into_owned())
        .collect::<Vec<_>>()
        .join(LINE_BREAK);
    format!("<w:t xml:space=\"preserve\">{body}</w:t>")
}
