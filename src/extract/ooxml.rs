//! DOCX and XLSX extraction over the raw OOXML parts.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::Path;

use super::{ContentExtractor, ExtractError};
use crate::models::{Extraction, FileFormat, PageHint};

/// Maximum sheets to process in an xlsx.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to process per sheet (avoids unbounded memory).
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

type Archive<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

pub struct DocxExtractor;

impl ContentExtractor for DocxExtractor {
    fn name(&self) -> &str {
        "docx"
    }

    fn formats(&self) -> &[FileFormat] {
        &[FileFormat::Docx]
    }

    fn extract(&self, path: &Path) -> Result<Extraction, ExtractError> {
        let bytes = std::fs::read(path)?;
        extract_docx(&bytes)
    }
}

pub struct XlsxExtractor;

impl ContentExtractor for XlsxExtractor {
    fn name(&self) -> &str {
        "xlsx"
    }

    fn formats(&self) -> &[FileFormat] {
        &[FileFormat::Xlsx]
    }

    fn extract(&self, path: &Path) -> Result<Extraction, ExtractError> {
        let bytes = std::fs::read(path)?;
        extract_xlsx(&bytes)
    }
}

fn ooxml_err(e: impl std::fmt::Display) -> ExtractError {
    ExtractError::Ooxml(e.to_string())
}

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(Cursor::new(bytes)).map_err(ooxml_err)
}

fn read_zip_entry_bounded(
    archive: &mut Archive<'_>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive.by_name(name).map_err(ooxml_err)?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(ooxml_err)?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn has_entry(archive: &Archive<'_>, name: &str) -> bool {
    archive.file_names().any(|n| n == name)
}

fn attr_value(e: &BytesStart<'_>, local: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == local)
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

pub fn extract_docx(bytes: &[u8]) -> Result<Extraction, ExtractError> {
    let mut archive = open_archive(bytes)?;
    if !has_entry(&archive, "word/document.xml") {
        return Err(ExtractError::Ooxml(
            "word/document.xml not found".to_string(),
        ));
    }
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    docx_body_text(&xml).map(Extraction::text)
}

/// `Heading2` (or `heading 2`) → 2.
fn heading_level(style: &str) -> Option<usize> {
    let lower = style.to_ascii_lowercase();
    let rest = lower.strip_prefix("heading")?.trim();
    rest.parse::<usize>().ok().filter(|l| (1..=9).contains(l))
}

/// One line per paragraph; headings get a markdown prefix; table rows are
/// rendered as ` | `-joined cells on a single line.
fn docx_body_text(xml: &[u8]) -> Result<String, ExtractError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut lines: Vec<String> = Vec::new();
    let mut para = String::new();
    let mut heading: Option<usize> = None;
    let mut in_text = false;
    let mut cell_depth = 0usize;
    let mut cell = String::new();
    let mut row: Vec<String> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"t" => in_text = true,
                b"tc" => {
                    cell_depth += 1;
                    cell.clear();
                }
                b"pStyle" => heading = attr_value(&e, b"val").and_then(|v| heading_level(&v)),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"pStyle" => heading = attr_value(&e, b"val").and_then(|v| heading_level(&v)),
                b"tab" => para.push('\t'),
                b"br" | b"cr" => para.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                para.push_str(te.unescape().map_err(ooxml_err)?.as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let text = para.trim();
                    if cell_depth > 0 {
                        if !text.is_empty() {
                            if !cell.is_empty() {
                                cell.push(' ');
                            }
                            cell.push_str(text);
                        }
                    } else if !text.is_empty() {
                        match heading {
                            Some(level) => lines.push(format!("{} {}", "#".repeat(level), text)),
                            None => lines.push(text.to_string()),
                        }
                    }
                    para.clear();
                    heading = None;
                }
                b"tc" => {
                    row.push(std::mem::take(&mut cell));
                    cell_depth = cell_depth.saturating_sub(1);
                }
                b"tr" => {
                    if row.iter().any(|c| !c.is_empty()) {
                        lines.push(row.join(" | "));
                    }
                    row.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_err(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(lines.join("\n"))
}

pub fn extract_xlsx(bytes: &[u8]) -> Result<Extraction, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let shared_strings = if has_entry(&archive, "xl/sharedStrings.xml") {
        read_shared_strings(&mut archive)?
    } else {
        Vec::new()
    };
    let sheets = list_sheets(&mut archive)?;

    let mut out = String::new();
    let mut page_hints = Vec::new();
    for (idx, (name, part)) in sheets.into_iter().take(XLSX_MAX_SHEETS).enumerate() {
        if !has_entry(&archive, &part) {
            tracing::debug!(sheet = %name, part = %part, "worksheet part missing, skipping");
            continue;
        }
        let sheet_xml = read_zip_entry_bounded(&mut archive, &part, MAX_XML_ENTRY_BYTES)?;
        let rows = extract_sheet_rows(&sheet_xml, &shared_strings)?;
        if rows.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        let start = out.chars().count();
        out.push_str(&format!("[Sheet: {}]\n", name));
        out.push_str(&rows.join("\n"));
        page_hints.push(PageHint {
            page: idx as u32 + 1,
            char_range: (start, out.chars().count()),
        });
    }
    Ok(Extraction {
        text: out,
        page_hints,
    })
}

fn read_shared_strings(archive: &mut Archive<'_>) -> Result<Vec<String>, ExtractError> {
    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES)?;
    let mut strings = Vec::new();
    let mut reader = Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    let mut in_phonetic = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                b"rPh" => in_phonetic = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_t && !in_phonetic => {
                if let Some(s) = current.as_mut() {
                    s.push_str(te.unescape().map_err(ooxml_err)?.as_ref());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.extend(current.take()),
                b"t" => in_t = false,
                b"rPh" => in_phonetic = false,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"si" => {
                strings.push(String::new());
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_err(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Sheets in workbook order as `(display name, zip part)`.
///
/// Resolved through `xl/workbook.xml` and its relationships; falls back to the
/// numbered `xl/worksheets/sheetN.xml` parts when the workbook is missing.
fn list_sheets(archive: &mut Archive<'_>) -> Result<Vec<(String, String)>, ExtractError> {
    let rels_part = "xl/_rels/workbook.xml.rels";
    if has_entry(archive, "xl/workbook.xml") && has_entry(archive, rels_part) {
        let rels_xml = read_zip_entry_bounded(archive, rels_part, MAX_XML_ENTRY_BYTES)?;
        let targets = read_relationship_targets(&rels_xml)?;
        let workbook_xml = read_zip_entry_bounded(archive, "xl/workbook.xml", MAX_XML_ENTRY_BYTES)?;
        let sheets = read_workbook_sheets(&workbook_xml)?
            .into_iter()
            .filter_map(|(name, rid)| targets.get(&rid).map(|t| (name, t.clone())))
            .collect::<Vec<_>>();
        if !sheets.is_empty() {
            return Ok(sheets);
        }
    }

    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| sheet_number(name).unwrap_or(u32::MAX));
    Ok(names
        .into_iter()
        .map(|part| {
            let label = sheet_number(&part)
                .map(|n| format!("Sheet{}", n))
                .unwrap_or_else(|| part.clone());
            (label, part)
        })
        .collect())
}

fn sheet_number(part: &str) -> Option<u32> {
    part.trim_start_matches("xl/worksheets/sheet")
        .trim_end_matches(".xml")
        .parse::<u32>()
        .ok()
}

fn read_relationship_targets(xml: &[u8]) -> Result<HashMap<String, String>, ExtractError> {
    let mut targets = HashMap::new();
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                if let (Some(id), Some(target)) = (attr_value(&e, b"Id"), attr_value(&e, b"Target"))
                {
                    let part = match target.strip_prefix('/') {
                        Some(abs) => abs.to_string(),
                        None => format!("xl/{}", target),
                    };
                    targets.insert(id, part);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_err(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(targets)
}

fn read_workbook_sheets(xml: &[u8]) -> Result<Vec<(String, String)>, ExtractError> {
    let mut sheets = Vec::new();
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"sheet" => {
                // `r:id` is namespaced; match on the local part.
                if let (Some(name), Some(rid)) = (attr_value(&e, b"name"), attr_value(&e, b"id")) {
                    sheets.push((name, rid));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_err(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(sheets)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum CellKind {
    Shared,
    Inline,
    Literal,
}

/// Rows of a worksheet as ` | `-joined lines, dropping empty rows.
fn extract_sheet_rows(xml: &[u8], shared_strings: &[String]) -> Result<Vec<String>, ExtractError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut rows: Vec<String> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut kind = CellKind::Literal;
    let mut in_value = false;
    let mut in_inline_text = false;
    let mut cell_value = String::new();
    let mut cell_count = 0usize;

    loop {
        if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    kind = match attr_value(&e, b"t").as_deref() {
                        Some("s") => CellKind::Shared,
                        Some("inlineStr") => CellKind::Inline,
                        _ => CellKind::Literal,
                    };
                    cell_value.clear();
                }
                b"v" => in_value = true,
                b"t" if kind == CellKind::Inline => in_inline_text = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_value || in_inline_text => {
                cell_value.push_str(te.unescape().map_err(ooxml_err)?.as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" => in_value = false,
                b"t" => in_inline_text = false,
                b"c" => {
                    let raw = cell_value.trim();
                    let value = match kind {
                        CellKind::Shared => raw
                            .parse::<usize>()
                            .ok()
                            .and_then(|i| shared_strings.get(i))
                            .cloned()
                            .unwrap_or_default(),
                        CellKind::Inline | CellKind::Literal => raw.to_string(),
                    };
                    row.push(value.trim().to_string());
                    cell_count += 1;
                    kind = CellKind::Literal;
                }
                b"row" => {
                    if row.iter().any(|c| !c.is_empty()) {
                        rows.push(row.join(" | "));
                    }
                    row.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_err(e)),
            _ => {}
        }
        buf.clear();
    }
    if row.iter().any(|c| !c.is_empty()) {
        rows.push(row.join(" | "));
    }
    Ok(rows)
}
