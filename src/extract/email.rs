//! `.eml` extraction: a header block followed by the body. Multipart
//! messages contribute their text/plain parts; a single-part message
//! contributes its payload whatever its content type.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::path::Path;

use super::{ContentExtractor, ExtractError};
use crate::models::{Extraction, FileFormat};

/// Nested multipart bodies deeper than this are ignored.
const MAX_MULTIPART_DEPTH: usize = 8;

pub struct EmailExtractor;

impl ContentExtractor for EmailExtractor {
    fn name(&self) -> &str {
        "email"
    }

    fn formats(&self) -> &[FileFormat] {
        &[FileFormat::Email]
    }

    fn extract(&self, path: &Path) -> Result<Extraction, ExtractError> {
        let bytes = std::fs::read(path)?;
        extract_email(&bytes).map(Extraction::text)
    }
}

struct Part<'a> {
    headers: Vec<(String, String)>,
    body: &'a str,
}

impl Part<'_> {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn content_type(&self) -> String {
        self.header("Content-Type")
            .and_then(|v| v.split(';').next())
            .map(|v| v.trim().to_ascii_lowercase())
            .unwrap_or_else(|| "text/plain".to_string())
    }
}

pub fn extract_email(bytes: &[u8]) -> Result<String, ExtractError> {
    let raw = String::from_utf8_lossy(bytes).replace("\r\n", "\n");
    let message = parse_part(&raw);
    if message.headers.is_empty() {
        return Err(ExtractError::Email("no header block found".to_string()));
    }

    let mut out = String::new();
    for name in ["From", "To", "Date", "Subject"] {
        out.push_str(&format!("{}: {}\n", name, message.header(name).unwrap_or("")));
    }

    let mut bodies = Vec::new();
    collect_plain_bodies(&message, 0, &mut bodies);
    let body = bodies.join("\n\n");
    if !body.trim().is_empty() {
        out.push('\n');
        out.push_str(body.trim());
    }
    Ok(out)
}

/// Splits headers (with continuation lines unfolded) from the body.
fn parse_part(raw: &str) -> Part<'_> {
    let (head, body) = match raw.find("\n\n") {
        Some(i) => (&raw[..i], &raw[i + 2..]),
        None => (raw, ""),
    };

    let mut headers: Vec<(String, String)> = Vec::new();
    for line in head.lines() {
        if line.starts_with([' ', '\t']) {
            if let Some((_, value)) = headers.last_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }
        match line.split_once(':') {
            Some((name, value)) if !name.trim().is_empty() && !name.contains(' ') => {
                headers.push((name.trim().to_string(), value.trim().to_string()));
            }
            _ => {
                // Not a header block at all: treat everything as body.
                if headers.is_empty() {
                    return Part {
                        headers: Vec::new(),
                        body: raw,
                    };
                }
            }
        }
    }
    Part { headers, body }
}

fn boundary_param(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("boundary")
            .then(|| value.trim().trim_matches('"').to_string())
    })
}

fn collect_plain_bodies(part: &Part<'_>, depth: usize, out: &mut Vec<String>) {
    let content_type = part.content_type();
    if content_type.starts_with("multipart/") {
        if depth >= MAX_MULTIPART_DEPTH {
            return;
        }
        let Some(boundary) = part.header("Content-Type").and_then(boundary_param) else {
            return;
        };
        let delimiter = format!("--{}", boundary);
        for chunk in part.body.split(delimiter.as_str()).skip(1) {
            if chunk.starts_with("--") {
                break;
            }
            let chunk = chunk.strip_prefix('\n').unwrap_or(chunk);
            let sub = parse_part(chunk);
            collect_plain_bodies(&sub, depth + 1, out);
        }
    } else if depth == 0 || content_type == "text/plain" {
        out.push(decode_body(part));
    }
}

fn decode_body(part: &Part<'_>) -> String {
    let encoding = part
        .header("Content-Transfer-Encoding")
        .map(|e| e.trim().to_ascii_lowercase())
        .unwrap_or_default();
    match encoding.as_str() {
        "base64" => {
            let compact: String = part.body.chars().filter(|c| !c.is_whitespace()).collect();
            match STANDARD.decode(compact.as_bytes()) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(err) => {
                    tracing::debug!(error = %err, "base64 body did not decode, keeping raw text");
                    part.body.to_string()
                }
            }
        }
        "quoted-printable" => decode_quoted_printable(part.body),
        _ => part.body.to_string(),
    }
}

fn decode_quoted_printable(input: &str) -> String {
    let mut bytes = Vec::with_capacity(input.len());
    let raw = input.as_bytes();
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'=' {
            if raw.get(i + 1) == Some(&b'\n') {
                i += 2;
                continue;
            }
            let hex = raw.get(i + 1..i + 3).and_then(|h| std::str::from_utf8(h).ok());
            if let Some(value) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                bytes.push(value);
                i += 3;
                continue;
            }
        }
        bytes.push(raw[i]);
        i += 1;
    }
    String::from_utf8_lossy(&bytes).into_owned()
}
