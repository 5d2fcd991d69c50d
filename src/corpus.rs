//! Corpus artifacts on disk.
//!
//! Two layouts hold the extracted text:
//!
//! - **per-file**: one markdown artifact per input under
//!   `output/requirements_sections/`, named from the sanitized
//!   project-relative path ([`assign_artifact_name`]).
//! - **combined**: a single `output/requirements_context.md` where every
//!   input is a block of lines ([`CombinedCorpus`]):
//!
//! ```text
//! --- [input/rfp.pdf] (pdf) ---     header
//! ...text lines...                  start_line..=end_line (1-based)
//!                                   blank separator
//! ```
//!
//! Line offsets are what the manifest records for the combined layout, so
//! every mutation here keeps the offsets of untouched blocks exact.

use std::collections::BTreeSet;
use std::path::Path;

use crate::error::IngestError;
use crate::fingerprint::fingerprint_bytes;
use crate::manifest::{write_atomic, Manifest};
use crate::models::{FileFormat, ParsedSection};

pub fn section_header(source: &str, format: FileFormat) -> String {
    format!("--- [{}] ({}) ---", source, format)
}

fn text_lines(text: &str) -> Vec<String> {
    text.split('\n').map(str::to_string).collect()
}

/// A block's position: `start_line..=end_line` covers its text lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub source: String,
    pub format: FileFormat,
    pub start_line: usize,
    pub end_line: usize,
}

impl Span {
    fn header_index(&self) -> usize {
        self.start_line - 2
    }

    fn line_count(&self) -> usize {
        self.end_line + 1 - self.start_line
    }

    fn shift(&mut self, delta: isize) {
        self.start_line = self.start_line.saturating_add_signed(delta);
        self.end_line = self.end_line.saturating_add_signed(delta);
    }
}

/// In-memory model of the combined corpus file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CombinedCorpus {
    lines: Vec<String>,
    spans: Vec<Span>,
}

impl CombinedCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a corpus from scratch, in the given order.
    pub fn from_sections<'a>(sections: impl IntoIterator<Item = &'a ParsedSection>) -> Self {
        let mut corpus = Self::new();
        for section in sections {
            corpus.append(section);
        }
        corpus
    }

    /// Loads the on-disk corpus and checks it against the manifest: the
    /// digest must match and every recorded block must sit where the
    /// manifest says.
    pub fn load(path: &Path, manifest: &Manifest) -> Result<Self, IngestError> {
        let raw = std::fs::read(path).map_err(|e| IngestError::io(path, e))?;
        if let Some(expected) = &manifest.corpus_digest {
            let actual = fingerprint_bytes(&raw);
            if &actual != expected {
                return Err(IngestError::CorpusOutOfSync {
                    path: path.to_path_buf(),
                    reason: format!(
                        "digest {} differs from recorded {}",
                        short(&actual),
                        short(expected)
                    ),
                });
            }
        }
        let text = String::from_utf8_lossy(&raw);
        let lines: Vec<String> = text.lines().map(str::to_string).collect();

        let mut spans = Vec::new();
        for (source, start_line, end_line) in manifest.combined_order() {
            let format = manifest.files[source].format;
            let span = Span {
                source: source.to_string(),
                format,
                start_line,
                end_line,
            };
            let header_ok = start_line >= 2
                && end_line + 1 >= start_line
                && lines.get(span.header_index()) == Some(&section_header(source, format));
            let separator_ok = lines.get(end_line).map(|l| l.is_empty()).unwrap_or(false);
            if !header_ok || !separator_ok {
                return Err(IngestError::CorpusOutOfSync {
                    path: path.to_path_buf(),
                    reason: format!(
                        "block for {} is not at lines {}-{}",
                        source, start_line, end_line
                    ),
                });
            }
            spans.push(span);
        }
        Ok(CombinedCorpus { lines, spans })
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    pub fn span(&self, source: &str) -> Option<&Span> {
        self.spans.iter().find(|s| s.source == source)
    }

    pub fn contains(&self, source: &str) -> bool {
        self.span(source).is_some()
    }

    /// Adds a block at the end of the corpus.
    pub fn append(&mut self, section: &ParsedSection) -> &Span {
        let header_index = self.lines.len();
        let body = text_lines(&section.text);
        let count = body.len();
        self.lines.push(section_header(&section.source_file, section.format));
        self.lines.extend(body);
        self.lines.push(String::new());
        self.spans.push(Span {
            source: section.source_file.clone(),
            format: section.format,
            start_line: header_index + 2,
            end_line: header_index + 1 + count,
        });
        &self.spans[self.spans.len() - 1]
    }

    /// Swaps a block's text in place, shifting every later block by the
    /// change in line count. Returns `false` if the source has no block.
    pub fn replace(&mut self, section: &ParsedSection) -> bool {
        let Some(idx) = self.position(&section.source_file) else {
            return false;
        };
        let body = text_lines(&section.text);
        let new_count = body.len();
        let span = &mut self.spans[idx];
        let old_count = span.line_count();
        let header_index = span.header_index();
        let text_start = span.start_line - 1;

        self.lines[header_index] = section_header(&section.source_file, section.format);
        self.lines.splice(text_start..text_start + old_count, body);
        span.format = section.format;
        span.end_line = span.start_line + new_count - 1;

        let delta = new_count as isize - old_count as isize;
        if delta != 0 {
            for later in &mut self.spans[idx + 1..] {
                later.shift(delta);
            }
        }
        true
    }

    /// Excises a block (header, text and separator), pulling every later
    /// block up. Returns `false` if the source has no block.
    pub fn remove(&mut self, source: &str) -> bool {
        let Some(idx) = self.position(source) else {
            return false;
        };
        let span = self.spans.remove(idx);
        let removed = span.line_count() + 2;
        self.lines.drain(span.header_index()..span.header_index() + removed);
        for later in &mut self.spans[idx..] {
            later.shift(-(removed as isize));
        }
        true
    }

    /// Rewrites every block from scratch in its current order, recomputing
    /// all offsets. The result is identical to the incremental state when
    /// the offsets were already consistent.
    pub fn reflow(&mut self) {
        let sections: Vec<ParsedSection> = self
            .spans
            .iter()
            .map(|span| ParsedSection {
                source_file: span.source.clone(),
                format: span.format,
                text: self.slice_span(span),
            })
            .collect();
        *self = Self::from_sections(&sections);
    }

    /// The text of one block, exactly as recorded.
    pub fn slice(&self, source: &str) -> Option<String> {
        self.span(source).map(|span| self.slice_span(span))
    }

    fn slice_span(&self, span: &Span) -> String {
        self.lines[span.start_line - 1..span.end_line].join("\n")
    }

    fn position(&self, source: &str) -> Option<usize> {
        self.spans.iter().position(|s| s.source == source)
    }

    pub fn render(&self) -> String {
        if self.lines.is_empty() {
            return String::new();
        }
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }

    /// Writes the corpus atomically and returns the digest of what was
    /// written.
    pub fn write(&self, path: &Path) -> Result<String, IngestError> {
        let rendered = self.render();
        write_atomic(path, rendered.as_bytes())?;
        Ok(fingerprint_bytes(rendered.as_bytes()))
    }
}

fn short(digest: &str) -> &str {
    digest.get(..12).unwrap_or(digest)
}

/// Filesystem-safe artifact stem for a project-relative path:
/// `input/specs/rfp v2.pdf` → `input__specs__rfp-v2.pdf`.
pub fn sanitize_artifact_stem(path: &str) -> String {
    path.split('/')
        .map(|part| {
            part.chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                        c
                    } else {
                        '-'
                    }
                })
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("__")
}

/// Picks the artifact name for a newly manifested path. `taken` holds the
/// names already claimed by other sources; on collision the name gains the
/// first eight hex digits of the content hash.
pub fn assign_artifact_name(path: &str, content_hash: &str, taken: &BTreeSet<String>) -> String {
    let stem = sanitize_artifact_stem(path);
    let plain = format!("{}.md", stem);
    if !taken.contains(&plain) {
        return plain;
    }
    let hash8 = content_hash.get(..8).unwrap_or(content_hash);
    let hashed = format!("{}-{}.md", stem, hash8);
    if !taken.contains(&hashed) {
        return hashed;
    }
    let mut n = 2usize;
    loop {
        let candidate = format!("{}-{}-{}.md", stem, hash8, n);
        if !taken.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Writes one per-file artifact atomically: the text plus a trailing newline.
pub fn write_artifact(dir: &Path, name: &str, text: &str) -> Result<(), IngestError> {
    let mut body = String::with_capacity(text.len() + 1);
    body.push_str(text);
    body.push('\n');
    write_atomic(&dir.join(name), body.as_bytes())
}

/// Reads a per-file artifact back, undoing the trailing newline.
pub fn read_artifact(dir: &Path, name: &str) -> Result<String, IngestError> {
    let path = dir.join(name);
    let body = std::fs::read_to_string(&path).map_err(|e| IngestError::io(&path, e))?;
    Ok(body.strip_suffix('\n').unwrap_or(&body).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{FileEntry, Layout, SectionLocation};
    use chrono::Utc;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn section(source: &str, text: &str) -> ParsedSection {
        ParsedSection {
            source_file: source.to_string(),
            format: FileFormat::Text,
            text: text.to_string(),
        }
    }

    fn assert_offsets_exact(corpus: &CombinedCorpus, expected: &[(&str, &str)]) {
        let reread: Vec<String> = corpus.render().lines().map(str::to_string).collect();
        assert_eq!(corpus.spans().len(), expected.len());
        for (span, (source, text)) in corpus.spans().iter().zip(expected) {
            assert_eq!(span.source, *source);
            assert_eq!(reread[span.start_line - 1..span.end_line].join("\n"), *text);
            assert_eq!(reread[span.start_line - 2], section_header(source, FileFormat::Text));
        }
    }

    #[test]
    fn append_places_blocks_after_headers() {
        let mut corpus = CombinedCorpus::new();
        corpus.append(&section("input/a.txt", "alpha\nbeta"));
        corpus.append(&section("input/b.txt", "gamma"));

        assert_eq!(
            corpus.render(),
            "--- [input/a.txt] (text) ---\nalpha\nbeta\n\n--- [input/b.txt] (text) ---\ngamma\n\n"
        );
        let a = corpus.span("input/a.txt").unwrap();
        assert_eq!((a.start_line, a.end_line), (2, 3));
        let b = corpus.span("input/b.txt").unwrap();
        assert_eq!((b.start_line, b.end_line), (6, 6));
    }

    #[test]
    fn empty_text_occupies_one_line() {
        let mut corpus = CombinedCorpus::new();
        corpus.append(&section("input/empty.txt", ""));
        corpus.append(&section("input/b.txt", "b"));
        assert_offsets_exact(&corpus, &[("input/empty.txt", ""), ("input/b.txt", "b")]);
        assert_eq!(corpus.slice("input/empty.txt").unwrap(), "");
    }

    #[test]
    fn replace_shifts_later_blocks_only() {
        let mut corpus = CombinedCorpus::new();
        corpus.append(&section("input/a.txt", "a1"));
        corpus.append(&section("input/b.txt", "b1\nb2"));
        corpus.append(&section("input/c.txt", "c1"));
        let a_before = corpus.span("input/a.txt").cloned().unwrap();

        assert!(corpus.replace(&section("input/b.txt", "b1\nb2\nb3\nb4")));
        assert_eq!(corpus.span("input/a.txt"), Some(&a_before));
        assert_eq!(corpus.span("input/c.txt").unwrap().start_line, 11);
        assert_offsets_exact(
            &corpus,
            &[("input/a.txt", "a1"), ("input/b.txt", "b1\nb2\nb3\nb4"), ("input/c.txt", "c1")],
        );
        assert!(!corpus.replace(&section("input/zzz.txt", "x")));
    }

    #[test]
    fn remove_excises_block_and_separator() {
        let mut corpus = CombinedCorpus::new();
        corpus.append(&section("input/a.txt", "a1"));
        corpus.append(&section("input/b.txt", "b1\nb2"));
        corpus.append(&section("input/c.txt", "c1"));

        assert!(corpus.remove("input/b.txt"));
        assert!(!corpus.contains("input/b.txt"));
        assert!(!corpus.render().contains("b1"));
        assert_offsets_exact(&corpus, &[("input/a.txt", "a1"), ("input/c.txt", "c1")]);
        assert_eq!(
            corpus,
            CombinedCorpus::from_sections(&[
                section("input/a.txt", "a1"),
                section("input/c.txt", "c1")
            ])
        );
    }

    #[test]
    fn reflow_is_identity_on_consistent_corpus() {
        let mut corpus = CombinedCorpus::new();
        corpus.append(&section("input/a.txt", "a1\na2"));
        corpus.append(&section("input/b.txt", "b1"));
        corpus.remove("input/a.txt");
        corpus.append(&section("input/c.txt", ""));
        let before = corpus.clone();
        corpus.reflow();
        assert_eq!(corpus, before);
    }

    fn manifest_for(corpus: &CombinedCorpus, digest: Option<String>) -> Manifest {
        let mut manifest = Manifest::new(Layout::Combined);
        for span in corpus.spans() {
            manifest.files.insert(
                span.source.clone(),
                FileEntry {
                    content_hash: "h".to_string(),
                    size_bytes: 1,
                    format: span.format,
                    mime: "text/plain".to_string(),
                    chars: 1,
                    estimated_tokens: 0,
                    extracted_at: Utc::now(),
                    page_hints: Vec::new(),
                    location: SectionLocation::Combined {
                        start_line: span.start_line,
                        end_line: span.end_line,
                    },
                },
            );
        }
        manifest.corpus_digest = digest;
        manifest
    }

    #[test]
    fn load_verifies_digest_and_block_positions() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("requirements_context.md");
        let mut corpus = CombinedCorpus::new();
        corpus.append(&section("input/a.txt", "alpha"));
        corpus.append(&section("input/b.txt", "beta\ngamma"));
        let digest = corpus.write(&path).unwrap();

        let manifest = manifest_for(&corpus, Some(digest));
        let loaded = CombinedCorpus::load(&path, &manifest).unwrap();
        assert_eq!(loaded, corpus);

        std::fs::write(&path, "tampered\n").unwrap();
        let err = CombinedCorpus::load(&path, &manifest).unwrap_err();
        assert!(matches!(err, IngestError::CorpusOutOfSync { .. }));

        let undigested = manifest_for(&corpus, None);
        let err = CombinedCorpus::load(&path, &undigested).unwrap_err();
        assert!(err.to_string().contains("input/a.txt"));
    }

    #[test]
    fn artifact_names_are_sanitized_and_collision_safe() {
        assert_eq!(sanitize_artifact_stem("input/a.pdf"), "input__a.pdf");
        assert_eq!(
            sanitize_artifact_stem("input/specs/rfp v2 (final).pdf"),
            "input__specs__rfp-v2--final-.pdf"
        );

        let mut taken = BTreeSet::new();
        let first = assign_artifact_name("input/a b.txt", "0123456789abcdef", &taken);
        assert_eq!(first, "input__a-b.txt.md");
        taken.insert(first);
        let second = assign_artifact_name("input/a-b.txt", "fedcba9876543210", &taken);
        assert_eq!(second, "input__a-b.txt-fedcba98.md");
    }

    #[test]
    fn artifacts_round_trip_text() {
        let tmp = TempDir::new().unwrap();
        write_artifact(tmp.path(), "input__a.txt.md", "line one\nline two").unwrap();
        let raw = std::fs::read_to_string(tmp.path().join("input__a.txt.md")).unwrap();
        assert_eq!(raw, "line one\nline two\n");
        assert_eq!(read_artifact(tmp.path(), "input__a.txt.md").unwrap(), "line one\nline two");
    }

    #[derive(Debug, Clone)]
    enum Op {
        Append(String),
        Replace(usize, String),
        Remove(usize),
    }

    fn text_strategy() -> impl Strategy<Value = String> {
        proptest::collection::vec("[a-z ]{0,6}", 1..5).prop_map(|lines| {
            let joined = lines.join("\n");
            joined.trim_end().to_string()
        })
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            text_strategy().prop_map(Op::Append),
            (any::<usize>(), text_strategy()).prop_map(|(i, t)| Op::Replace(i, t)),
            any::<usize>().prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn offsets_survive_any_mutation_sequence(
            ops in proptest::collection::vec(op_strategy(), 1..30)
        ) {
            let mut corpus = CombinedCorpus::new();
            let mut model: Vec<(String, String)> = Vec::new();
            let mut next_id = 0usize;

            for op in ops {
                match op {
                    Op::Append(text) => {
                        let source = format!("input/f{}.txt", next_id);
                        next_id += 1;
                        corpus.append(&section(&source, &text));
                        model.push((source, text));
                    }
                    Op::Replace(i, text) if !model.is_empty() => {
                        let idx = i % model.len();
                        let source = model[idx].0.clone();
                        prop_assert!(corpus.replace(&section(&source, &text)));
                        model[idx].1 = text;
                    }
                    Op::Remove(i) if !model.is_empty() => {
                        let idx = i % model.len();
                        let (source, _) = model.remove(idx);
                        prop_assert!(corpus.remove(&source));
                    }
                    _ => {}
                }
            }

            let reread: Vec<String> = corpus.render().lines().map(str::to_string).collect();
            prop_assert_eq!(corpus.spans().len(), model.len());
            for (span, (source, text)) in corpus.spans().iter().zip(&model) {
                prop_assert_eq!(&span.source, source);
                prop_assert_eq!(&reread[span.start_line - 1..span.end_line].join("\n"), text);
            }
            let sections: Vec<ParsedSection> = model.iter().map(|(s, t)| section(s, t)).collect();
            prop_assert_eq!(corpus, CombinedCorpus::from_sections(&sections));
        }
    }
}
