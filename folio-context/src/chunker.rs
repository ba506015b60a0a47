//! Splits documents into bounded, overlapping, addressable chunks.
//!
//! Chunking works on lines. A document is first divided into sections at
//! markdown headings, then each section is divided into paragraphs (a run of
//! non-blank lines together with the blank lines that follow it). Sections
//! that fit the token budget are emitted whole. Larger sections are packed
//! paragraph by paragraph, and a paragraph that alone exceeds the budget is
//! cut by binary search on its character length.
//!
//! Every chunk carries a content-addressed id of the form
//! `path::start-end::chunk-ordinal@hash8`, where `hash8` is the first eight
//! hex digits of the blake3 digest of the chunk body. Chunking the same text
//! with the same parameters always reproduces the same ids.
//!
//! ```
//! use folio_context::chunker::chunk;
//!
//! let chunks = chunk("# A\n\nhello world\n\n# B\n\ngoodbye\n", "f.md", 100, 0.0);
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[0].title, "A");
//! assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 4));
//! assert_eq!(chunks[1].title, "B");
//! assert_eq!((chunks[1].start_line, chunks[1].end_line), (5, 7));
//! ```
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

/// Average number of characters per token used by [`estimate_tokens`].
pub const CHARS_PER_TOKEN: f64 = 2.5;

/// Upper bound applied to the overlap ratio.
pub const MAX_OVERLAP_RATIO: f64 = 0.9;

static HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s{0,3}#{1,6}\s+(.*?)[\s#]*$").expect("heading pattern is valid")
});

static FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s{0,3}(```|~~~)").expect("fence pattern is valid"));

/// Which part of a project a document belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    /// Manuscript text and notes.
    #[default]
    Content,
    /// World-building and configuration documents.
    Settings,
}

impl FileCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileCategory::Content => "content",
            FileCategory::Settings => "settings",
        }
    }
}

impl fmt::Display for FileCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FileCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "content" => Ok(FileCategory::Content),
            "settings" => Ok(FileCategory::Settings),
            other => Err(format!(
                "Unknown file category: {other}. Valid categories: content, settings"
            )),
        }
    }
}

/// A single retrievable unit of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Content-addressed identifier, `path::start-end::chunk-ordinal@hash8`.
    pub id: String,
    /// Text of the nearest heading, or the file stem before the first heading.
    pub title: String,
    /// The chunk text.
    pub body: String,
    /// Source path of the document, as given to the chunker.
    pub path: String,
    /// First line covered by this chunk (1-based, inclusive).
    pub start_line: usize,
    /// Last line covered by this chunk (1-based, inclusive).
    pub end_line: usize,
    /// Position of this chunk within the document (0-based).
    pub ordinal: usize,
    /// Owning project. Empty until the chunk is assigned to a project.
    pub project_id: String,
    pub category: FileCategory,
    /// Tags declared in the document's front matter.
    pub tags: Vec<String>,
    /// Full blake3 hex digest of `body`.
    pub content_hash: String,
}

impl Chunk {
    /// Assigns the chunk to a project and file category.
    pub fn with_owner(mut self, project_id: impl Into<String>, category: FileCategory) -> Self {
        self.project_id = project_id.into();
        self.category = category;
        self
    }

    /// Text used when embedding this chunk: the title followed by the body.
    pub fn composite_text(&self) -> String {
        if self.title.is_empty() {
            self.body.clone()
        } else {
            format!("{}\n\n{}", self.title, self.body)
        }
    }
}

/// Fast token estimate: `ceil(chars / CHARS_PER_TOKEN)`.
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() as f64 / CHARS_PER_TOKEN).ceil() as usize
}

/// Chunking parameters bound to a reusable engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkingEngine {
    max_tokens: usize,
    overlap_ratio: f64,
}

impl Default for ChunkingEngine {
    fn default() -> Self {
        Self::new(400, 0.1)
    }
}

impl ChunkingEngine {
    /// Creates an engine. `max_tokens` is clamped to at least 1 and
    /// `overlap_ratio` into `[0, MAX_OVERLAP_RATIO]`.
    pub fn new(max_tokens: usize, overlap_ratio: f64) -> Self {
        Self {
            max_tokens: max_tokens.max(1),
            overlap_ratio: clamp_ratio(overlap_ratio),
        }
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn overlap_ratio(&self) -> f64 {
        self.overlap_ratio
    }

    /// Chunks one document with this engine's parameters.
    pub fn chunk_document(&self, text: &str, path: &str) -> Vec<Chunk> {
        chunk(text, path, self.max_tokens, self.overlap_ratio)
    }
}

/// Splits `text` into ordered chunks of at most `max_tokens` estimated tokens.
///
/// # Arguments
/// * `text` - Full document text
/// * `path` - Path recorded on every chunk and embedded in chunk ids
/// * `max_tokens` - Token budget per chunk, see [`estimate_tokens`]
/// * `overlap_ratio` - Fraction of a packed chunk's characters repeated at the
///   start of the next chunk, snapped to whole lines
///
/// # Returns
/// The chunks in document order. Empty and blank-only input yields no chunks.
pub fn chunk(text: &str, path: &str, max_tokens: usize, overlap_ratio: f64) -> Vec<Chunk> {
    let lines: Vec<&str> = text.lines().collect();
    if lines.iter().all(|line| line.trim().is_empty()) {
        return Vec::new();
    }

    let mut emitter = Emitter {
        lines: &lines,
        path,
        tags: front_matter_tags(&lines),
        max_tokens: max_tokens.max(1),
        overlap_ratio: clamp_ratio(overlap_ratio),
        chunks: Vec::new(),
    };

    for section in split_sections(&lines, &file_stem(path)) {
        emitter.section(&section);
    }

    emitter.chunks
}

fn clamp_ratio(ratio: f64) -> f64 {
    if ratio.is_nan() {
        0.0
    } else {
        ratio.clamp(0.0, MAX_OVERLAP_RATIO)
    }
}

fn file_stem(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Heading-delimited half-open line range `[start, end)` (0-based).
#[derive(Debug, Clone, PartialEq)]
struct Section {
    title: String,
    start: usize,
    end: usize,
}

fn split_sections(lines: &[&str], default_title: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut title = default_title.to_string();
    let mut start = 0;
    let mut in_fence = false;

    for (idx, line) in lines.iter().enumerate() {
        if FENCE.is_match(line) {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        if let Some(caps) = HEADING.captures(line) {
            if idx > start {
                sections.push(Section {
                    title: std::mem::take(&mut title),
                    start,
                    end: idx,
                });
            }
            title = caps
                .get(1)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
            start = idx;
        }
    }

    if start < lines.len() {
        sections.push(Section {
            title,
            start,
            end: lines.len(),
        });
    }

    sections
}

/// Partitions `[start, end)` into paragraphs. Blank lines stick to the
/// preceding paragraph; leading blank lines stick to the first one.
fn split_paragraphs(lines: &[&str], start: usize, end: usize) -> Vec<(usize, usize)> {
    let mut paragraphs = Vec::new();
    let mut para_start = start;
    let mut seen_text = false;
    let mut prev_blank = false;

    for idx in start..end {
        let blank = lines[idx].trim().is_empty();
        if !blank && seen_text && prev_blank {
            paragraphs.push((para_start, idx));
            para_start = idx;
        }
        seen_text |= !blank;
        prev_blank = blank;
    }

    if para_start < end {
        paragraphs.push((para_start, end));
    }

    paragraphs
}

/// Reads `tags:` from a leading `---` front-matter block.
fn front_matter_tags(lines: &[&str]) -> Vec<String> {
    if lines.first().map(|l| l.trim()) != Some("---") {
        return Vec::new();
    }

    let mut tags = Vec::new();
    let mut in_tag_list = false;

    for line in &lines[1..] {
        let trimmed = line.trim();
        if trimmed == "---" {
            break;
        }
        if let Some(value) = trimmed.strip_prefix("tags:") {
            let value = value.trim().trim_start_matches('[').trim_end_matches(']');
            tags.extend(
                value
                    .split(',')
                    .map(|tag| tag.trim().trim_matches(|c| c == '"' || c == '\''))
                    .filter(|tag| !tag.is_empty())
                    .map(str::to_string),
            );
            in_tag_list = value.trim().is_empty();
        } else if in_tag_list {
            match trimmed.strip_prefix("- ") {
                Some(tag) => tags.push(tag.trim().to_string()),
                None => in_tag_list = false,
            }
        }
    }

    tags
}

struct Emitter<'a> {
    lines: &'a [&'a str],
    path: &'a str,
    tags: Vec<String>,
    max_tokens: usize,
    overlap_ratio: f64,
    chunks: Vec<Chunk>,
}

impl Emitter<'_> {
    fn join(&self, start: usize, end: usize) -> String {
        self.lines[start..end].join("\n")
    }

    fn fits(&self, text: &str) -> bool {
        estimate_tokens(text) <= self.max_tokens
    }

    fn section(&mut self, section: &Section) {
        let paragraphs = split_paragraphs(self.lines, section.start, section.end);
        if (section.start..section.end).all(|idx| self.lines[idx].trim().is_empty()) {
            return;
        }

        let whole = self.join(section.start, section.end);
        if paragraphs.len() <= 1 && self.fits(&whole) {
            self.push(&section.title, whole, section.start, section.end);
            return;
        }

        let mut buffer: Option<(usize, usize)> = None;

        for &(p_start, p_end) in &paragraphs {
            let paragraph = self.join(p_start, p_end);
            if !self.fits(&paragraph) {
                if let Some((b_start, b_end)) = buffer.take() {
                    let body = self.join(b_start, b_end);
                    self.push(&section.title, body, b_start, b_end);
                }
                self.split_oversized(&section.title, &paragraph, p_start, p_end);
                continue;
            }

            buffer = match buffer {
                None => Some((p_start, p_end)),
                Some((b_start, _)) if self.fits(&self.join(b_start, p_end)) => {
                    Some((b_start, p_end))
                }
                Some((b_start, b_end)) => {
                    let body = self.join(b_start, b_end);
                    let carry = self.overlap_start(b_start, b_end, &body);
                    self.push(&section.title, body, b_start, b_end);
                    match carry {
                        Some(c_start) if self.fits(&self.join(c_start, p_end)) => {
                            Some((c_start, p_end))
                        }
                        _ => Some((p_start, p_end)),
                    }
                }
            };
        }

        if let Some((b_start, b_end)) = buffer {
            let body = self.join(b_start, b_end);
            self.push(&section.title, body, b_start, b_end);
        }
    }

    /// First line of the overlap carried out of the buffer `[start, end)`,
    /// or `None` when nothing should be carried.
    fn overlap_start(&self, start: usize, end: usize, body: &str) -> Option<usize> {
        if self.overlap_ratio <= 0.0 || end - start < 2 {
            return None;
        }

        let total = body.chars().count();
        let overlap = (total as f64 * self.overlap_ratio).round() as usize;
        if overlap == 0 {
            return None;
        }
        let cut = total - overlap;

        let mut seen = 0;
        let mut carry = end - 1;
        for idx in start..end {
            seen += self.lines[idx].chars().count() + 1;
            if seen > cut {
                carry = idx;
                break;
            }
        }
        let carry = carry.max(start + 1);

        if (carry..end).all(|idx| self.lines[idx].trim().is_empty()) {
            return None;
        }
        Some(carry)
    }

    /// Cuts an oversized paragraph into the longest character prefixes that fit.
    fn split_oversized(&mut self, title: &str, text: &str, start: usize, end: usize) {
        let bounds: Vec<usize> = text
            .char_indices()
            .map(|(idx, _)| idx)
            .chain(std::iter::once(text.len()))
            .collect();
        let char_count = bounds.len() - 1;

        let mut pieces: Vec<(usize, usize)> = Vec::new();
        let mut from = 0;
        while from < char_count {
            let mut lo = 1;
            let mut hi = char_count - from;
            while lo < hi {
                let mid = lo + (hi - lo).div_ceil(2);
                if self.fits(&text[bounds[from]..bounds[from + mid]]) {
                    lo = mid;
                } else {
                    hi = mid - 1;
                }
            }
            let to = from + lo.max(1);
            let piece = &text[bounds[from]..bounds[to]];
            if !piece.trim().is_empty() {
                pieces.push((bounds[from], bounds[to]));
            }
            from = to;
        }

        let last = pieces.len().saturating_sub(1);
        for (n, &(lo, hi)) in pieces.iter().enumerate() {
            let piece = &text[lo..hi];
            let last_char = piece.char_indices().last().map(|(i, _)| lo + i).unwrap_or(lo);
            let first_line = if n == 0 {
                start
            } else {
                start + text[..lo].matches('\n').count()
            };
            let end_line = if n == last {
                end
            } else {
                start + text[..last_char].matches('\n').count() + 1
            };
            self.push(title, piece.to_string(), first_line, end_line);
        }
    }

    /// Records a chunk covering the half-open line range `[start, end)`.
    fn push(&mut self, title: &str, body: String, start: usize, end: usize) {
        let ordinal = self.chunks.len();
        let content_hash = blake3::hash(body.as_bytes()).to_hex().to_string();
        let (start_line, end_line) = (start + 1, end.max(start + 1));
        let id = format!(
            "{}::{}-{}::chunk-{}@{}",
            self.path,
            start_line,
            end_line,
            ordinal,
            &content_hash[..8]
        );

        self.chunks.push(Chunk {
            id,
            title: title.to_string(),
            body,
            path: self.path.to_string(),
            start_line,
            end_line,
            ordinal,
            project_id: String::new(),
            category: FileCategory::Content,
            tags: self.tags.clone(),
            content_hash,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn covered_lines(chunks: &[Chunk]) -> Vec<usize> {
        let mut lines: Vec<usize> = chunks
            .iter()
            .flat_map(|c| c.start_line..=c.end_line)
            .collect();
        lines.sort_unstable();
        lines.dedup();
        lines
    }

    fn long_document() -> String {
        let mut doc = String::from("# Chapter One\n\n");
        for i in 0..12 {
            doc.push_str(&format!(
                "Paragraph {i} walks through the old harbour town at dusk.\nThe lamps flicker while gulls argue over scraps.\n\n"
            ));
        }
        doc.push_str("## Interlude\n\nA short aside.\n");
        doc
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        assert!(chunk("", "a.md", 100, 0.1).is_empty());
        assert!(chunk("\n\n   \n", "a.md", 100, 0.1).is_empty());
    }

    #[test]
    fn test_two_sections_two_chunks() {
        let text = "# A\n\nhello world\n\n# B\n\ngoodbye\n";
        let chunks = chunk(text, "f.md", 100, 0.0);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].title, "A");
        assert_eq!(chunks[1].title, "B");
        assert!(chunks[0].end_line < chunks[1].start_line);
        assert_eq!(covered_lines(&chunks), (1..=7).collect::<Vec<_>>());
        assert_eq!(chunks[0].body, "# A\n\nhello world\n");
        assert_eq!(chunks[1].ordinal, 1);
    }

    #[test]
    fn test_implicit_section_uses_file_stem() {
        let chunks = chunk("Just a note.\n", "notes/idea.md", 100, 0.0);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].title, "idea");
        assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 1));
    }

    #[test]
    fn test_blank_only_section_is_skipped() {
        let text = "\n\n\n# Real\n\nbody\n";
        let chunks = chunk(text, "x.md", 100, 0.0);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].title, "Real");
    }

    #[test]
    fn test_headings_inside_code_fences_are_ignored() {
        let text = "# Setup\n\n```sh\n# not a heading\necho hi\n```\n";
        let chunks = chunk(text, "x.md", 100, 0.0);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].title, "Setup");
    }

    #[test]
    fn test_id_format() {
        let chunks = chunk("hello\n", "dir/f.md", 100, 0.0);
        let c = &chunks[0];
        let expected_hash = blake3::hash(b"hello").to_hex().to_string();
        assert_eq!(c.content_hash, expected_hash);
        assert_eq!(c.id, format!("dir/f.md::1-1::chunk-0@{}", &expected_hash[..8]));
    }

    #[test]
    fn test_oversized_paragraph_is_split_by_binary_search() {
        let text = "x".repeat(1000);
        let chunks = chunk(&text, "big.txt", 50, 0.0);

        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(estimate_tokens(&c.body) <= 50, "chunk too large: {}", c.id);
        }
        let last = chunks.last().map(|c| c.body.len()).unwrap_or(0);
        assert!(chunks.iter().all(|c| c.body.len() >= last));
        let rebuilt: String = chunks.iter().map(|c| c.body.as_str()).collect();
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_oversized_paragraph_with_odd_length() {
        let text = "y".repeat(1003);
        let chunks = chunk(&text, "big.txt", 50, 0.3);
        assert_eq!(chunks.len(), 9);
        assert_eq!(chunks.last().map(|c| c.body.len()), Some(3));
    }

    #[test]
    fn test_budget_and_coverage_on_long_document() {
        let doc = long_document();
        let line_count = doc.lines().count();
        for ratio in [0.0, 0.15, 0.5] {
            let chunks = chunk(&doc, "book.md", 60, ratio);
            assert!(chunks.len() > 2);
            for c in &chunks {
                assert!(estimate_tokens(&c.body) <= 60);
                assert!(c.start_line <= c.end_line);
            }
            assert_eq!(covered_lines(&chunks), (1..=line_count).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_overlap_repeats_trailing_lines() {
        let mut doc = String::from("# Log\n\n");
        for i in 0..30 {
            doc.push_str(&format!("Entry {i} about the harbour.\n\n"));
        }
        let without = chunk(&doc, "log.md", 60, 0.0);
        let with = chunk(&doc, "log.md", 60, 0.5);

        assert!(with.iter().all(|c| estimate_tokens(&c.body) <= 60));
        assert_eq!(
            covered_lines(&with),
            (1..=doc.lines().count()).collect::<Vec<_>>()
        );

        let overlapping = with
            .windows(2)
            .filter(|w| w[1].start_line <= w[0].end_line)
            .count();
        assert!(overlapping > 0);

        let disjoint = without
            .windows(2)
            .all(|w| w[1].start_line > w[0].end_line);
        assert!(disjoint);
    }

    #[test]
    fn test_deterministic_ids() {
        let doc = long_document();
        let a = chunk(&doc, "book.md", 60, 0.2);
        let b = chunk(&doc, "book.md", 60, 0.2);
        assert_eq!(a, b);
    }

    #[test]
    fn test_single_character_change_only_touches_one_chunk() {
        let original = "# One\n\nalpha text\n\n# Two\n\nbeta text\n\n# Three\n\ngamma text\n";
        let edited = original.replace("beta text", "beta test");

        let before = chunk(original, "c.md", 100, 0.0);
        let after = chunk(&edited, "c.md", 100, 0.0);
        assert_eq!(before.len(), after.len());

        assert_eq!(before[0].id, after[0].id);
        assert_eq!(before[2].id, after[2].id);
        assert_ne!(before[1].id, after[1].id);

        let prefix = |id: &str| id.split('@').next().unwrap_or_default().to_string();
        assert_eq!(prefix(&before[1].id), prefix(&after[1].id));
    }

    #[test]
    fn test_front_matter_tags() {
        let inline = "---\ntitle: Draft\ntags: [harbour, night]\n---\n\nText.\n";
        let chunks = chunk(inline, "a.md", 100, 0.0);
        assert_eq!(chunks[0].tags, vec!["harbour", "night"]);

        let listed = "---\ntags:\n  - hero\n  - villain\n---\nText.\n";
        let chunks = chunk(listed, "b.md", 100, 0.0);
        assert_eq!(chunks[0].tags, vec!["hero", "villain"]);

        let none = chunk("Text.\n", "c.md", 100, 0.0);
        assert!(none[0].tags.is_empty());
    }

    #[test]
    fn test_multibyte_text() {
        let text = "雨の日の港町。".repeat(60);
        let chunks = chunk(&text, "jp.md", 40, 0.0);
        assert!(chunks.len() > 1);
        let rebuilt: String = chunks.iter().map(|c| c.body.as_str()).collect();
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_zero_budget_is_clamped() {
        // Two characters still estimate to a single token.
        let chunks = chunk("abc", "z.txt", 0, 0.0);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].body, "ab");
    }

    #[test]
    fn test_engine_clamps_parameters() {
        let engine = ChunkingEngine::new(0, 5.0);
        assert_eq!(engine.max_tokens(), 1);
        assert_eq!(engine.overlap_ratio(), MAX_OVERLAP_RATIO);
        assert_eq!(ChunkingEngine::new(10, f64::NAN).overlap_ratio(), 0.0);
    }

    #[test]
    fn test_category_from_str() {
        assert_eq!("Settings".parse::<FileCategory>(), Ok(FileCategory::Settings));
        assert!("other".parse::<FileCategory>().is_err());
        assert_eq!(FileCategory::Content.to_string(), "content");
    }
}
