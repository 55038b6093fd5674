//! Line-window chunker.
//!
//! Splits a file into [`RawChunk`]s on blank-line boundaries, each spanning
//! at most `max_lines` lines. Line numbers are 1-based and inclusive.
//!
//! # Algorithm
//!
//! 1. Group the file into paragraphs: maximal runs of non-blank lines.
//! 2. Accumulate paragraphs into the current chunk until the next one would
//!    push its line span past `max_lines`.
//! 3. In code files, a paragraph that opens with a definition
//!    (`fn`, `def`, `class`, ...) starts a new chunk unless the current
//!    one has no definition yet (leading imports stay with the first).
//! 4. Paragraphs longer than `max_lines` are hard-split.
//!
//! For code files each chunk also carries heuristic [`ChunkMetadata`]:
//! the first definition's name, type, and signature, import lines, and
//! the names of called functions.
//!
//! ```rust
//! use index_harness_core::chunk::LineChunker;
//! use index_harness_core::provider::Chunker;
//!
//! let chunker = LineChunker::new(80);
//! let chunks = chunker.chunk("lib.rs", "fn a() {\n    b();\n}\n\nfn b() {}\n").unwrap();
//! assert_eq!(chunks.len(), 2);
//! assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 3));
//! ```

use anyhow::{bail, Result};

use crate::language::detect;
use crate::models::{ChunkMetadata, RawChunk};
use crate::provider::Chunker;

/// Approximate characters-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

const MODIFIERS: &[&str] = &[
    "pub", "pub(crate)", "pub(super)", "async", "unsafe", "export", "default", "static",
    "public", "private", "protected", "abstract", "final", "extern",
];

const DEFINITIONS: &[(&str, &str)] = &[
    ("fn", "function"),
    ("def", "function"),
    ("function", "function"),
    ("func", "function"),
    ("class", "class"),
    ("struct", "struct"),
    ("enum", "enum"),
    ("trait", "trait"),
    ("interface", "interface"),
    ("impl", "impl"),
    ("mod", "module"),
];

const NOT_CALLS: &[&str] = &[
    "if", "while", "for", "match", "return", "fn", "def", "function", "func", "switch",
    "catch", "elif", "sizeof", "typeof", "and", "or", "not", "in", "new", "await", "yield",
    "assert", "super", "self", "Some", "Ok", "Err",
];

/// Estimate the token count of a chunk.
pub fn approx_tokens(text: &str) -> u32 {
    text.chars().count().div_ceil(CHARS_PER_TOKEN) as u32
}

#[derive(Debug, Clone)]
pub struct LineChunker {
    max_lines: usize,
}

impl LineChunker {
    pub fn new(max_lines: usize) -> Self {
        Self { max_lines }
    }
}

impl Chunker for LineChunker {
    fn chunk(&self, path: &str, content: &str) -> Result<Vec<RawChunk>> {
        if self.max_lines == 0 {
            bail!("max_lines must be > 0");
        }
        if content.contains('\0') {
            bail!("binary content");
        }

        let is_code = detect(path).is_code();
        let lines: Vec<&str> = content.lines().collect();
        let mut chunks = Vec::new();
        // Current chunk as 0-based inclusive line indices.
        let mut current: Option<(usize, usize)> = None;
        let mut current_has_definition = false;

        for (start, end) in paragraphs(&lines) {
            let opens_definition = is_code && definition(lines[start]).is_some();

            if let Some((cur_start, cur_end)) = current {
                let too_long = end - cur_start + 1 > self.max_lines;
                if too_long || (opens_definition && current_has_definition) {
                    chunks.push(make_chunk(&lines, cur_start, cur_end, is_code));
                    current = None;
                    current_has_definition = false;
                }
            }
            current_has_definition |= opens_definition;

            if end - start + 1 > self.max_lines {
                let mut piece_start = start;
                while piece_start <= end {
                    let piece_end = (piece_start + self.max_lines - 1).min(end);
                    if piece_end == end {
                        current = Some((piece_start, piece_end));
                    } else {
                        chunks.push(make_chunk(&lines, piece_start, piece_end, is_code));
                    }
                    piece_start = piece_end + 1;
                }
                continue;
            }

            current = match current {
                Some((cur_start, _)) => Some((cur_start, end)),
                None => Some((start, end)),
            };
        }

        if let Some((start, end)) = current {
            chunks.push(make_chunk(&lines, start, end, is_code));
        }

        Ok(chunks)
    }
}

/// Maximal runs of non-blank lines as 0-based inclusive ranges.
fn paragraphs(lines: &[&str]) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut start = None;
    for (i, line) in lines.iter().enumerate() {
        match (line.trim().is_empty(), start) {
            (false, None) => start = Some(i),
            (true, Some(s)) => {
                out.push((s, i - 1));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        out.push((s, lines.len() - 1));
    }
    out
}

fn make_chunk(lines: &[&str], start: usize, end: usize, is_code: bool) -> RawChunk {
    let body = &lines[start..=end];
    let metadata = if is_code {
        Some(extract_metadata(body)).filter(|m| !m.is_empty())
    } else {
        None
    };
    RawChunk {
        start_line: (start + 1) as u32,
        end_line: (end + 1) as u32,
        content: body.join("\n"),
        metadata,
    }
}

/// `(symbol_type, name)` if the line opens a definition.
fn definition(line: &str) -> Option<(&'static str, String)> {
    let mut rest = line.trim_start();
    'strip: loop {
        for modifier in MODIFIERS {
            if let Some(after) = rest.strip_prefix(modifier) {
                if after.starts_with(char::is_whitespace) {
                    rest = after.trim_start();
                    continue 'strip;
                }
            }
        }
        break;
    }

    for (keyword, symbol_type) in DEFINITIONS {
        let Some(after) = rest.strip_prefix(keyword) else {
            continue;
        };
        if !after.starts_with(char::is_whitespace) {
            continue;
        }
        let mut after = after.trim_start();
        // Go method receivers: `func (s *Server) Start(`.
        if *keyword == "func" && after.starts_with('(') {
            after = after.split_once(')').map(|(_, r)| r.trim_start())?;
        }
        let name = leading_identifier(after);
        if name.is_empty() {
            return None;
        }
        return Some((*symbol_type, name.to_string()));
    }
    None
}

fn leading_identifier(s: &str) -> &str {
    let end = s
        .char_indices()
        .find(|(_, c)| !(c.is_alphanumeric() || *c == '_'))
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    &s[..end]
}

fn is_import(line: &str) -> bool {
    let t = line.trim_start();
    ["use ", "import ", "from ", "#include", "require("]
        .iter()
        .any(|p| t.starts_with(p))
        || t.contains(" = require(")
}

fn extract_metadata(body: &[&str]) -> ChunkMetadata {
    let mut meta = ChunkMetadata::default();

    if let Some((line, (symbol_type, name))) = body
        .iter()
        .find_map(|line| definition(line).map(|d| (*line, d)))
    {
        meta.signature = Some(
            line.trim()
                .trim_end_matches('{')
                .trim_end_matches(':')
                .trim_end()
                .to_string(),
        );
        meta.symbol_type = Some(symbol_type.to_string());
        meta.symbol_name = Some(name);
    }

    for line in body {
        if is_import(line) {
            meta.imports.push(line.trim().to_string());
            continue;
        }
        for call in calls_in(line) {
            let is_self = meta.symbol_name.as_deref() == Some(call.as_str())
                && definition(line).is_some();
            if !is_self && !meta.calls.contains(&call) {
                meta.calls.push(call);
            }
        }
    }

    meta
}

/// Identifiers immediately followed by `(`.
fn calls_in(line: &str) -> Vec<String> {
    let code = line.split("//").next().unwrap_or(line);
    let bytes = code.as_bytes();
    let mut calls = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_alphabetic() || c == b'_' {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            if i < bytes.len() && bytes[i] == b'(' {
                let ident = &code[start..i];
                if !NOT_CALLS.contains(&ident) {
                    calls.push(ident.to_string());
                }
            }
        } else {
            i += 1;
        }
    }

    calls
}
