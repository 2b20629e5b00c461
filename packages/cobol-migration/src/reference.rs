//! Reference extraction
//!
//! Pulls the names of external units a COBOL source refers to:
//! `COPY name`, `EXEC SQL INCLUDE name` and static `CALL 'name'`.
//! This is pattern matching over text, not a parser. Anything that does not
//! match cleanly is ignored.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Extensions recognised on a referenced name
pub const KNOWN_EXTENSIONS: &[&str] = &["cpy", "copy", "cbl", "cob"];

/// Appended to COPY / INCLUDE targets without a known extension
pub const MODULE_EXTENSION: &str = "cpy";

/// Appended to CALL targets without a known extension
pub const PROGRAM_EXTENSION: &str = "cbl";

/// DB2 communication areas, supplied by the precompiler
const SQL_BUILTIN_INCLUDES: &[&str] = &["SQLCA", "SQLDA"];

static COPY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)\bCOPY\s+(?:"([^"\n]+)"|'([^'\n]+)'|([A-Z0-9][A-Z0-9_-]*)(?:\.([A-Z0-9]+))?)"#,
    )
    .expect("valid COPY pattern")
});

static INCLUDE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)\bEXEC\s+SQL\s+INCLUDE\s+(?:"([^"\n]+)"|'([^'\n]+)'|([A-Z0-9][A-Z0-9_-]*)(?:\.([A-Z0-9]+))?)"#,
    )
    .expect("valid INCLUDE pattern")
});

static CALL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bCALL\s+(?:"([^"\n]+)"|'([^'\n]+)')"#).expect("valid CALL pattern")
});

/// How a unit is referenced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Copy,
    Include,
    Call,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::Copy => "copy",
            ReferenceKind::Include => "include",
            ReferenceKind::Call => "call",
        }
    }

    /// Extension appended when the reference carries none
    pub fn default_extension(&self) -> &'static str {
        match self {
            ReferenceKind::Copy | ReferenceKind::Include => MODULE_EXTENSION,
            ReferenceKind::Call => PROGRAM_EXTENSION,
        }
    }
}

impl std::fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One referenced unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    /// Canonical unit id (always carries an extension)
    pub name: String,
    pub kind: ReferenceKind,
    /// 1-based line of the occurrence
    pub line: usize,
    /// Trimmed source line
    pub context: String,
}

/// Result of scanning one unit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceScan {
    /// De-duplicated, first-seen order
    pub references: Vec<Reference>,
    /// Every raw occurrence, in source order
    pub occurrences: Vec<Reference>,
}

/// Canonical names referenced by `content`, de-duplicated, first-seen order
pub fn extract(content: &str) -> Vec<String> {
    extract_references(content)
        .into_iter()
        .map(|r| r.name)
        .collect()
}

/// De-duplicated references with kind and location of the first occurrence
pub fn extract_references(content: &str) -> Vec<Reference> {
    scan(content).references
}

pub fn scan(content: &str) -> ReferenceScan {
    let text = blank_comment_lines(content);
    let line_starts = line_starts(&text);
    let source_lines: Vec<&str> = content.lines().collect();

    let mut found: Vec<(usize, Reference)> = Vec::new();
    for (re, kind) in [
        (&*COPY_RE, ReferenceKind::Copy),
        (&*INCLUDE_RE, ReferenceKind::Include),
        (&*CALL_RE, ReferenceKind::Call),
    ] {
        for caps in re.captures_iter(&text) {
            let Some(whole) = caps.get(0) else { continue };
            let raw = caps
                .get(1)
                .or_else(|| caps.get(2))
                .or_else(|| caps.get(3))
                .map(|m| m.as_str());
            let extension = caps.get(4).map(|m| m.as_str());

            let Some(name) = raw.and_then(|raw| canonical_name(raw, extension, kind)) else {
                continue;
            };
            if kind == ReferenceKind::Include && is_sql_builtin(&name) {
                continue;
            }

            let line_idx = line_index(&line_starts, whole.start());
            found.push((
                whole.start(),
                Reference {
                    name,
                    kind,
                    line: line_idx + 1,
                    context: source_lines
                        .get(line_idx)
                        .map(|line| line.trim().to_string())
                        .unwrap_or_default(),
                },
            ));
        }
    }

    // Merge the three pattern passes back into source order
    found.sort_by_key(|(offset, _)| *offset);
    let occurrences: Vec<Reference> = found.into_iter().map(|(_, r)| r).collect();

    let mut seen = HashSet::new();
    let references = occurrences
        .iter()
        .filter(|r| seen.insert(r.name.to_lowercase()))
        .cloned()
        .collect();

    ReferenceScan {
        references,
        occurrences,
    }
}

/// Normalise a matched name into a unit id: strip path and quotes, keep a
/// known extension, otherwise append the kind's default extension.
fn canonical_name(raw: &str, extension: Option<&str>, kind: ReferenceKind) -> Option<String> {
    let raw = raw.trim().trim_matches(|c| c == '"' || c == '\'').trim();
    let raw = raw.rsplit(['/', '\\']).next().unwrap_or(raw).trim();
    let raw = raw.trim_end_matches('.');
    if raw.is_empty() {
        return None;
    }

    if let Some(ext) = extension {
        if is_known_extension(ext) {
            return Some(format!("{}.{}", raw, ext));
        }
    }

    if let Some((_, ext)) = raw.rsplit_once('.') {
        if is_known_extension(ext) {
            return Some(raw.to_string());
        }
    }

    Some(format!("{}.{}", raw, kind.default_extension()))
}

fn is_known_extension(ext: &str) -> bool {
    KNOWN_EXTENSIONS.iter().any(|k| k.eq_ignore_ascii_case(ext))
}

fn is_sql_builtin(name: &str) -> bool {
    let stem = crate::source::unit_stem(name);
    SQL_BUILTIN_INCLUDES
        .iter()
        .any(|b| b.eq_ignore_ascii_case(stem))
}

/// Fixed-format comment (`*` or `/` in column 7 after a sequence area) or
/// free-format `*>` comment.
fn is_comment_line(line: &str) -> bool {
    if line.trim_start().starts_with("*>") {
        return true;
    }
    let bytes = line.as_bytes();
    bytes.len() > 6
        && matches!(bytes[6], b'*' | b'/')
        && bytes[..6].iter().all(|b| b.is_ascii_digit() || *b == b' ')
}

/// Replace comment lines with empty lines so line numbers stay intact
fn blank_comment_lines(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    for line in content.split('\n') {
        if !is_comment_line(line) {
            out.push_str(line);
        }
        out.push('\n');
    }
    out
}

fn line_starts(text: &str) -> Vec<usize> {
    std::iter::once(0)
        .chain(text.match_indices('\n').map(|(i, _)| i + 1))
        .collect()
}

fn line_index(line_starts: &[usize], offset: usize) -> usize {
    match line_starts.binary_search(&offset) {
        Ok(idx) => idx,
        Err(idx) => idx.saturating_sub(1),
    }
}
