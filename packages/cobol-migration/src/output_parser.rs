//! Structured-output parser
//!
//! The transformation agent is asked for a flat JSON object mapping file names
//! to file contents. Models wrap that in Markdown fences or surround it with
//! prose often enough that parsing is best-effort: strip fences, try the whole
//! text, then try the outermost `{ … }` slice. Parsing never panics; failures
//! come back as a [`ParseError`] next to an empty file list.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;

/// Package path used when the content declares no package
pub const FALLBACK_PACKAGE_PATH: &str = "generated";

/// Type name used when neither a declaration nor a file stem is usable
pub const FALLBACK_TYPE_NAME: &str = "GeneratedType";

static PACKAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*package\s+([A-Za-z_$][A-Za-z0-9_$]*(?:\s*\.\s*[A-Za-z_$][A-Za-z0-9_$]*)*)\s*;")
        .expect("valid package pattern")
});

static TYPE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^\s*(?:@[A-Za-z_][\w.]*(?:\([^)\n]*\))?\s+)*(?:(?:public|protected|private|abstract|final|static|sealed|non-sealed|strictfp)\s+)*(?:class|interface|enum|record|@interface)\s+([A-Za-z_$][A-Za-z0-9_$]*)",
    )
    .expect("valid type declaration pattern")
});

/// Fence marker plus an optional language tag directly after it
static FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```[A-Za-z0-9_+.\-]*").expect("valid code fence pattern"));

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("model output is empty")]
    Empty,

    #[error("model output is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("model output is JSON but not an object")]
    NotAnObject,

    #[error("value for '{key}' is not a string")]
    NonStringValue { key: String },
}

/// File list recovered from model output, in the order the model wrote it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedOutput {
    pub files: Vec<(String, String)>,
    pub error: Option<ParseError>,
}

impl ParsedOutput {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    fn failed(error: ParseError) -> Self {
        Self {
            files: Vec::new(),
            error: Some(error),
        }
    }
}

/// Parse model output into `(file name, content)` pairs
pub fn parse(raw: &str) -> ParsedOutput {
    let text = strip_code_fences(raw);
    let text = text.trim();
    if text.is_empty() {
        return ParsedOutput::failed(ParseError::Empty);
    }

    let error = match parse_object(text) {
        Ok(files) => return ParsedOutput { files, error: None },
        Err(error) => error,
    };

    // Valid JSON of the wrong shape is not retried on a slice
    if !matches!(error, ParseError::InvalidJson(_)) {
        return ParsedOutput::failed(error);
    }

    match outermost_object(text) {
        Some(slice) if slice.len() < text.len() => match parse_object(slice) {
            Ok(files) => ParsedOutput { files, error: None },
            Err(_) => ParsedOutput::failed(error),
        },
        _ => ParsedOutput::failed(error),
    }
}

/// Remove code fence markers wherever they occur. Lines holding nothing but
/// a fence are dropped; payload sharing a line with a fence is kept.
pub fn strip_code_fences(text: &str) -> String {
    text.lines()
        .filter_map(|line| {
            let stripped = FENCE_RE.replace_all(line, "");
            let fence_only = stripped.len() != line.len() && stripped.trim().is_empty();
            (!fence_only).then_some(stripped)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn outermost_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

fn parse_object(text: &str) -> Result<Vec<(String, String)>, ParseError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ParseError::InvalidJson(e.to_string()))?;
    if !value.is_object() {
        return Err(ParseError::NotAnObject);
    }

    // Second pass keeps the key order of the document
    let OrderedEntries(entries) =
        serde_json::from_str(text).map_err(|e| ParseError::InvalidJson(e.to_string()))?;

    let mut files: Vec<(String, String)> = Vec::with_capacity(entries.len());
    for (key, value) in entries {
        let Value::String(content) = value else {
            return Err(ParseError::NonStringValue { key });
        };
        // Repeated keys: last value wins, first position is kept
        match files.iter_mut().find(|(name, _)| *name == key) {
            Some(existing) => existing.1 = content,
            None => files.push((key, content)),
        }
    }
    Ok(files)
}

/// Top-level object entries in document order
struct OrderedEntries(Vec<(String, Value)>);

impl<'de> Deserialize<'de> for OrderedEntries {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = OrderedEntries;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((key, value)) = map.next_entry::<String, Value>()? {
                    entries.push((key, value));
                }
                Ok(OrderedEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

/// `package a.b.c;` → `a/b/c`, or [`FALLBACK_PACKAGE_PATH`]
pub fn derive_package_path(content: &str) -> String {
    PACKAGE_RE
        .captures(content)
        .and_then(|caps| caps.get(1))
        .map(|m| {
            m.as_str()
                .split('.')
                .map(str::trim)
                .collect::<Vec<_>>()
                .join("/")
        })
        .unwrap_or_else(|| FALLBACK_PACKAGE_PATH.to_string())
}

/// First class / interface / enum / record declared in `content`, else the
/// file stem, else [`FALLBACK_TYPE_NAME`]
pub fn derive_type_name(content: &str, file_name: &str) -> String {
    if let Some(name) = TYPE_RE.captures(content).and_then(|caps| caps.get(1)) {
        return name.as_str().to_string();
    }

    let base = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name);
    let stem = crate::source::unit_stem(base);
    if is_java_identifier(stem) {
        stem.to_string()
    } else {
        FALLBACK_TYPE_NAME.to_string()
    }
}

fn is_java_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn names(parsed: &ParsedOutput) -> Vec<&str> {
        parsed.files.iter().map(|(name, _)| name.as_str()).collect()
    }

    #[test]
    fn test_plain_object_keeps_order() {
        let parsed = parse(r#"{"Zeta.java": "class Zeta {}", "Alpha.java": "class Alpha {}"}"#);
        assert!(parsed.is_ok());
        assert_eq!(names(&parsed), vec!["Zeta.java", "Alpha.java"]);
        assert_eq!(parsed.files[0].1, "class Zeta {}");
    }

    #[test]
    fn test_fenced_object() {
        let raw = "```json\n{\"A.java\": \"class A {}\"}\n```";
        let parsed = parse(raw);
        assert_eq!(parsed.files, vec![("A.java".to_string(), "class A {}".to_string())]);
    }

    #[test]
    fn test_fences_stripped_anywhere() {
        let raw = "Here you go:\n```\n{\"A.java\": \"x\"}\n```\nDone.";
        let parsed = parse(raw);
        assert!(parsed.is_ok(), "{:?}", parsed.error);
        assert_eq!(names(&parsed), vec!["A.java"]);
    }

    #[test]
    fn test_single_line_fence_keeps_payload() {
        for raw in [
            "```json {\"A.java\":\"x\"} ```",
            "```json{\"A.java\":\"x\"}```",
            "```{\"A.java\":\"x\"}```",
        ] {
            let parsed = parse(raw);
            assert!(parsed.is_ok(), "{raw}: {:?}", parsed.error);
            assert_eq!(parsed.files, vec![("A.java".to_string(), "x".to_string())]);
        }
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```java\nclass A {}\n```"), "class A {}");
        assert_eq!(strip_code_fences("intro ```json {} ``` outro"), "intro  {}  outro");
        assert_eq!(strip_code_fences("no fences"), "no fences");
    }

    #[test]
    fn test_fallback_to_brace_slice() {
        let raw = "Sure! {\"A.java\": \"class A { }\"} Let me know.";
        let parsed = parse(raw);
        assert!(parsed.is_ok());
        assert_eq!(parsed.files[0].1, "class A { }");
    }

    #[test]
    fn test_empty_and_garbage() {
        assert_eq!(parse("").error, Some(ParseError::Empty));
        assert_eq!(parse("```\n```").error, Some(ParseError::Empty));

        let garbage = parse("not json at all");
        assert!(garbage.files.is_empty());
        assert!(matches!(garbage.error, Some(ParseError::InvalidJson(_))));

        let truncated = parse("{\"A.java\": \"class A {");
        assert!(matches!(truncated.error, Some(ParseError::InvalidJson(_))));
    }

    #[test]
    fn test_wrong_shapes() {
        assert_eq!(parse("[1, 2]").error, Some(ParseError::NotAnObject));
        assert_eq!(parse("\"text\"").error, Some(ParseError::NotAnObject));
        assert_eq!(
            parse(r#"{"A.java": 1}"#).error,
            Some(ParseError::NonStringValue {
                key: "A.java".to_string()
            })
        );
    }

    #[test]
    fn test_repeated_key_last_wins() {
        let parsed = parse(r#"{"A.java": "one", "B.java": "b", "A.java": "two"}"#);
        assert_eq!(names(&parsed), vec!["A.java", "B.java"]);
        assert_eq!(parsed.files[0].1, "two");
    }

    #[test]
    fn test_derive_package_path() {
        assert_eq!(
            derive_package_path("// header\npackage com.example.billing;\n\npublic class X {}"),
            "com/example/billing"
        );
        assert_eq!(derive_package_path("public class X {}"), FALLBACK_PACKAGE_PATH);
        assert_eq!(derive_package_path("// package not.this;"), FALLBACK_PACKAGE_PATH);
    }

    #[test]
    fn test_derive_type_name() {
        let content = "package a;\n\nimport java.util.List;\n\n/**\n * class Doc is not it\n */\n@Entity\npublic final class Payroll {\n}\n";
        assert_eq!(derive_type_name(content, "Other.java"), "Payroll");
        assert_eq!(derive_type_name("public record Money(long cents) {}", "x.java"), "Money");
        assert_eq!(derive_type_name("interface Port {}", "x.java"), "Port");
        assert_eq!(derive_type_name("// nothing", "Helper.java"), "Helper");
        assert_eq!(derive_type_name("// nothing", "my-file.java"), FALLBACK_TYPE_NAME);
        assert_eq!(derive_type_name("", ""), FALLBACK_TYPE_NAME);
    }
}
