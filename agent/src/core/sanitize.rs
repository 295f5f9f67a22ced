//! Light clean-up and structural checks for generated source.

use std::sync::LazyLock;

use anyhow::{Result, bail};
use regex::Regex;

/// Type name assumed when the source declares none.
pub const DEFAULT_ENTRY_TYPE: &str = "Solution";

static PUBLIC_CLASS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"public\s+class\s+(\w+)").expect("class pattern should compile"));

static ANY_CLASS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bclass\s+(\w+)").expect("class pattern should compile"));

const DECLARATION_MARKERS: [&str; 7] = [
    "class ",
    "interface ",
    "enum ",
    "record ",
    "public ",
    "private ",
    "protected ",
];

/// Extract the code from markdown fences (if any) and trim it.
///
/// When the text contains a fenced block, the body of the first block is
/// returned; an unterminated fence yields everything after the opening line.
pub fn strip_markdown(raw: &str) -> String {
    let Some(open) = raw.find("```") else {
        return raw.trim().to_string();
    };
    let after_open = &raw[open + 3..];
    // Skip the info string (e.g. `java`) on the opening fence line.
    let body_start = after_open.find('\n').map(|i| i + 1).unwrap_or(after_open.len());
    let body = &after_open[body_start..];
    let body = match body.find("```") {
        Some(close) => &body[..close],
        None => body,
    };
    body.trim().to_string()
}

/// True when the source contains at least one recognizable declaration.
pub fn has_valid_structure(source: &str) -> bool {
    DECLARATION_MARKERS
        .iter()
        .any(|marker| source.contains(marker))
}

/// Strip fences, trim, and reject sources with no recognizable declaration.
pub fn sanitize(raw: &str) -> Result<String> {
    let code = strip_markdown(raw);
    if code.is_empty() {
        bail!("generated source is empty");
    }
    if !has_valid_structure(&code) {
        bail!("source does not contain a class, interface, enum or method declaration");
    }
    Ok(code)
}

/// Name of the first declared type, preferring a public class.
pub fn extract_entry_type(source: &str) -> String {
    PUBLIC_CLASS_RE
        .captures(source)
        .or_else(|| ANY_CLASS_RE.captures(source))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| DEFAULT_ENTRY_TYPE.to_string())
}
