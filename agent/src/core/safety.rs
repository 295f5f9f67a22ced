//! Pre-execution safety screen for generated candidates.
//!
//! This is a textual denylist, not a sandbox. Matching is case-insensitive
//! over the raw source and is trivially bypassed by obfuscated identifiers,
//! string concatenation or reflection tricks the patterns do not anticipate.
//! Real isolation belongs behind the [`Sandbox`](crate::io::sandbox::Sandbox)
//! seam; this gate only keeps obviously hostile candidates out of it.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::core::types::SafetyVerdict;

pub const DEFAULT_LOOP_WINDOW: usize = 10;

/// A single forbidden-pattern rule.
#[derive(Debug)]
struct Rule {
    description: &'static str,
    pattern: Regex,
}

impl Rule {
    fn new(description: &'static str, pattern: &str) -> Self {
        Self {
            description,
            pattern: Regex::new(&format!("(?i){pattern}")).expect("safety rule should compile"),
        }
    }
}

// Evaluated in this order; the verdict lists violations in the same order.
static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        Rule::new("process execution", r"Runtime\s*\.\s*getRuntime\s*\(\s*\)"),
        Rule::new("process execution", r"ProcessBuilder"),
        Rule::new("process execution", r"\bexec\b"),
        Rule::new(
            "filesystem access",
            r"FileWriter|FileReader|FileOutputStream|FileInputStream|RandomAccessFile",
        ),
        Rule::new("filesystem access", r"java\s*\.\s*nio\s*\.\s*file"),
        Rule::new(
            "network access",
            r"ServerSocket|Socket|HttpURLConnection|\bURL\b|java\s*\.\s*net\b",
        ),
        Rule::new("process termination", r"System\s*\.\s*exit"),
        Rule::new("process termination", r"Runtime\s*\.\s*getRuntime\s*\(\s*\)\s*\.\s*halt"),
        Rule::new("reflection", r"Class\s*\.\s*forName"),
        Rule::new("dynamic class loading", r"ClassLoader"),
        Rule::new("reflection", r"java\s*\.\s*lang\s*\.\s*reflect"),
        Rule::new("blocking sleep", r"Thread\s*\.\s*sleep"),
    ]
});

static INFINITE_LOOP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bwhile\s*\(\s*true\s*\)|\bfor\s*\(\s*;\s*;\s*\)")
        .expect("loop pattern should compile")
});

static LOOP_EXIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(break|return)\b").expect("exit pattern should compile"));

/// Pattern-based pre-execution screen.
#[derive(Debug, Clone)]
pub struct SafetyGate {
    loop_window: usize,
}

impl Default for SafetyGate {
    fn default() -> Self {
        Self::new(DEFAULT_LOOP_WINDOW)
    }
}

impl SafetyGate {
    /// `loop_window` is the number of lines (including the loop header) searched
    /// for a `break`/`return` after an infinite-condition loop.
    pub fn new(loop_window: usize) -> Self {
        Self {
            loop_window: loop_window.max(1),
        }
    }

    /// Screen `source`. Every rule is evaluated; the verdict lists all matches.
    pub fn check(&self, source: &str) -> SafetyVerdict {
        let mut violations = Vec::new();

        for rule in &*RULES {
            if let Some(found) = rule.pattern.find(source) {
                violations.push(format!(
                    "Forbidden {} detected: `{}`",
                    rule.description,
                    found.as_str()
                ));
            }
        }

        if let Some(line) = self.unbounded_loop_line(source) {
            violations.push(format!(
                "Potential infinite loop detected at line {line}: no break or return within {} lines",
                self.loop_window
            ));
        }

        debug!(violations = violations.len(), "safety check finished");
        SafetyVerdict { violations }
    }

    /// 1-based line number of the first infinite-condition loop with no exit nearby.
    fn unbounded_loop_line(&self, source: &str) -> Option<usize> {
        let lines: Vec<&str> = source.lines().collect();
        lines.iter().enumerate().find_map(|(idx, line)| {
            if !INFINITE_LOOP_RE.is_match(line) {
                return None;
            }
            let end = (idx + self.loop_window).min(lines.len());
            let has_exit = lines[idx..end].iter().any(|l| LOOP_EXIT_RE.is_match(l));
            (!has_exit).then_some(idx + 1)
        })
    }
}
