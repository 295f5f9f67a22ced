//! Prompt builder for the generator.
//!
//! Templates mark each section with `<!-- section:KEY required|droppable -->`.
//! When the rendered prompt exceeds the byte budget, droppable sections are
//! removed in a fixed order and, as a last resort, the final section is
//! truncated.

use std::sync::LazyLock;

use anyhow::Result;
use minijinja::{Environment, context};
use regex::Regex;
use tracing::debug;

const GENERATE_TEMPLATE: &str = include_str!("prompts/generate.md");
const REFLECT_TEMPLATE: &str = include_str!("prompts/reflect.md");

pub const DEFAULT_PROMPT_BUDGET_BYTES: usize = 40_000;

/// Inputs for the first-iteration prompt.
#[derive(Debug, Clone)]
pub struct GenerateInputs<'a> {
    pub language: &'a str,
    pub goal: &'a str,
    pub description: Option<&'a str>,
    pub test_cases: &'a [String],
}

/// Inputs for a prompt rewritten after a failed iteration.
#[derive(Debug, Clone)]
pub struct ReflectInputs<'a> {
    pub language: &'a str,
    pub goal: &'a str,
    pub test_cases: &'a [String],
    pub error_type: &'a str,
    pub root_cause: &'a str,
    pub suggested_fix: &'a str,
    /// Raw compiler/runtime/test output excerpt.
    pub details: Option<&'a str>,
    pub previous_code: Option<&'a str>,
    /// One line per earlier attempt, oldest first.
    pub history: &'a [String],
}

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("generate", GENERATE_TEMPLATE)
            .expect("generate template should be valid");
        env.add_template("reflect", REFLECT_TEMPLATE)
            .expect("reflect template should be valid");
        Self { env }
    }

    fn render_generate(&self, input: &GenerateInputs<'_>) -> Result<String> {
        let template = self.env.get_template("generate")?;
        let rendered = template.render(context! {
            language => input.language,
            goal => input.goal.trim(),
            description => input.description.map(str::trim).filter(|s| !s.is_empty()),
            test_cases => input.test_cases,
        })?;
        Ok(rendered)
    }

    fn render_reflect(&self, input: &ReflectInputs<'_>) -> Result<String> {
        let template = self.env.get_template("reflect")?;
        let rendered = template.render(context! {
            language => input.language,
            goal => input.goal.trim(),
            test_cases => input.test_cases,
            error_type => input.error_type,
            root_cause => input.root_cause.trim(),
            suggested_fix => input.suggested_fix.trim(),
            details => input.details.map(str::trim).filter(|s| !s.is_empty()),
            previous_code => input.previous_code.map(str::trim).filter(|s| !s.is_empty()),
            history => (!input.history.is_empty()).then_some(input.history),
        })?;
        Ok(rendered)
    }
}

static ENGINE: LazyLock<PromptEngine> = LazyLock::new(PromptEngine::new);

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
            .expect("section marker pattern should compile")
    });

    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::with_capacity(markers.len());
    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[whole.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }
    sections
}

/// Drop order: history -> previous -> details.
fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total_len =
        |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    for key in ["history", "previous", "details"] {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    if total_len(sections) <= budget {
        return;
    }
    let other_len: usize = sections
        .iter()
        .rev()
        .skip(1)
        .map(|s| s.content.len())
        .sum();
    let allowed = budget.saturating_sub(other_len);
    if let Some(last) = sections.last_mut() {
        let before_len = last.content.len();
        if allowed > 12 {
            truncate_at_char_boundary(&mut last.content, allowed - 12);
            last.content.push_str("\n[truncated]");
        } else {
            truncate_at_char_boundary(&mut last.content, allowed);
        }
        debug!(
            section = last.key,
            before_len,
            after_len = last.content.len(),
            "truncated section for budget"
        );
    }
}

fn truncate_at_char_boundary(text: &mut String, max_len: usize) {
    if text.len() <= max_len {
        return;
    }
    let mut cut = max_len;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Builds prompts within a byte budget, dropping less critical sections first.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_PROMPT_BUDGET_BYTES)
    }
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    /// Prompt for the first iteration of a task.
    pub fn build_generate(&self, input: &GenerateInputs<'_>) -> Result<String> {
        let rendered = ENGINE.render_generate(input)?;
        Ok(self.fit(&rendered))
    }

    /// Prompt for the iteration after a failure.
    pub fn build_reflect(&self, input: &ReflectInputs<'_>) -> Result<String> {
        let rendered = ENGINE.render_reflect(input)?;
        Ok(self.fit(&rendered))
    }

    fn fit(&self, rendered: &str) -> String {
        let mut sections = parse_sections(rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        render_sections(&sections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cases() -> Vec<String> {
        vec![
            "Input: 2, Output: true".to_string(),
            "Input: 3, Output: false".to_string(),
        ]
    }

    #[test]
    fn generate_prompt_lists_goal_and_cases_in_order() {
        let cases = cases();
        let prompt = PromptBuilder::default()
            .build_generate(&GenerateInputs {
                language: "java",
                goal: "return true if input is even",
                description: Some("  parity check "),
                test_cases: &cases,
            })
            .expect("render");

        let contract = prompt.find("### Contract").expect("contract");
        let goal = prompt.find("### Goal").expect("goal");
        let tests = prompt.find("### Test Cases").expect("tests");
        assert!(contract < goal && goal < tests);
        assert!(prompt.contains("return true if input is even"));
        assert!(prompt.contains("parity check"));
        assert!(prompt.contains("- Input: 2, Output: true\n- Input: 3, Output: false"));
        assert!(prompt.contains("```java"));
        assert!(!prompt.contains("<!--"));
    }

    fn reflect_inputs<'a>(
        cases: &'a [String],
        history: &'a [String],
        code: &'a str,
    ) -> ReflectInputs<'a> {
        ReflectInputs {
            language: "java",
            goal: "goal",
            test_cases: cases,
            error_type: "COMPILATION_ERROR",
            root_cause: "missing semicolon",
            suggested_fix: "add it",
            details: Some("Solution.java:3: error: ';' expected"),
            previous_code: Some(code),
            history,
        }
    }

    #[test]
    fn reflect_prompt_includes_failure_context() {
        let cases = cases();
        let history = vec!["Iteration 1: TIMEOUT".to_string()];
        let prompt = PromptBuilder::default()
            .build_reflect(&reflect_inputs(&cases, &history, "class A {}"))
            .expect("render");

        assert!(prompt.contains("Error type: COMPILATION_ERROR"));
        assert!(prompt.contains("### Error Details"));
        assert!(prompt.contains("class A {}"));
        assert!(prompt.contains("- Iteration 1: TIMEOUT"));
    }

    #[test]
    fn reflect_prompt_omits_empty_optional_sections() {
        let cases = cases();
        let mut inputs = reflect_inputs(&cases, &[], "");
        inputs.details = None;
        let prompt = PromptBuilder::default()
            .build_reflect(&inputs)
            .expect("render");
        assert!(!prompt.contains("### History"));
        assert!(!prompt.contains("### Previous Code"));
        assert!(!prompt.contains("### Error Details"));
    }

    #[test]
    fn budget_drops_history_and_previous_code_first() {
        let cases = cases();
        let history: Vec<String> = (0..50).map(|i| format!("Iteration {i}: UNKNOWN")).collect();
        let code = "x".repeat(2_000);
        let prompt = PromptBuilder::new(1_500)
            .build_reflect(&reflect_inputs(&cases, &history, &code))
            .expect("render");

        assert!(!prompt.contains("### History"));
        assert!(!prompt.contains("### Previous Code"));
        assert!(prompt.contains("### Contract"));
        assert!(prompt.contains("### Previous Attempt Failed"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let mut text = "héllo".to_string();
        truncate_at_char_boundary(&mut text, 2);
        assert_eq!(text, "h");
    }
}
