//! Prompt assembler (spec §4.6).
//!
//! Composes the system and user message pair passed to the LLM transport,
//! using `handlebars` the way the teacher's `prompt.rs` uses it to render a
//! `ChatPrompt`'s messages — here adapted to build the few-shot and RaR
//! sections rather than a generic templated chat.

use handlebars::Handlebars;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{Complexity, FewShotExample, Intent};

/// The system+user message pair handed to [`crate::llm`].
#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    pub system: String,
    pub user: String,
    /// The plain "Request: …" section alone, with no few-shot block, RaR
    /// scaffolding, or schema contract. [`crate::optimizers::IdentityOptimizer`]
    /// uses this instead of `user` — `user` always ends with
    /// [`SCHEMA_CONTRACT`], whose literal field names are themselves
    /// banned phrases (spec §4.5/§6), so it can never stand in as an
    /// `improved_prompt` on its own.
    pub request_only: String,
}

const SCHEMA_CONTRACT: &str = r#"Respond with a single JSON object and nothing else, matching this contract exactly:
{
  "improved_prompt": string,
  "clarifying_questions": string[] (at most 3 entries),
  "assumptions": string[] (at most 5 entries),
  "confidence": number in [0, 1]
}"#;

fn role_for(intent: Intent, complexity: Complexity) -> &'static str {
    match (intent, complexity) {
        (Intent::Debug, _) => "Code Debugger",
        (Intent::Refactor, _) => "Refactoring Specialist",
        (Intent::Generate, Complexity::Simple) => "Developer",
        (Intent::Generate, Complexity::Moderate) => "Senior Developer",
        (Intent::Generate, Complexity::Complex) => "Software Architect",
        (Intent::Explain, _) => "Technical Writer",
    }
}

/// Numeric constants, named providers and explicit enumerations that RaR is
/// forbidden to rephrase — they must survive verbatim into the
/// "Requirements (NON-NEGOTIABLE)" section.
///
/// Matches: bare numbers with an optional unit suffix (`15min`, `7d`, `100`),
/// and capitalized words/acronyms (`OAuth2`, `JWT`, `Redis`, `Admin`),
/// conservative enough to over-capture rather than drop a literal the caller
/// cares about.
static VERBATIM_TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:\d+[A-Za-z%]*|[A-Z][A-Za-z0-9]*(?:[A-Z][A-Za-z0-9]*)*)\b").unwrap()
});

fn extract_verbatim_tokens(text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut tokens = Vec::new();
    for m in VERBATIM_TOKEN_RE.find_iter(text) {
        let token = m.as_str().to_owned();
        if seen.insert(token.clone()) {
            tokens.push(token);
        }
    }
    tokens
}

/// Assembles the system+user prompt pair for a single LLM call.
pub struct PromptAssembler {
    handlebars: Handlebars<'static>,
}

impl Default for PromptAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptAssembler {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        Self { handlebars }
    }

    /// Assemble the system+user prompt for `idea` (and optional `context`),
    /// given the analyzed intent/complexity and the retrieved few-shot
    /// examples.
    pub fn assemble(
        &self,
        idea: &str,
        context: Option<&str>,
        intent: Intent,
        complexity: Complexity,
        examples: &[FewShotExample],
    ) -> AssembledPrompt {
        let role = role_for(intent, complexity);
        let system = format!(
            "Act as a {role}. Turn the user's rough idea into a clear, complete, and actionable prompt."
        );

        let request_only = self.render_request_section(idea, context);

        let mut sections = Vec::new();

        if !examples.is_empty() {
            sections.push(self.render_fewshot_block(examples));
        }

        if complexity == Complexity::Complex {
            sections.push(self.render_rar_section(idea, context));
        }

        sections.push(request_only.clone());
        sections.push(SCHEMA_CONTRACT.to_owned());

        AssembledPrompt {
            system,
            user: sections.join("\n\n"),
            request_only,
        }
    }

    fn render_fewshot_block(&self, examples: &[FewShotExample]) -> String {
        let mut block = String::from("Reference Patterns\n");
        for (i, example) in examples.iter().enumerate() {
            block.push_str(&format!(
                "## Example {}\nInput: {}\nOutput: {}\n",
                i + 1,
                example.input,
                example.output
            ));
        }
        block.trim_end().to_owned()
    }

    fn render_rar_section(&self, idea: &str, context: Option<&str>) -> String {
        let mut verbatim_tokens = extract_verbatim_tokens(idea);
        if let Some(context) = context {
            verbatim_tokens.extend(extract_verbatim_tokens(context));
        }

        let understanding = self.render_template(
            "Understanding\nThe request, expanded for clarity: {{idea}}{{#if context}} Additional context: {{context}}{{/if}}",
            idea,
            context,
        );

        let mut requirements = String::from("Requirements (NON-NEGOTIABLE)\n");
        if verbatim_tokens.is_empty() {
            requirements.push_str("- Address every constraint stated in the request below exactly as given.");
        } else {
            for token in &verbatim_tokens {
                requirements.push_str(&format!("- Preserve the literal value \"{token}\" exactly as given.\n"));
            }
        }

        format!("{understanding}\n\n{}", requirements.trim_end())
    }

    fn render_request_section(&self, idea: &str, context: Option<&str>) -> String {
        self.render_template(
            "Request: {{idea}}{{#if context}}\nAdditional context: {{context}}{{/if}}",
            idea,
            context,
        )
    }

    fn render_template(&self, template: &str, idea: &str, context: Option<&str>) -> String {
        let data = serde_json::json!({ "idea": idea, "context": context });
        self.handlebars
            .render_template(template, &data)
            .unwrap_or_else(|_| idea.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_selection_matches_intent_and_complexity() {
        assert_eq!(role_for(Intent::Debug, Complexity::Simple), "Code Debugger");
        assert_eq!(
            role_for(Intent::Generate, Complexity::Complex),
            "Software Architect"
        );
        assert_eq!(
            role_for(Intent::Generate, Complexity::Moderate),
            "Senior Developer"
        );
        assert_eq!(role_for(Intent::Explain, Complexity::Complex), "Technical Writer");
    }

    #[test]
    fn test_rar_only_applied_for_complex() {
        let assembler = PromptAssembler::new();
        let simple = assembler.assemble("fix a typo", None, Intent::Debug, Complexity::Simple, &[]);
        assert!(!simple.user.contains("Requirements (NON-NEGOTIABLE)"));

        let complex = assembler.assemble(
            "build OAuth2 with JWT 15min access and 7d refresh using Redis",
            None,
            Intent::Generate,
            Complexity::Complex,
            &[],
        );
        assert!(complex.user.contains("Requirements (NON-NEGOTIABLE)"));
    }

    #[test]
    fn test_rar_preserves_verbatim_tokens() {
        let assembler = PromptAssembler::new();
        let complex = assembler.assemble(
            "create a comprehensive authentication system with OAuth2, JWT (15min access / 7d refresh), RBAC roles Admin>User>Guest, Redis-backed sessions",
            None,
            Intent::Generate,
            Complexity::Complex,
            &[],
        );
        for token in ["OAuth2", "15min", "7d", "Admin", "User", "Guest", "Redis"] {
            assert!(
                complex.user.contains(token),
                "expected token {token:?} to survive verbatim, got:\n{}",
                complex.user
            );
        }
    }

    #[test]
    fn test_request_only_excludes_schema_contract() {
        let assembler = PromptAssembler::new();
        let result = assembler.assemble("write a test", None, Intent::Generate, Complexity::Simple, &[]);
        assert!(!result.request_only.contains("improved_prompt"));
        assert!(!result.request_only.contains("confidence"));
        assert!(result.request_only.contains("write a test"));
    }

    #[test]
    fn test_schema_contract_always_present() {
        let assembler = PromptAssembler::new();
        let result = assembler.assemble("write a test", None, Intent::Generate, Complexity::Simple, &[]);
        assert!(result.user.contains("improved_prompt"));
        assert!(result.user.contains("confidence"));
    }

    #[test]
    fn test_fewshot_block_formats_each_example() {
        let assembler = PromptAssembler::new();
        let example = FewShotExample {
            id: "x".into(),
            input: "in".into(),
            output: "out".into(),
            role: "r".into(),
            framework: None,
            guardrails: vec![],
            domain: "d".into(),
            intent: Intent::Generate,
            complexity: Complexity::Simple,
            validator_score: 0.5,
            has_expected_output: false,
        };
        let result = assembler.assemble("idea", None, Intent::Generate, Complexity::Simple, &[example]);
        assert!(result.user.contains("## Example 1"));
        assert!(result.user.contains("Input: in"));
        assert!(result.user.contains("Output: out"));
    }
}
