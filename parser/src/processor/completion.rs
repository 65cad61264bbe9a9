use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    api::{IssueCode, LanguageIssue, ParseOptions, ParserLimits},
    earley,
    interrupt::Interrupt,
    runtime::{MatchSpec, RuntimeRuleSet},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CompletionKind {
    Literal,
    Placeholder,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionItem {
    pub kind: CompletionKind,
    /// Text to insert, or `<NAME>` for a pattern terminal.
    pub text: String,
    pub rule_name: String,
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Start of the word the cursor is in.
fn word_start(text: &str, position: usize) -> usize {
    text[..position]
        .char_indices()
        .rev()
        .take_while(|(_, c)| is_word_char(*c))
        .last()
        .map(|(i, _)| i)
        .unwrap_or(position)
}

/// Suggestions for the terminals the grammar accepts at `position`.
///
/// The text before the word under the cursor is parsed without requiring
/// the goal to complete; the terminals expected where that parse stopped
/// are offered, literals filtered by the partial word.
pub fn complete(
    rules: &Arc<RuntimeRuleSet>,
    text: &str,
    position: usize,
    goal_rule: Option<String>,
    limits: &ParserLimits,
    interrupt: &dyn Interrupt,
) -> Result<Vec<CompletionItem>, LanguageIssue> {
    let mut position = position.min(text.len());
    while !text.is_char_boundary(position) {
        position -= 1;
    }
    let start = word_start(text, position);
    let partial = &text[start..position];

    let options = ParseOptions {
        goal_rule,
        end: Some(start),
        require_complete: false,
    };
    let result = earley::parse(rules, text, &options, limits, interrupt);
    if let Some(issue) = result
        .issues
        .iter()
        .find(|i| matches!(i.code, IssueCode::Interrupted | IssueCode::UnresolvedReference))
    {
        return Err(issue.clone());
    }

    let mut items: Vec<CompletionItem> = vec![];
    for id in &result.expected {
        let rule = rules.rule(*id);
        if rule.is_skip {
            continue;
        }
        let item = match rule.matcher().map(|m| m.spec()) {
            Some(MatchSpec::Literal(s)) => {
                if !s.starts_with(partial) {
                    continue;
                }
                CompletionItem {
                    kind: CompletionKind::Literal,
                    text: s.clone(),
                    rule_name: rule.name.clone(),
                }
            }
            Some(MatchSpec::Pattern(_) | MatchSpec::LongestPattern(_)) => CompletionItem {
                kind: CompletionKind::Placeholder,
                text: format!("<{}>", rule.name),
                rule_name: rule.name.clone(),
            },
            Some(MatchSpec::EndOfText) | None => continue,
        };
        if !items.contains(&item) {
            items.push(item);
        }
    }
    items.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.text.cmp(&b.text)));
    Ok(items)
}
