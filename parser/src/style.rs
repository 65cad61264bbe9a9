// Style sheets: which presentation classes the leaves of a language get.
//
// Styles never influence parsing; they only annotate the leaves of the
// default tree (or of the fallback scan) for an editor to render.

use std::{fmt::Write as _, sync::Arc};

use lazy_static::lazy_static;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::{
    api::{IssueCode, IssuePhase, LanguageIdentity, LanguageIssue, ParseOptions, ParserLimits},
    compiler::compile_grammar_text,
    earley,
    grammar::{unescape_literal, unescape_pattern},
    interrupt::NoInterrupt,
    processor::{reduce, AsmValue, ReducerRegistry},
    runtime::{MatchSpec, RuntimeRule, RuntimeRuleSet},
    scanner::ScannedToken,
    sppt::{SharedPackedParseTree, SpptNode},
};

pub const NO_STYLE: &str = "nostyle";
pub const DEFAULT_CLASS_PREFIX: &str = "agl";

const STYLE_GRAMMAR: &str = r#"
namespace scannerless.style
grammar Style {
    skip leaf WHITESPACE = "\s+" ;
    skip leaf MULTI_LINE_COMMENT = "/\*[^*]*\*+(?:[^*/][^*]*\*+)*/" ;
    skip leaf SINGLE_LINE_COMMENT = "//[^\n\r]*" ;
    rules = rule* ;
    rule = selectors '{' declarations '}' ;
    selectors = [selector / ',']+ ;
    selector = LITERAL | PATTERN | SPECIAL | NAME ;
    declarations = declaration* ;
    declaration = NAME ':' VALUE ';' ;
    leaf LITERAL = "'(?:\\.|[^'\\])*'" ;
    leaf PATTERN = "\"(?:\\.|[^\"\\])*\"" ;
    leaf SPECIAL = "\$[a-zA-Z_][a-zA-Z_0-9]*" ;
    leaf NAME = "[a-zA-Z_][a-zA-Z_0-9-]*" ;
    leaf VALUE = "[^;{}\s][^;{}]*" ;
}
"#;

lazy_static! {
    static ref STYLE_RULES: Arc<RuntimeRuleSet> = match compile_grammar_text(STYLE_GRAMMAR) {
        Ok(rs) => Arc::new(rs),
        Err(e) => panic!("style grammar: {e}"),
    };
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum StyleSelector {
    /// `'text'`: leaves of that literal.
    Literal(String),
    /// `"regex"`: leaves of that anonymous pattern.
    Pattern(String),
    /// A leaf rule name.
    RuleName(String),
    /// `$keyword`: every word-like literal.
    Special(String),
}

impl StyleSelector {
    fn from_text(s: &str) -> Self {
        if s.starts_with('\'') {
            StyleSelector::Literal(unescape_literal(s))
        } else if s.starts_with('"') {
            StyleSelector::Pattern(unescape_pattern(s))
        } else if let Some(name) = s.strip_prefix('$') {
            StyleSelector::Special(name.to_string())
        } else {
            StyleSelector::RuleName(s.to_string())
        }
    }

    /// Name of the leaves this selector applies to.
    pub fn key(&self) -> String {
        match self {
            StyleSelector::Literal(s) => MatchSpec::Literal(s.clone()).display(),
            StyleSelector::Pattern(p) => MatchSpec::Pattern(p.clone()).display(),
            StyleSelector::RuleName(n) => n.clone(),
            StyleSelector::Special(n) => format!("${n}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleDeclaration {
    pub property: String,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleRule {
    pub selectors: Vec<StyleSelector>,
    pub declarations: Vec<StyleDeclaration>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleModel {
    pub rules: Vec<StyleRule>,
}

impl StyleModel {
    /// Parses style text of the form `sel, sel { prop : value ; ... }`.
    pub fn parse(text: &str) -> Result<Self, LanguageIssue> {
        let result = earley::parse(
            &STYLE_RULES,
            text,
            &ParseOptions::default(),
            &ParserLimits::default(),
            &NoInterrupt,
        );
        let tree = match result.sppt {
            Some(t) => t,
            None => {
                let mut issue = result.issues.into_iter().next().unwrap_or_else(|| {
                    LanguageIssue::error(
                        IssuePhase::Grammar,
                        IssueCode::GrammarSyntax,
                        "style text could not be parsed",
                    )
                });
                issue.phase = IssuePhase::Grammar;
                issue.code = IssueCode::GrammarSyntax;
                return Err(issue);
            }
        };
        let asm = reduce(&tree, &ReducerRegistry::default())?;

        let mut model = StyleModel::default();
        for el in asm.elements().into_iter().filter(|e| e.type_name == "rule") {
            let selectors = el
                .property("selectors")
                .and_then(|v| v.as_list())
                .unwrap_or_default()
                .iter()
                .filter_map(|v| v.as_text())
                .map(StyleSelector::from_text)
                .collect();
            let declarations = el
                .property("declarations")
                .and_then(|v| v.as_list())
                .unwrap_or_default()
                .iter()
                .filter_map(AsmValue::as_element)
                .map(|d| StyleDeclaration {
                    property: d.text("NAME").unwrap_or_default().to_string(),
                    value: d.text("VALUE").unwrap_or_default().trim_end().to_string(),
                })
                .collect();
            model.rules.push(StyleRule {
                selectors,
                declarations,
            });
        }
        Ok(model)
    }
}

/// A styled run of one line. `position` is the byte offset from the start
/// of the line; a token spanning lines is split at each line break.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineToken {
    pub styles: Vec<String>,
    pub position: usize,
    pub length: usize,
}

fn is_word(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => chars.all(|c| c.is_alphanumeric() || c == '_'),
        _ => false,
    }
}

/// Maps the leaves of one language to CSS classes.
///
/// Every distinct selector gets a class `<prefix>_<language>-<n>`,
/// numbered in order of first appearance in the style sheet.
#[derive(Clone, Debug)]
pub struct StyleHandler {
    language_class: String,
    model: StyleModel,
    classes: FxHashMap<String, String>,
}

impl StyleHandler {
    pub fn new(language_id: &LanguageIdentity, class_prefix: &str, model: StyleModel) -> Self {
        let language_class = Self::language_class(class_prefix, language_id);
        let mut classes = FxHashMap::default();
        for sel in model.rules.iter().flat_map(|r| r.selectors.iter()) {
            let n = classes.len() + 1;
            classes
                .entry(sel.key())
                .or_insert_with(|| format!("{language_class}-{n}"));
        }
        StyleHandler {
            language_class,
            model,
            classes,
        }
    }

    pub fn parse(language_id: &LanguageIdentity, text: &str) -> Result<Self, LanguageIssue> {
        let model = StyleModel::parse(text)?;
        Ok(Self::new(language_id, DEFAULT_CLASS_PREFIX, model))
    }

    /// `<prefix>_<language>`, with characters CSS does not allow in a class
    /// name replaced by `_`.
    pub fn language_class(class_prefix: &str, language_id: &LanguageIdentity) -> String {
        let lang: String = language_id
            .as_str()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        format!("{class_prefix}_{lang}")
    }

    pub fn model(&self) -> &StyleModel {
        &self.model
    }

    pub fn class_of(&self, selector: &StyleSelector) -> Option<&str> {
        self.classes.get(&selector.key()).map(|s| s.as_str())
    }

    /// Classes of leaves of `rule`; `[nostyle]` when no selector applies.
    pub fn classes_for(&self, rule: &RuntimeRule) -> Vec<String> {
        let mut res = vec![];
        if let Some(c) = self.classes.get(&rule.name) {
            res.push(c.clone());
        }
        if let Some(MatchSpec::Literal(s)) = rule.matcher().map(|m| m.spec()) {
            if is_word(s) {
                if let Some(c) = self.classes.get("$keyword") {
                    if !res.contains(c) {
                        res.push(c.clone());
                    }
                }
            }
        }
        if res.is_empty() {
            res.push(NO_STYLE.to_string());
        }
        res
    }

    /// The style sheet as CSS, one block per selector of each rule.
    pub fn css(&self) -> String {
        let mut res = String::new();
        for rule in &self.model.rules {
            for sel in &rule.selectors {
                let class = match self.class_of(sel) {
                    Some(c) => c,
                    None => continue,
                };
                let _ = writeln!(res, ".{} .{class} {{", self.language_class);
                for d in &rule.declarations {
                    let _ = writeln!(res, "  {}: {};", d.property, d.value);
                }
                res.push_str("}\n");
            }
        }
        res
    }

    /// Styled tokens of `text`, one vector per line.
    pub fn line_tokens(
        &self,
        rules: &RuntimeRuleSet,
        text: &str,
        tokens: &[ScannedToken],
    ) -> Vec<Vec<LineToken>> {
        let line_starts: Vec<usize> = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        let mut lines = vec![vec![]; line_starts.len()];
        for tok in tokens {
            let styles = match tok.rule {
                Some(r) => self.classes_for(rules.rule(r)),
                None => vec![NO_STYLE.to_string()],
            };
            let mut line = line_starts.partition_point(|s| *s <= tok.start) - 1;
            let mut pos = tok.start;
            loop {
                let next_start = line_starts.get(line + 1).copied();
                // the line's own text ends before its '\n'
                let line_end = next_start.map(|s| s - 1).unwrap_or(text.len());
                let end = tok.end.min(line_end);
                if end > pos {
                    lines[line].push(LineToken {
                        styles: styles.clone(),
                        position: pos - line_starts[line],
                        length: end - pos,
                    });
                }
                match next_start {
                    Some(s) if tok.end > s => {
                        line += 1;
                        pos = s;
                    }
                    _ => break,
                }
            }
        }
        lines
    }
}

/// Tokens of the default tree's leaves, in input order.
pub fn tree_tokens(tree: &SharedPackedParseTree) -> Vec<ScannedToken> {
    tree.leaves(tree.root())
        .into_iter()
        .filter_map(|id| match tree.node(id) {
            SpptNode::Leaf(l) if l.end() > l.start => Some(ScannedToken {
                rule: Some(l.rule),
                start: l.start,
                end: l.end(),
            }),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::scan_all;

    const STYLE: &str = r#"
        // keywords first
        $keyword { color: blue; font-weight: bold; }
        NAME, "[0-9]+" { color: green ; }
        ';' { color: gray; }
    "#;

    fn lang() -> LanguageIdentity {
        LanguageIdentity::new("test.lang")
    }

    #[test]
    fn parses_style_text() {
        let m = StyleModel::parse(STYLE).unwrap();
        assert_eq!(m.rules.len(), 3);
        assert_eq!(
            m.rules[0].selectors,
            vec![StyleSelector::Special("keyword".into())]
        );
        assert_eq!(m.rules[0].declarations[1].property, "font-weight");
        assert_eq!(m.rules[0].declarations[1].value, "bold");
        assert_eq!(
            m.rules[1].selectors,
            vec![
                StyleSelector::RuleName("NAME".into()),
                StyleSelector::Pattern("[0-9]+".into())
            ]
        );
        assert_eq!(m.rules[1].declarations[0].value, "green");
        assert_eq!(m.rules[2].selectors, vec![StyleSelector::Literal(";".into())]);
    }

    #[test]
    fn bad_style_text() {
        let issue = StyleModel::parse("NAME { color blue; }").unwrap_err();
        assert_eq!(issue.code, IssueCode::GrammarSyntax);
        assert!(issue.location.is_some());
    }

    #[test]
    fn classes_and_css() {
        let h = StyleHandler::parse(&lang(), STYLE).unwrap();
        assert_eq!(
            h.class_of(&StyleSelector::Special("keyword".into())),
            Some("agl_test_lang-1")
        );
        assert_eq!(
            h.class_of(&StyleSelector::Literal(";".into())),
            Some("agl_test_lang-4")
        );
        let css = h.css();
        assert!(css.contains(".agl_test_lang .agl_test_lang-2 {\n  color: green;\n}"));
    }

    #[test]
    fn line_tokens_split_at_newlines() {
        let rules = compile_grammar_text(
            "namespace t grammar G {\n\
             skip leaf WS = \"\\s+\" ;\n\
             unit = stmt* ;\n\
             stmt = 'let' NAME ';' ;\n\
             leaf NAME = \"[a-z]+\" ;\n\
             }",
        )
        .unwrap();
        let h = StyleHandler::parse(&lang(), STYLE).unwrap();
        let text = "let a;\n  let bc;";
        let lines = h.line_tokens(&rules, text, &scan_all(&rules, text));
        assert_eq!(lines.len(), 2);
        let first: Vec<_> = lines[0]
            .iter()
            .map(|t| (t.styles[0].as_str(), t.position, t.length))
            .collect();
        assert_eq!(
            first,
            vec![
                ("agl_test_lang-1", 0, 3),
                ("nostyle", 3, 1),
                ("agl_test_lang-2", 4, 1),
                ("agl_test_lang-4", 5, 1),
            ]
        );
        // the whitespace token "\n  " leaves "  " on the second line
        assert_eq!(lines[1][0].position, 0);
        assert_eq!(lines[1][0].length, 2);
        assert_eq!(lines[1][3].position, 6);
        assert_eq!(lines[1][3].length, 2);
    }
}
