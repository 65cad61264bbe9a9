mod forest;
mod parser;

use std::sync::Arc;

use crate::{
    api::{
        InputLocation, IssueCode, IssuePhase, LanguageIssue, ParseOptions, ParserLimits, RuleId,
    },
    interrupt::Interrupt,
    runtime::RuntimeRuleSet,
    sppt::SharedPackedParseTree,
};

pub use parser::ParserStats;

use forest::{ForestBuilder, NodeKey};
use parser::{Abort, EarleyParser};

pub struct ParseResult {
    /// Present only when the goal matched the whole (requested) input.
    pub sppt: Option<SharedPackedParseTree>,
    pub issues: Vec<LanguageIssue>,
    pub stats: ParserStats,
    /// Terminals expected at `furthest`.
    pub expected: Vec<RuleId>,
    /// Furthest offset any derivation reached.
    pub furthest: usize,
}

impl ParseResult {
    fn failed(issue: LanguageIssue) -> Self {
        ParseResult {
            sppt: None,
            issues: vec![issue],
            stats: ParserStats::default(),
            expected: vec![],
            furthest: 0,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.issues.iter().any(|i| i.code == IssueCode::Interrupted)
    }

    pub fn is_success(&self) -> bool {
        self.sppt.is_some()
    }

    pub fn errors(&self) -> impl Iterator<Item = &LanguageIssue> {
        self.issues.iter().filter(|i| i.is_error())
    }
}

/// Goal named in the options, or the rule set's default goal.
pub fn resolve_goal(
    rules: &RuntimeRuleSet,
    options: &ParseOptions,
) -> Result<RuleId, LanguageIssue> {
    let goal = match &options.goal_rule {
        Some(name) => rules.find(name).ok_or_else(|| {
            LanguageIssue::error(
                IssuePhase::Parse,
                IssueCode::UnresolvedReference,
                format!("goal rule {name:?} not found"),
            )
        })?,
        None => rules.default_goal().ok_or_else(|| {
            LanguageIssue::error(
                IssuePhase::Parse,
                IssueCode::UnresolvedReference,
                "grammar has no default goal rule",
            )
        })?,
    };
    if rules.is_terminal(goal) {
        return Err(LanguageIssue::error(
            IssuePhase::Parse,
            IssueCode::UnresolvedReference,
            format!("goal rule {:?} is a terminal", rules.name(goal)),
        ));
    }
    Ok(goal)
}

fn clamp_to_char_boundary(text: &str, end: usize) -> usize {
    let mut end = end.min(text.len());
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    end
}

fn expected_names(rules: &RuntimeRuleSet, expected: &[RuleId]) -> Vec<String> {
    expected.iter().map(|r| rules.name(*r).to_string()).collect()
}

/// Parses `text` (or `text[..options.end]`) with `rules`.
///
/// The interrupt flag is polled once per row and periodically while a row
/// is processed; an interrupted parse returns no tree and a single
/// `Interrupted` issue.
pub fn parse(
    rules: &Arc<RuntimeRuleSet>,
    text: &str,
    options: &ParseOptions,
    limits: &ParserLimits,
    interrupt: &dyn Interrupt,
) -> ParseResult {
    let goal = match resolve_goal(rules, options) {
        Ok(g) => g,
        Err(issue) => return ParseResult::failed(issue),
    };
    let requested = options.end.unwrap_or(text.len());
    let end = clamp_to_char_boundary(text, requested);
    let adjusted = (requested < text.len() && end != requested).then(|| {
        LanguageIssue::info(
            IssuePhase::Parse,
            IssueCode::Protocol,
            format!("end offset {requested} is inside a character; parsing up to {end}"),
        )
        .at(InputLocation::from_offset(text, end, 0))
    });
    let text = &text[..end];

    let mut parser = EarleyParser::new(rules, text, limits, interrupt);
    let outcome = parser
        .skip_end(0)
        .and_then(|start| parser.run(goal, start, true).map(|o| (start, o)));
    parser.finish_stats();
    let stats = parser.stats.clone();

    let (start, outcome) = match outcome {
        Ok(r) => r,
        Err(Abort::Interrupted) => {
            return ParseResult {
                stats,
                ..ParseResult::failed(LanguageIssue::interrupted(&interrupt.reason()))
            }
        }
        Err(Abort::RowLimit { position, items }) => {
            let issue = LanguageIssue::error(
                IssuePhase::Parse,
                IssueCode::ParseFailure,
                format!(
                    "parse aborted: {items} items at one position exceed max_items_in_row ({})",
                    limits.max_items_in_row
                ),
            )
            .at(InputLocation::from_offset(text, position, 0));
            return ParseResult {
                stats,
                furthest: position,
                ..ParseResult::failed(issue)
            };
        }
    };

    let mut issues: Vec<LanguageIssue> = adjusted.into_iter().collect();
    let mut sppt = None;
    if outcome.goal_ends.contains(&text.len()) {
        let mut builder = ForestBuilder::new(
            rules,
            text,
            &parser.charts,
            &parser.skip_runs,
            limits.max_alternatives,
        );
        let root = builder.build(NodeKey {
            chart: outcome.chart,
            rule: goal,
            start,
            end: text.len(),
        });
        match root {
            Some(root) => {
                if start > 0 {
                    builder.attach_leading_skip(root);
                }
                builder.report_ambiguity();
                issues.append(&mut builder.issues);
                sppt = Some(SharedPackedParseTree::new(
                    Arc::clone(rules),
                    text.to_string(),
                    std::mem::take(&mut builder.nodes),
                    root,
                ));
            }
            None => issues.push(LanguageIssue::error(
                IssuePhase::Parse,
                IssueCode::Internal,
                format!("no derivation of {} could be built", rules.name(goal)),
            )),
        }
    } else if options.require_complete {
        let expected = expected_names(rules, &outcome.expected);
        let found = text[outcome.furthest..].chars().next();
        let message = match found {
            Some(c) => format!(
                "failed to match {} at {:?}; expected one of: {}",
                rules.name(goal),
                c,
                expected.join(", ")
            ),
            None => format!(
                "unexpected end of text while matching {}; expected one of: {}",
                rules.name(goal),
                expected.join(", ")
            ),
        };
        issues.push(
            LanguageIssue::error(IssuePhase::Parse, IssueCode::ParseFailure, message)
                .at(InputLocation::from_offset(
                    text,
                    outcome.furthest,
                    found.map(|c| c.len_utf8()).unwrap_or(0),
                ))
                .with_expected(expected),
        );
    }

    ParseResult {
        sppt,
        issues,
        stats,
        expected: outcome.expected,
        furthest: outcome.furthest,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::*;
    use crate::{
        interrupt::NoInterrupt,
        runtime::{MatchSpec, RuleBody, RuleSetBuilder},
        sppt::SpptNode,
    };

    fn run(rules: &Arc<RuntimeRuleSet>, text: &str) -> ParseResult {
        parse(
            rules,
            text,
            &ParseOptions::default(),
            &ParserLimits::default(),
            &NoInterrupt,
        )
    }

    // sentence = 'hello' 'world' ; skip leaf WHITESPACE = "\s+"
    fn hello() -> Arc<RuntimeRuleSet> {
        let mut b = RuleSetBuilder::new();
        let h = b.literal("hello");
        let w = b.literal("world");
        let s = b.rule("sentence", RuleBody::Concatenation(vec![h, w]));
        let ws = b.named_terminal("WHITESPACE", MatchSpec::Pattern("\\s+".into()));
        b.mark_skip(ws);
        b.set_default_goal(s);
        Arc::new(b.finalize().unwrap())
    }

    #[test]
    fn skip_leaf_between_tokens() {
        let rules = hello();
        let r = run(&rules, "hello   world");
        let tree = r.sppt.unwrap();
        assert_eq!(
            tree.to_compact_string(true),
            "sentence{'hello' WHITESPACE:'   ' 'world'}"
        );
        assert_eq!(tree.to_compact_string(false), "sentence{'hello' 'world'}");
        let root = tree.node(tree.root());
        assert_eq!((root.start(), root.end()), (0, 13));
        assert_eq!(tree.leaves_text(), "hello   world");
    }

    #[test]
    fn leading_and_trailing_skip_round_trip() {
        let rules = hello();
        let text = "  hello world \n";
        let tree = run(&rules, text).sppt.unwrap();
        assert_eq!(tree.leaves_text(), text);
        assert_eq!(tree.node(tree.root()).start(), 0);
        let skips = tree
            .leaves(tree.root())
            .into_iter()
            .filter(|l| tree.node(*l).is_skip())
            .count();
        assert_eq!(skips, 3);
    }

    #[test]
    fn failure_reports_expected() {
        let rules = hello();
        let r = run(&rules, "hello there");
        assert!(r.sppt.is_none());
        assert_eq!(r.furthest, 6);
        let issue = &r.issues[0];
        assert_eq!(issue.code, IssueCode::ParseFailure);
        assert_eq!(issue.expected, vec!["'world'"]);
        assert_eq!(issue.location.unwrap().column, 7);
    }

    #[test]
    fn interrupted_parse_has_no_tree() {
        let rules = hello();
        let flag = AtomicBool::new(true);
        let r = parse(
            &rules,
            "hello world",
            &ParseOptions::default(),
            &ParserLimits::default(),
            &flag,
        );
        assert!(r.sppt.is_none());
        assert!(r.is_interrupted());
    }

    #[test]
    fn longest_choice_prefers_longer_alternative() {
        // a = 'x' | 'xy'
        let mut b = RuleSetBuilder::new();
        let x = b.literal("x");
        let xy = b.literal("xy");
        let a = b.rule("a", RuleBody::ChoiceLongest(vec![vec![x], vec![xy]]));
        b.set_default_goal(a);
        let rules = Arc::new(b.finalize().unwrap());
        let tree = run(&rules, "xy").sppt.unwrap();
        assert_eq!(tree.to_compact_string(false), "a{'xy'}");
        assert_eq!(tree.option(tree.root()), 1);
    }

    #[test]
    fn ambiguity_is_packed() {
        // e = e '+' e | 'n'
        let mut b = RuleSetBuilder::new();
        let e = b.placeholder("e");
        let plus = b.literal("+");
        let n = b.literal("n");
        b.set_body(e, RuleBody::ChoiceLongest(vec![vec![e, plus, e], vec![n]]));
        b.set_default_goal(e);
        let rules = Arc::new(b.finalize().unwrap());
        let r = run(&rules, "n+n+n");
        let tree = r.sppt.unwrap();
        let root = match tree.node(tree.root()) {
            SpptNode::Branch(b) => b.clone(),
            _ => panic!("expected branch"),
        };
        assert_eq!(root.derivations.len(), 2);
        assert!(tree.is_ambiguous());
        assert!(r.issues.iter().any(|i| i.code == IssueCode::Ambiguity));
        // greedy: first child is the longest
        assert_eq!(
            tree.to_compact_string(false),
            "e{e{e{'n'} '+' e{'n'}} '+' e{'n'}}"
        );
        assert_eq!(
            tree.ambiguous_nodes().len(),
            1,
            "only the root span has two readings"
        );
    }

    #[test]
    fn priority_choice_prefers_first_declared() {
        // a = 'x' 'y' || b ; b = 'x' 'y'
        let mut b = RuleSetBuilder::new();
        let x = b.literal("x");
        let y = b.literal("y");
        let inner = b.rule("b", RuleBody::Concatenation(vec![x, y]));
        let a = b.rule(
            "a",
            RuleBody::ChoicePriority(vec![vec![x, y], vec![inner]]),
        );
        b.set_default_goal(a);
        let rules = Arc::new(b.finalize().unwrap());
        for _ in 0..3 {
            let r = run(&rules, "xy");
            let tree = r.sppt.unwrap();
            assert_eq!(tree.to_compact_string(false), "a{'x' 'y'}");
            assert!(!tree.is_ambiguous());
            assert!(r.issues.is_empty());
        }
    }

    #[test]
    fn terminal_goal_is_rejected() {
        let rules = hello();
        let r = parse(
            &rules,
            "hello",
            &ParseOptions::with_goal("'hello'"),
            &ParserLimits::default(),
            &NoInterrupt,
        );
        assert!(r.sppt.is_none());
        assert_eq!(r.issues[0].code, IssueCode::UnresolvedReference);
    }

    #[test]
    fn alternatives_are_capped() {
        let mut b = RuleSetBuilder::new();
        let e = b.placeholder("e");
        let plus = b.literal("+");
        let n = b.literal("n");
        b.set_body(e, RuleBody::ChoiceLongest(vec![vec![e, plus, e], vec![n]]));
        b.set_default_goal(e);
        let rules = Arc::new(b.finalize().unwrap());
        let limits = ParserLimits {
            max_alternatives: 1,
            ..Default::default()
        };
        let r = parse(&rules, "n+n+n", &ParseOptions::default(), &limits, &NoInterrupt);
        let tree = r.sppt.unwrap();
        assert!(!tree.is_ambiguous());
        assert!(r
            .issues
            .iter()
            .any(|i| i.code == IssueCode::Ambiguity && !i.is_error()));
    }

    #[test]
    fn end_inside_character_is_reported() {
        let mut b = RuleSetBuilder::new();
        let h = b.literal("h");
        let s = b.rule("s", RuleBody::Concatenation(vec![h]));
        b.set_default_goal(s);
        let rules = Arc::new(b.finalize().unwrap());
        let opts = ParseOptions {
            end: Some(2),
            ..Default::default()
        };
        let r = parse(&rules, "h\u{e9}llo", &opts, &ParserLimits::default(), &NoInterrupt);
        assert!(r.sppt.is_some());
        assert_eq!(r.issues.len(), 1);
        let issue = &r.issues[0];
        assert!(!issue.is_error());
        assert_eq!(issue.location.unwrap().position, 1);
        assert!(issue.message.contains("end offset 2"));

        // a boundary offset is taken as given
        let opts = ParseOptions {
            end: Some(1),
            ..Default::default()
        };
        let r = parse(&rules, "h\u{e9}llo", &opts, &ParserLimits::default(), &NoInterrupt);
        assert!(r.sppt.is_some());
        assert!(r.issues.is_empty());
    }

    #[test]
    fn partial_parse_up_to_end() {
        let rules = hello();
        let opts = ParseOptions {
            end: Some(5),
            ..Default::default()
        };
        let r = parse(&rules, "hello world", &opts, &ParserLimits::default(), &NoInterrupt);
        assert!(r.sppt.is_none());
        assert_eq!(r.furthest, 5);
        assert_eq!(r.issues[0].expected, vec!["'world'"]);
    }
}
