use std::sync::Arc;

use scannerless_parser::{
    api::{IssueCode, ParseOptions, ParserLimits},
    compile_grammar_text,
    earley::{self, ParseResult},
    interrupt::NoInterrupt,
    runtime::RuntimeRuleSet,
    sppt::SharedPackedParseTree,
};

/// Compiles `grammar`, panicking with the compile error if it does not.
pub fn compile_grammar(grammar: &str) -> Arc<RuntimeRuleSet> {
    match compile_grammar_text(grammar) {
        Ok(rules) => Arc::new(rules),
        Err(e) => panic!("grammar does not compile: {e}\n{grammar}"),
    }
}

pub fn parse_with(rules: &Arc<RuntimeRuleSet>, options: &ParseOptions, input: &str) -> ParseResult {
    earley::parse(rules, input, options, &ParserLimits::default(), &NoInterrupt)
}

/// Check that `input` parses and that the default tree, without skip
/// leaves, renders as `expected` in compact form.
pub fn check_parse(rules: &Arc<RuntimeRuleSet>, input: &str, expected: &str) -> SharedPackedParseTree {
    check_parse_goal(rules, None, input, expected)
}

pub fn check_parse_goal(
    rules: &Arc<RuntimeRuleSet>,
    goal: Option<&str>,
    input: &str,
    expected: &str,
) -> SharedPackedParseTree {
    let options = match goal {
        Some(g) => ParseOptions::with_goal(g),
        None => ParseOptions::default(),
    };
    println!("\nParsing {:?}", input);
    let result = parse_with(rules, &options, input);
    let tree = match result.sppt {
        Some(t) => t,
        None => panic!("parse of {:?} failed: {:?}", input, result.issues),
    };
    let actual = tree.to_compact_string(false);
    assert_eq!(actual, expected, "tree mismatch for {:?}", input);
    assert_eq!(tree.leaves_text(), input, "round-trip mismatch");
    tree
}

/// Check that `input` fails to parse, that the furthest point reached is
/// `furthest`, and that exactly the terminals in `expected` were expected
/// there.
pub fn check_parse_failure(rules: &Arc<RuntimeRuleSet>, input: &str, furthest: usize, expected: &[&str]) {
    println!("\nParsing (expecting failure) {:?}", input);
    let result = parse_with(rules, &ParseOptions::default(), input);
    assert!(result.sppt.is_none(), "parse of {:?} should fail", input);
    let issue = result
        .issues
        .iter()
        .find(|i| i.code == IssueCode::ParseFailure)
        .unwrap_or_else(|| panic!("no ParseFailure issue: {:?}", result.issues));
    assert_eq!(result.furthest, furthest, "furthest mismatch: {}", issue.message);
    assert_eq!(issue.location.map(|l| l.position), Some(furthest));
    let mut actual: Vec<&str> = issue.expected.iter().map(|s| s.as_str()).collect();
    actual.sort();
    let mut expected = expected.to_vec();
    expected.sort();
    assert_eq!(actual, expected, "expected terminals mismatch");
}

/// Check that `grammar` is rejected with `code`, and that the message
/// mentions `fragment`.
pub fn check_compile_error(grammar: &str, code: IssueCode, fragment: &str) {
    match compile_grammar_text(grammar) {
        Ok(_) => panic!("grammar should not compile:\n{grammar}"),
        Err(e) => {
            let issue = e.to_issue();
            println!("compile error: {}", issue.message);
            assert_eq!(issue.code, code, "wrong code for: {}", issue.message);
            assert!(
                issue.message.contains(fragment),
                "{:?} not in {:?}",
                fragment,
                issue.message
            );
        }
    }
}
