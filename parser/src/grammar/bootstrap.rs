// Seed rule set for the grammar language itself.
//
// Grammar texts are parsed by the same engine as everything else, so the
// very first rule set has to be built by hand. The table below mirrors
// the grammar text format one rule per line; `from_tree` relies on these
// rule names and shapes.

use std::sync::Arc;

use lazy_static::lazy_static;

use crate::runtime::{MatchSpec, RuleBody, RuleSetBuilder, RuntimeRuleSet};

lazy_static! {
    static ref GRAMMAR_RULES: Arc<RuntimeRuleSet> = Arc::new(build());
}

/// The rule set that parses grammar texts. Built once.
pub fn grammar_rule_set() -> Arc<RuntimeRuleSet> {
    Arc::clone(&GRAMMAR_RULES)
}

fn keyword(b: &mut RuleSetBuilder, kw: &str) -> crate::api::RuleId {
    b.pattern(&format!("{kw}\\b"))
}

fn opt(item: crate::api::RuleId) -> RuleBody {
    RuleBody::Multi {
        item,
        min: 0,
        max: Some(1),
    }
}

fn build() -> RuntimeRuleSet {
    use RuleBody::*;

    let mut b = RuleSetBuilder::new();

    let ws = b.named_terminal("WHITESPACE", MatchSpec::Pattern("\\s+".into()));
    let ml = b.named_terminal(
        "MULTI_LINE_COMMENT",
        MatchSpec::Pattern("/\\*[^*]*\\*+(?:[^*/][^*]*\\*+)*/".into()),
    );
    let sl = b.named_terminal(
        "SINGLE_LINE_COMMENT",
        MatchSpec::Pattern("//[^\\n\\r]*".into()),
    );
    for r in [ws, ml, sl] {
        b.mark_skip(r);
    }

    let identifier = b.named_terminal(
        "IDENTIFIER",
        MatchSpec::Pattern("[a-zA-Z_][a-zA-Z_0-9]*".into()),
    );
    let literal = b.named_terminal(
        "LITERAL",
        MatchSpec::Pattern("'(?:\\\\.|[^'\\\\])*'".into()),
    );
    let pattern = b.named_terminal(
        "PATTERN",
        MatchSpec::Pattern("\"(?:\\\\.|[^\"\\\\])*\"".into()),
    );
    let integer = b.named_terminal("POSITIVE_INTEGER", MatchSpec::Pattern("[0-9]+".into()));

    let kw_namespace = keyword(&mut b, "namespace");
    let kw_grammar = keyword(&mut b, "grammar");
    let kw_extends = keyword(&mut b, "extends");
    let kw_override = keyword(&mut b, "override");
    let kw_skip = keyword(&mut b, "skip");
    let kw_leaf = keyword(&mut b, "leaf");

    let dot = b.literal(".");
    let comma = b.literal(",");
    let lbrace = b.literal("{");
    let rbrace = b.literal("}");
    let equals = b.literal("=");
    let semi = b.literal(";");
    let bar = b.literal("|");
    let bar2 = b.literal("||");
    let star = b.literal("*");
    let plus = b.literal("+");
    let question = b.literal("?");
    let lbracket = b.literal("[");
    let rbracket = b.literal("]");
    let slash = b.literal("/");
    let lparen = b.literal("(");
    let rparen = b.literal(")");
    let colon2 = b.literal("::");

    // forward references
    let rhs = b.placeholder("rhs");
    let simple_item = b.placeholder("simpleItem");
    let multiplicity = b.placeholder("multiplicity");
    let concatenation = b.placeholder("concatenation");

    let qualified_name = b.rule(
        "qualifiedName",
        SeparatedList {
            item: identifier,
            separator: dot,
            min: 1,
            max: None,
        },
    );
    let namespace = b.rule("namespace", Concatenation(vec![kw_namespace, qualified_name]));

    let extends_list = b.rule(
        "extendsList",
        SeparatedList {
            item: qualified_name,
            separator: comma,
            min: 1,
            max: None,
        },
    );
    let extends = b.rule("extends", Concatenation(vec![kw_extends, extends_list]));
    let extends_opt = b.rule("extendsOpt", opt(extends));

    let override_opt = b.rule("overrideOpt", opt(kw_override));
    let skip_opt = b.rule("skipOpt", opt(kw_skip));
    let leaf_opt = b.rule("leafOpt", opt(kw_leaf));
    let labels = b.rule(
        "ruleTypeLabels",
        Concatenation(vec![override_opt, skip_opt, leaf_opt]),
    );
    let rule = b.rule(
        "rule",
        Concatenation(vec![labels, identifier, equals, rhs, semi]),
    );
    let rule_list = b.rule(
        "ruleList",
        Multi {
            item: rule,
            min: 0,
            max: None,
        },
    );
    let grammar = b.rule(
        "grammar",
        Concatenation(vec![
            kw_grammar,
            identifier,
            extends_opt,
            lbrace,
            rule_list,
            rbrace,
        ]),
    );
    let grammar_list = b.rule(
        "grammarList",
        Multi {
            item: grammar,
            min: 1,
            max: None,
        },
    );
    let definition = b.rule(
        "grammarDefinition",
        Concatenation(vec![namespace, grammar_list]),
    );

    let empty = b.rule("empty", Empty);
    let choice_longest = b.rule(
        "choiceLongest",
        SeparatedList {
            item: concatenation,
            separator: bar,
            min: 2,
            max: None,
        },
    );
    let choice_priority = b.rule(
        "choicePriority",
        SeparatedList {
            item: concatenation,
            separator: bar2,
            min: 2,
            max: None,
        },
    );
    b.set_body(
        rhs,
        ChoiceLongest(vec![
            vec![empty],
            vec![concatenation],
            vec![choice_longest],
            vec![choice_priority],
        ]),
    );

    let terminal = b.rule("terminal", ChoiceLongest(vec![vec![literal], vec![pattern]]));
    let non_terminal = b.rule("nonTerminal", Concatenation(vec![identifier]));
    let embedded = b.rule(
        "embedded",
        Concatenation(vec![identifier, colon2, identifier]),
    );
    let group = b.rule("group", Concatenation(vec![lparen, rhs, rparen]));
    b.set_body(
        simple_item,
        ChoiceLongest(vec![
            vec![terminal],
            vec![non_terminal],
            vec![embedded],
            vec![group],
        ]),
    );

    let range_max_value_opt = b.rule("rangeMaxValueOpt", opt(integer));
    let range_max = b.rule("rangeMax", Concatenation(vec![comma, range_max_value_opt]));
    let range_max_opt = b.rule("rangeMaxOpt", opt(range_max));
    let range = b.rule(
        "range",
        Concatenation(vec![lbrace, integer, range_max_opt, rbrace]),
    );
    b.set_body(
        multiplicity,
        ChoiceLongest(vec![vec![star], vec![plus], vec![question], vec![range]]),
    );

    let multi = b.rule("multi", Concatenation(vec![simple_item, multiplicity]));
    let separated_list = b.rule(
        "separatedList",
        Concatenation(vec![
            lbracket,
            simple_item,
            slash,
            simple_item,
            rbracket,
            multiplicity,
        ]),
    );
    let concatenation_item = b.rule(
        "concatenationItem",
        ChoiceLongest(vec![vec![simple_item], vec![multi], vec![separated_list]]),
    );
    b.set_body(
        concatenation,
        Multi {
            item: concatenation_item,
            min: 1,
            max: None,
        },
    );

    b.set_default_goal(definition);
    match b.finalize() {
        Ok(rs) => rs,
        Err(e) => panic!("grammar seed rule set is malformed: {e}"),
    }
}
