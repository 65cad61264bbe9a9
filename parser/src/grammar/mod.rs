mod bootstrap;
mod from_tree;
mod model;

pub use bootstrap::grammar_rule_set;
pub use from_tree::{definition_from_tree, unescape_literal, unescape_pattern};
pub use model::{Grammar, GrammarDefinition, GrammarRule, RuleItem};

use crate::{
    api::{InputLocation, ParseOptions, ParserLimits},
    earley,
    error::CompileError,
    interrupt::NoInterrupt,
};

/// Parses a grammar text into its model.
pub fn parse_definition(text: &str) -> Result<GrammarDefinition, CompileError> {
    let result = earley::parse(
        &grammar_rule_set(),
        text,
        &ParseOptions::default(),
        &ParserLimits::default(),
        &NoInterrupt,
    );
    let tree = match result.sppt {
        Some(t) => t,
        None => {
            let (location, message, expected) = match result.errors().next() {
                Some(issue) => (
                    issue
                        .location
                        .unwrap_or_else(|| InputLocation::from_offset(text, result.furthest, 0)),
                    issue.message.clone(),
                    issue.expected.clone(),
                ),
                None => (
                    InputLocation::from_offset(text, result.furthest, 0),
                    "grammar text could not be parsed".to_string(),
                    vec![],
                ),
            };
            return Err(CompileError::Syntax {
                location,
                message,
                expected,
            });
        }
    };
    definition_from_tree(&tree).map_err(|e| match e.downcast::<CompileError>() {
        Ok(ce) => ce,
        Err(e) => CompileError::Syntax {
            location: InputLocation::from_offset(text, 0, 0),
            message: format!("{e:#}"),
            expected: vec![],
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_of_small_grammar() {
        let def = parse_definition(
            "namespace test.lang\n\
             grammar Base { skip leaf WS = \"\\s+\" ; id = \"[a-z]+\" ; }\n\
             grammar Main extends Base {\n\
               override id = \"[a-z]+\" ;\n\
               s = 'let' id '=' [id / ',']+ ;\n\
               e = 'a' || 'b' ;\n\
               r = x{2,} y{3} z{1,4} ;\n\
               g = ( 'p' | 'q' )? ;\n\
               m = Base::id ;\n\
               n = ;\n\
             }",
        )
        .unwrap();
        assert_eq!(def.namespace, "test.lang");
        assert_eq!(def.grammars.len(), 2);
        let main = def.default_grammar().unwrap();
        assert_eq!(main.qualified_name(), "test.lang.Main");
        assert_eq!(main.extends, vec!["Base"]);
        assert!(main.rules[0].is_override);

        let base = def.find("Base").unwrap();
        assert!(base.rules[0].is_skip && base.rules[0].is_leaf);

        assert_eq!(
            main.rules[1].rhs,
            RuleItem::Concatenation(vec![
                RuleItem::literal("let"),
                RuleItem::non_terminal("id"),
                RuleItem::literal("="),
                RuleItem::separated(
                    RuleItem::non_terminal("id"),
                    RuleItem::literal(","),
                    1,
                    None
                ),
            ])
        );
        assert_eq!(
            main.rules[2].rhs,
            RuleItem::ChoicePriority(vec![RuleItem::literal("a"), RuleItem::literal("b")])
        );
        assert_eq!(
            main.rules[3].rhs,
            RuleItem::Concatenation(vec![
                RuleItem::repeat(RuleItem::non_terminal("x"), 2, None),
                RuleItem::repeat(RuleItem::non_terminal("y"), 3, Some(3)),
                RuleItem::repeat(RuleItem::non_terminal("z"), 1, Some(4)),
            ])
        );
        assert_eq!(
            main.rules[4].rhs,
            RuleItem::optional(RuleItem::Group(Box::new(RuleItem::ChoiceLongest(vec![
                RuleItem::literal("p"),
                RuleItem::literal("q"),
            ]))))
        );
        assert_eq!(
            main.rules[5].rhs,
            RuleItem::Embedded {
                grammar: "Base".into(),
                rule: "id".into()
            }
        );
        assert_eq!(main.rules[6].rhs, RuleItem::Empty);
        assert_eq!(main.rules[1].location.unwrap().line, 5);
    }

    #[test]
    fn syntax_error_has_location() {
        match parse_definition("namespace n\ngrammar G {\n  a = 'x' 'y'\n}") {
            Err(CompileError::Syntax {
                location, expected, ..
            }) => {
                assert_eq!(location.line, 4);
                assert!(expected.iter().any(|e| e == "';'"));
            }
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn bad_range_is_rejected() {
        assert!(matches!(
            parse_definition("namespace n grammar G { a = 'x'{3,1} ; }"),
            Err(CompileError::Syntax { .. })
        ));
    }
}
