// Cross-reference definitions and the semantic analysis that applies them.
//
// A cross-reference text says which element types declare names
// (`identify Var by name ;`) and which properties refer to them
// (`reference Use.name -> Var | Const ;`). The text is parsed with a
// small grammar of its own, through the same engine as everything else.

use std::sync::Arc;

use lazy_static::lazy_static;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::{
    api::{InputLocation, IssueCode, IssuePhase, LanguageIssue, ParseOptions, ParserLimits},
    compiler::compile_grammar_text,
    earley,
    interrupt::NoInterrupt,
    runtime::RuntimeRuleSet,
};

use super::syntax::{reduce, AsmValue, ReducerRegistry};

const CROSS_REFERENCE_GRAMMAR: &str = r#"
namespace scannerless.crossreference
grammar CrossReference {
    skip leaf WHITESPACE = "\s+" ;
    skip leaf COMMENT = "//[^\n\r]*" ;
    unit = declaration* ;
    declaration = identify | reference ;
    identify = 'identify' typeName 'by' propertyName ';' ;
    reference = 'reference' typeName '.' propertyName '->' targets ';' ;
    targets = [typeName / '|']+ ;
    leaf typeName = "[a-zA-Z_][a-zA-Z_0-9]*" ;
    leaf propertyName = "[a-zA-Z_][a-zA-Z_0-9]*" ;
}
"#;

lazy_static! {
    static ref CROSS_REFERENCE_RULES: Arc<RuntimeRuleSet> =
        match compile_grammar_text(CROSS_REFERENCE_GRAMMAR) {
            Ok(rs) => Arc::new(rs),
            Err(e) => panic!("cross-reference grammar: {e}"),
        };
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceDefinition {
    pub type_name: String,
    pub property: String,
    pub targets: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossReferenceModel {
    /// Element type -> property holding the declared name.
    pub identify: FxHashMap<String, String>,
    pub references: Vec<ReferenceDefinition>,
}

impl CrossReferenceModel {
    pub fn parse(text: &str) -> Result<Self, LanguageIssue> {
        let result = earley::parse(
            &CROSS_REFERENCE_RULES,
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
                        "cross-reference text could not be parsed",
                    )
                });
                issue.phase = IssuePhase::Grammar;
                issue.code = IssueCode::GrammarSyntax;
                return Err(issue);
            }
        };
        let asm = reduce(&tree, &ReducerRegistry::default())?;

        let mut model = CrossReferenceModel::default();
        for el in asm.elements() {
            let type_name = el.text("typeName").unwrap_or_default().to_string();
            let property = el.text("propertyName").unwrap_or_default().to_string();
            match el.type_name.as_str() {
                "identify" => {
                    model.identify.insert(type_name, property);
                }
                "reference" => {
                    let targets = match el.property("targets") {
                        Some(AsmValue::List(l)) => l
                            .iter()
                            .filter_map(|t| t.as_text().map(|s| s.to_string()))
                            .collect(),
                        _ => vec![],
                    };
                    model.references.push(ReferenceDefinition {
                        type_name,
                        property,
                        targets,
                    });
                }
                _ => {}
            }
        }
        Ok(model)
    }

    pub fn is_empty(&self) -> bool {
        self.identify.is_empty() && self.references.is_empty()
    }
}

/// External name resolution for semantic analysis.
pub trait ContextProvider {
    /// Types of the element known externally under `name`.
    fn types_of(&self, name: &str) -> Vec<String>;
}

/// A context given as plain data: name -> types it is declared as.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSimple {
    pub scopes: FxHashMap<String, Vec<String>>,
}

impl ContextSimple {
    pub fn declare(&mut self, name: &str, type_name: &str) -> &mut Self {
        self.scopes
            .entry(name.to_string())
            .or_default()
            .push(type_name.to_string());
        self
    }
}

impl ContextProvider for ContextSimple {
    fn types_of(&self, name: &str) -> Vec<String> {
        self.scopes.get(name).cloned().unwrap_or_default()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedReference {
    pub type_name: String,
    pub property: String,
    pub name: String,
    /// Type of the declaration the name resolved to.
    pub target: String,
    /// True when the name came from the external context.
    #[serde(default)]
    pub external: bool,
    pub location: InputLocation,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticResult {
    pub references: Vec<ResolvedReference>,
    pub issues: Vec<LanguageIssue>,
}

/// Resolves every reference of `asm` against the names it declares and
/// then against `context`. An unresolved name is reported and skipped.
pub fn analyse(
    model: &CrossReferenceModel,
    asm: &AsmValue,
    text: &str,
    context: Option<&dyn ContextProvider>,
) -> SemanticResult {
    let elements = asm.elements();

    // declared name -> types declaring it, in input order
    let mut scope: FxHashMap<&str, Vec<&str>> = FxHashMap::default();
    for el in &elements {
        if let Some(prop) = model.identify.get(&el.type_name) {
            if let Some(name) = el.text(prop) {
                scope.entry(name).or_default().push(el.type_name.as_str());
            }
        }
    }

    let mut res = SemanticResult::default();
    for el in &elements {
        for rd in model
            .references
            .iter()
            .filter(|rd| rd.type_name == el.type_name)
        {
            let name = match el.text(&rd.property) {
                Some(n) => n,
                None => continue,
            };
            let location = InputLocation::from_offset(text, el.start, el.end - el.start);
            let local = scope.get(name).and_then(|types| {
                types
                    .iter()
                    .find(|t| rd.targets.iter().any(|x| x.as_str() == **t))
            });
            let resolved = match local {
                Some(t) => Some((t.to_string(), false)),
                None => context.and_then(|ctx| {
                    ctx.types_of(name)
                        .into_iter()
                        .find(|t| rd.targets.contains(t))
                        .map(|t| (t, true))
                }),
            };
            match resolved {
                Some((target, external)) => res.references.push(ResolvedReference {
                    type_name: el.type_name.clone(),
                    property: rd.property.clone(),
                    name: name.to_string(),
                    target,
                    external,
                    location,
                }),
                None => res.issues.push(
                    LanguageIssue::error(
                        IssuePhase::SemanticAnalysis,
                        IssueCode::UnresolvedName,
                        format!(
                            "cannot resolve {name:?} as {} in {}.{}",
                            rd.targets.join(" | "),
                            el.type_name,
                            rd.property
                        ),
                    )
                    .at(location),
                ),
            }
        }
    }
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRAMMAR: &str = "namespace t grammar G {\n\
        skip leaf WS = \"\\s+\" ;\n\
        unit = stmt* ;\n\
        stmt = def || use ;\n\
        def = 'def' NAME ';' ;\n\
        use = 'use' NAME ';' ;\n\
        leaf NAME = \"[a-z]+\" ;\n\
    }";

    const XREF: &str = "// names\n\
        identify def by NAME ;\n\
        reference use.NAME -> def | extern ;";

    fn asm(text: &str) -> AsmValue {
        let rules = Arc::new(compile_grammar_text(GRAMMAR).unwrap());
        let tree = earley::parse(
            &rules,
            text,
            &ParseOptions::default(),
            &ParserLimits::default(),
            &NoInterrupt,
        )
        .sppt
        .unwrap();
        reduce(&tree, &ReducerRegistry::default()).unwrap()
    }

    #[test]
    fn parses_cross_reference_text() {
        let m = CrossReferenceModel::parse(XREF).unwrap();
        assert_eq!(m.identify.get("def").map(|s| s.as_str()), Some("NAME"));
        assert_eq!(
            m.references,
            vec![ReferenceDefinition {
                type_name: "use".into(),
                property: "NAME".into(),
                targets: vec!["def".into(), "extern".into()],
            }]
        );
    }

    #[test]
    fn malformed_cross_reference() {
        let issue = CrossReferenceModel::parse("identify def NAME ;").unwrap_err();
        assert_eq!(issue.code, IssueCode::GrammarSyntax);
        assert!(issue.expected.contains(&"'by'".to_string()));
    }

    #[test]
    fn resolves_and_reports() {
        let m = CrossReferenceModel::parse(XREF).unwrap();
        let text = "def a; use a; use b; use c;";
        let mut ctx = ContextSimple::default();
        ctx.declare("b", "extern");
        let r = analyse(&m, &asm(text), text, Some(&ctx));
        assert_eq!(r.references.len(), 2);
        assert!(!r.references[0].external);
        assert_eq!(r.references[1].target, "extern");
        assert!(r.references[1].external);
        assert_eq!(r.issues.len(), 1);
        assert_eq!(r.issues[0].code, IssueCode::UnresolvedName);
        assert_eq!(r.issues[0].location.unwrap().position, 21);
    }
}
