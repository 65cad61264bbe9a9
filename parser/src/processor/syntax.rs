use std::sync::Arc;

use anyhow::Result;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::{
    api::{InputLocation, IssueCode, IssuePhase, LanguageIssue, NodeId},
    runtime::RuleBody,
    sppt::{SharedPackedParseTree, SpptNode},
};

/// Abstract syntax model value produced by syntax analysis.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum AsmValue {
    Nothing,
    Text(String),
    List(Vec<AsmValue>),
    Element(AsmElement),
}

impl AsmValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AsmValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_element(&self) -> Option<&AsmElement> {
        match self {
            AsmValue::Element(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[AsmValue]> {
        match self {
            AsmValue::List(l) => Some(l),
            _ => None,
        }
    }

    /// Every element in the value, outer ones first, in input order.
    pub fn elements(&self) -> Vec<&AsmElement> {
        let mut res = vec![];
        let mut stack = vec![self];
        while let Some(v) = stack.pop() {
            match v {
                AsmValue::Element(e) => {
                    res.push(e);
                    stack.extend(e.properties.iter().rev().map(|p| &p.value));
                }
                AsmValue::List(l) => stack.extend(l.iter().rev()),
                AsmValue::Nothing | AsmValue::Text(_) => {}
            }
        }
        res
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsmProperty {
    pub name: String,
    pub value: AsmValue,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsmElement {
    pub type_name: String,
    pub start: usize,
    pub end: usize,
    pub properties: Vec<AsmProperty>,
}

impl AsmElement {
    pub fn property(&self, name: &str) -> Option<&AsmValue> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.value)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.property(name).and_then(|v| v.as_text())
    }
}

/// What a reducer sees of the node being reduced.
pub struct ReduceContext<'a> {
    pub tree: &'a SharedPackedParseTree,
    pub node: NodeId,
}

impl ReduceContext<'_> {
    pub fn rule_name(&self) -> &str {
        self.tree.rule_name(self.node)
    }

    pub fn matched_text(&self) -> &str {
        self.tree.matched_text(self.node)
    }

    pub fn span(&self) -> (usize, usize) {
        let n = self.tree.node(self.node);
        (n.start(), n.end())
    }
}

/// Replaces the default reduction of one rule. Receives the reduced
/// values of the node's non-skip children.
pub type Reducer = Arc<dyn Fn(&ReduceContext, Vec<AsmValue>) -> Result<AsmValue> + Send + Sync>;

#[derive(Clone, Default)]
pub struct ReducerRegistry {
    reducers: FxHashMap<String, Reducer>,
}

impl std::fmt::Debug for ReducerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReducerRegistry")
            .field("rules", &self.reducers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ReducerRegistry {
    pub fn register<F>(&mut self, rule_name: &str, f: F)
    where
        F: Fn(&ReduceContext, Vec<AsmValue>) -> Result<AsmValue> + Send + Sync + 'static,
    {
        self.reducers.insert(rule_name.to_string(), Arc::new(f));
    }

    pub fn get(&self, rule_name: &str) -> Option<&Reducer> {
        self.reducers.get(rule_name)
    }

    pub fn len(&self) -> usize {
        self.reducers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reducers.is_empty()
    }
}

// Property name of a child inside an element.
fn property_name(tree: &SharedPackedParseTree, child: NodeId) -> String {
    let rule = tree.rules().rule(tree.node(child).rule());
    if rule.is_generated {
        // `owner§multi1` -> `multi1`
        match rule.name.rsplit_once('§') {
            Some((_, kind)) => kind.to_string(),
            None => rule.name.clone(),
        }
    } else if rule.is_anonymous_terminal() {
        "value".to_string()
    } else {
        rule.name.clone()
    }
}

fn is_literal_leaf(tree: &SharedPackedParseTree, id: NodeId) -> bool {
    match tree.node(id) {
        SpptNode::Leaf(l) => tree.rules().rule(l.rule).is_literal(),
        SpptNode::Branch(_) => false,
    }
}

/// Builds the abstract syntax model of the default tree.
pub fn reduce(
    tree: &SharedPackedParseTree,
    reducers: &ReducerRegistry,
) -> std::result::Result<AsmValue, LanguageIssue> {
    reduce_node(tree, reducers, tree.root())
}

fn reduce_node(
    tree: &SharedPackedParseTree,
    reducers: &ReducerRegistry,
    id: NodeId,
) -> std::result::Result<AsmValue, LanguageIssue> {
    let node = tree.node(id);
    let branch = match node {
        SpptNode::Leaf(l) => return Ok(AsmValue::Text(l.text.clone())),
        SpptNode::Branch(b) => b,
    };
    let children = tree.non_skip_children(id);
    let values = children
        .iter()
        .map(|c| reduce_node(tree, reducers, *c))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let rules = tree.rules();
    let rule = rules.rule(branch.rule);
    if let Some(reducer) = reducers.get(&rule.name) {
        let ctx = ReduceContext { tree, node: id };
        return reducer(&ctx, values).map_err(|e| {
            LanguageIssue::error(
                IssuePhase::SyntaxAnalysis,
                IssueCode::SyntaxAnalysis,
                format!("reducer for {} failed: {e:#}", rule.name),
            )
            .at(InputLocation::from_offset(
                tree.text(),
                branch.start,
                branch.end - branch.start,
            ))
        });
    }

    let value = match rule.body() {
        None | Some(RuleBody::Empty) => AsmValue::Nothing,
        Some(RuleBody::Multi { max: Some(1), .. }) => {
            values.into_iter().next().unwrap_or(AsmValue::Nothing)
        }
        Some(RuleBody::Multi { .. }) => AsmValue::List(values),
        Some(RuleBody::SeparatedList { .. }) => {
            AsmValue::List(values.into_iter().step_by(2).collect())
        }
        Some(body) => {
            let option = tree.option(id);
            let is_single = body
                .option_items(option)
                .map(|items| items.len() == 1)
                .unwrap_or(false);
            if body.is_choice() && is_single {
                values.into_iter().next().unwrap_or(AsmValue::Nothing)
            } else if rule.is_generated {
                let mut kept: Vec<AsmValue> = children
                    .iter()
                    .zip(values)
                    .filter(|(c, _)| !is_literal_leaf(tree, **c))
                    .map(|(_, v)| v)
                    .collect();
                match kept.len() {
                    0 => AsmValue::Nothing,
                    1 => kept.remove(0),
                    _ => AsmValue::List(kept),
                }
            } else {
                let mut properties: Vec<AsmProperty> = vec![];
                for (c, v) in children.iter().zip(values) {
                    if is_literal_leaf(tree, *c) {
                        continue;
                    }
                    let base = property_name(tree, *c);
                    let mut name = base.clone();
                    let mut n = 1;
                    while properties.iter().any(|p| p.name == name) {
                        n += 1;
                        name = format!("{base}{n}");
                    }
                    properties.push(AsmProperty { name, value: v });
                }
                AsmValue::Element(AsmElement {
                    type_name: rule.name.clone(),
                    start: branch.start,
                    end: branch.end,
                    properties,
                })
            }
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::{ParseOptions, ParserLimits},
        compiler::compile_grammar_text,
        earley,
        interrupt::NoInterrupt,
    };

    fn tree(grammar: &str, text: &str) -> SharedPackedParseTree {
        let rules = Arc::new(compile_grammar_text(grammar).unwrap());
        earley::parse(
            &rules,
            text,
            &ParseOptions::default(),
            &ParserLimits::default(),
            &NoInterrupt,
        )
        .sppt
        .unwrap()
    }

    const GRAMMAR: &str = "namespace t grammar G {\n\
        skip leaf WS = \"\\s+\" ;\n\
        unit = decl* ;\n\
        decl = 'var' NAME type? ';' ;\n\
        type = ':' NAME ;\n\
        leaf NAME = \"[a-z]+\" ;\n\
    }";

    #[test]
    fn default_reduction() {
        let t = tree(GRAMMAR, "var a : int; var b;");
        let asm = reduce(&t, &ReducerRegistry::default()).unwrap();
        let decls = asm.as_list().unwrap();
        assert_eq!(decls.len(), 2);
        let a = decls[0].as_element().unwrap();
        assert_eq!(a.type_name, "decl");
        assert_eq!(a.text("NAME"), Some("a"));
        let ty = a.property("multi1").unwrap().as_element().unwrap();
        assert_eq!(ty.text("NAME"), Some("int"));
        let b = decls[1].as_element().unwrap();
        assert_eq!(b.property("multi1"), Some(&AsmValue::Nothing));
        assert_eq!(asm.elements().len(), 3);
    }

    #[test]
    fn reducer_overrides_default() {
        let t = tree(GRAMMAR, "var a;");
        let mut reducers = ReducerRegistry::default();
        reducers.register("decl", |ctx, _values| {
            Ok(AsmValue::Text(ctx.matched_text().to_uppercase()))
        });
        let asm = reduce(&t, &reducers).unwrap();
        assert_eq!(asm, AsmValue::List(vec![AsmValue::Text("VAR A;".into())]));
    }

    #[test]
    fn failing_reducer_is_an_issue() {
        let t = tree(GRAMMAR, "var a;");
        let mut reducers = ReducerRegistry::default();
        reducers.register("type", |_, _| Ok(AsmValue::Nothing));
        reducers.register("decl", |_, _| anyhow::bail!("no declarations allowed"));
        let issue = reduce(&t, &reducers).unwrap_err();
        assert_eq!(issue.code, IssueCode::SyntaxAnalysis);
        assert_eq!(issue.location.unwrap().position, 0);
    }
}
