use anyhow::{bail, ensure, Result};

use crate::{
    api::{InputLocation, NodeId},
    error::CompileError,
    sppt::{SharedPackedParseTree, SpptNode},
};

use super::model::{Grammar, GrammarDefinition, GrammarRule, RuleItem};

/// Converts the tree of a grammar text, parsed with the seed rule set,
/// into a [`GrammarDefinition`].
pub fn definition_from_tree(tree: &SharedPackedParseTree) -> Result<GrammarDefinition> {
    let w = Walker { tree };
    w.definition(tree.root())
}

struct Walker<'a> {
    tree: &'a SharedPackedParseTree,
}

impl Walker<'_> {
    fn name(&self, id: NodeId) -> &str {
        self.tree.rule_name(id)
    }

    fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.tree.non_skip_children(id)
    }

    fn expect(&self, id: NodeId, rule: &str) -> Result<Vec<NodeId>> {
        ensure!(
            self.name(id) == rule,
            "expected {rule} node, found {}",
            self.name(id)
        );
        Ok(self.children(id))
    }

    fn child(&self, id: NodeId, rule: &str) -> Result<NodeId> {
        let ch = self.expect(id, rule)?;
        ensure!(ch.len() == 1, "{rule} should have a single child");
        Ok(ch[0])
    }

    fn text(&self, id: NodeId) -> Result<&str> {
        match self.tree.node(id) {
            SpptNode::Leaf(l) => Ok(&l.text),
            SpptNode::Branch(_) => bail!("expected a leaf, found {}", self.name(id)),
        }
    }

    fn location(&self, id: NodeId) -> InputLocation {
        let n = self.tree.node(id);
        InputLocation::from_offset(self.tree.text(), n.start(), n.end() - n.start())
    }

    fn is_present(&self, id: NodeId, rule: &str) -> Result<bool> {
        Ok(!self.expect(id, rule)?.is_empty())
    }

    fn definition(&self, root: NodeId) -> Result<GrammarDefinition> {
        let ch = self.expect(root, "grammarDefinition")?;
        let ns = self.expect(ch[0], "namespace")?;
        let namespace = self.qualified_name(ns[1])?;
        let mut grammars = vec![];
        for g in self.expect(ch[1], "grammarList")? {
            grammars.push(self.grammar(g, &namespace)?);
        }
        Ok(GrammarDefinition {
            namespace,
            grammars,
        })
    }

    fn qualified_name(&self, id: NodeId) -> Result<String> {
        let mut res = String::new();
        for c in self.expect(id, "qualifiedName")? {
            res.push_str(self.text(c)?);
        }
        Ok(res)
    }

    fn grammar(&self, id: NodeId, namespace: &str) -> Result<Grammar> {
        let ch = self.expect(id, "grammar")?;
        ensure!(ch.len() == 6, "malformed grammar node");
        let mut g = Grammar::new(namespace, self.text(ch[1])?);
        if let Some(ext) = self.expect(ch[2], "extendsOpt")?.first() {
            let ext = self.expect(*ext, "extends")?;
            for n in self.expect(ext[1], "extendsList")? {
                if self.name(n) == "qualifiedName" {
                    g.extends.push(self.qualified_name(n)?);
                }
            }
        }
        for r in self.expect(ch[4], "ruleList")? {
            g.rules.push(self.rule(r)?);
        }
        Ok(g)
    }

    fn rule(&self, id: NodeId) -> Result<GrammarRule> {
        let ch = self.expect(id, "rule")?;
        ensure!(ch.len() == 5, "malformed rule node");
        let labels = self.expect(ch[0], "ruleTypeLabels")?;
        ensure!(labels.len() == 3, "malformed rule labels");
        Ok(GrammarRule {
            name: self.text(ch[1])?.to_string(),
            is_override: self.is_present(labels[0], "overrideOpt")?,
            is_skip: self.is_present(labels[1], "skipOpt")?,
            is_leaf: self.is_present(labels[2], "leafOpt")?,
            rhs: self.rhs(ch[3])?,
            location: Some(self.location(id)),
        })
    }

    fn rhs(&self, id: NodeId) -> Result<RuleItem> {
        let c = self.child(id, "rhs")?;
        match self.name(c) {
            "empty" => Ok(RuleItem::Empty),
            "concatenation" => self.concatenation(c),
            "choiceLongest" => Ok(RuleItem::ChoiceLongest(self.alternatives(c)?)),
            "choicePriority" => Ok(RuleItem::ChoicePriority(self.alternatives(c)?)),
            other => bail!("unexpected {other} in rule body"),
        }
    }

    fn alternatives(&self, id: NodeId) -> Result<Vec<RuleItem>> {
        self.children(id)
            .into_iter()
            .filter(|c| self.name(*c) == "concatenation")
            .map(|c| self.concatenation(c))
            .collect()
    }

    fn concatenation(&self, id: NodeId) -> Result<RuleItem> {
        let mut items = self
            .expect(id, "concatenation")?
            .into_iter()
            .map(|c| self.concatenation_item(c))
            .collect::<Result<Vec<_>>>()?;
        if items.len() == 1 {
            Ok(items.remove(0))
        } else {
            Ok(RuleItem::Concatenation(items))
        }
    }

    fn concatenation_item(&self, id: NodeId) -> Result<RuleItem> {
        let c = self.child(id, "concatenationItem")?;
        match self.name(c) {
            "simpleItem" => self.simple_item(c),
            "multi" => {
                let ch = self.children(c);
                ensure!(ch.len() == 2, "malformed multi node");
                let item = self.simple_item(ch[0])?;
                let (min, max) = self.multiplicity(ch[1])?;
                Ok(RuleItem::repeat(item, min, max))
            }
            "separatedList" => {
                let ch = self.children(c);
                ensure!(ch.len() == 6, "malformed separated list node");
                let item = self.simple_item(ch[1])?;
                let separator = self.simple_item(ch[3])?;
                let (min, max) = self.multiplicity(ch[5])?;
                Ok(RuleItem::separated(item, separator, min, max))
            }
            other => bail!("unexpected {other} in concatenation"),
        }
    }

    fn simple_item(&self, id: NodeId) -> Result<RuleItem> {
        let c = self.child(id, "simpleItem")?;
        let ch = self.children(c);
        match self.name(c) {
            "terminal" => {
                let leaf = ch[0];
                let raw = self.text(leaf)?;
                if self.name(leaf) == "LITERAL" {
                    Ok(RuleItem::literal(&unescape_literal(raw)))
                } else {
                    Ok(RuleItem::pattern(&unescape_pattern(raw)))
                }
            }
            "nonTerminal" => Ok(RuleItem::non_terminal(self.text(ch[0])?)),
            "embedded" => Ok(RuleItem::Embedded {
                grammar: self.text(ch[0])?.to_string(),
                rule: self.text(ch[2])?.to_string(),
            }),
            "group" => Ok(RuleItem::Group(Box::new(self.rhs(ch[1])?))),
            other => bail!("unexpected {other} as item"),
        }
    }

    fn multiplicity(&self, id: NodeId) -> Result<(usize, Option<usize>)> {
        let c = self.child(id, "multiplicity")?;
        if self.name(c) != "range" {
            return match self.text(c)? {
                "*" => Ok((0, None)),
                "+" => Ok((1, None)),
                "?" => Ok((0, Some(1))),
                other => bail!("unknown multiplicity {other:?}"),
            };
        }
        let ch = self.children(c);
        ensure!(ch.len() == 4, "malformed range node");
        let min = self.integer(ch[1])?;
        let max = match self.expect(ch[2], "rangeMaxOpt")?.first() {
            None => Some(min),
            Some(rm) => {
                let rm = self.expect(*rm, "rangeMax")?;
                match self.expect(rm[1], "rangeMaxValueOpt")?.first() {
                    None => None,
                    Some(v) => Some(self.integer(*v)?),
                }
            }
        };
        if let Some(max) = max {
            if max < min {
                return Err(CompileError::Syntax {
                    location: self.location(c),
                    message: format!("range maximum {max} is below minimum {min}"),
                    expected: vec![],
                }
                .into());
            }
        }
        Ok((min, max))
    }

    fn integer(&self, id: NodeId) -> Result<usize> {
        let t = self.text(id)?;
        t.parse().map_err(|_| {
            CompileError::Syntax {
                location: self.location(id),
                message: format!("repetition count {t} is too large"),
                expected: vec![],
            }
            .into()
        })
    }
}

/// Strips the quotes of a `'...'` literal and resolves its escapes.
pub fn unescape_literal(raw: &str) -> String {
    let inner = &raw[1..raw.len() - 1];
    let mut res = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            res.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => res.push('\n'),
            Some('t') => res.push('\t'),
            Some('r') => res.push('\r'),
            Some('\'') => res.push('\''),
            Some('\\') => res.push('\\'),
            Some(other) => {
                res.push('\\');
                res.push(other);
            }
            None => res.push('\\'),
        }
    }
    res
}

/// Strips the quotes of a `"..."` pattern. Only `\"` is resolved; every
/// other escape is left for the regex engine.
pub fn unescape_pattern(raw: &str) -> String {
    raw[1..raw.len() - 1].replace("\\\"", "\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_escapes() {
        assert_eq!(unescape_literal(r"'a\'b'"), "a'b");
        assert_eq!(unescape_literal(r"'\n\t\\'"), "\n\t\\");
        assert_eq!(unescape_literal(r"'\d'"), "\\d");
    }

    #[test]
    fn pattern_escapes() {
        assert_eq!(unescape_pattern(r#""\s+\"""#), r#"\s+""#);
        assert_eq!(unescape_pattern(r#""[a-z]""#), "[a-z]");
    }
}
