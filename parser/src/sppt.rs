use std::{fmt::Write as _, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    api::{NodeId, RuleId},
    runtime::{RuleBody, RuntimeRuleSet},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpptLeaf {
    pub rule: RuleId,
    pub start: usize,
    pub text: String,
    pub is_skip: bool,
}

impl SpptLeaf {
    pub fn end(&self) -> usize {
        self.start + self.text.len()
    }
}

/// One way of deriving a branch: the option of the rule body that was
/// used and the children it produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Derivation {
    pub option: usize,
    pub children: Vec<NodeId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpptBranch {
    pub rule: RuleId,
    pub start: usize,
    pub end: usize,
    pub is_skip: bool,
    /// Never empty. Index 0 is the default alternative.
    pub derivations: Vec<Derivation>,
}

impl SpptBranch {
    pub fn is_ambiguous(&self) -> bool {
        self.derivations.len() > 1
    }

    pub fn default_derivation(&self) -> &Derivation {
        &self.derivations[0]
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpptNode {
    Leaf(SpptLeaf),
    Branch(SpptBranch),
}

impl SpptNode {
    pub fn rule(&self) -> RuleId {
        match self {
            SpptNode::Leaf(l) => l.rule,
            SpptNode::Branch(b) => b.rule,
        }
    }

    pub fn start(&self) -> usize {
        match self {
            SpptNode::Leaf(l) => l.start,
            SpptNode::Branch(b) => b.start,
        }
    }

    pub fn end(&self) -> usize {
        match self {
            SpptNode::Leaf(l) => l.end(),
            SpptNode::Branch(b) => b.end,
        }
    }

    pub fn is_skip(&self) -> bool {
        match self {
            SpptNode::Leaf(l) => l.is_skip,
            SpptNode::Branch(b) => b.is_skip,
        }
    }
}

/// Serializable view of the default tree, as sent to clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeData {
    pub name: String,
    pub start: usize,
    pub end: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub is_skip: bool,
    /// Number of packed derivations; more than one marks ambiguity.
    #[serde(default)]
    pub alternatives: usize,
    #[serde(default)]
    pub children: Vec<TreeData>,
}

/// Shared packed parse tree. Nodes for the same rule and span are stored
/// once; a branch with several derivations of one span packs them in
/// `derivations` rather than duplicating the node.
pub struct SharedPackedParseTree {
    rules: Arc<RuntimeRuleSet>,
    text: String,
    nodes: Vec<SpptNode>,
    root: NodeId,
}

impl SharedPackedParseTree {
    pub(crate) fn new(
        rules: Arc<RuntimeRuleSet>,
        text: String,
        nodes: Vec<SpptNode>,
        root: NodeId,
    ) -> Self {
        SharedPackedParseTree {
            rules,
            text,
            nodes,
            root,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &SpptNode {
        &self.nodes[id.as_index()]
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn rules(&self) -> &Arc<RuntimeRuleSet> {
        &self.rules
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn rule_name(&self, id: NodeId) -> &str {
        self.rules.name(self.node(id).rule())
    }

    /// Children of the default derivation; empty for leaves.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        match self.node(id) {
            SpptNode::Leaf(_) => &[],
            SpptNode::Branch(b) => &b.default_derivation().children,
        }
    }

    pub fn non_skip_children(&self, id: NodeId) -> Vec<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .filter(|c| !self.node(*c).is_skip())
            .collect()
    }

    /// Option of the rule body used by the default derivation.
    pub fn option(&self, id: NodeId) -> usize {
        match self.node(id) {
            SpptNode::Leaf(_) => 0,
            SpptNode::Branch(b) => b.default_derivation().option,
        }
    }

    /// Input covered by the node, including trailing skip.
    pub fn matched_text(&self, id: NodeId) -> &str {
        let n = self.node(id);
        &self.text[n.start()..n.end()]
    }

    /// Leaves of the default tree, skip leaves included, in input order.
    pub fn leaves(&self, id: NodeId) -> Vec<NodeId> {
        let mut res = vec![];
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            match self.node(n) {
                SpptNode::Leaf(_) => res.push(n),
                SpptNode::Branch(b) => {
                    stack.extend(b.default_derivation().children.iter().rev().copied())
                }
            }
        }
        res
    }

    /// Concatenated text of all leaves of the default tree.
    pub fn leaves_text(&self) -> String {
        let mut res = String::with_capacity(self.text.len());
        for l in self.leaves(self.root) {
            if let SpptNode::Leaf(leaf) = self.node(l) {
                res.push_str(&leaf.text);
            }
        }
        res
    }

    pub fn ambiguous_nodes(&self) -> Vec<NodeId> {
        (0..self.nodes.len())
            .map(NodeId)
            .filter(|id| matches!(self.node(*id), SpptNode::Branch(b) if b.is_ambiguous()))
            .collect()
    }

    /// Ambiguity that the grammar does not resolve by declared priority.
    pub fn is_ambiguous(&self) -> bool {
        self.ambiguous_nodes().iter().any(|id| {
            !matches!(
                self.rules.body(self.node(*id).rule()),
                Some(RuleBody::ChoicePriority(_))
            )
        })
    }

    fn write_leaf(&self, out: &mut String, leaf: &SpptLeaf) {
        let rule = self.rules.rule(leaf.rule);
        let text = leaf.text.replace('\\', "\\\\").replace('\'', "\\'");
        if rule.is_literal() && rule.is_anonymous_terminal() {
            write!(out, "'{text}'").unwrap();
        } else {
            write!(out, "{}:'{text}'", rule.name).unwrap();
        }
    }

    /// Compact rendering of the default tree: literal leaves as `'x'`,
    /// other leaves as `NAME:'x'`, branches as `name{...}`, and helper
    /// rules for groups and repetitions as `[...]`.
    pub fn to_compact_string(&self, show_skip: bool) -> String {
        enum Step {
            Open(NodeId),
            Close(char),
            Space,
        }
        let mut out = String::new();
        let mut stack = vec![Step::Open(self.root)];
        while let Some(step) = stack.pop() {
            match step {
                Step::Space => out.push(' '),
                Step::Close(c) => out.push(c),
                Step::Open(id) => match self.node(id) {
                    SpptNode::Leaf(l) => self.write_leaf(&mut out, l),
                    SpptNode::Branch(b) => {
                        let rule = self.rules.rule(b.rule);
                        if rule.is_generated {
                            out.push('[');
                            stack.push(Step::Close(']'));
                        } else {
                            write!(out, "{}{{", rule.name).unwrap();
                            stack.push(Step::Close('}'));
                        }
                        let children: Vec<NodeId> = b
                            .default_derivation()
                            .children
                            .iter()
                            .copied()
                            .filter(|c| show_skip || !self.node(*c).is_skip())
                            .collect();
                        for (i, c) in children.iter().enumerate().rev() {
                            stack.push(Step::Open(*c));
                            if i > 0 {
                                stack.push(Step::Space);
                            }
                        }
                    }
                },
            }
        }
        out
    }

    pub fn to_tree_data(&self) -> TreeData {
        self.tree_data(self.root)
    }

    pub fn tree_data(&self, id: NodeId) -> TreeData {
        // post-order, so children are complete before their parent
        let mut done: Vec<TreeData> = vec![];
        let mut stack = vec![(id, false)];
        while let Some((n, expanded)) = stack.pop() {
            let node = self.node(n);
            match node {
                SpptNode::Leaf(l) => done.push(TreeData {
                    name: self.rules.name(l.rule).to_string(),
                    start: l.start,
                    end: l.end(),
                    text: Some(l.text.clone()),
                    is_skip: l.is_skip,
                    alternatives: 1,
                    children: vec![],
                }),
                SpptNode::Branch(b) if !expanded => {
                    stack.push((n, true));
                    for c in b.default_derivation().children.iter().rev() {
                        stack.push((*c, false));
                    }
                }
                SpptNode::Branch(b) => {
                    let k = b.default_derivation().children.len();
                    let children = done.split_off(done.len() - k);
                    done.push(TreeData {
                        name: self.rules.name(b.rule).to_string(),
                        start: b.start,
                        end: b.end,
                        text: None,
                        is_skip: b.is_skip,
                        alternatives: b.derivations.len(),
                        children,
                    });
                }
            }
        }
        done.pop().unwrap_or_else(|| TreeData {
            name: String::new(),
            start: 0,
            end: 0,
            text: None,
            is_skip: false,
            alternatives: 0,
            children: vec![],
        })
    }
}

impl std::fmt::Debug for SharedPackedParseTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_compact_string(true))
    }
}
