// Builds the shared packed parse tree from recognizer charts.
//
// A node is identified by (chart, rule, start, end). For each option of
// the rule body, the child sequences spanning [start, end) are found by a
// forward pass over (children matched, offset) states followed by a
// backward pass that keeps only states that can still reach the end.
// Derivations are enumerated option by option, trying longer children
// first, so derivation 0 is the greedy, leftmost-declared reading.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    api::{IssuePhase, IssueCode, LanguageIssue, InputLocation, NodeId, RuleId},
    runtime::{RuleBody, RuntimeRuleSet},
    sppt::{Derivation, SpptBranch, SpptLeaf, SpptNode},
};

use super::parser::{ChartData, SkipRun};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub(crate) struct NodeKey {
    pub chart: usize,
    pub rule: RuleId,
    pub start: usize,
    pub end: usize,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
enum ChildKey {
    Node(NodeKey),
    Leaf {
        rule: RuleId,
        start: usize,
        end: usize,
        is_skip: bool,
    },
    // skip run starting at the offset
    Skip(usize),
}

type State = (usize, usize);
type Edge = (Vec<ChildKey>, State);

enum Task {
    Visit(NodeKey),
    Finish(NodeKey, Vec<(usize, Vec<ChildKey>)>),
}

pub(crate) struct ForestBuilder<'a> {
    rules: &'a RuntimeRuleSet,
    text: &'a str,
    charts: &'a [ChartData],
    skip_runs: &'a FxHashMap<usize, Option<SkipRun>>,
    max_alternatives: usize,
    pub nodes: Vec<SpptNode>,
    memo: FxHashMap<NodeKey, Option<NodeId>>,
    leaves: FxHashMap<(RuleId, usize, bool), NodeId>,
    pub issues: Vec<LanguageIssue>,
}

impl<'a> ForestBuilder<'a> {
    pub fn new(
        rules: &'a RuntimeRuleSet,
        text: &'a str,
        charts: &'a [ChartData],
        skip_runs: &'a FxHashMap<usize, Option<SkipRun>>,
        max_alternatives: usize,
    ) -> Self {
        ForestBuilder {
            rules,
            text,
            charts,
            skip_runs,
            max_alternatives: max_alternatives.max(1),
            nodes: vec![],
            memo: FxHashMap::default(),
            leaves: FxHashMap::default(),
            issues: vec![],
        }
    }

    fn skip_root(&self, pos: usize) -> Option<NodeKey> {
        let run = (*self.skip_runs.get(&pos)?)?;
        Some(NodeKey {
            chart: run.chart,
            rule: self.rules.skip_goal()?,
            start: pos,
            end: run.end,
        })
    }

    fn edges(&self, key: &NodeKey, body: &RuleBody, option: usize, state: State) -> Vec<Edge> {
        let (k, p) = state;
        let chart = &self.charts[key.chart];
        let child = match body.item_at(option, k) {
            Some(c) => c,
            None => return vec![],
        };
        let mut res = vec![];
        if self.rules.is_terminal(child) {
            if let Some(&(e, s)) = chart.tokens.get(&(child, p)) {
                if s <= key.end {
                    let mut children = vec![ChildKey::Leaf {
                        rule: child,
                        start: p,
                        end: e,
                        is_skip: chart.is_skip,
                    }];
                    if s > e {
                        children.push(ChildKey::Skip(e));
                    }
                    res.push((children, (k + 1, s)));
                }
            }
        } else if let Some(ends) = chart.completions.get(&(child, p)) {
            for &e in ends.iter().rev() {
                if e > key.end || (e == p && !body.allows_empty_child(k)) {
                    continue;
                }
                let node = NodeKey {
                    chart: key.chart,
                    rule: child,
                    start: p,
                    end: e,
                };
                res.push((vec![ChildKey::Node(node)], (k + 1, e)));
            }
        }
        res
    }

    // All derivations of `key`, capped at `max_alternatives`.
    fn derivations(&self, key: &NodeKey) -> (Vec<(usize, Vec<ChildKey>)>, bool) {
        let body = match self.rules.body(key.rule) {
            Some(b) => b,
            None => return (vec![], false),
        };
        let mut res = vec![];
        let mut truncated = false;
        for option in 0..body.num_options() {
            // forward: reachable states and their edges
            let mut edges: FxHashMap<State, Vec<Edge>> = FxHashMap::default();
            let mut queue = vec![(0, key.start)];
            while let Some(st) = queue.pop() {
                if edges.contains_key(&st) {
                    continue;
                }
                let out = self.edges(key, body, option, st);
                queue.extend(out.iter().map(|(_, next)| *next));
                edges.insert(st, out);
            }

            // backward: states from which the end is reachable
            let mut preds: FxHashMap<State, Vec<State>> = FxHashMap::default();
            for (st, out) in &edges {
                for (_, next) in out {
                    preds.entry(*next).or_default().push(*st);
                }
            }
            let mut alive: FxHashSet<State> = FxHashSet::default();
            let mut stack: Vec<State> = edges
                .keys()
                .copied()
                .filter(|(k, p)| *p == key.end && body.is_complete_at(option, *k))
                .collect();
            while let Some(st) = stack.pop() {
                if alive.insert(st) {
                    if let Some(ps) = preds.get(&st) {
                        stack.extend(ps.iter().copied());
                    }
                }
            }
            if !alive.contains(&(0, key.start)) {
                continue;
            }

            // enumerate paths, longest child first
            let mut path: Vec<&Edge> = vec![];
            let mut cursor: Vec<(State, usize)> = vec![((0, key.start), 0)];
            while let Some((st, idx)) = cursor.pop() {
                if idx == 0 && st.1 == key.end && body.is_complete_at(option, st.0) {
                    if res.len() >= self.max_alternatives {
                        truncated = true;
                        break;
                    }
                    res.push((
                        option,
                        path.iter().flat_map(|(c, _)| c.iter().copied()).collect(),
                    ));
                }
                let out = &edges[&st];
                let next = (idx..out.len()).find(|i| alive.contains(&out[*i].1));
                match next {
                    Some(i) => {
                        cursor.push((st, i + 1));
                        path.push(&out[i]);
                        cursor.push((out[i].1, 0));
                    }
                    None => {
                        if !cursor.is_empty() {
                            path.pop();
                        }
                    }
                }
            }
            if truncated {
                break;
            }
        }
        (res, truncated)
    }

    fn leaf(&mut self, rule: RuleId, start: usize, end: usize, is_skip: bool) -> NodeId {
        if let Some(id) = self.leaves.get(&(rule, start, is_skip)) {
            return *id;
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(SpptNode::Leaf(SpptLeaf {
            rule,
            start,
            text: self.text[start..end].to_string(),
            is_skip,
        }));
        self.leaves.insert((rule, start, is_skip), id);
        id
    }

    // The skip rule nodes of a skip run, without the synthetic wrappers.
    fn skip_nodes(&self, pos: usize) -> Option<Vec<NodeId>> {
        let root = self.memo.get(&self.skip_root(pos)?).copied().flatten()?;
        let mut res = vec![];
        if let SpptNode::Branch(b) = &self.nodes[root.as_index()] {
            for choice in &b.default_derivation().children {
                match &self.nodes[choice.as_index()] {
                    SpptNode::Branch(c) => res.extend(c.default_derivation().children.iter()),
                    SpptNode::Leaf(_) => res.push(*choice),
                }
            }
        }
        Some(res)
    }

    pub fn build(&mut self, root: NodeKey) -> Option<NodeId> {
        let mut in_progress: FxHashSet<NodeKey> = FxHashSet::default();
        let mut stack = vec![Task::Visit(root)];
        while let Some(task) = stack.pop() {
            match task {
                Task::Visit(key) => {
                    if self.memo.contains_key(&key) || in_progress.contains(&key) {
                        continue;
                    }
                    let (derivs, truncated) = self.derivations(&key);
                    if truncated {
                        self.issues.push(
                            LanguageIssue::warning(
                                IssuePhase::Parse,
                                IssueCode::Ambiguity,
                                format!(
                                    "more than {} derivations of {}; extra alternatives dropped",
                                    self.max_alternatives,
                                    self.rules.name(key.rule)
                                ),
                            )
                            .at(InputLocation::from_offset(
                                self.text,
                                key.start,
                                key.end - key.start,
                            )),
                        );
                    }
                    in_progress.insert(key);
                    let mut deps = vec![];
                    for (_, children) in &derivs {
                        for c in children {
                            let dep = match c {
                                ChildKey::Node(k) => Some(*k),
                                ChildKey::Skip(pos) => self.skip_root(*pos),
                                ChildKey::Leaf { .. } => None,
                            };
                            if let Some(d) = dep {
                                if !self.memo.contains_key(&d)
                                    && !in_progress.contains(&d)
                                    && !deps.contains(&d)
                                {
                                    deps.push(d);
                                }
                            }
                        }
                    }
                    stack.push(Task::Finish(key, derivs));
                    for d in deps.into_iter().rev() {
                        stack.push(Task::Visit(d));
                    }
                }
                Task::Finish(key, derivs) => {
                    in_progress.remove(&key);
                    let mut out = vec![];
                    'deriv: for (option, children) in derivs {
                        let mut ids = vec![];
                        for c in children {
                            match c {
                                ChildKey::Leaf {
                                    rule,
                                    start,
                                    end,
                                    is_skip,
                                } => ids.push(self.leaf(rule, start, end, is_skip)),
                                ChildKey::Node(k) => match self.memo.get(&k) {
                                    Some(Some(id)) => ids.push(*id),
                                    // cyclic or failed
                                    _ => continue 'deriv,
                                },
                                ChildKey::Skip(pos) => match self.skip_nodes(pos) {
                                    Some(nodes) => ids.extend(nodes),
                                    None => continue 'deriv,
                                },
                            }
                        }
                        out.push(Derivation {
                            option,
                            children: ids,
                        });
                    }
                    let id = if out.is_empty() {
                        None
                    } else {
                        let id = NodeId(self.nodes.len());
                        self.nodes.push(SpptNode::Branch(SpptBranch {
                            rule: key.rule,
                            start: key.start,
                            end: key.end,
                            is_skip: self.charts[key.chart].is_skip,
                            derivations: out,
                        }));
                        Some(id)
                    };
                    self.memo.insert(key, id);
                }
            }
        }
        self.memo.get(&root).copied().flatten()
    }

    /// Builds the leading skip run at offset 0 and prepends it to every
    /// derivation of `root`, so that the root spans the whole input.
    pub fn attach_leading_skip(&mut self, root: NodeId) {
        let key = match self.skip_root(0) {
            Some(k) => k,
            None => return,
        };
        if self.build(key).is_none() {
            return;
        }
        let skip = match self.skip_nodes(0) {
            Some(s) => s,
            None => return,
        };
        if let SpptNode::Branch(b) = &mut self.nodes[root.as_index()] {
            b.start = 0;
            for d in b.derivations.iter_mut() {
                d.children.splice(0..0, skip.iter().copied());
            }
        }
    }

    /// Information issues for ambiguity not resolved by declared priority.
    pub fn report_ambiguity(&mut self) {
        for node in &self.nodes {
            if let SpptNode::Branch(b) = node {
                if !b.is_ambiguous() {
                    continue;
                }
                if matches!(self.rules.body(b.rule), Some(RuleBody::ChoicePriority(_))) {
                    continue;
                }
                self.issues.push(
                    LanguageIssue::info(
                        IssuePhase::Parse,
                        IssueCode::Ambiguity,
                        format!(
                            "{} has {} derivations; using the first",
                            self.rules.name(b.rule),
                            b.derivations.len()
                        ),
                    )
                    .at(InputLocation::from_offset(self.text, b.start, b.end - b.start)),
                );
            }
        }
    }
}
