//! Sets derived from a rule set: nullability, left corners, first
//! terminals, reachability. Each is computed on first use and cached for
//! the lifetime of the rule set.

use once_cell::sync::OnceCell;
use rustc_hash::FxHashSet;

use crate::api::RuleId;

use super::{
    rule::{RuleBody, RuntimeRule},
    rule_set::RuntimeRuleSet,
};

#[derive(Debug, Default)]
pub(crate) struct DerivedSets {
    nullable: OnceCell<Vec<bool>>,
    direct_left_corners: OnceCell<Vec<Vec<RuleId>>>,
    left_corners: OnceCell<Vec<Vec<RuleId>>>,
    first_terminals: OnceCell<Vec<Vec<RuleId>>>,
    sub_rules: OnceCell<Vec<Vec<RuleId>>>,
    first_super_non_terminals: OnceCell<Vec<Vec<RuleId>>>,
    all_skip_terminals: OnceCell<Vec<RuleId>>,
}

// Walks the dots of one option starting at `dot`, following nullable
// children. Returns the items that could supply the next token.
fn items_from(
    body: &RuleBody,
    option: usize,
    mut dot: usize,
    nullable: &[bool],
    res: &mut Vec<RuleId>,
) {
    let mut seen = FxHashSet::default();
    while seen.insert(dot) {
        match body.item_at(option, dot) {
            None => break,
            Some(item) => {
                if !res.contains(&item) {
                    res.push(item);
                }
                if !(nullable[item.as_index()] && body.allows_empty_child(dot)) {
                    break;
                }
                dot = body.advance(dot);
            }
        }
    }
}

fn option_nullable(body: &RuleBody, option: usize, nullable: &[bool]) -> bool {
    let mut dot = 0;
    let mut seen = FxHashSet::default();
    while seen.insert(dot) {
        if body.is_complete_at(option, dot) {
            return true;
        }
        match body.item_at(option, dot) {
            Some(item) if nullable[item.as_index()] && body.allows_empty_child(dot) => {
                dot = body.advance(dot);
            }
            _ => return false,
        }
    }
    false
}

fn compute_nullable(rules: &[RuntimeRule]) -> Vec<bool> {
    let mut nullable = vec![false; rules.len()];
    loop {
        let mut changed = false;
        for r in rules {
            if nullable[r.id.as_index()] {
                continue;
            }
            if let Some(body) = r.body() {
                if (0..body.num_options()).any(|o| option_nullable(body, o, &nullable))
                    || matches!(body, RuleBody::Empty)
                {
                    nullable[r.id.as_index()] = true;
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }
    nullable
}

// Transitive closure over `edges`, excluding the start node unless it is
// reachable from itself.
fn closure(edges: &[Vec<RuleId>], start: RuleId) -> Vec<RuleId> {
    let mut seen = vec![false; edges.len()];
    let mut stack = edges[start.as_index()].clone();
    let mut res = vec![];
    while let Some(r) = stack.pop() {
        if seen[r.as_index()] {
            continue;
        }
        seen[r.as_index()] = true;
        res.push(r);
        stack.extend(edges[r.as_index()].iter().copied());
    }
    res.sort();
    res
}

impl RuntimeRuleSet {
    pub fn nullable(&self, id: RuleId) -> bool {
        self.nullable_all()[id.as_index()]
    }

    fn nullable_all(&self) -> &[bool] {
        self.derived
            .nullable
            .get_or_init(|| compute_nullable(self.rules()))
    }

    fn direct_left_corners(&self) -> &[Vec<RuleId>] {
        self.derived.direct_left_corners.get_or_init(|| {
            let nullable = self.nullable_all();
            self.rules()
                .iter()
                .map(|r| {
                    let mut res = vec![];
                    if let Some(body) = r.body() {
                        for o in 0..body.num_options() {
                            items_from(body, o, 0, nullable, &mut res);
                        }
                    }
                    res
                })
                .collect()
        })
    }

    /// Rules (terminal or not) that can begin a derivation of `id`.
    pub fn left_corners(&self, id: RuleId) -> &[RuleId] {
        &self.derived.left_corners.get_or_init(|| {
            let direct = self.direct_left_corners();
            (0..self.len()).map(|i| closure(direct, RuleId(i))).collect()
        })[id.as_index()]
    }

    /// Terminals that can be the first token of `id`. A terminal's first
    /// set is itself.
    pub fn first_terminals(&self, id: RuleId) -> &[RuleId] {
        &self.derived.first_terminals.get_or_init(|| {
            (0..self.len())
                .map(|i| {
                    let id = RuleId(i);
                    if self.is_terminal(id) {
                        vec![id]
                    } else {
                        self.left_corners(id)
                            .iter()
                            .copied()
                            .filter(|r| self.is_terminal(*r))
                            .collect()
                    }
                })
                .collect()
        })[id.as_index()]
    }

    /// `id` and every rule reachable from it by derivation.
    pub fn sub_rules(&self, id: RuleId) -> &[RuleId] {
        &self.derived.sub_rules.get_or_init(|| {
            let edges: Vec<Vec<RuleId>> = self
                .rules()
                .iter()
                .map(|r| r.body().map(|b| b.children()).unwrap_or_default())
                .collect();
            (0..self.len())
                .map(|i| {
                    let mut res = closure(&edges, RuleId(i));
                    if let Err(pos) = res.binary_search(&RuleId(i)) {
                        res.insert(pos, RuleId(i));
                    }
                    res
                })
                .collect()
        })[id.as_index()]
    }

    /// Rules that could have `id` as their first child.
    pub fn first_super_non_terminals(&self, id: RuleId) -> &[RuleId] {
        &self.derived.first_super_non_terminals.get_or_init(|| {
            let mut res = vec![vec![]; self.len()];
            for (parent, children) in self.direct_left_corners().iter().enumerate() {
                for c in children {
                    res[c.as_index()].push(RuleId(parent));
                }
            }
            res
        })[id.as_index()]
    }

    /// Union of the terminals reachable from every skip rule.
    pub fn all_skip_terminals(&self) -> &[RuleId] {
        self.derived.all_skip_terminals.get_or_init(|| {
            let mut res: Vec<RuleId> = self
                .skip_rules()
                .iter()
                .flat_map(|s| self.sub_rules(*s).iter().copied())
                .filter(|r| self.is_terminal(*r))
                .collect();
            res.sort();
            res.dedup();
            res
        })
    }

    /// Whether a derivation rooted at `child` may continue `ancestor`
    /// after `item_index` children, for some option of `ancestor`.
    pub fn grows_into(&self, child: RuleId, ancestor: RuleId, item_index: usize) -> bool {
        match self.body(ancestor) {
            Some(body) => (0..body.num_options())
                .any(|o| self.grows_into_option(child, ancestor, o, item_index)),
            None => false,
        }
    }

    /// As [`Self::grows_into`], restricted to one option.
    pub fn grows_into_option(
        &self,
        child: RuleId,
        ancestor: RuleId,
        option: usize,
        item_index: usize,
    ) -> bool {
        let body = match self.body(ancestor) {
            Some(b) => b,
            None => return false,
        };
        let mut next = vec![];
        items_from(body, option, item_index, self.nullable_all(), &mut next);
        next.iter()
            .any(|n| *n == child || self.left_corners(*n).binary_search(&child).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use crate::runtime::{MatchSpec, RuleBody, RuleSetBuilder, RuntimeRuleSet};

    use super::*;

    // s = a 'c' ; a = 'b'? ; ws (skip) = "\s+"
    fn sample() -> (RuntimeRuleSet, [RuleId; 6]) {
        let mut b = RuleSetBuilder::new();
        let a = b.placeholder("a");
        let c = b.literal("c");
        let s = b.rule("s", RuleBody::Concatenation(vec![a, c]));
        let lb = b.literal("b");
        b.set_body(
            a,
            RuleBody::Multi {
                item: lb,
                min: 0,
                max: Some(1),
            },
        );
        let ws = b.named_terminal("WS", MatchSpec::Pattern("\\s+".into()));
        b.mark_skip(ws);
        b.set_default_goal(s);
        (b.finalize().unwrap(), [s, a, lb, c, ws, RuleId(0)])
    }

    #[test]
    fn nullable_and_first() {
        let (rs, [s, a, lb, c, ws, _]) = sample();
        assert!(rs.nullable(a));
        assert!(!rs.nullable(s));
        assert_eq!(rs.first_terminals(s), &[c, lb]);
        assert_eq!(rs.first_terminals(a), &[lb]);
        assert_eq!(rs.first_terminals(c), &[c]);
        assert_eq!(rs.all_skip_terminals(), &[ws]);
    }

    #[test]
    fn reachability() {
        let (rs, [s, a, lb, c, _, _]) = sample();
        assert_eq!(rs.sub_rules(s), &[a, c, s, lb]);
        assert_eq!(rs.first_super_non_terminals(a), &[s]);
        assert_eq!(rs.first_super_non_terminals(c), &[s]);
    }

    #[test]
    fn grows_into_follows_nullable_items() {
        let (rs, [s, a, lb, c, _, _]) = sample();
        assert!(rs.grows_into(a, s, 0));
        assert!(rs.grows_into(lb, s, 0));
        // 'a' may be empty, so 'c' may come first
        assert!(rs.grows_into(c, s, 0));
        assert!(!rs.grows_into(lb, s, 1));
        assert!(rs.grows_into(c, s, 1));
        assert!(!rs.grows_into(c, s, 2));
    }

    #[test]
    fn left_recursion_terminates() {
        // e = e '+' 'n' | 'n'
        let mut b = RuleSetBuilder::new();
        let e = b.placeholder("e");
        let plus = b.literal("+");
        let n = b.literal("n");
        b.set_body(
            e,
            RuleBody::ChoiceLongest(vec![vec![e, plus, n], vec![n]]),
        );
        let rs = b.finalize().unwrap();
        assert_eq!(rs.left_corners(e), &[e, n]);
        assert_eq!(rs.first_terminals(e), &[n]);
        assert!(!rs.nullable(e));
    }
}
