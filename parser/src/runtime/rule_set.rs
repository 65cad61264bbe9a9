use std::collections::VecDeque;

use rustc_hash::FxHashMap;

use crate::{api::RuleId, error::CompileError, scanner::Matcher};

use super::{
    derived::DerivedSets,
    rule::{MatchSpec, RuleBody, RuleKind, RuntimeRule},
};

pub const SKIP_RULE_NAME: &str = "<SKIP>";
pub const SKIP_CHOICE_RULE_NAME: &str = "<SKIP-CHOICE>";
pub const END_OF_TEXT_RULE_NAME: &str = "<EOT>";

/// Flat, indexed form of a grammar. Immutable once built; shared between
/// parses through `Arc`.
#[derive(Debug)]
pub struct RuntimeRuleSet {
    rules: Vec<RuntimeRule>,
    names: FxHashMap<String, RuleId>,
    skip_rules: Vec<RuleId>,
    skip_goal: Option<RuleId>,
    end_of_text: RuleId,
    default_goal: Option<RuleId>,
    pub(super) derived: DerivedSets,
}

impl RuntimeRuleSet {
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    #[inline(always)]
    pub fn rule(&self, id: RuleId) -> &RuntimeRule {
        &self.rules[id.as_index()]
    }

    pub fn rules(&self) -> &[RuntimeRule] {
        &self.rules
    }

    pub fn name(&self, id: RuleId) -> &str {
        &self.rule(id).name
    }

    pub fn find(&self, name: &str) -> Option<RuleId> {
        self.names.get(name).copied()
    }

    #[inline(always)]
    pub fn is_terminal(&self, id: RuleId) -> bool {
        self.rule(id).is_terminal()
    }

    pub fn body(&self, id: RuleId) -> Option<&RuleBody> {
        self.rule(id).body()
    }

    pub fn terminals(&self) -> impl Iterator<Item = &RuntimeRule> {
        self.rules.iter().filter(|r| r.is_terminal())
    }

    /// Rules declared `skip`.
    pub fn skip_rules(&self) -> &[RuleId] {
        &self.skip_rules
    }

    /// One or more skip rules in a row; `None` when the grammar has none.
    pub fn skip_goal(&self) -> Option<RuleId> {
        self.skip_goal
    }

    pub fn end_of_text(&self) -> RuleId {
        self.end_of_text
    }

    pub fn default_goal(&self) -> Option<RuleId> {
        self.default_goal
    }

    /// Display forms of every terminal a scanner could produce.
    pub fn scanner_matchables(&self) -> Vec<String> {
        self.terminals()
            .filter(|r| r.id != self.end_of_text)
            .map(|r| match r.matcher() {
                Some(m) => m.spec().display(),
                None => r.name.clone(),
            })
            .collect()
    }
}

enum PendingKind {
    Terminal(MatchSpec),
    NonTerminal(RuleBody),
}

struct PendingRule {
    name: String,
    kind: Option<PendingKind>,
    is_generated: bool,
}

/// Assembles a [`RuntimeRuleSet`]. Rules may be referenced before they
/// are defined by declaring them first with [`RuleSetBuilder::placeholder`].
#[derive(Default)]
pub struct RuleSetBuilder {
    rules: Vec<PendingRule>,
    names: FxHashMap<String, RuleId>,
    terminals: FxHashMap<MatchSpec, RuleId>,
    generated_counts: FxHashMap<String, usize>,
    skip: Vec<RuleId>,
    default_goal: Option<RuleId>,
}

impl RuleSetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&mut self, name: String, kind: Option<PendingKind>, is_generated: bool) -> RuleId {
        let id = RuleId(self.rules.len());
        self.names.insert(name.clone(), id);
        self.rules.push(PendingRule {
            name,
            kind,
            is_generated,
        });
        id
    }

    fn terminal(&mut self, spec: MatchSpec) -> RuleId {
        if let Some(id) = self.terminals.get(&spec) {
            return *id;
        }
        let id = self.add(spec.display(), Some(PendingKind::Terminal(spec.clone())), false);
        self.terminals.insert(spec, id);
        id
    }

    /// Anonymous literal terminal; identical literals share one id.
    pub fn literal(&mut self, s: &str) -> RuleId {
        self.terminal(MatchSpec::Literal(s.to_string()))
    }

    /// Anonymous pattern terminal; identical patterns share one id.
    pub fn pattern(&mut self, p: &str) -> RuleId {
        self.terminal(MatchSpec::Pattern(p.to_string()))
    }

    /// Declares `name` without a definition, or returns the existing id.
    pub fn placeholder(&mut self, name: &str) -> RuleId {
        match self.names.get(name) {
            Some(id) => *id,
            None => self.add(name.to_string(), None, false),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<RuleId> {
        self.names.get(name).copied()
    }

    pub fn is_defined(&self, id: RuleId) -> bool {
        self.rules[id.as_index()].kind.is_some()
    }

    pub fn set_body(&mut self, id: RuleId, body: RuleBody) {
        let rule = &mut self.rules[id.as_index()];
        assert!(rule.kind.is_none(), "rule {} defined twice", rule.name);
        rule.kind = Some(PendingKind::NonTerminal(body));
    }

    pub fn set_terminal(&mut self, id: RuleId, spec: MatchSpec) {
        let rule = &mut self.rules[id.as_index()];
        assert!(rule.kind.is_none(), "rule {} defined twice", rule.name);
        rule.kind = Some(PendingKind::Terminal(spec));
    }

    pub fn rule(&mut self, name: &str, body: RuleBody) -> RuleId {
        let id = self.placeholder(name);
        self.set_body(id, body);
        id
    }

    pub fn named_terminal(&mut self, name: &str, spec: MatchSpec) -> RuleId {
        let id = self.placeholder(name);
        self.set_terminal(id, spec);
        id
    }

    /// Helper rule for a group or repetition inside `owner`, named
    /// `owner§kindN`.
    pub fn generated(&mut self, owner: &str, kind: &str, body: RuleBody) -> RuleId {
        let key = format!("{owner}§{kind}");
        let n = self.generated_counts.entry(key.clone()).or_insert(0);
        *n += 1;
        let name = format!("{key}{n}");
        self.add(name, Some(PendingKind::NonTerminal(body)), true)
    }

    pub fn mark_skip(&mut self, id: RuleId) {
        if !self.skip.contains(&id) {
            self.skip.push(id);
        }
    }

    pub fn set_default_goal(&mut self, id: RuleId) {
        self.default_goal = Some(id);
    }

    pub fn finalize(mut self) -> Result<RuntimeRuleSet, CompileError> {
        if let Some(r) = self.rules.iter().find(|r| r.kind.is_none()) {
            return Err(CompileError::UnresolvedReference {
                name: r.name.clone(),
                context: "rule set".to_string(),
            });
        }

        let end_of_text = self.add(
            END_OF_TEXT_RULE_NAME.to_string(),
            Some(PendingKind::Terminal(MatchSpec::EndOfText)),
            true,
        );
        let skip_rules = self.skip.clone();
        let skip_goal = if skip_rules.is_empty() {
            None
        } else {
            let choice = self.add(
                SKIP_CHOICE_RULE_NAME.to_string(),
                Some(PendingKind::NonTerminal(RuleBody::ChoiceLongest(
                    skip_rules.iter().map(|r| vec![*r]).collect(),
                ))),
                true,
            );
            Some(self.add(
                SKIP_RULE_NAME.to_string(),
                Some(PendingKind::NonTerminal(RuleBody::Multi {
                    item: choice,
                    min: 1,
                    max: None,
                })),
                true,
            ))
        };

        let mut rules = Vec::with_capacity(self.rules.len());
        for (idx, r) in self.rules.into_iter().enumerate() {
            let kind = match r.kind {
                Some(PendingKind::Terminal(spec)) => {
                    let pattern = match &spec {
                        MatchSpec::Pattern(p) | MatchSpec::LongestPattern(p) => p.clone(),
                        _ => String::new(),
                    };
                    let m = Matcher::new(spec).map_err(|e| CompileError::InvalidPattern {
                        rule: r.name.clone(),
                        pattern,
                        message: e.to_string(),
                    })?;
                    RuleKind::Terminal(m)
                }
                Some(PendingKind::NonTerminal(body)) => RuleKind::NonTerminal(body),
                None => unreachable!(),
            };
            rules.push(RuntimeRule {
                id: RuleId(idx),
                name: r.name,
                kind,
                is_skip: false,
                is_generated: r.is_generated,
            });
        }

        // everything reachable from a skip rule is skip
        let mut queue: VecDeque<RuleId> = skip_goal.into_iter().collect();
        while let Some(id) = queue.pop_front() {
            let rule = &mut rules[id.as_index()];
            if rule.is_skip {
                continue;
            }
            rule.is_skip = true;
            if let Some(body) = rule.body() {
                queue.extend(body.children());
            }
        }

        Ok(RuntimeRuleSet {
            derived: DerivedSets::default(),
            rules,
            names: self.names,
            skip_rules,
            skip_goal,
            end_of_text,
            default_goal: self.default_goal,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminals_are_deduplicated() {
        let mut b = RuleSetBuilder::new();
        let x1 = b.literal("x");
        let x2 = b.literal("x");
        let p = b.pattern("x");
        assert_eq!(x1, x2);
        assert_ne!(x1, p);
        let a = b.rule("a", RuleBody::Concatenation(vec![x1, p]));
        b.set_default_goal(a);
        let rs = b.finalize().unwrap();
        assert_eq!(rs.find("'x'"), Some(x1));
        assert_eq!(rs.default_goal(), Some(a));
        assert_eq!(rs.scanner_matchables(), vec!["'x'", "\"x\""]);
        assert!(rs.skip_goal().is_none());
    }

    #[test]
    fn placeholder_must_be_defined() {
        let mut b = RuleSetBuilder::new();
        let c = b.placeholder("c");
        b.rule("a", RuleBody::Concatenation(vec![c]));
        match b.finalize() {
            Err(CompileError::UnresolvedReference { name, .. }) => assert_eq!(name, "c"),
            _ => panic!("expected unresolved reference"),
        }
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let mut b = RuleSetBuilder::new();
        b.named_terminal("BAD", MatchSpec::Pattern("(".into()));
        assert!(matches!(
            b.finalize(),
            Err(CompileError::InvalidPattern { rule, .. }) if rule == "BAD"
        ));
    }

    #[test]
    fn skip_rules_get_synthetic_goal() {
        let mut b = RuleSetBuilder::new();
        let ws = b.named_terminal("WS", MatchSpec::Pattern("\\s+".into()));
        let x = b.literal("x");
        b.mark_skip(ws);
        let rs = b.finalize().unwrap();
        let skip = rs.skip_goal().unwrap();
        assert_eq!(rs.name(skip), SKIP_RULE_NAME);
        assert!(rs.rule(ws).is_skip);
        assert!(!rs.rule(x).is_skip);
        assert_eq!(rs.skip_rules(), &[ws]);
    }

    #[test]
    fn generated_names_count_per_owner() {
        let mut b = RuleSetBuilder::new();
        let x = b.literal("x");
        let g1 = b.generated("a", "multi", RuleBody::Multi { item: x, min: 0, max: None });
        let g2 = b.generated("a", "multi", RuleBody::Multi { item: x, min: 1, max: None });
        let rs = b.finalize().unwrap();
        assert_eq!(rs.name(g1), "a§multi1");
        assert_eq!(rs.name(g2), "a§multi2");
        assert!(rs.rule(g1).is_generated);
    }
}
