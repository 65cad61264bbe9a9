// Compiles a grammar model into a runtime rule set.
//
// Rules of the goal grammar keep their names. Rules reached through
// `Grammar::rule` are compiled into a scope prefixed with `Grammar::`, so
// an embedded grammar never clashes with the grammar that embeds it.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    api::RuleId,
    error::CompileError,
    grammar::{parse_definition, Grammar, GrammarDefinition, GrammarRule, RuleItem},
    runtime::{MatchSpec, RuleBody, RuleSetBuilder, RuntimeRuleSet},
};

type Result<T> = std::result::Result<T, CompileError>;

/// Parses and compiles a grammar text; the last grammar is the goal.
pub fn compile_grammar_text(text: &str) -> Result<RuntimeRuleSet> {
    let def = parse_definition(text)?;
    compile(&def, None)
}

/// Compiles `goal_grammar` (by simple or qualified name), or the last
/// grammar of the definition.
pub fn compile(def: &GrammarDefinition, goal_grammar: Option<&str>) -> Result<RuntimeRuleSet> {
    let goal = match goal_grammar {
        Some(name) => def.find(name),
        None => def.default_grammar(),
    }
    .ok_or_else(|| CompileError::UnresolvedReference {
        name: goal_grammar.unwrap_or("<default>").to_string(),
        context: format!("namespace {}", def.namespace),
    })?;

    let mut c = Compiler {
        def,
        builder: RuleSetBuilder::new(),
        scopes: vec![],
        scope_ids: FxHashMap::default(),
        effective: FxHashMap::default(),
        extends_in_progress: FxHashSet::default(),
        leaf_in_progress: FxHashSet::default(),
        leaf_longest: false,
    };
    c.execute(goal)?;
    c.builder.finalize()
}

struct Scope {
    grammar: String,
    prefix: String,
    rules: Arc<Vec<GrammarRule>>,
    index: FxHashMap<String, usize>,
}

struct Compiler<'a> {
    def: &'a GrammarDefinition,
    builder: RuleSetBuilder,
    scopes: Vec<Scope>,
    scope_ids: FxHashMap<String, usize>,
    effective: FxHashMap<String, Arc<Vec<GrammarRule>>>,
    extends_in_progress: FxHashSet<String>,
    leaf_in_progress: FxHashSet<(usize, String)>,
    /// Set while compiling a leaf that contains a `|` choice.
    leaf_longest: bool,
}

impl<'a> Compiler<'a> {
    fn execute(&mut self, goal: &'a Grammar) -> Result<()> {
        let scope = self.scope(goal, "")?;
        let rules = Arc::clone(&self.scopes[scope].rules);
        for r in rules.iter() {
            self.do_rule(scope, &r.name)?;
        }
        let is_goal = |r: &&GrammarRule| !r.is_skip && !r.is_leaf;
        let default = goal
            .rules
            .iter()
            .find(is_goal)
            .or_else(|| rules.iter().find(is_goal));
        if let Some(r) = default {
            let id = self.do_rule(scope, &r.name)?;
            self.builder.set_default_goal(id);
        }
        Ok(())
    }

    fn find_grammar(&self, name: &str, context: &str) -> Result<&'a Grammar> {
        self.def
            .find(name)
            .ok_or_else(|| CompileError::UnresolvedReference {
                name: name.to_string(),
                context: context.to_string(),
            })
    }

    /// Rules of `g` after applying `extends`: inherited rules first, in
    /// the order of the base grammars, then the grammar's own rules.
    fn effective_rules(&mut self, g: &'a Grammar) -> Result<Arc<Vec<GrammarRule>>> {
        let key = g.qualified_name();
        if let Some(r) = self.effective.get(&key) {
            return Ok(Arc::clone(r));
        }
        if !self.extends_in_progress.insert(key.clone()) {
            return Err(CompileError::CircularReference { name: key });
        }

        let mut rules: Vec<GrammarRule> = vec![];
        let mut index: FxHashMap<String, usize> = FxHashMap::default();
        for base_name in &g.extends {
            let base = self.find_grammar(base_name, &format!("extends of grammar {}", g.name))?;
            for r in self.effective_rules(base)?.iter() {
                match index.get(&r.name) {
                    Some(&i) if !rules[i].same_shape(r) => {
                        return Err(CompileError::AmbiguousGrammarDefinition {
                            name: r.name.clone(),
                            detail: format!(
                                "is inherited by grammar {} with two different definitions",
                                g.name
                            ),
                        })
                    }
                    Some(_) => {}
                    None => {
                        index.insert(r.name.clone(), rules.len());
                        rules.push(r.clone());
                    }
                }
            }
        }

        let mut own: FxHashSet<&str> = FxHashSet::default();
        for r in &g.rules {
            if !own.insert(&r.name) {
                return Err(CompileError::AmbiguousGrammarDefinition {
                    name: r.name.clone(),
                    detail: format!("is defined more than once in grammar {}", g.name),
                });
            }
            match index.get(&r.name) {
                Some(&i) => {
                    if !r.is_override && !rules[i].same_shape(r) {
                        return Err(CompileError::AmbiguousGrammarDefinition {
                            name: r.name.clone(),
                            detail: format!(
                                "redefines an inherited rule in grammar {} without 'override'",
                                g.name
                            ),
                        });
                    }
                    rules[i] = r.clone();
                }
                None => {
                    index.insert(r.name.clone(), rules.len());
                    rules.push(r.clone());
                }
            }
        }

        self.extends_in_progress.remove(&key);
        let rules = Arc::new(rules);
        self.effective.insert(key, Arc::clone(&rules));
        Ok(rules)
    }

    fn scope(&mut self, g: &'a Grammar, prefix: &str) -> Result<usize> {
        let key = g.qualified_name();
        if let Some(id) = self.scope_ids.get(&key) {
            return Ok(*id);
        }
        let rules = self.effective_rules(g)?;
        let index = rules
            .iter()
            .enumerate()
            .map(|(i, r)| (r.name.clone(), i))
            .collect();
        let id = self.scopes.len();
        self.scopes.push(Scope {
            grammar: g.name.clone(),
            prefix: prefix.to_string(),
            rules: Arc::clone(&rules),
            index,
        });
        self.scope_ids.insert(key, id);
        // skip rules of every compiled grammar apply everywhere
        for r in rules.iter().filter(|r| r.is_skip) {
            self.do_rule(id, &r.name)?;
        }
        Ok(id)
    }

    fn lookup_rule(&self, scope: usize, name: &str) -> Result<GrammarRule> {
        let s = &self.scopes[scope];
        match s.index.get(name) {
            Some(i) => Ok(s.rules[*i].clone()),
            None => Err(CompileError::UnresolvedReference {
                name: name.to_string(),
                context: format!("grammar {}", s.grammar),
            }),
        }
    }

    fn do_rule(&mut self, scope: usize, name: &str) -> Result<RuleId> {
        let full = format!("{}{}", self.scopes[scope].prefix, name);
        if let Some(id) = self.builder.lookup(&full) {
            return Ok(id);
        }
        let rule = self.lookup_rule(scope, name)?;
        let id = if rule.is_leaf {
            self.leaf_longest = false;
            let rx = self.leaf_reference(scope, name)?;
            check_pattern(&full, &rx)?;
            let spec = if self.leaf_longest {
                MatchSpec::LongestPattern(rx)
            } else {
                MatchSpec::Pattern(rx)
            };
            self.builder.named_terminal(&full, spec)
        } else {
            let id = self.builder.placeholder(&full);
            let body = self.body(scope, &full, &rule.rhs)?;
            self.builder.set_body(id, body);
            id
        };
        if rule.is_skip {
            self.builder.mark_skip(id);
        }
        Ok(id)
    }

    fn embedded_scope(&mut self, grammar: &str, owner: &str) -> Result<usize> {
        let g = self.find_grammar(grammar, &format!("rule {owner}"))?;
        let prefix = format!("{}::", g.name);
        self.scope(g, &prefix)
    }

    fn items(&mut self, scope: usize, owner: &str, item: &RuleItem) -> Result<Vec<RuleId>> {
        match item {
            RuleItem::Concatenation(items) => items
                .iter()
                .map(|i| self.item(scope, owner, i))
                .collect(),
            RuleItem::Empty => Ok(vec![]),
            other => Ok(vec![self.item(scope, owner, other)?]),
        }
    }

    fn body(&mut self, scope: usize, owner: &str, item: &RuleItem) -> Result<RuleBody> {
        let body = match item {
            RuleItem::Empty => RuleBody::Empty,
            RuleItem::Group(inner) => self.body(scope, owner, inner)?,
            RuleItem::ChoiceLongest(alts) => RuleBody::ChoiceLongest(
                alts.iter()
                    .map(|a| self.items(scope, owner, a))
                    .collect::<Result<_>>()?,
            ),
            RuleItem::ChoicePriority(alts) => RuleBody::ChoicePriority(
                alts.iter()
                    .map(|a| self.items(scope, owner, a))
                    .collect::<Result<_>>()?,
            ),
            RuleItem::Multi { min, max, item } => RuleBody::Multi {
                item: self.item(scope, owner, item)?,
                min: *min,
                max: *max,
            },
            RuleItem::SeparatedList {
                min,
                max,
                item,
                separator,
            } => RuleBody::SeparatedList {
                item: self.item(scope, owner, item)?,
                separator: self.item(scope, owner, separator)?,
                min: *min,
                max: *max,
            },
            RuleItem::Concatenation(_)
            | RuleItem::Terminal { .. }
            | RuleItem::NonTerminal(_)
            | RuleItem::Embedded { .. } => {
                RuleBody::Concatenation(self.items(scope, owner, item)?)
            }
        };
        Ok(body)
    }

    fn item(&mut self, scope: usize, owner: &str, item: &RuleItem) -> Result<RuleId> {
        let kind = match item {
            RuleItem::Terminal { value, is_pattern } => {
                return if *is_pattern {
                    check_pattern(owner, value)?;
                    Ok(self.builder.pattern(value))
                } else {
                    Ok(self.builder.literal(value))
                };
            }
            RuleItem::NonTerminal(name) => return self.do_rule(scope, name),
            RuleItem::Embedded { grammar, rule } => {
                let s = self.embedded_scope(grammar, owner)?;
                return self.do_rule(s, rule);
            }
            RuleItem::Group(_) => "group",
            RuleItem::Multi { .. } => "multi",
            RuleItem::SeparatedList { .. } => "sList",
            RuleItem::Concatenation(_) => "concat",
            RuleItem::ChoiceLongest(_) | RuleItem::ChoicePriority(_) => "choice",
            RuleItem::Empty => "empty",
        };
        let body = self.body(scope, owner, item)?;
        Ok(self.builder.generated(owner, kind, body))
    }

    /// Single regex equivalent to a `leaf` rule body.
    fn leaf_regex(&mut self, scope: usize, item: &RuleItem) -> Result<String> {
        let rx = match item {
            RuleItem::Empty => String::new(),
            RuleItem::Terminal { value, is_pattern } => {
                if *is_pattern {
                    format!("(?:{value})")
                } else {
                    regex::escape(value)
                }
            }
            RuleItem::NonTerminal(name) => self.leaf_reference(scope, name)?,
            RuleItem::Embedded { grammar, rule } => {
                let s = self.embedded_scope(grammar, rule)?;
                self.leaf_reference(s, rule)?
            }
            RuleItem::Concatenation(items) => items
                .iter()
                .map(|i| self.leaf_regex(scope, i))
                .collect::<Result<Vec<_>>>()?
                .concat(),
            RuleItem::ChoiceLongest(alts) | RuleItem::ChoicePriority(alts) => {
                if alts.len() > 1 && matches!(item, RuleItem::ChoiceLongest(_)) {
                    self.leaf_longest = true;
                }
                format!(
                    "(?:{})",
                    alts.iter()
                        .map(|i| self.leaf_regex(scope, i))
                        .collect::<Result<Vec<_>>>()?
                        .join("|")
                )
            }
            RuleItem::Group(inner) => format!("(?:{})", self.leaf_regex(scope, inner)?),
            RuleItem::Multi { min, max, item } => {
                format!("(?:{}){}", self.leaf_regex(scope, item)?, quantifier(*min, *max))
            }
            RuleItem::SeparatedList {
                min,
                max,
                item,
                separator,
            } => {
                let i = self.leaf_regex(scope, item)?;
                let s = self.leaf_regex(scope, separator)?;
                match max {
                    Some(0) => String::new(),
                    _ => {
                        let rest = quantifier(
                            min.saturating_sub(1),
                            max.map(|m| m.saturating_sub(1)),
                        );
                        let list = format!("(?:{i})(?:(?:{s})(?:{i})){rest}");
                        if *min == 0 {
                            format!("(?:{list})?")
                        } else {
                            list
                        }
                    }
                }
            }
        };
        Ok(rx)
    }

    fn leaf_reference(&mut self, scope: usize, name: &str) -> Result<String> {
        let key = (scope, name.to_string());
        if !self.leaf_in_progress.insert(key.clone()) {
            return Err(CompileError::CircularReference {
                name: format!("{}{}", self.scopes[scope].prefix, name),
            });
        }
        let rule = self.lookup_rule(scope, name)?;
        let rx = self.leaf_regex(scope, &rule.rhs)?;
        self.leaf_in_progress.remove(&key);
        Ok(format!("(?:{rx})"))
    }
}

fn quantifier(min: usize, max: Option<usize>) -> String {
    match (min, max) {
        (0, None) => "*".to_string(),
        (1, None) => "+".to_string(),
        (0, Some(1)) => "?".to_string(),
        (m, None) => format!("{{{m},}}"),
        (m, Some(n)) if m == n => format!("{{{m}}}"),
        (m, Some(n)) => format!("{{{m},{n}}}"),
    }
}

fn check_pattern(rule: &str, pattern: &str) -> Result<()> {
    regex::Regex::new(pattern)
        .map(|_| ())
        .map_err(|e| CompileError::InvalidPattern {
            rule: rule.to_string(),
            pattern: pattern.to_string(),
            message: e.to_string(),
        })
}
