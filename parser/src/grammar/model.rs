use crate::api::InputLocation;

/// Right-hand side of a grammar rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RuleItem {
    Empty,
    Terminal {
        value: String,
        is_pattern: bool,
    },
    NonTerminal(String),
    /// `Grammar::rule`, a rule of another grammar of the same definition.
    Embedded {
        grammar: String,
        rule: String,
    },
    Concatenation(Vec<RuleItem>),
    ChoiceLongest(Vec<RuleItem>),
    ChoicePriority(Vec<RuleItem>),
    Group(Box<RuleItem>),
    Multi {
        min: usize,
        max: Option<usize>,
        item: Box<RuleItem>,
    },
    SeparatedList {
        min: usize,
        max: Option<usize>,
        item: Box<RuleItem>,
        separator: Box<RuleItem>,
    },
}

impl RuleItem {
    pub fn literal(s: &str) -> Self {
        RuleItem::Terminal {
            value: s.to_string(),
            is_pattern: false,
        }
    }

    pub fn pattern(p: &str) -> Self {
        RuleItem::Terminal {
            value: p.to_string(),
            is_pattern: true,
        }
    }

    pub fn non_terminal(name: &str) -> Self {
        RuleItem::NonTerminal(name.to_string())
    }

    pub fn optional(item: RuleItem) -> Self {
        Self::repeat(item, 0, Some(1))
    }

    pub fn zero_or_more(item: RuleItem) -> Self {
        Self::repeat(item, 0, None)
    }

    pub fn one_or_more(item: RuleItem) -> Self {
        Self::repeat(item, 1, None)
    }

    pub fn repeat(item: RuleItem, min: usize, max: Option<usize>) -> Self {
        RuleItem::Multi {
            min,
            max,
            item: Box::new(item),
        }
    }

    pub fn separated(item: RuleItem, separator: RuleItem, min: usize, max: Option<usize>) -> Self {
        RuleItem::SeparatedList {
            min,
            max,
            item: Box::new(item),
            separator: Box::new(separator),
        }
    }

    /// Names of the rules referenced directly or through nested items.
    pub fn references(&self) -> Vec<&str> {
        let mut res = vec![];
        let mut stack = vec![self];
        while let Some(item) = stack.pop() {
            match item {
                RuleItem::NonTerminal(n) => res.push(n.as_str()),
                RuleItem::Concatenation(v)
                | RuleItem::ChoiceLongest(v)
                | RuleItem::ChoicePriority(v) => stack.extend(v.iter()),
                RuleItem::Group(i) | RuleItem::Multi { item: i, .. } => stack.push(i),
                RuleItem::SeparatedList {
                    item, separator, ..
                } => {
                    stack.push(item);
                    stack.push(separator);
                }
                RuleItem::Empty | RuleItem::Terminal { .. } | RuleItem::Embedded { .. } => {}
            }
        }
        res
    }
}

#[derive(Clone, Debug)]
pub struct GrammarRule {
    pub name: String,
    pub is_override: bool,
    pub is_skip: bool,
    pub is_leaf: bool,
    pub rhs: RuleItem,
    pub location: Option<InputLocation>,
}

impl GrammarRule {
    pub fn new(name: &str, rhs: RuleItem) -> Self {
        GrammarRule {
            name: name.to_string(),
            is_override: false,
            is_skip: false,
            is_leaf: false,
            rhs,
            location: None,
        }
    }

    pub fn skip(mut self) -> Self {
        self.is_skip = true;
        self
    }

    pub fn leaf(mut self) -> Self {
        self.is_leaf = true;
        self
    }

    pub fn overriding(mut self) -> Self {
        self.is_override = true;
        self
    }

    /// Same body and modifiers; the location is ignored.
    pub fn same_shape(&self, other: &GrammarRule) -> bool {
        self.rhs == other.rhs && self.is_skip == other.is_skip && self.is_leaf == other.is_leaf
    }
}

#[derive(Clone, Debug, Default)]
pub struct Grammar {
    pub namespace: String,
    pub name: String,
    /// Names of inherited grammars, simple or qualified.
    pub extends: Vec<String>,
    pub rules: Vec<GrammarRule>,
}

impl Grammar {
    pub fn new(namespace: &str, name: &str) -> Self {
        Grammar {
            namespace: namespace.to_string(),
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn qualified_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    pub fn rule(mut self, rule: GrammarRule) -> Self {
        self.rules.push(rule);
        self
    }
}

/// The content of one grammar text: a namespace and its grammars.
#[derive(Clone, Debug, Default)]
pub struct GrammarDefinition {
    pub namespace: String,
    pub grammars: Vec<Grammar>,
}

impl GrammarDefinition {
    /// Looks up a grammar by simple or qualified name.
    pub fn find(&self, name: &str) -> Option<&Grammar> {
        self.grammars
            .iter()
            .find(|g| g.name == name || g.qualified_name() == name)
    }

    /// The grammar a processor uses when none is named: the last one.
    pub fn default_grammar(&self) -> Option<&Grammar> {
        self.grammars.last()
    }
}
