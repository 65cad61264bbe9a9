use serde::{Deserialize, Serialize};

use crate::{api::RuleId, scanner::Matcher};

/// What a terminal matches.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchSpec {
    Literal(String),
    /// Alternations prefer the earliest alternative that matches.
    Pattern(String),
    /// Alternations prefer the longest match; used for `leaf` rules
    /// built from `|` choices.
    LongestPattern(String),
    EndOfText,
}

impl MatchSpec {
    /// Display form used for anonymous terminals and scanner matchables.
    pub fn display(&self) -> String {
        match self {
            MatchSpec::Literal(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            MatchSpec::Pattern(p) | MatchSpec::LongestPattern(p) => {
                format!("\"{}\"", p.replace('"', "\\\""))
            }
            MatchSpec::EndOfText => "<EOT>".to_string(),
        }
    }
}

/// Compiled body shape of a non-terminal.
///
/// Items of every shape are addressed by `(option, dot)`. For
/// repetitions the dot counts matched children; the parser saturates it
/// (see [`RuleBody::advance`]) so that unbounded repetitions produce a
/// finite set of items.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RuleBody {
    Concatenation(Vec<RuleId>),
    ChoiceLongest(Vec<Vec<RuleId>>),
    ChoicePriority(Vec<Vec<RuleId>>),
    Multi {
        item: RuleId,
        min: usize,
        max: Option<usize>,
    },
    SeparatedList {
        item: RuleId,
        separator: RuleId,
        min: usize,
        max: Option<usize>,
    },
    Empty,
}

impl RuleBody {
    pub fn num_options(&self) -> usize {
        match self {
            RuleBody::ChoiceLongest(alts) | RuleBody::ChoicePriority(alts) => alts.len(),
            _ => 1,
        }
    }

    pub fn is_choice(&self) -> bool {
        matches!(self, RuleBody::ChoiceLongest(_) | RuleBody::ChoicePriority(_))
    }

    pub fn is_list(&self) -> bool {
        matches!(self, RuleBody::Multi { .. } | RuleBody::SeparatedList { .. })
    }

    /// Items of one option, for shapes with a fixed item sequence.
    pub fn option_items(&self, option: usize) -> Option<&[RuleId]> {
        match self {
            RuleBody::Concatenation(items) => Some(items),
            RuleBody::ChoiceLongest(alts) | RuleBody::ChoicePriority(alts) => {
                alts.get(option).map(|a| &a[..])
            }
            _ => None,
        }
    }

    // dot of the first item past the mandatory part of a separated list
    fn list_threshold(min: usize) -> usize {
        std::cmp::max(2 * min, 2) - 1
    }

    /// The item expected after `dot` children, if any.
    pub fn item_at(&self, option: usize, dot: usize) -> Option<RuleId> {
        match self {
            RuleBody::Concatenation(_)
            | RuleBody::ChoiceLongest(_)
            | RuleBody::ChoicePriority(_) => self
                .option_items(option)
                .and_then(|items| items.get(dot).copied()),
            RuleBody::Multi { item, max, .. } => match max {
                Some(max) if dot >= *max => None,
                _ => Some(*item),
            },
            RuleBody::SeparatedList {
                item,
                separator,
                max,
                ..
            } => {
                let matched_items = (dot + 1) / 2;
                if let Some(max) = max {
                    if matched_items >= *max {
                        return None;
                    }
                }
                if dot % 2 == 0 {
                    Some(*item)
                } else {
                    Some(*separator)
                }
            }
            RuleBody::Empty => None,
        }
    }

    pub fn is_complete_at(&self, option: usize, dot: usize) -> bool {
        match self {
            RuleBody::Concatenation(_)
            | RuleBody::ChoiceLongest(_)
            | RuleBody::ChoicePriority(_) => self
                .option_items(option)
                .map(|items| dot == items.len())
                .unwrap_or(false),
            RuleBody::Multi { min, .. } => dot >= *min,
            RuleBody::SeparatedList { min, .. } => {
                if dot == 0 {
                    *min == 0
                } else {
                    dot % 2 == 1 && (dot + 1) / 2 >= *min
                }
            }
            RuleBody::Empty => dot == 0,
        }
    }

    /// Next dot for the recognizer. Unbounded repetitions saturate once
    /// the minimum is reached, which keeps the item set finite.
    pub fn advance(&self, dot: usize) -> usize {
        match self {
            RuleBody::Multi {
                min, max: None, ..
            } => std::cmp::min(dot + 1, *min),
            RuleBody::SeparatedList {
                min, max: None, ..
            } => {
                let t = Self::list_threshold(*min);
                if dot + 1 == t + 2 {
                    t
                } else {
                    dot + 1
                }
            }
            _ => dot + 1,
        }
    }

    /// Whether the child at `dot` may match the empty string. Repetitions
    /// only accept empty children while below their minimum, so a
    /// nullable item cannot repeat forever.
    pub fn allows_empty_child(&self, dot: usize) -> bool {
        match self {
            RuleBody::Multi { min, .. } => dot < *min,
            RuleBody::SeparatedList { min, .. } => *min > 0 && dot + 1 < 2 * *min,
            _ => true,
        }
    }

    /// Every rule referenced by this body.
    pub fn children(&self) -> Vec<RuleId> {
        match self {
            RuleBody::Concatenation(items) => items.clone(),
            RuleBody::ChoiceLongest(alts) | RuleBody::ChoicePriority(alts) => {
                alts.iter().flatten().copied().collect()
            }
            RuleBody::Multi { item, .. } => vec![*item],
            RuleBody::SeparatedList {
                item, separator, ..
            } => vec![*item, *separator],
            RuleBody::Empty => vec![],
        }
    }

    /// Dots that can be reached from 0 by `advance`, excluding dots that
    /// only repeat the pattern of an earlier one.
    pub fn distinct_dots(&self, option: usize) -> usize {
        match self {
            RuleBody::Multi { min, max, .. } => match max {
                Some(max) => *max + 1,
                None => *min + 1,
            },
            RuleBody::SeparatedList { min, max, .. } => match max {
                Some(max) => 2 * *max,
                None => Self::list_threshold(*min) + 2,
            },
            RuleBody::Empty => 1,
            _ => self.option_items(option).map(|i| i.len() + 1).unwrap_or(0),
        }
    }
}

#[derive(Clone, Debug)]
pub enum RuleKind {
    Terminal(Matcher),
    NonTerminal(RuleBody),
}

#[derive(Clone, Debug)]
pub struct RuntimeRule {
    pub id: RuleId,
    pub name: String,
    pub kind: RuleKind,
    /// Reachable from a `skip` rule.
    pub is_skip: bool,
    /// Helper rule introduced for a group or repetition; not user-named.
    pub is_generated: bool,
}

impl RuntimeRule {
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, RuleKind::Terminal(_))
    }

    pub fn body(&self) -> Option<&RuleBody> {
        match &self.kind {
            RuleKind::NonTerminal(b) => Some(b),
            RuleKind::Terminal(_) => None,
        }
    }

    pub fn matcher(&self) -> Option<&Matcher> {
        match &self.kind {
            RuleKind::Terminal(m) => Some(m),
            RuleKind::NonTerminal(_) => None,
        }
    }

    /// Anonymous literal terminals are named after their display form.
    pub fn is_literal(&self) -> bool {
        match &self.kind {
            RuleKind::Terminal(m) => matches!(m.spec(), MatchSpec::Literal(_)),
            _ => false,
        }
    }

    pub fn is_anonymous_terminal(&self) -> bool {
        match &self.kind {
            RuleKind::Terminal(m) => m.spec().display() == self.name,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(i: usize) -> RuleId {
        RuleId(i)
    }

    #[test]
    fn multi_saturates_at_min() {
        let body = RuleBody::Multi {
            item: r(1),
            min: 2,
            max: None,
        };
        assert_eq!(body.advance(0), 1);
        assert_eq!(body.advance(1), 2);
        assert_eq!(body.advance(2), 2);
        assert!(!body.is_complete_at(0, 1));
        assert!(body.is_complete_at(0, 2));
        assert_eq!(body.item_at(0, 2), Some(r(1)));
        assert!(body.allows_empty_child(1));
        assert!(!body.allows_empty_child(2));
    }

    #[test]
    fn bounded_multi() {
        let body = RuleBody::Multi {
            item: r(1),
            min: 0,
            max: Some(1),
        };
        assert!(body.is_complete_at(0, 0));
        assert!(body.is_complete_at(0, 1));
        assert_eq!(body.item_at(0, 1), None);
        assert_eq!(body.advance(0), 1);
    }

    #[test]
    fn separated_list_cycles_item_separator() {
        let body = RuleBody::SeparatedList {
            item: r(1),
            separator: r(2),
            min: 1,
            max: None,
        };
        assert_eq!(body.item_at(0, 0), Some(r(1)));
        assert!(body.is_complete_at(0, 1));
        assert_eq!(body.item_at(0, 1), Some(r(2)));
        assert_eq!(body.advance(1), 2);
        assert!(!body.is_complete_at(0, 2));
        assert_eq!(body.item_at(0, 2), Some(r(1)));
        // after an item following a separator we are back at dot 1
        assert_eq!(body.advance(2), 1);
    }

    #[test]
    fn separated_list_with_min_two() {
        let body = RuleBody::SeparatedList {
            item: r(1),
            separator: r(2),
            min: 2,
            max: None,
        };
        assert!(!body.is_complete_at(0, 1));
        assert!(body.is_complete_at(0, 3));
        assert_eq!(body.advance(3), 4);
        assert_eq!(body.advance(4), 3);
        assert!(body.allows_empty_child(2));
        assert!(!body.allows_empty_child(3));
    }

    #[test]
    fn bounded_separated_list() {
        let body = RuleBody::SeparatedList {
            item: r(1),
            separator: r(2),
            min: 0,
            max: Some(2),
        };
        assert!(body.is_complete_at(0, 0));
        assert_eq!(body.item_at(0, 1), Some(r(2)));
        assert_eq!(body.item_at(0, 3), None);
        assert!(body.is_complete_at(0, 3));
    }

    #[test]
    fn literal_display_escapes_quotes() {
        assert_eq!(MatchSpec::Literal("it's".into()).display(), "'it\\'s'");
        assert_eq!(MatchSpec::Pattern("[a-z]+".into()).display(), "\"[a-z]+\"");
    }
}
