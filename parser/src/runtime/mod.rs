mod derived;
mod rule;
mod rule_set;

pub use rule::{MatchSpec, RuleBody, RuleKind, RuntimeRule};
pub use rule_set::{
    RuleSetBuilder, RuntimeRuleSet, END_OF_TEXT_RULE_NAME, SKIP_CHOICE_RULE_NAME, SKIP_RULE_NAME,
};
