use std::{fmt::Debug, sync::Arc};

use anyhow::{anyhow, Result};
use regex_automata::{
    meta,
    nfa::thompson::pikevm::{self, PikeVM},
    util::pool::Pool,
    Anchored, Input, MatchKind,
};

use crate::{
    api::RuleId,
    runtime::{MatchSpec, RuntimeRuleSet},
};

type CacheFn = Box<dyn Fn() -> pikevm::Cache + Send + Sync>;

/// Leftmost-longest matcher: the PikeVM with `MatchKind::All` keeps
/// running past the first match and reports the last, longest, end.
struct Longest {
    vm: PikeVM,
    caches: Pool<pikevm::Cache, CacheFn>,
}

#[derive(Clone)]
enum Compiled {
    Plain,
    First(meta::Regex),
    Longest(Arc<Longest>),
}

/// A terminal's match spec together with its compiled regex.
#[derive(Clone)]
pub struct Matcher {
    spec: MatchSpec,
    compiled: Compiled,
}

impl Debug for Matcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Matcher({})", self.spec.display())
    }
}

impl Matcher {
    pub fn new(spec: MatchSpec) -> Result<Self> {
        let compiled = match &spec {
            MatchSpec::Pattern(p) => {
                Compiled::First(meta::Regex::new(p).map_err(|e| anyhow!("{e}"))?)
            }
            MatchSpec::LongestPattern(p) => {
                let vm = PikeVM::builder()
                    .configure(PikeVM::config().match_kind(MatchKind::All))
                    .build(p)
                    .map_err(|e| anyhow!("{e}"))?;
                let for_cache = vm.clone();
                let create: CacheFn = Box::new(move || for_cache.create_cache());
                Compiled::Longest(Arc::new(Longest {
                    vm,
                    caches: Pool::new(create),
                }))
            }
            MatchSpec::Literal(_) | MatchSpec::EndOfText => Compiled::Plain,
        };
        Ok(Matcher { spec, compiled })
    }

    pub fn spec(&self) -> &MatchSpec {
        &self.spec
    }

    /// End offset of a match starting exactly at `offset`.
    ///
    /// Patterns see the whole of `text`, so look-around assertions such
    /// as `\b` at the start of a pattern consider the text before
    /// `offset`. Literals and patterns never match the empty string; only
    /// `EndOfText` is zero-width.
    pub fn match_at(&self, text: &str, offset: usize) -> Option<usize> {
        if offset > text.len() {
            return None;
        }
        let input = || Input::new(text).range(offset..).anchored(Anchored::Yes);
        let end = match (&self.spec, &self.compiled) {
            (MatchSpec::Literal(s), _) => {
                if !s.is_empty() && text[offset..].starts_with(s.as_str()) {
                    Some(offset + s.len())
                } else {
                    None
                }
            }
            (MatchSpec::EndOfText, _) => return (offset == text.len()).then_some(offset),
            (_, Compiled::First(rx)) => rx.search(&input()).map(|m| m.end()),
            (_, Compiled::Longest(l)) => {
                let mut cache = l.caches.get();
                l.vm.find(&mut cache, input()).map(|m| m.end())
            }
            (_, Compiled::Plain) => None,
        };
        end.filter(|e| *e > offset)
    }
}

/// The text matched by `matcher` at `offset`, if any.
pub fn match_at<'a>(text: &'a str, offset: usize, matcher: &Matcher) -> Option<&'a str> {
    matcher.match_at(text, offset).map(|end| &text[offset..end])
}

/// A token found by [`scan_all`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScannedToken {
    /// `None` for text no terminal matches.
    pub rule: Option<RuleId>,
    pub start: usize,
    pub end: usize,
}

/// Tokenizes `text` without a grammar context: at every offset the longest
/// match among all terminals wins, with literals preferred on equal length.
/// Text no terminal matches becomes a single-character token.
///
/// Used to style a document that does not currently parse.
pub fn scan_all(rules: &RuntimeRuleSet, text: &str) -> Vec<ScannedToken> {
    let terminals: Vec<_> = rules
        .terminals()
        .filter_map(|r| r.matcher().map(|m| (r.id, r.is_literal(), m)))
        .filter(|(_, _, m)| !matches!(m.spec(), MatchSpec::EndOfText))
        .collect();
    let mut res = vec![];
    let mut pos = 0;
    while pos < text.len() {
        let mut best: Option<(RuleId, usize, bool)> = None;
        for (id, is_literal, m) in terminals.iter() {
            if let Some(end) = m.match_at(text, pos) {
                let better = match best {
                    None => true,
                    Some((_, best_end, best_literal)) => {
                        end > best_end || (end == best_end && *is_literal && !best_literal)
                    }
                };
                if better {
                    best = Some((*id, end, *is_literal));
                }
            }
        }
        match best {
            Some((id, end, _)) => {
                res.push(ScannedToken {
                    rule: Some(id),
                    start: pos,
                    end,
                });
                pos = end;
            }
            None => {
                let len = text[pos..].chars().next().map(|c| c.len_utf8()).unwrap_or(1);
                res.push(ScannedToken {
                    rule: None,
                    start: pos,
                    end: pos + len,
                });
                pos += len;
            }
        }
    }
    res
}
