// Scannerless Earley recognizer.
//
// A "row" is what the literature calls an Earley set; rows are keyed by
// byte offset rather than token index, since there is no token stream.
// Terminals are matched on demand at the offset of the row that expects
// them. After every terminal the parser runs the grammar's skip rules
// (whitespace, comments) as a nested parse and places the advanced items
// in the row after the skipped text.

use std::collections::BTreeSet;

use instant::Instant;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::{
    api::{ParserLimits, RuleId},
    interrupt::Interrupt,
    runtime::{RuleBody, RuntimeRuleSet},
};

const TRACE: bool = false;
const DEBUG: bool = true;

macro_rules! trace {
    ($($arg:tt)*) => {
        if cfg!(feature = "logging") && TRACE {
            eprintln!($($arg)*);
        }
    }
}

macro_rules! debug {
    ($($arg:tt)*) => {
        if cfg!(feature = "logging") && DEBUG {
            eprintln!($($arg)*);
        }
    }
}

const ITEMS_PER_POLL: usize = 1024;

#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ParserStats {
    pub rows: usize,
    pub all_items: usize,
    pub max_row_items: usize,
    pub scans: usize,
    pub tokens: usize,
    pub skip_runs: usize,
    pub compute_time_us: u64,
}

impl ParserStats {
    pub fn delta(&self, previous: &ParserStats) -> ParserStats {
        ParserStats {
            rows: self.rows - previous.rows,
            all_items: self.all_items - previous.all_items,
            max_row_items: self.max_row_items.max(previous.max_row_items),
            scans: self.scans - previous.scans,
            tokens: self.tokens - previous.tokens,
            skip_runs: self.skip_runs - previous.skip_runs,
            compute_time_us: self.compute_time_us - previous.compute_time_us,
        }
    }

    pub fn max(&self, other: &ParserStats) -> ParserStats {
        ParserStats {
            rows: self.rows.max(other.rows),
            all_items: self.all_items.max(other.all_items),
            max_row_items: self.max_row_items.max(other.max_row_items),
            scans: self.scans.max(other.scans),
            tokens: self.tokens.max(other.tokens),
            skip_runs: self.skip_runs.max(other.skip_runs),
            compute_time_us: self.compute_time_us.max(other.compute_time_us),
        }
    }
}

// An Earley item: `rule` (using body option `option`) has matched `dot`
// children starting at `origin`. For repetitions `dot` saturates, see
// `RuleBody::advance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Item {
    rule: RuleId,
    option: u32,
    dot: u32,
    origin: usize,
}

impl Item {
    fn new(rule: RuleId, option: usize, origin: usize) -> Self {
        Item {
            rule,
            option: option as u32,
            dot: 0,
            origin,
        }
    }

    fn advance_dot(&self, body: &RuleBody) -> Self {
        Item {
            dot: body.advance(self.dot as usize) as u32,
            ..*self
        }
    }
}

#[derive(Default)]
struct Row {
    items: Vec<Item>,
    seen: FxHashSet<Item>,
    // expected rule -> indices of items waiting for it
    waiting: FxHashMap<RuleId, Vec<usize>>,
    // rules that completed with zero width at this row
    completed_here: FxHashSet<RuleId>,
}

impl Row {
    fn add_unique(&mut self, item: Item) -> bool {
        if self.seen.insert(item) {
            self.items.push(item);
            true
        } else {
            false
        }
    }
}

/// Everything recorded about one recognizer run that the forest builder
/// needs. The skip sub-parses get their own charts.
pub(crate) struct ChartData {
    pub is_skip: bool,
    /// (rule, origin) -> end offsets, ascending
    pub completions: FxHashMap<(RuleId, usize), Vec<usize>>,
    /// (terminal, offset) -> (end of token, end of following skip)
    pub tokens: FxHashMap<(RuleId, usize), (usize, usize)>,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct SkipRun {
    pub end: usize,
    pub chart: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Abort {
    Interrupted,
    RowLimit { position: usize, items: usize },
}

pub(crate) struct Outcome {
    pub chart: usize,
    pub furthest: usize,
    pub expected: Vec<RuleId>,
    pub goal_ends: Vec<usize>,
}

pub(crate) struct EarleyParser<'a> {
    rules: &'a RuntimeRuleSet,
    text: &'a str,
    limits: &'a ParserLimits,
    interrupt: &'a dyn Interrupt,
    pub charts: Vec<ChartData>,
    pub skip_runs: FxHashMap<usize, Option<SkipRun>>,
    pub stats: ParserStats,
    scan_cache: FxHashMap<(RuleId, usize), Option<usize>>,
    items_since_poll: usize,
    t0: Instant,
}

impl<'a> EarleyParser<'a> {
    pub fn new(
        rules: &'a RuntimeRuleSet,
        text: &'a str,
        limits: &'a ParserLimits,
        interrupt: &'a dyn Interrupt,
    ) -> Self {
        EarleyParser {
            rules,
            text,
            limits,
            interrupt,
            charts: vec![],
            skip_runs: FxHashMap::default(),
            stats: ParserStats::default(),
            scan_cache: FxHashMap::default(),
            items_since_poll: 0,
            t0: Instant::now(),
        }
    }

    pub fn finish_stats(&mut self) {
        self.stats.compute_time_us = self.t0.elapsed().as_micros() as u64;
    }

    fn check_interrupt(&self) -> Result<(), Abort> {
        if self.interrupt.is_interrupted() {
            debug!("parse interrupted");
            Err(Abort::Interrupted)
        } else {
            Ok(())
        }
    }

    fn scan(&mut self, terminal: RuleId, pos: usize) -> Option<usize> {
        if let Some(r) = self.scan_cache.get(&(terminal, pos)) {
            return *r;
        }
        self.stats.scans += 1;
        let res = self
            .rules
            .rule(terminal)
            .matcher()
            .and_then(|m| m.match_at(self.text, pos));
        self.scan_cache.insert((terminal, pos), res);
        res
    }

    // Whether `rule` can start at `pos`: it is nullable or one of its
    // first terminals matches here.
    fn viable(&mut self, rule: RuleId, pos: usize) -> bool {
        let rules = self.rules;
        if rules.nullable(rule) {
            return true;
        }
        rules
            .first_terminals(rule)
            .iter()
            .any(|t| self.scan(*t, pos).is_some())
    }

    /// End of the longest run of skip rules starting at `pos`; `pos` itself
    /// when nothing is skipped.
    pub fn skip_end(&mut self, pos: usize) -> Result<usize, Abort> {
        if let Some(r) = self.skip_runs.get(&pos) {
            return Ok(r.map(|r| r.end).unwrap_or(pos));
        }
        let skip_goal = match self.rules.skip_goal() {
            Some(g) => g,
            None => return Ok(pos),
        };
        let mut run = None;
        if pos < self.text.len() && self.viable(skip_goal, pos) {
            self.stats.skip_runs += 1;
            let out = self.run(skip_goal, pos, false)?;
            run = out
                .goal_ends
                .iter()
                .copied()
                .filter(|e| *e > pos)
                .max()
                .map(|end| SkipRun {
                    end,
                    chart: out.chart,
                });
        }
        self.skip_runs.insert(pos, run);
        Ok(run.map(|r| r.end).unwrap_or(pos))
    }

    /// Recognizes `goal` starting at `start`. The chart is kept in
    /// `self.charts` for tree building.
    pub fn run(&mut self, goal: RuleId, start: usize, skip_enabled: bool) -> Result<Outcome, Abort> {
        let chart_idx = self.charts.len();
        self.charts.push(ChartData {
            is_skip: !skip_enabled,
            completions: FxHashMap::default(),
            tokens: FxHashMap::default(),
        });

        let rules = self.rules;
        let mut rows: FxHashMap<usize, Row> = FxHashMap::default();
        let mut pending = BTreeSet::new();

        let mut first = Row::default();
        if let Some(body) = rules.body(goal) {
            for o in 0..body.num_options() {
                first.add_unique(Item::new(goal, o, start));
            }
        }
        rows.insert(start, first);
        pending.insert(start);
        let mut furthest = start;

        while let Some(pos) = pending.pop_first() {
            self.check_interrupt()?;
            let mut row = rows.remove(&pos).unwrap_or_default();
            self.process_row(chart_idx, pos, &mut row, &rows)?;
            self.stats.rows += 1;
            self.stats.all_items += row.items.len();
            self.stats.max_row_items = self.stats.max_row_items.max(row.items.len());
            trace!("row {} ({} items)", pos, row.items.len());

            if !row.items.is_empty() {
                furthest = furthest.max(pos);
            }

            let mut terminals: Vec<RuleId> = row
                .waiting
                .keys()
                .copied()
                .filter(|r| rules.is_terminal(*r))
                .collect();
            terminals.sort();
            for t in terminals {
                let end = match self.scan(t, pos) {
                    Some(e) if e > pos => e,
                    _ => continue,
                };
                let next = if skip_enabled { self.skip_end(end)? } else { end };
                self.stats.tokens += 1;
                trace!("  token {} {}..{} next {}", rules.name(t), pos, end, next);
                self.charts[chart_idx].tokens.insert((t, pos), (end, next));
                let target = rows.entry(next).or_default();
                for wi in &row.waiting[&t] {
                    let it = row.items[*wi];
                    if let Some(body) = rules.body(it.rule) {
                        target.add_unique(it.advance_dot(body));
                    }
                }
                pending.insert(next);
            }
            rows.insert(pos, row);
        }

        let goal_ends = self.charts[chart_idx]
            .completions
            .get(&(goal, start))
            .cloned()
            .unwrap_or_default();
        let mut expected = match rows.get(&furthest) {
            Some(row) => self.expected_in_row(row),
            None => vec![],
        };
        if furthest < self.text.len() && goal_ends.contains(&furthest) {
            expected.push(rules.end_of_text());
        }
        Ok(Outcome {
            chart: chart_idx,
            furthest,
            expected,
            goal_ends,
        })
    }

    fn process_row(
        &mut self,
        chart_idx: usize,
        pos: usize,
        row: &mut Row,
        rows: &FxHashMap<usize, Row>,
    ) -> Result<(), Abort> {
        let rules = self.rules;
        let mut i = 0;
        while i < row.items.len() {
            let item = row.items[i];
            let item_idx = i;
            i += 1;

            self.items_since_poll += 1;
            if self.items_since_poll >= ITEMS_PER_POLL {
                self.items_since_poll = 0;
                self.check_interrupt()?;
            }

            let body = match rules.body(item.rule) {
                Some(b) => b,
                None => continue,
            };
            let option = item.option as usize;
            let dot = item.dot as usize;

            if body.is_complete_at(option, dot) {
                let ends = self.charts[chart_idx]
                    .completions
                    .entry((item.rule, item.origin))
                    .or_default();
                if ends.last() != Some(&pos) {
                    ends.push(pos);
                }
                if item.origin == pos {
                    if row.completed_here.insert(item.rule) {
                        let waiters = row.waiting.get(&item.rule).cloned().unwrap_or_default();
                        for wi in waiters {
                            let w = row.items[wi];
                            if let Some(wb) = rules.body(w.rule) {
                                if wb.allows_empty_child(w.dot as usize) {
                                    row.add_unique(w.advance_dot(wb));
                                }
                            }
                        }
                    }
                } else if let Some(origin_row) = rows.get(&item.origin) {
                    if let Some(waiters) = origin_row.waiting.get(&item.rule) {
                        for wi in waiters {
                            let w = origin_row.items[*wi];
                            if let Some(wb) = rules.body(w.rule) {
                                row.add_unique(w.advance_dot(wb));
                            }
                        }
                    }
                }
            }

            if let Some(next) = body.item_at(option, dot) {
                let first_wait = !row.waiting.contains_key(&next);
                row.waiting.entry(next).or_default().push(item_idx);
                if let Some(next_body) = rules.body(next) {
                    if first_wait && self.viable(next, pos) {
                        for o in 0..next_body.num_options() {
                            row.add_unique(Item::new(next, o, pos));
                        }
                    }
                    if row.completed_here.contains(&next) && body.allows_empty_child(dot) {
                        row.add_unique(item.advance_dot(body));
                    }
                }
            }

            if row.items.len() > self.limits.max_items_in_row {
                return Err(Abort::RowLimit {
                    position: pos,
                    items: row.items.len(),
                });
            }
        }
        Ok(())
    }

    // Terminals that would let some item of the row make progress.
    fn expected_in_row(&self, row: &Row) -> Vec<RuleId> {
        let rules = self.rules;
        let skip = rules.all_skip_terminals();
        let mut res = vec![];
        for item in &row.items {
            let body = match rules.body(item.rule) {
                Some(b) => b,
                None => continue,
            };
            if let Some(next) = body.item_at(item.option as usize, item.dot as usize) {
                for t in rules.first_terminals(next) {
                    if !res.contains(t)
                        && skip.binary_search(t).is_err()
                        && rules.grows_into_option(
                            *t,
                            item.rule,
                            item.option as usize,
                            item.dot as usize,
                        )
                    {
                        res.push(*t);
                    }
                }
            }
        }
        res.sort();
        res
    }
}
