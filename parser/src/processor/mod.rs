mod completion;
mod pipeline;
mod semantic;
mod syntax;

use std::sync::Arc;

pub use completion::{complete, CompletionItem, CompletionKind};
pub use pipeline::{process, process_code_complete};
pub use semantic::{
    analyse, ContextProvider, ContextSimple, CrossReferenceModel, ReferenceDefinition,
    ResolvedReference, SemanticResult,
};
pub use syntax::{
    reduce, AsmElement, AsmProperty, AsmValue, ReduceContext, Reducer, ReducerRegistry,
};

use anyhow::Result;

use crate::{
    api::{LanguageIdentity, LanguageIssue, ParseOptions, ParserLimits},
    compiler::compile_grammar_text,
    earley::{self, ParseResult, ParserStats},
    infoln,
    interrupt::Interrupt,
    runtime::RuntimeRuleSet,
    sppt::SharedPackedParseTree,
    warn, Logger,
};

/// A compiled language: its rule set plus what the later pipeline stages
/// need. Cloning is cheap and gives the clone a fresh log buffer.
#[derive(Clone, Debug)]
pub struct LanguageProcessor {
    pub logger: Logger,
    pub limits: ParserLimits,
    identity: LanguageIdentity,
    rules: Arc<RuntimeRuleSet>,
    reducers: Arc<ReducerRegistry>,
    cross_reference: Arc<CrossReferenceModel>,
    last_stats: ParserStats,
    max_stats: ParserStats,
}

impl LanguageProcessor {
    pub fn new(
        identity: LanguageIdentity,
        rules: Arc<RuntimeRuleSet>,
        logger: Logger,
        limits: ParserLimits,
    ) -> Self {
        LanguageProcessor {
            logger,
            limits,
            identity,
            rules,
            reducers: Arc::new(ReducerRegistry::default()),
            cross_reference: Arc::new(CrossReferenceModel::default()),
            last_stats: ParserStats::default(),
            max_stats: ParserStats::default(),
        }
    }

    /// Compiles `grammar` and, when given, the cross-reference text.
    pub fn from_grammar(
        identity: LanguageIdentity,
        grammar: &str,
        cross_reference: Option<&str>,
        mut logger: Logger,
        limits: ParserLimits,
    ) -> std::result::Result<Self, LanguageIssue> {
        let t0 = instant::Instant::now();
        let rules = compile_grammar_text(grammar).map_err(|e| e.to_issue())?;
        let xref = match cross_reference {
            Some(text) if !text.trim().is_empty() => CrossReferenceModel::parse(text)?,
            _ => CrossReferenceModel::default(),
        };
        crate::loginfo!(
            logger,
            "compiled {}: {} rules, {} skip rules in {:?}",
            identity,
            rules.len(),
            rules.skip_rules().len(),
            t0.elapsed()
        );
        let mut p = Self::new(identity, Arc::new(rules), logger, limits);
        p.cross_reference = Arc::new(xref);
        Ok(p)
    }

    pub fn identity(&self) -> &LanguageIdentity {
        &self.identity
    }

    pub fn rules(&self) -> &Arc<RuntimeRuleSet> {
        &self.rules
    }

    pub fn cross_reference(&self) -> &CrossReferenceModel {
        &self.cross_reference
    }

    pub fn scanner_matchables(&self) -> Vec<String> {
        self.rules.scanner_matchables()
    }

    pub fn last_stats(&self) -> &ParserStats {
        &self.last_stats
    }

    pub fn max_stats(&self) -> &ParserStats {
        &self.max_stats
    }

    /// Overrides the default reduction of `rule_name` in syntax analysis.
    pub fn register_reducer<F>(&mut self, rule_name: &str, f: F)
    where
        F: Fn(&ReduceContext, Vec<AsmValue>) -> Result<AsmValue> + Send + Sync + 'static,
    {
        if self.rules.find(rule_name).is_none() {
            warn!(self, "reducer registered for unknown rule {}", rule_name);
        }
        Arc::make_mut(&mut self.reducers).register(rule_name, f);
    }

    pub fn parse(
        &mut self,
        text: &str,
        options: &ParseOptions,
        interrupt: &dyn Interrupt,
    ) -> ParseResult {
        let r = earley::parse(&self.rules, text, options, &self.limits, interrupt);
        self.last_stats = r.stats.clone();
        self.max_stats = self.max_stats.max(&r.stats);
        infoln!(
            self,
            "parse {} ({} bytes): {}; {} rows, {} items, {} tokens, {}us",
            self.identity,
            text.len(),
            if r.is_success() {
                "ok"
            } else if r.is_interrupted() {
                "interrupted"
            } else {
                "failed"
            },
            r.stats.rows,
            r.stats.all_items,
            r.stats.tokens,
            r.stats.compute_time_us
        );
        for issue in r.issues.iter().filter(|i| !i.is_error()) {
            crate::debugln!(self, "{:?}: {}", issue.code, issue.message);
        }
        r
    }

    pub fn syntax_analysis(
        &mut self,
        tree: &SharedPackedParseTree,
    ) -> std::result::Result<AsmValue, LanguageIssue> {
        let r = reduce(tree, &self.reducers);
        if let Err(e) = &r {
            infoln!(self, "syntax analysis failed: {}", e.message);
        }
        r
    }

    pub fn semantic_analysis(
        &mut self,
        asm: &AsmValue,
        text: &str,
        context: Option<&dyn ContextProvider>,
    ) -> SemanticResult {
        let r = analyse(&self.cross_reference, asm, text, context);
        infoln!(
            self,
            "semantic analysis: {} references resolved, {} issues",
            r.references.len(),
            r.issues.len()
        );
        r
    }

    pub fn complete(
        &mut self,
        text: &str,
        position: usize,
        goal_rule: Option<String>,
        interrupt: &dyn Interrupt,
    ) -> std::result::Result<Vec<CompletionItem>, LanguageIssue> {
        let r = complete(
            &self.rules,
            text,
            position,
            goal_rule,
            &self.limits,
            interrupt,
        );
        if let Ok(items) = &r {
            infoln!(self, "{} completion items at {}", items.len(), position);
        }
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{api::IssueCode, interrupt::NoInterrupt};

    const GRAMMAR: &str = "namespace t grammar G { skip leaf WS = \"\\s+\" ; s = 'a' NAME ; leaf NAME = \"[a-z]+\" ; }";

    #[test]
    fn compile_failure_is_issue() {
        let err = LanguageProcessor::from_grammar(
            LanguageIdentity::new("bad"),
            "namespace t grammar G { a = 'x' ; a = 'y' ; }",
            None,
            Logger::new(0, 0),
            ParserLimits::default(),
        )
        .err()
        .unwrap();
        assert_eq!(err.code, IssueCode::AmbiguousGrammarDefinition);
    }

    #[test]
    fn logs_into_buffer() {
        let mut p = LanguageProcessor::from_grammar(
            LanguageIdentity::new("t"),
            GRAMMAR,
            None,
            Logger::new(2, 0),
            ParserLimits::default(),
        )
        .unwrap();
        assert!(p.logger.get_and_clear_logs().contains("compiled t"));
        let r = p.parse("a bc", &ParseOptions::default(), &NoInterrupt);
        assert!(r.is_success());
        assert!(p.logger.get_and_clear_logs().contains("parse t (4 bytes): ok"));
        assert_eq!(p.last_stats().tokens, r.stats.tokens);

        let copy = p.clone();
        assert!(copy.logger.get_buffer().is_empty());
    }

    #[test]
    fn reducer_for_unknown_rule_warns() {
        let mut p = LanguageProcessor::from_grammar(
            LanguageIdentity::new("t"),
            GRAMMAR,
            None,
            Logger::new(1, 0),
            ParserLimits::default(),
        )
        .unwrap();
        p.register_reducer("nope", |_, _| Ok(AsmValue::Nothing));
        assert!(p.logger.get_and_clear_logs().contains("Warning: reducer registered"));
    }
}
