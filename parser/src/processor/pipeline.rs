use std::panic::AssertUnwindSafe;

use crate::{
    api::{
        EndPointIdentity, IssuePhase, LanguageIdentity, LanguageIssue, MessageStatus, ParseOptions,
    },
    interrupt::Interrupt,
    panic_utils::catch_stage,
    scanner::scan_all,
    service::messages::{ProcessOptions, Response, ResponseHeader},
    style::{tree_tokens, StyleHandler, StyleModel},
};

use super::{ContextProvider, LanguageProcessor};

struct Stages<'a> {
    endpoint: &'a EndPointIdentity,
    language_id: LanguageIdentity,
    interrupt: &'a dyn Interrupt,
}

impl Stages<'_> {
    fn header(&self, status: MessageStatus) -> ResponseHeader {
        ResponseHeader::new(self.endpoint, &self.language_id, status)
    }

    // The `Interrupted` issue for `phase`, if the request was interrupted.
    fn interrupted(&self, phase: IssuePhase) -> Option<LanguageIssue> {
        if self.interrupt.is_interrupted() {
            let mut issue = LanguageIssue::interrupted(&self.interrupt.reason());
            issue.phase = phase;
            Some(issue)
        } else {
            None
        }
    }

    fn failure(&self, issues: Vec<LanguageIssue>) -> ResponseHeader {
        self.header(MessageStatus::Failure).with_issues(issues)
    }
}

/// Runs every requested stage of one `Process` request, handing each
/// response to `emit` as soon as it is ready.
///
/// Stages run in order: Parse, LineTokens, SyntaxAnalysis,
/// SemanticAnalysis. The interrupt is checked before each stage starts;
/// once it fires the stage reports `Failure` and nothing further is
/// emitted. Later stages are skipped when the one they depend on failed.
pub fn process(
    processor: &mut LanguageProcessor,
    style: Option<&StyleHandler>,
    endpoint: &EndPointIdentity,
    text: &str,
    options: &ProcessOptions,
    interrupt: &dyn Interrupt,
    emit: &mut dyn FnMut(Response),
) {
    let st = Stages {
        endpoint,
        language_id: processor.identity().clone(),
        interrupt,
    };

    // Parse
    if let Some(issue) = st.interrupted(IssuePhase::Parse) {
        emit(Response::Parse {
            header: st.failure(vec![issue]),
            tree: None,
            stats: None,
        });
        return;
    }
    emit(Response::Parse {
        header: st.header(MessageStatus::Start),
        tree: None,
        stats: None,
    });
    let parse_options = ParseOptions {
        goal_rule: options.goal_rule.clone(),
        ..Default::default()
    };
    let parsed = catch_stage(
        IssuePhase::Parse,
        AssertUnwindSafe(|| Ok(processor.parse(text, &parse_options, interrupt))),
    );
    let result = match parsed {
        Ok(r) => r,
        Err(issue) => {
            emit(Response::Parse {
                header: st.failure(vec![issue]),
                tree: None,
                stats: None,
            });
            return;
        }
    };
    if result.is_interrupted() {
        emit(Response::Parse {
            header: st.failure(result.issues),
            tree: None,
            stats: Some(result.stats),
        });
        return;
    }
    let tree = result.sppt;
    let header = match &tree {
        Some(_) => st.header(MessageStatus::Success).with_issues(result.issues),
        None => st.failure(result.issues),
    };
    emit(Response::Parse {
        header,
        tree: tree.as_ref().map(|t| t.to_tree_data()),
        stats: Some(result.stats),
    });

    // LineTokens
    if options.line_tokens {
        if let Some(issue) = st.interrupted(IssuePhase::Parse) {
            emit(Response::LineTokens {
                header: st.failure(vec![issue]),
                lines: vec![],
            });
            return;
        }
        let rules = processor.rules();
        let tokens = match &tree {
            Some(t) => tree_tokens(t),
            None => scan_all(rules, text),
        };
        let unstyled;
        let handler = match style {
            Some(h) => h,
            None => {
                unstyled = StyleHandler::new(
                    processor.identity(),
                    crate::style::DEFAULT_CLASS_PREFIX,
                    StyleModel::default(),
                );
                &unstyled
            }
        };
        emit(Response::LineTokens {
            header: st.header(MessageStatus::Success),
            lines: handler.line_tokens(rules, text, &tokens),
        });
    }

    // SyntaxAnalysis
    let tree = match tree {
        Some(t) if options.syntax_analysis => t,
        _ => return,
    };
    if let Some(issue) = st.interrupted(IssuePhase::SyntaxAnalysis) {
        emit(Response::SyntaxAnalysis {
            header: st.failure(vec![issue]),
            asm: None,
        });
        return;
    }
    emit(Response::SyntaxAnalysis {
        header: st.header(MessageStatus::Start),
        asm: None,
    });
    let reduced = catch_stage(
        IssuePhase::SyntaxAnalysis,
        AssertUnwindSafe(|| Ok(processor.syntax_analysis(&tree))),
    )
    .and_then(|r| r);
    let asm = match reduced {
        Ok(asm) => asm,
        Err(issue) => {
            emit(Response::SyntaxAnalysis {
                header: st.failure(vec![issue]),
                asm: None,
            });
            return;
        }
    };
    emit(Response::SyntaxAnalysis {
        header: st.header(MessageStatus::Success),
        asm: Some(asm.clone()),
    });

    // SemanticAnalysis
    if !options.semantic_analysis {
        return;
    }
    if let Some(issue) = st.interrupted(IssuePhase::SemanticAnalysis) {
        emit(Response::SemanticAnalysis {
            header: st.failure(vec![issue]),
            references: vec![],
        });
        return;
    }
    emit(Response::SemanticAnalysis {
        header: st.header(MessageStatus::Start),
        references: vec![],
    });
    let context = options.context.as_ref().map(|c| c as &dyn ContextProvider);
    let analysed = catch_stage(
        IssuePhase::SemanticAnalysis,
        AssertUnwindSafe(|| Ok(processor.semantic_analysis(&asm, text, context))),
    );
    match analysed {
        // unresolved names are reported, not fatal
        Ok(r) => emit(Response::SemanticAnalysis {
            header: st.header(MessageStatus::Success).with_issues(r.issues),
            references: r.references,
        }),
        Err(issue) => emit(Response::SemanticAnalysis {
            header: st.failure(vec![issue]),
            references: vec![],
        }),
    }
}

/// Runs a `CodeComplete` request: Start, then Success with the items or
/// Failure.
pub fn process_code_complete(
    processor: &mut LanguageProcessor,
    endpoint: &EndPointIdentity,
    text: &str,
    position: usize,
    options: &ProcessOptions,
    interrupt: &dyn Interrupt,
    emit: &mut dyn FnMut(Response),
) {
    let st = Stages {
        endpoint,
        language_id: processor.identity().clone(),
        interrupt,
    };
    if let Some(issue) = st.interrupted(IssuePhase::Completion) {
        emit(Response::CodeComplete {
            header: st.failure(vec![issue]),
            items: vec![],
        });
        return;
    }
    emit(Response::CodeComplete {
        header: st.header(MessageStatus::Start),
        items: vec![],
    });
    let completed = catch_stage(
        IssuePhase::Completion,
        AssertUnwindSafe(|| {
            Ok(processor.complete(text, position, options.goal_rule.clone(), interrupt))
        }),
    )
    .and_then(|r| r);
    match completed {
        Ok(items) => emit(Response::CodeComplete {
            header: st.header(MessageStatus::Success),
            items,
        }),
        Err(issue) => emit(Response::CodeComplete {
            header: st.failure(vec![issue]),
            items: vec![],
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::{IssueCode, ParserLimits},
        interrupt::NoInterrupt,
        processor::ContextSimple,
        Logger,
    };
    use std::sync::atomic::AtomicBool;

    const GRAMMAR: &str = "namespace t grammar G {\n\
        skip leaf WS = \"\\s+\" ;\n\
        unit = stmt* ;\n\
        stmt = def || use ;\n\
        def = 'def' NAME ';' ;\n\
        use = 'use' NAME ';' ;\n\
        leaf NAME = \"[a-z]+\" ;\n\
    }";

    fn processor() -> LanguageProcessor {
        LanguageProcessor::from_grammar(
            LanguageIdentity::new("t"),
            GRAMMAR,
            Some("identify def by NAME ; reference use.NAME -> def ;"),
            Logger::new(0, 0),
            ParserLimits::default(),
        )
        .unwrap()
    }

    fn run(text: &str, options: &ProcessOptions, interrupt: &dyn Interrupt) -> Vec<Response> {
        let mut p = processor();
        let mut out = vec![];
        process(
            &mut p,
            None,
            &EndPointIdentity::new("ed", "s1"),
            text,
            options,
            interrupt,
            &mut |r| out.push(r),
        );
        out
    }

    fn summaries(rs: &[Response]) -> Vec<String> {
        rs.iter().map(|r| r.summary()).collect()
    }

    #[test]
    fn all_stages_in_order() {
        let mut options = ProcessOptions {
            line_tokens: true,
            ..Default::default()
        };
        let mut context = ContextSimple::default();
        context.declare("x", "def");
        options.context = Some(context);
        let rs = run("def a; use a; use x;", &options, &NoInterrupt);
        assert_eq!(
            summaries(&rs),
            vec![
                "Parse:Start",
                "Parse:Success",
                "LineTokens:Success",
                "SyntaxAnalysis:Start",
                "SyntaxAnalysis:Success",
                "SemanticAnalysis:Start",
                "SemanticAnalysis:Success",
            ]
        );
        match &rs[6] {
            Response::SemanticAnalysis { header, references } => {
                assert_eq!(references.len(), 2);
                assert!(header.issues.is_empty());
            }
            r => panic!("unexpected {r:?}"),
        }
    }

    #[test]
    fn parse_failure_stops_after_line_tokens() {
        let options = ProcessOptions {
            line_tokens: true,
            ..Default::default()
        };
        let rs = run("def a; use", &options, &NoInterrupt);
        assert_eq!(
            summaries(&rs),
            vec!["Parse:Start", "Parse:Failure", "LineTokens:Success"]
        );
        match &rs[1] {
            Response::Parse { header, tree, .. } => {
                assert!(tree.is_none());
                assert_eq!(header.issues[0].code, IssueCode::ParseFailure);
                assert!(!header.message.is_empty());
            }
            r => panic!("unexpected {r:?}"),
        }
        match &rs[2] {
            Response::LineTokens { lines, .. } => assert_eq!(lines[0].len(), 6),
            r => panic!("unexpected {r:?}"),
        }
    }

    #[test]
    fn interrupted_before_start() {
        let flag = AtomicBool::new(true);
        let rs = run("def a;", &ProcessOptions::default(), &flag);
        assert_eq!(summaries(&rs), vec!["Parse:Failure"]);
        assert_eq!(rs[0].header().issues[0].code, IssueCode::Interrupted);
    }

    #[test]
    fn stages_can_be_disabled() {
        let options = ProcessOptions {
            semantic_analysis: false,
            ..Default::default()
        };
        let rs = run("def a;", &options, &NoInterrupt);
        assert_eq!(rs.len(), 4);
        assert_eq!(rs[3].summary(), "SyntaxAnalysis:Success");
    }

    #[test]
    fn code_complete_responses() {
        let mut p = processor();
        let mut out = vec![];
        process_code_complete(
            &mut p,
            &EndPointIdentity::default(),
            "def a; u",
            8,
            &ProcessOptions::default(),
            &NoInterrupt,
            &mut |r| out.push(r),
        );
        assert_eq!(
            summaries(&out),
            vec!["CodeComplete:Start", "CodeComplete:Success"]
        );
        match &out[1] {
            Response::CodeComplete { items, .. } => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].text, "use");
            }
            r => panic!("unexpected {r:?}"),
        }
    }
}
