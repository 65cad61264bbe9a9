use std::{sync::mpsc::Receiver, time::Duration};

use scannerless_parser::{
    api::{EndPointIdentity, IssueCode, LanguageIdentity, MessageStatus},
    processor::{AsmValue, CompletionKind},
    service::{
        codec,
        messages::{ProcessOptions, Request, Response},
    },
    LanguageService, ServiceConfig,
};
use serde_json::json;

const GRAMMAR: &str = r#"
namespace test.decls
grammar Decls {
    skip leaf WHITESPACE = "\s+" ;
    unit = decl* ;
    decl = var || use ;
    var = 'var' NAME ';' ;
    use = 'use' NAME ';' ;
    leaf NAME = "[a-z]+" ;
}
"#;

const CROSS_REFERENCE: &str = "identify var by NAME ; reference use.NAME -> var ;";

fn lang() -> LanguageIdentity {
    LanguageIdentity::new("decls")
}

fn next(rx: &Receiver<Response>) -> Response {
    rx.recv_timeout(Duration::from_secs(10))
        .expect("no response within 10s")
}

fn take(rx: &Receiver<Response>, n: usize) -> Vec<Response> {
    (0..n).map(|_| next(rx)).collect()
}

fn summaries(rs: &[Response]) -> Vec<String> {
    rs.iter().map(|r| r.summary()).collect()
}

fn started() -> (LanguageService, Receiver<Response>) {
    let mut cfg = ServiceConfig::new();
    cfg.quiet();
    let svc = LanguageService::new(cfg);
    let rx = svc.subscribe();
    svc.submit(Request::ProcessorCreate {
        endpoint: EndPointIdentity::default(),
        language_id: lang(),
        grammar: GRAMMAR.to_string(),
        cross_reference: Some(CROSS_REFERENCE.to_string()),
    })
    .unwrap();
    assert_eq!(next(&rx).summary(), "ProcessorCreate:Success");
    (svc, rx)
}

fn process(endpoint: &EndPointIdentity, text: &str) -> Request {
    Request::Process {
        endpoint: endpoint.clone(),
        language_id: lang(),
        text: text.to_string(),
        options: ProcessOptions::default(),
    }
}

#[test]
fn test_full_pipeline() {
    let (svc, rx) = started();
    let ep = EndPointIdentity::new("editor", "full");
    svc.submit(process(&ep, "var a; use a; use b;")).unwrap();
    let rs = take(&rx, 6);
    assert_eq!(
        summaries(&rs),
        vec![
            "Parse:Start",
            "Parse:Success",
            "SyntaxAnalysis:Start",
            "SyntaxAnalysis:Success",
            "SemanticAnalysis:Start",
            "SemanticAnalysis:Success",
        ]
    );
    match &rs[1] {
        Response::Parse { tree, .. } => {
            let tree = tree.as_ref().unwrap();
            assert_eq!(tree.name, "unit");
            assert_eq!(tree.end, 20);
        }
        r => panic!("unexpected {r:?}"),
    }
    match &rs[3] {
        Response::SyntaxAnalysis { asm: Some(AsmValue::List(decls)), .. } => {
            assert_eq!(decls.len(), 3);
            let first = decls[0].as_element().unwrap();
            assert_eq!(first.type_name, "var");
            assert_eq!(first.text("NAME"), Some("a"));
        }
        r => panic!("unexpected {r:?}"),
    }
    match &rs[5] {
        Response::SemanticAnalysis { header, references } => {
            assert_eq!(references.len(), 1);
            assert_eq!(references[0].name, "a");
            assert_eq!(header.issues.len(), 1);
            assert_eq!(header.issues[0].code, IssueCode::UnresolvedName);
            assert_eq!(header.issues[0].location.unwrap().position, 14);
        }
        r => panic!("unexpected {r:?}"),
    }
}

#[test]
fn test_failed_create_caches_nothing() {
    let (svc, rx) = started();
    svc.submit(Request::ProcessorCreate {
        endpoint: EndPointIdentity::default(),
        language_id: lang(),
        grammar: "namespace t grammar G { a = 'x' ; a = 'y' ; }".to_string(),
        cross_reference: None,
    })
    .unwrap();
    let r = next(&rx);
    assert_eq!(r.summary(), "ProcessorCreate:Failure");
    assert_eq!(
        r.header().issues[0].code,
        IssueCode::AmbiguousGrammarDefinition
    );
    assert!(svc.registry().lookup(&lang()).is_none());

    svc.submit(process(&EndPointIdentity::new("editor", "x"), "var a;"))
        .unwrap();
    let r = next(&rx);
    assert_eq!(r.summary(), "Parse:Failure");
    assert_eq!(r.header().issues[0].code, IssueCode::Protocol);
}

#[test]
fn test_interrupt_between_requests() {
    let (svc, rx) = started();
    let ep = EndPointIdentity::new("editor", "typing");
    let other = EndPointIdentity::new("editor", "other");
    svc.submit_all(vec![
        process(&ep, "var a;"),
        Request::Interrupt {
            endpoint: ep.clone(),
            reason: "new keystroke".to_string(),
        },
        process(&ep, "var ab;"),
    ])
    .unwrap();

    let rs = take(&rx, 7);
    assert_eq!(rs[0].summary(), "Parse:Failure");
    assert_eq!(rs[0].header().issues[0].code, IssueCode::Interrupted);
    assert_eq!(rs[0].header().status, MessageStatus::Failure);
    assert_eq!(rs[6].summary(), "SemanticAnalysis:Success");
    match &rs[1..] {
        [Response::Parse { header, .. }, Response::Parse { tree, .. }, ..] => {
            assert_eq!(header.status, MessageStatus::Start);
            assert_eq!(tree.as_ref().unwrap().end, 7);
        }
        r => panic!("unexpected {r:?}"),
    }

    // an interrupt only affects its own endpoint
    svc.interrupt(&ep, "late");
    svc.submit(process(&other, "var z;")).unwrap();
    assert_eq!(next(&rx).summary(), "Parse:Start");
    assert_eq!(next(&rx).summary(), "Parse:Success");
}

#[test]
fn test_style_and_line_tokens() {
    let (svc, rx) = started();
    svc.submit(Request::SetStyle {
        endpoint: EndPointIdentity::default(),
        language_id: lang(),
        style: "$keyword { color: blue; } NAME { color: black; }".to_string(),
    })
    .unwrap();
    match next(&rx) {
        Response::SetStyle { header, style } => {
            assert_eq!(header.status, MessageStatus::Success);
            assert_eq!(style.unwrap().rules.len(), 2);
        }
        r => panic!("unexpected {r:?}"),
    }

    let ep = EndPointIdentity::new("editor", "style");
    svc.submit(Request::Process {
        endpoint: ep.clone(),
        language_id: lang(),
        text: "var a;\nuse".to_string(),
        options: ProcessOptions {
            line_tokens: true,
            ..Default::default()
        },
    })
    .unwrap();
    let rs = take(&rx, 3);
    assert_eq!(
        summaries(&rs),
        vec!["Parse:Start", "Parse:Failure", "LineTokens:Success"]
    );
    match &rs[2] {
        Response::LineTokens { lines, .. } => {
            assert_eq!(lines.len(), 2);
            let styles: Vec<_> = lines[0].iter().map(|t| t.styles[0].as_str()).collect();
            assert_eq!(
                styles,
                vec!["agl_decls-1", "nostyle", "agl_decls-2", "nostyle"]
            );
            assert_eq!(lines[1][0].position, 0);
            assert_eq!(lines[1][0].styles, vec!["agl_decls-1".to_string()]);
        }
        r => panic!("unexpected {r:?}"),
    }

    svc.submit(Request::ProcessorDelete {
        endpoint: EndPointIdentity::default(),
        language_id: lang(),
    })
    .unwrap();
    assert_eq!(next(&rx).summary(), "ProcessorDelete:Success");
    assert!(svc.registry().style(&lang()).is_none());
}

#[test]
fn test_code_complete() {
    let (svc, rx) = started();
    let ep = EndPointIdentity::new("editor", "complete");
    svc.submit(Request::CodeComplete {
        endpoint: ep.clone(),
        language_id: lang(),
        text: "var a; ".to_string(),
        position: 7,
        options: ProcessOptions::default(),
    })
    .unwrap();
    let rs = take(&rx, 2);
    match &rs[1] {
        Response::CodeComplete { header, items } => {
            assert_eq!(header.status, MessageStatus::Success);
            let texts: Vec<_> = items.iter().map(|i| i.text.as_str()).collect();
            assert_eq!(texts, vec!["use", "var"]);
            assert!(items.iter().all(|i| i.kind == CompletionKind::Literal));
        }
        r => panic!("unexpected {r:?}"),
    }
}

#[test]
fn test_json_protocol() {
    let (svc, rx) = started();
    svc.submit_json(
        &json!({
            "action": "Process",
            "endpoint": {"editor_id": "editor", "session_id": "json"},
            "language_id": "decls",
            "text": "var q;",
            "options": {"syntax_analysis": false},
        })
        .to_string(),
    )
    .unwrap();
    let rs = take(&rx, 2);
    let encoded = codec::encode_response(&rs[1]).unwrap();
    let v: serde_json::Value = serde_json::from_str(&encoded).unwrap();
    assert_eq!(v["action"], "Parse");
    assert_eq!(v["status"], "Success");
    assert_eq!(v["language_id"], "decls");
    assert_eq!(v["tree"]["name"], "unit");
    assert_eq!(codec::decode_response(&encoded).unwrap(), rs[1]);

    svc.submit_json(r#"{"action": "Process", "text": 1}"#).unwrap();
    match next(&rx) {
        Response::Protocol { header, stage } => {
            assert_eq!(stage, "protocol");
            assert_eq!(header.status, MessageStatus::Failure);
        }
        r => panic!("unexpected {r:?}"),
    }
}
