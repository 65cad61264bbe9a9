use serde::{Deserialize, Serialize};

use crate::{
    api::{EndPointIdentity, LanguageIdentity, LanguageIssue, MessageStatus},
    earley::ParserStats,
    processor::{AsmValue, CompletionItem, ContextSimple, ResolvedReference},
    sppt::TreeData,
    style::{LineToken, StyleModel},
};

fn default_true() -> bool {
    true
}

/// Per-request switches of `Process`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOptions {
    #[serde(default)]
    pub goal_rule: Option<String>,
    #[serde(default = "default_true")]
    pub syntax_analysis: bool,
    #[serde(default = "default_true")]
    pub semantic_analysis: bool,
    #[serde(default)]
    pub line_tokens: bool,
    #[serde(default)]
    pub context: Option<ContextSimple>,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        ProcessOptions {
            goal_rule: None,
            syntax_analysis: true,
            semantic_analysis: true,
            line_tokens: false,
            context: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum Request {
    ProcessorCreate {
        #[serde(default)]
        endpoint: EndPointIdentity,
        language_id: LanguageIdentity,
        grammar: String,
        #[serde(default)]
        cross_reference: Option<String>,
    },
    ProcessorDelete {
        #[serde(default)]
        endpoint: EndPointIdentity,
        language_id: LanguageIdentity,
    },
    SetStyle {
        #[serde(default)]
        endpoint: EndPointIdentity,
        language_id: LanguageIdentity,
        style: String,
    },
    Process {
        endpoint: EndPointIdentity,
        language_id: LanguageIdentity,
        text: String,
        #[serde(default)]
        options: ProcessOptions,
    },
    Interrupt {
        endpoint: EndPointIdentity,
        #[serde(default)]
        reason: String,
    },
    CodeComplete {
        endpoint: EndPointIdentity,
        language_id: LanguageIdentity,
        text: String,
        position: usize,
        #[serde(default)]
        options: ProcessOptions,
    },
}

impl Request {
    pub fn endpoint(&self) -> &EndPointIdentity {
        match self {
            Request::ProcessorCreate { endpoint, .. }
            | Request::ProcessorDelete { endpoint, .. }
            | Request::SetStyle { endpoint, .. }
            | Request::Process { endpoint, .. }
            | Request::Interrupt { endpoint, .. }
            | Request::CodeComplete { endpoint, .. } => endpoint,
        }
    }

    pub fn language_id(&self) -> Option<&LanguageIdentity> {
        match self {
            Request::ProcessorCreate { language_id, .. }
            | Request::ProcessorDelete { language_id, .. }
            | Request::SetStyle { language_id, .. }
            | Request::Process { language_id, .. }
            | Request::CodeComplete { language_id, .. } => Some(language_id),
            Request::Interrupt { .. } => None,
        }
    }
}

/// Fields every response carries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseHeader {
    pub endpoint: EndPointIdentity,
    pub language_id: LanguageIdentity,
    pub status: MessageStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub issues: Vec<LanguageIssue>,
}

impl ResponseHeader {
    pub fn new(
        endpoint: &EndPointIdentity,
        language_id: &LanguageIdentity,
        status: MessageStatus,
    ) -> Self {
        ResponseHeader {
            endpoint: endpoint.clone(),
            language_id: language_id.clone(),
            status,
            message: String::new(),
            issues: vec![],
        }
    }

    pub fn with_issues(mut self, issues: Vec<LanguageIssue>) -> Self {
        if self.message.is_empty() {
            if let Some(first) = issues.iter().find(|i| i.is_error()) {
                self.message = first.message.clone();
            }
        }
        self.issues = issues;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum Response {
    ProcessorCreate {
        #[serde(flatten)]
        header: ResponseHeader,
        #[serde(default)]
        scanner_matchables: Vec<String>,
    },
    ProcessorDelete {
        #[serde(flatten)]
        header: ResponseHeader,
    },
    SetStyle {
        #[serde(flatten)]
        header: ResponseHeader,
        #[serde(default)]
        style: Option<StyleModel>,
    },
    Parse {
        #[serde(flatten)]
        header: ResponseHeader,
        #[serde(default)]
        tree: Option<TreeData>,
        #[serde(default)]
        stats: Option<ParserStats>,
    },
    LineTokens {
        #[serde(flatten)]
        header: ResponseHeader,
        lines: Vec<Vec<LineToken>>,
    },
    SyntaxAnalysis {
        #[serde(flatten)]
        header: ResponseHeader,
        #[serde(default)]
        asm: Option<AsmValue>,
    },
    SemanticAnalysis {
        #[serde(flatten)]
        header: ResponseHeader,
        #[serde(default)]
        references: Vec<ResolvedReference>,
    },
    CodeComplete {
        #[serde(flatten)]
        header: ResponseHeader,
        #[serde(default)]
        items: Vec<CompletionItem>,
    },
    Protocol {
        #[serde(flatten)]
        header: ResponseHeader,
        stage: String,
    },
}

impl Response {
    pub fn header(&self) -> &ResponseHeader {
        match self {
            Response::ProcessorCreate { header, .. }
            | Response::ProcessorDelete { header }
            | Response::SetStyle { header, .. }
            | Response::Parse { header, .. }
            | Response::LineTokens { header, .. }
            | Response::SyntaxAnalysis { header, .. }
            | Response::SemanticAnalysis { header, .. }
            | Response::CodeComplete { header, .. }
            | Response::Protocol { header, .. } => header,
        }
    }

    pub fn status(&self) -> MessageStatus {
        self.header().status
    }

    /// Name of the stage, as used in the `action` tag.
    pub fn stage(&self) -> &'static str {
        match self {
            Response::ProcessorCreate { .. } => "ProcessorCreate",
            Response::ProcessorDelete { .. } => "ProcessorDelete",
            Response::SetStyle { .. } => "SetStyle",
            Response::Parse { .. } => "Parse",
            Response::LineTokens { .. } => "LineTokens",
            Response::SyntaxAnalysis { .. } => "SyntaxAnalysis",
            Response::SemanticAnalysis { .. } => "SemanticAnalysis",
            Response::CodeComplete { .. } => "CodeComplete",
            Response::Protocol { .. } => "Protocol",
        }
    }

    /// `Stage:Status`, handy for asserting on response sequences.
    pub fn summary(&self) -> String {
        format!("{}:{:?}", self.stage(), self.status())
    }
}
