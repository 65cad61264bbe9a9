use crate::api::{InputLocation, IssueCode, IssuePhase, LanguageIssue};

/// Errors that make a grammar unusable. No rule set is produced.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    #[error("ambiguous grammar definition: rule {name:?} {detail}")]
    AmbiguousGrammarDefinition { name: String, detail: String },

    #[error("unresolved reference {name:?} in {context}")]
    UnresolvedReference { name: String, context: String },

    #[error("invalid pattern {pattern:?} in rule {rule:?}: {message}")]
    InvalidPattern {
        rule: String,
        pattern: String,
        message: String,
    },

    #[error("grammar syntax error at {}:{}: {message}", location.line, location.column)]
    Syntax {
        location: InputLocation,
        message: String,
        expected: Vec<String>,
    },

    #[error("circular reference through {name:?}")]
    CircularReference { name: String },
}

impl CompileError {
    pub fn code(&self) -> IssueCode {
        match self {
            CompileError::AmbiguousGrammarDefinition { .. } => IssueCode::AmbiguousGrammarDefinition,
            CompileError::UnresolvedReference { .. } => IssueCode::UnresolvedReference,
            CompileError::InvalidPattern { .. } => IssueCode::InvalidPattern,
            CompileError::Syntax { .. } => IssueCode::GrammarSyntax,
            CompileError::CircularReference { .. } => IssueCode::UnresolvedReference,
        }
    }

    pub fn to_issue(&self) -> LanguageIssue {
        let issue = LanguageIssue::error(IssuePhase::Grammar, self.code(), self.to_string());
        match self {
            CompileError::Syntax {
                location, expected, ..
            } => issue.at(*location).with_expected(expected.clone()),
            _ => issue,
        }
    }
}

impl From<CompileError> for LanguageIssue {
    fn from(e: CompileError) -> Self {
        e.to_issue()
    }
}
