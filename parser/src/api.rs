use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($name:ident) => {
        #[derive(
            Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Debug,
        )]
        #[serde(transparent)]
        pub struct $name(pub usize);

        impl $name {
            #[inline(always)]
            pub fn as_index(&self) -> usize {
                self.0
            }
        }
    };
}

id_type!(RuleId);
id_type!(NodeId);

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParserLimits {
    /// Maximum number of Earley items in a single row (byte offset).
    /// Exceeding it fails the parse rather than exhausting memory.
    pub max_items_in_row: usize,

    /// Maximum number of derivations packed into one SPPT node.
    /// Further derivations are dropped and a warning is recorded.
    pub max_alternatives: usize,
}

impl Default for ParserLimits {
    fn default() -> Self {
        Self {
            max_items_in_row: 50_000,
            max_alternatives: 64,
        }
    }
}

/// Per-call parse knobs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParseOptions {
    /// Rule to parse; when absent the grammar's default goal is used.
    #[serde(default)]
    pub goal_rule: Option<String>,

    /// Parse only `text[..end]`.
    #[serde(default)]
    pub end: Option<usize>,

    /// When false, the parse is only used for its expected-terminal set
    /// and a missing goal completion is not reported as an issue.
    #[serde(default = "default_true")]
    pub require_complete: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        ParseOptions {
            goal_rule: None,
            end: None,
            require_complete: true,
        }
    }
}

impl ParseOptions {
    pub fn with_goal(goal: &str) -> Self {
        ParseOptions {
            goal_rule: Some(goal.to_string()),
            ..Default::default()
        }
    }
}

pub(crate) fn default_true() -> bool {
    true
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueSeverity {
    Error,
    Warning,
    Information,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssuePhase {
    Grammar,
    Parse,
    SyntaxAnalysis,
    SemanticAnalysis,
    Completion,
    Protocol,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueCode {
    AmbiguousGrammarDefinition,
    UnresolvedReference,
    InvalidPattern,
    GrammarSyntax,
    ParseFailure,
    Interrupted,
    Ambiguity,
    SyntaxAnalysis,
    UnresolvedName,
    Protocol,
    Internal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputLocation {
    /// Byte offset.
    pub position: usize,
    /// 1-based.
    pub line: usize,
    /// 1-based, in characters.
    pub column: usize,
    pub length: usize,
}

impl InputLocation {
    pub fn from_offset(text: &str, position: usize, length: usize) -> Self {
        let position = position.min(text.len());
        let before = &text[..position];
        let line = before.matches('\n').count() + 1;
        let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
        let column = before[line_start..].chars().count() + 1;
        InputLocation {
            position,
            line,
            column,
            length,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageIssue {
    pub severity: IssueSeverity,
    pub phase: IssuePhase,
    pub code: IssueCode,
    pub location: Option<InputLocation>,
    pub message: String,
    /// Display forms of the terminals expected at `location`.
    #[serde(default)]
    pub expected: Vec<String>,
}

impl LanguageIssue {
    pub fn error(phase: IssuePhase, code: IssueCode, message: impl Into<String>) -> Self {
        LanguageIssue {
            severity: IssueSeverity::Error,
            phase,
            code,
            location: None,
            message: message.into(),
            expected: vec![],
        }
    }

    pub fn warning(phase: IssuePhase, code: IssueCode, message: impl Into<String>) -> Self {
        LanguageIssue {
            severity: IssueSeverity::Warning,
            ..Self::error(phase, code, message)
        }
    }

    pub fn info(phase: IssuePhase, code: IssueCode, message: impl Into<String>) -> Self {
        LanguageIssue {
            severity: IssueSeverity::Information,
            ..Self::error(phase, code, message)
        }
    }

    pub fn interrupted(reason: &str) -> Self {
        Self::error(
            IssuePhase::Parse,
            IssueCode::Interrupted,
            format!("interrupted: {reason}"),
        )
    }

    pub fn internal(phase: IssuePhase, err: &anyhow::Error) -> Self {
        Self::error(phase, IssueCode::Internal, format!("{err:#}"))
    }

    pub fn at(mut self, location: InputLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_expected(mut self, expected: Vec<String>) -> Self {
        self.expected = expected;
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == IssueSeverity::Error
    }
}

/// Address of one editing session.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct EndPointIdentity {
    pub editor_id: String,
    pub session_id: String,
}

impl EndPointIdentity {
    pub fn new(editor_id: &str, session_id: &str) -> Self {
        EndPointIdentity {
            editor_id: editor_id.to_string(),
            session_id: session_id.to_string(),
        }
    }
}

impl std::fmt::Display for EndPointIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.editor_id, self.session_id)
    }
}

/// Names a compiled rule set shared by every session using that grammar.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LanguageIdentity(pub String);

impl LanguageIdentity {
    pub fn new(id: &str) -> Self {
        LanguageIdentity(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LanguageIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageStatus {
    Start,
    Success,
    Failure,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_from_offset() {
        let text = "ab\ncdé\nf";
        let loc = InputLocation::from_offset(text, 0, 1);
        assert_eq!((loc.line, loc.column), (1, 1));
        let loc = InputLocation::from_offset(text, 5, 1);
        assert_eq!((loc.line, loc.column), (2, 3));
        let loc = InputLocation::from_offset(text, text.len(), 0);
        assert_eq!((loc.line, loc.column), (3, 2));
    }

    #[test]
    fn limits_deserialize_with_defaults() {
        let limits: ParserLimits = serde_json::from_str(
            r#"{"max_items_in_row": 10, "max_alternatives": 2}"#,
        )
        .unwrap();
        assert_eq!(limits.max_items_in_row, 10);
        let opts: ParseOptions = serde_json::from_str("{}").unwrap();
        assert!(opts.require_complete);
        assert!(opts.goal_rule.is_none());
    }
}
