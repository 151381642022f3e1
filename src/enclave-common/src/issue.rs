use serde::{Deserialize, Serialize};

/// A location in the original (pre-transform) source, used for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
    pub start: u32,
    pub end: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

/// The closed set of validator rule violations. One variant per rule in the
/// validator's walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueCode {
    GlobalNotAllowed,
    ConstructorAccess,
    PrototypeAccess,
    SymbolAccess,
    ReservedPrefix,
    DynamicCode,
    UnsafeConstruct,
}

/// One finding produced by the AST validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AstIssue {
    pub code: IssueCode,
    pub severity: Severity,
    pub message: String,
    pub location: SourceLocation,
}

impl AstIssue {
    pub fn new(code: IssueCode, message: impl Into<String>, location: SourceLocation) -> Self {
        Self {
            code,
            severity: Severity::Error,
            message: message.into(),
            location,
        }
    }
}
