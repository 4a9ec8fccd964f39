use serde::Serialize;

/// Stage that produced a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Who {
    Parser,
    Compiler,
    Loader,
    Importer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A structured message about RPL source.
///
/// These are data, not Rust errors: a failed compile is a normal outcome
/// that carries a list of violations back to the caller. The `ast` field is
/// internal detail (the offending source fragment) which sanitizers may
/// strip before the records leave the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub who: Who,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pos: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ast: Option<String>,
}

impl Violation {
    pub fn error(who: Who, message: impl Into<String>) -> Self {
        Violation {
            who,
            severity: Severity::Error,
            message: message.into(),
            origin: None,
            pos: None,
            ast: None,
        }
    }

    pub fn warning(who: Who, message: impl Into<String>) -> Self {
        Violation {
            severity: Severity::Warning,
            ..Violation::error(who, message)
        }
    }

    /// 1-based position in the source.
    pub fn at(mut self, pos: usize) -> Self {
        self.pos = Some(pos);
        self
    }

    pub fn with_ast(mut self, ast: impl Into<String>) -> Self {
        self.ast = Some(ast.into());
        self
    }

    pub fn with_origin(mut self, origin: Option<&str>) -> Self {
        if self.origin.is_none() {
            self.origin = origin.map(str::to_owned);
        }
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}
