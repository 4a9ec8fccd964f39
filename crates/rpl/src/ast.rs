// Parsed RPL before name resolution

use std::fmt;

use crate::charset::CharSet;

/// A possibly qualified identifier: `name` or `pkg.name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Name {
    pub package: Option<String>,
    pub local: String,
}

impl Name {
    pub fn parse(text: &str) -> Self {
        match text.split_once('.') {
            Some((pkg, local)) => Name {
                package: Some(pkg.to_string()),
                local: local.to_string(),
            },
            None => Name {
                package: None,
                local: text.to_string(),
            },
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.package {
            Some(pkg) => write!(f, "{}.{}", pkg, self.local),
            None => write!(f, "{}", self.local),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    /// `>exp` succeeds without consuming when exp matches
    LookAhead,
    /// `!exp` succeeds without consuming when exp fails
    NotAhead,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exp {
    Literal(Vec<u8>),
    Set(CharSet),
    /// `.`: one UTF-8 character
    Any,
    /// `^`
    Start,
    /// `$`
    End,
    Ref {
        name: Name,
        pos: usize,
    },
    Seq(Vec<Exp>),
    Choice(Vec<Exp>),
    Repeat {
        exp: Box<Exp>,
        min: u32,
        max: Option<u32>,
    },
    Predicate {
        exp: Box<Exp>,
        kind: Predicate,
    },
}

impl Exp {
    /// Conservative test for whether the expression can succeed without
    /// consuming input. References are treated as consuming; the compiler
    /// checks the expanded program instead.
    pub fn nullable(&self) -> bool {
        match self {
            Exp::Literal(bytes) => bytes.is_empty(),
            Exp::Set(_) | Exp::Any | Exp::Ref { .. } => false,
            Exp::Start | Exp::End | Exp::Predicate { .. } => true,
            Exp::Seq(items) => items.iter().all(Exp::nullable),
            Exp::Choice(alts) => alts.iter().any(Exp::nullable),
            Exp::Repeat { exp, min, .. } => *min == 0 || exp.nullable(),
        }
    }
}

/// `import a, b as c` entry.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ImportDecl {
    pub name: String,
    #[serde(rename = "as", skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl ImportDecl {
    /// The prefix under which the package's bindings become visible.
    pub fn prefix(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub name: String,
    pub exp: Exp,
    pub alias: bool,
    pub local: bool,
    pub pos: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Package { name: String, pos: usize },
    Import { decls: Vec<ImportDecl>, pos: usize },
    Bind(Binding),
}
