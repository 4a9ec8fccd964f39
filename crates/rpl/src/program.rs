// Compiled patterns: name-resolved trees ready for matching

use std::sync::Arc;

use crate::ast::Predicate;
use crate::charset::CharSet;

/// A resolved pattern node. References have been replaced by shared
/// bodies, so a node tree is finite and acyclic.
#[derive(Debug, Clone)]
pub enum Node {
    Literal(Box<[u8]>),
    Set(CharSet),
    Any,
    Start,
    End,
    Seq(Vec<Node>),
    Choice(Vec<Node>),
    Repeat {
        node: Box<Node>,
        min: u32,
        max: Option<u32>,
    },
    Predicate {
        node: Box<Node>,
        kind: Predicate,
    },
    /// Named binding: produces a match node
    Capture {
        name: Arc<str>,
        node: Arc<Node>,
    },
    /// Alias binding: matched in place, no match node
    Alias(Arc<Node>),
}

impl Node {
    /// Can this node succeed without consuming input?
    pub fn nullable(&self) -> bool {
        match self {
            Node::Literal(bytes) => bytes.is_empty(),
            Node::Set(_) | Node::Any => false,
            Node::Start | Node::End | Node::Predicate { .. } => true,
            Node::Seq(items) => items.iter().all(Node::nullable),
            Node::Choice(alts) => alts.iter().any(Node::nullable),
            Node::Repeat { node, min, .. } => *min == 0 || node.nullable(),
            Node::Capture { node, .. } | Node::Alias(node) => node.nullable(),
        }
    }

    /// Does every match of this node have to start at input position 0?
    pub(crate) fn anchored(&self) -> bool {
        match self {
            Node::Start => true,
            Node::Seq(items) => items.first().is_some_and(Node::anchored),
            Node::Choice(alts) => !alts.is_empty() && alts.iter().all(Node::anchored),
            Node::Capture { node, .. } | Node::Alias(node) => node.anchored(),
            _ => false,
        }
    }
}

/// Deepest node tree the compiler produces. References count as a level.
pub const MAX_NODE_DEPTH: usize = 400;

/// Type name of the top-level match node for anonymous expressions.
pub const ANONYMOUS: &str = "*";

/// An immutable compiled pattern. Shared across threads behind an `Arc`.
#[derive(Debug)]
pub struct Program {
    pub(crate) root: Node,
    pub(crate) anchored: bool,
    expression: String,
}

impl Program {
    pub(crate) fn new(root: Node, expression: &str) -> Self {
        // The root always produces a match node
        let root = match root {
            node @ Node::Capture { .. } => node,
            other => Node::Capture {
                name: Arc::from(ANONYMOUS),
                node: Arc::new(other),
            },
        };
        Program {
            anchored: root.anchored(),
            root,
            expression: expression.to_string(),
        }
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Type of the match node this program produces.
    pub fn type_name(&self) -> &str {
        match &self.root {
            Node::Capture { name, .. } => name,
            _ => ANONYMOUS,
        }
    }
}
