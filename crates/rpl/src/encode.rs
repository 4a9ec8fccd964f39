// Built-in output encoders
// These run natively; any other encoder is the embedding layer's business.

use std::borrow::Cow;

use serde::Serialize;

use crate::matcher::{MatchNode, Outcome};

/// Status: the pattern did not match.
pub const NO_MATCH: i32 = 0;
/// Status: the pattern matched (bool encoder).
pub const MATCHED: i32 = 1;

/// Encoders built into the matcher, usable on the fast path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoder {
    Json,
    Line,
    Bool,
    Matches,
}

impl Encoder {
    pub const ALL: [Encoder; 4] = [Encoder::Json, Encoder::Line, Encoder::Bool, Encoder::Matches];

    pub fn from_name(name: &str) -> Option<Self> {
        Encoder::ALL.into_iter().find(|e| e.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Encoder::Json => "json",
            Encoder::Line => "line",
            Encoder::Bool => "bool",
            Encoder::Matches => "matches",
        }
    }

    pub fn encode(self, outcome: &Outcome, input: &[u8]) -> Encoded {
        let Some(tree) = &outcome.tree else {
            return Encoded::Status(NO_MATCH);
        };
        match self {
            Encoder::Json => Encoded::Bytes(tree_to_json(tree, input).into_bytes()),
            Encoder::Line => Encoded::Bytes(input.to_vec()),
            Encoder::Bool => Encoded::Status(MATCHED),
            Encoder::Matches => Encoded::Bytes(tree.text(input).to_vec()),
        }
    }
}

/// Output of a built-in encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoded {
    Bytes(Vec<u8>),
    Status(i32),
}

#[derive(Serialize)]
struct JsonNode<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    s: usize,
    e: usize,
    data: Cow<'a, str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    subs: Vec<JsonNode<'a>>,
}

impl<'a> JsonNode<'a> {
    fn build(node: &'a MatchNode, input: &'a [u8]) -> Self {
        JsonNode {
            kind: &node.name,
            s: node.start + 1,
            e: node.end + 1,
            data: String::from_utf8_lossy(node.text(input)),
            subs: node.subs.iter().map(|n| JsonNode::build(n, input)).collect(),
        }
    }
}

/// Render a match tree in the `{type, s, e, data, subs}` form.
pub fn tree_to_json(tree: &MatchNode, input: &[u8]) -> String {
    serde_json::to_string(&JsonNode::build(tree, input)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn digits_at_3() -> Outcome {
        Outcome {
            tree: Some(MatchNode {
                name: Arc::from("*"),
                start: 3,
                end: 6,
                subs: Vec::new(),
            }),
            leftover: 0,
            abend: false,
        }
    }

    #[test]
    fn test_names() {
        for encoder in Encoder::ALL {
            assert_eq!(Encoder::from_name(encoder.name()), Some(encoder));
        }
        assert!(Encoder::from_name("color").is_none());
        assert!(Encoder::from_name("JSON").is_none());
    }

    #[test]
    fn test_json_shape() {
        let out = Encoder::Json.encode(&digits_at_3(), b"abc123");
        assert_eq!(
            out,
            Encoded::Bytes(br#"{"type":"*","s":4,"e":7,"data":"123"}"#.to_vec())
        );
    }

    #[test]
    fn test_no_match_is_status() {
        let miss = Outcome {
            tree: None,
            leftover: 3,
            abend: false,
        };
        for encoder in Encoder::ALL {
            assert_eq!(encoder.encode(&miss, b"abc"), Encoded::Status(NO_MATCH));
        }
        assert_eq!(Encoder::Bool.encode(&digits_at_3(), b"abc123"), Encoded::Status(MATCHED));
    }
}
