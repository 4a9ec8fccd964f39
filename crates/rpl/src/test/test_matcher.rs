// Tests for search semantics, PEG behavior and limits
use crate::*;

fn program(expression: &str) -> Program {
    Environment::new().compile(expression).unwrap().program
}

fn matched_text(expression: &str, input: &str) -> Option<String> {
    let outcome = program(expression).find(input.as_bytes(), 1);
    outcome
        .tree
        .map(|t| String::from_utf8_lossy(t.text(input.as_bytes())).into_owned())
}

#[test]
fn test_search_finds_first_match() {
    let outcome = program("[0-9]+").find(b"abc123", 1);
    let tree = outcome.tree.unwrap();
    assert_eq!(&*tree.name, "*");
    assert_eq!((tree.start, tree.end), (3, 6));
    assert_eq!(outcome.leftover, 0);
    assert!(!outcome.abend);
}

#[test]
fn test_prefix_leftover() {
    let outcome = program("\"ab\"").find(b"abcd", 1);
    assert!(outcome.matched());
    assert_eq!(outcome.leftover, 2);
}

#[test]
fn test_no_match_reports_remaining_input() {
    let outcome = program("[0-9]").find(b"abc", 1);
    assert!(outcome.tree.is_none());
    assert_eq!(outcome.leftover, 3);
    assert!(!outcome.abend);

    let outcome = program("[0-9]").find(b"abc", 3);
    assert_eq!(outcome.leftover, 1);
}

#[test]
fn test_start_position() {
    let outcome = program("\"a\"").find(b"aXa", 2);
    let tree = outcome.tree.unwrap();
    assert_eq!(tree.start, 2);
    assert_eq!(outcome.leftover, 0);

    // past the end of input
    let outcome = program("\"a\"").find(b"a", 5);
    assert!(!outcome.matched());
}

#[test]
fn test_anchors() {
    assert_eq!(matched_text("^\"b\"", "ab"), None);
    assert_eq!(matched_text("^\"a\"", "ab"), Some("a".to_string()));
    assert_eq!(matched_text("\"b\" $", "abb"), Some("b".to_string()));
    let outcome = program("\"b\" $").find(b"abb", 1);
    assert_eq!(outcome.tree.unwrap().start, 2);
}

#[test]
fn test_ordered_choice() {
    assert_eq!(matched_text("\"a\" / \"ab\"", "ab"), Some("a".to_string()));
    assert_eq!(matched_text("\"ab\" / \"a\"", "ab"), Some("ab".to_string()));
}

#[test]
fn test_repetition_is_possessive() {
    assert_eq!(matched_text("[a]* \"a\"", "aaa"), None);
    assert_eq!(matched_text("\"a\"{2,3}", "aaaa"), Some("aaa".to_string()));
    assert_eq!(matched_text("\"a\"{2}", "a"), None);
    assert_eq!(matched_text("\"x\"?\"y\"", "y"), Some("y".to_string()));
}

#[test]
fn test_predicates() {
    assert_eq!(matched_text("!\"x\" .", "xy"), Some("y".to_string()));
    assert_eq!(matched_text(">\"ab\" .", "xab"), Some("a".to_string()));
}

#[test]
fn test_any_is_utf8_aware() {
    let input = "é!";
    let outcome = program(".").find(input.as_bytes(), 1);
    assert_eq!(outcome.tree.unwrap().end, 2);
}

#[test]
fn test_named_classes() {
    assert_eq!(matched_text("[:digit:]+", "ab42c"), Some("42".to_string()));
    assert_eq!(matched_text("[[:digit:][a-f]]+", "xx0fz"), Some("0f".to_string()));
    assert_eq!(matched_text("[^a-z]+", "abc!?d"), Some("!?".to_string()));
}

#[test]
fn test_step_budget_abends() {
    let limits = Limits {
        steps: 5,
        depth: DEFAULT_DEPTH,
    };
    let input = vec![b'a'; 1000];
    let outcome = program("[b]").find_with_limits(&input, 1, limits);
    assert!(outcome.abend);
    assert!(outcome.tree.is_none());
    assert_eq!(outcome.leftover, 1000);
}

const DEFAULT_DEPTH: usize = matcher::DEFAULT_DEPTH_LIMIT;

#[test]
fn test_depth_limit_abends() {
    let mut env = Environment::new();
    assert!(env.load("a = \"x\"\nb = a\nc = b", None).ok);
    let program = env.compile("c").unwrap().program;

    let shallow = Limits {
        steps: matcher::DEFAULT_STEP_LIMIT,
        depth: 2,
    };
    assert!(program.find_with_limits(b"x", 1, shallow).abend);

    let outcome = program.find(b"x", 1);
    let tree = outcome.tree.unwrap();
    assert_eq!(&*tree.name, "c");
    assert_eq!(&*tree.subs[0].name, "b");
    assert_eq!(&*tree.subs[0].subs[0].name, "a");
}
