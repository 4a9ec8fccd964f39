// Tests for trace recording and rendering
use crate::*;

fn digit_program() -> Program {
    let mut env = Environment::new();
    assert!(env.load("d = [0-9]", None).ok);
    env.compile("d+").unwrap().program
}

#[test]
fn test_full_trace() {
    let program = digit_program();
    let trace = program.trace(b"a1", 1);
    assert!(trace.matched);
    assert!(!trace.truncated);
    let text = trace.render(&program, b"a1", TraceStyle::Full);
    assert!(text.starts_with("Expression: d+"));
    assert!(text.contains("d at 1: no match"), "{}", text);
    assert!(text.contains("d at 2: matched \"1\""), "{}", text);
    assert!(text.trim_end().ends_with("Matched"));
}

#[test]
fn test_condensed_trace() {
    let program = digit_program();
    let trace = program.trace(b"x", 1);
    assert!(!trace.matched);
    let text = trace.render(&program, b"x", TraceStyle::Condensed);
    assert!(!text.contains("Expression:"));
    assert!(text.contains("d 1 -"));
    assert!(text.trim_end().ends_with("No match"));
}

#[test]
fn test_json_trace() {
    let program = digit_program();
    let trace = program.trace(b"7", 1);
    let json: serde_json::Value =
        serde_json::from_str(&trace.render(&program, b"7", TraceStyle::Json)).unwrap();
    assert_eq!(json["matched"], true);
    assert_eq!(json["expression"], "d+");
    let events = json["events"].as_array().unwrap();
    assert_eq!(events[0]["type"], "*");
    assert_eq!(events[1]["type"], "d");
    assert_eq!(events[1]["s"], 1);
    assert_eq!(events[1]["e"], 2);
    assert_eq!(events[1]["match"], true);
}

#[test]
fn test_trace_style_names() {
    assert_eq!(TraceStyle::from_name("full").unwrap(), TraceStyle::Full);
    assert_eq!(
        TraceStyle::from_name("fancy"),
        Err(RplError::UnknownTraceStyle("fancy".to_string()))
    );
}
