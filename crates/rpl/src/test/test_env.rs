// Tests for loading, packages and name resolution
use crate::*;

#[test]
fn test_load_and_compile_bindings() {
    let mut env = Environment::new();
    let out = env.load("digits = [0-9]+\nalias sep = \",\"\npair = digits sep digits", None);
    assert!(out.ok, "{:?}", out.violations);
    assert_eq!(out.package, None);

    let compiled = env.compile("pair").unwrap();
    assert!(compiled.warnings.is_empty());
    let outcome = compiled.program.find(b"12,34", 1);
    let tree = outcome.tree.unwrap();
    assert_eq!(&*tree.name, "pair");
    // aliases do not produce match nodes
    let names: Vec<&str> = tree.subs.iter().map(|n| &*n.name).collect();
    assert_eq!(names, vec!["digits", "digits"]);
    assert_eq!((tree.subs[1].start, tree.subs[1].end), (3, 5));
}

#[test]
fn test_comments_and_multiline_expressions() {
    let mut env = Environment::new();
    let src = "-- a comment\nword = [:alpha:]+ -- trailing\n  \"!\"\nother = word";
    let out = env.load(src, None);
    assert!(out.ok, "{:?}", out.violations);
    let outcome = env.compile("word").unwrap().program.find(b"hey!", 1);
    assert_eq!(outcome.leftover, 0);
}

#[test]
fn test_undefined_identifier_at_load() {
    let mut env = Environment::new();
    let out = env.load("x = y", Some("bad.rpl"));
    assert!(!out.ok);
    assert_eq!(out.violations.len(), 1);
    let v = &out.violations[0];
    assert_eq!(v.who, Who::Loader);
    assert!(v.message.contains("undefined identifier: y"));
    assert_eq!(v.origin.as_deref(), Some("bad.rpl"));
    // nothing was committed
    assert!(env.compile("x").is_err());
}

#[test]
fn test_duplicate_definition() {
    let mut env = Environment::new();
    let out = env.load("x = \"a\"\nx = \"b\"", None);
    assert!(!out.ok);
    assert!(out.violations[0].message.contains("already defined"));
}

#[test]
fn test_compile_errors_are_violations() {
    let env = Environment::new();
    let errs = env.compile("[0-9").unwrap_err();
    assert_eq!(errs[0].who, Who::Parser);
    assert!(errs[0].message.contains("missing ']'"));

    let errs = env.compile("nosuch").unwrap_err();
    assert_eq!(errs[0].who, Who::Compiler);
    assert!(errs[0].message.contains("undefined identifier"));
    assert_eq!(errs[0].ast.as_deref(), Some("nosuch"));
}

#[test]
fn test_empty_match_warning() {
    let env = Environment::new();
    let compiled = env.compile("\"a\"*").unwrap();
    assert_eq!(compiled.warnings.len(), 1);
    assert_eq!(compiled.warnings[0].severity, Severity::Warning);
}

#[test]
fn test_package_load_and_qualified_reference() {
    let mut env = Environment::new();
    let out = env.load("package num\nint = [0-9]+", None);
    assert!(out.ok);
    assert_eq!(out.package.as_deref(), Some("num"));
    assert!(env.has_package("num"));

    let program = env.compile("num.int").unwrap().program;
    assert_eq!(program.type_name(), "num.int");
}

#[test]
fn test_local_bindings_are_hidden() {
    let mut env = Environment::new();
    let out = env.load("package p\nlocal hidden = \"h\"\nshown = hidden", None);
    assert!(out.ok, "{:?}", out.violations);

    let errs = env.compile("p.hidden").unwrap_err();
    assert!(errs[0].message.contains("local to package"));

    let outcome = env.compile("p.shown").unwrap().program.find(b"h", 1);
    let tree = outcome.tree.unwrap();
    assert_eq!(&*tree.name, "p.shown");
    assert_eq!(&*tree.subs[0].name, "p.hidden");
}

#[test]
fn test_recursive_definition_rejected_at_compile() {
    let mut env = Environment::new();
    assert!(env.load("a = \"x\" b\nb = \"y\" a", None).ok);
    let errs = env.compile("a").unwrap_err();
    assert!(errs[0].message.contains("recursive definition"));
}

#[test]
fn test_load_package_and_bind_alias() {
    let mut env = Environment::new();
    let out = env.load_package("num", "package num\nint = [0-9]+", Some("num.rpl"));
    assert!(out.ok);
    assert_eq!(env.package_origin("num"), Some("num.rpl"));
    // not visible until bound
    assert!(env.compile("num.int").is_err());

    env.bind("num", Some("n")).unwrap();
    let program = env.compile("n.int").unwrap().program;
    assert_eq!(program.type_name(), "num.int");

    assert!(env.bind("missing", None).is_err());
}

#[test]
fn test_load_package_name_mismatch() {
    let mut env = Environment::new();
    let out = env.load_package("word", "package num\nint = [0-9]+", None);
    assert!(!out.ok);
    assert_eq!(out.violations[0].who, Who::Importer);
    assert!(!env.has_package("num"));
}

#[test]
fn test_import_declarations_are_reported() {
    let mut env = Environment::new();
    let out = env.load("import num as n, word\nx = n.int", None);
    assert!(out.ok, "{:?}", out.violations);
    assert_eq!(out.imports.len(), 2);
    assert_eq!(out.imports[0].name, "num");
    assert_eq!(out.imports[0].alias.as_deref(), Some("n"));

    // the package itself is not loaded yet
    let errs = env.compile("x").unwrap_err();
    assert!(errs[0].message.contains("not loaded"));

    assert!(env.load_package("num", "package num\nint = [0-9]+", None).ok);
    assert!(env.compile("x").is_ok());
}

#[test]
fn test_violations_serialize_as_json_array() {
    let env = Environment::new();
    let errs = env.compile("\"abc").unwrap_err();
    let json = serde_json::to_value(&errs).unwrap();
    let record = &json[0];
    assert_eq!(record["who"], "parser");
    assert_eq!(record["severity"], "error");
    assert!(record["message"].as_str().unwrap().contains("unterminated"));
}

#[test]
fn test_long_reference_chain_is_rejected() {
    let mut env = Environment::new();
    let mut src = String::from("b0 = \"x\"\n");
    for i in 1..600 {
        src.push_str(&format!("alias b{} = b{}\n", i, i - 1));
    }
    let out = env.load(&src, None);
    assert!(out.ok, "{:?}", out.violations);

    let errs = env.compile("b599").unwrap_err();
    assert_eq!(errs.len(), 1);
    assert_eq!(errs[0].who, Who::Compiler);
    assert!(errs[0].message.contains("nests more than"));

    let compiled = env.compile("b50").unwrap();
    assert_eq!(compiled.program.find(b"x", 1).leftover, 0);
}

#[test]
fn test_shared_binding_depth_counts_at_each_use() {
    let mut env = Environment::new();
    let mut src = String::from("c0 = \"y\"\n");
    for i in 1..350 {
        src.push_str(&format!("alias c{} = c{}\n", i, i - 1));
    }
    // the second use sits 60 predicates further down
    src.push_str(&format!("alias deep = c349 {}c349\n", ">".repeat(60)));
    assert!(env.load(&src, None).ok);

    assert!(env.compile("c349").is_ok());
    let errs = env.compile("deep").unwrap_err();
    assert!(errs[0].message.contains("nests more than"));
}
