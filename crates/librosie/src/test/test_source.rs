// Tests for load, loadfile, import and the library path
use std::fs;

use super::{compile, engine};
use crate::{LibpathSource, MatchData};

#[test]
fn test_load_bindings() {
    let e = engine();
    let loaded = e.load("-- digits\nd = [0-9]+").unwrap();
    assert!(loaded.ok);
    assert_eq!(loaded.name, None);
    assert!(loaded.messages.is_empty());
    let p = compile(&e, "d");
    let m = e.match_input(p, 1, "json", b"x12").unwrap();
    assert_eq!(
        m.data,
        MatchData::Buffer(br#"{"type":"d","s":2,"e":4,"data":"12"}"#.to_vec())
    );
}

#[test]
fn test_load_package_source() {
    let e = engine();
    let loaded = e.load("package pets\ncat = \"cat\"").unwrap();
    assert!(loaded.ok);
    assert_eq!(loaded.name.as_deref(), Some("pets"));
    let p = compile(&e, "pets.cat");
    let m = e.match_input(p, 1, "matches", b"a cat").unwrap();
    assert_eq!(m.data, MatchData::Buffer(b"cat".to_vec()));
}

#[test]
fn test_load_failure_is_sanitized() {
    let e = engine();
    let loaded = e.load("x = undefined_thing").unwrap();
    assert!(!loaded.ok);
    let json = loaded.messages.as_json().expect("diagnostics");
    assert!(!json.contains("\"ast\""), "{}", json);
    let records = loaded.messages.records();
    assert_eq!(records[0].who, "loader");
    assert!(records[0].message.contains("undefined_thing"));
}

#[test]
fn test_load_syntax_error() {
    let e = engine();
    let loaded = e.load("d = [0-9").unwrap();
    assert!(!loaded.ok);
    assert!(loaded.messages.has_errors());
}

#[test]
fn test_loadfile() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("animals.rpl");
    fs::write(&path, "package animals\ndog = \"dog\" / \"puppy\"\n").unwrap();

    let e = engine();
    let loaded = e.loadfile(&path).unwrap();
    assert!(loaded.ok, "{:?}", loaded.messages);
    assert_eq!(loaded.name.as_deref(), Some("animals"));
    let p = compile(&e, "animals.dog");
    let m = e.match_input(p, 1, "matches", b"my puppy").unwrap();
    assert_eq!(m.data, MatchData::Buffer(b"puppy".to_vec()));
}

#[test]
fn test_loadfile_missing() {
    let e = engine();
    let loaded = e.loadfile("/definitely/not/here.rpl").unwrap();
    assert!(!loaded.ok);
    assert!(loaded.messages.has_errors());
}

#[test]
fn test_import_from_library() {
    let e = engine();
    let imported = e.import("num", None).unwrap();
    assert!(imported.ok, "{:?}", imported.messages);
    assert_eq!(imported.name.as_deref(), Some("num"));
    let p = compile(&e, "num.int");
    let m = e.match_input(p, 1, "matches", b"x -42").unwrap();
    assert_eq!(m.data, MatchData::Buffer(b"-42".to_vec()));
}

#[test]
fn test_import_alias() {
    let e = engine();
    assert!(e.import("word", Some("w")).unwrap().ok);
    let p = compile(&e, "w.upper");
    let m = e.match_input(p, 1, "matches", b"abc DEF").unwrap();
    assert_eq!(m.data, MatchData::Buffer(b"DEF".to_vec()));
    assert!(e.compile("word.upper").unwrap().pattern.is_none());
}

#[test]
fn test_import_loads_dependencies() {
    let e = engine();
    let imported = e.import("kv", None).unwrap();
    assert!(imported.ok, "{:?}", imported.messages);
    let p = compile(&e, "kv.pair");
    let m = e.match_input(p, 1, "matches", b"set width = 10").unwrap();
    assert_eq!(m.data, MatchData::Buffer(b"width = 10".to_vec()));
}

#[test]
fn test_local_bindings_are_hidden() {
    let e = engine();
    assert!(e.import("num", None).unwrap().ok);
    let compiled = e.compile("num.sign").unwrap();
    assert!(compiled.pattern.is_none());
    assert!(compiled.messages.has_errors());
}

#[test]
fn test_import_missing_package() {
    let e = engine();
    let imported = e.import("no_such_package", None).unwrap();
    assert!(!imported.ok);
    let records = imported.messages.records();
    assert_eq!(records[0].who, "importer");
    assert!(records[0].message.contains("no_such_package"));
}

#[test]
fn test_libpath_get_and_set() {
    let e = engine();
    let initial = e.libpath().unwrap();
    assert!(matches!(
        initial.source,
        LibpathSource::Default | LibpathSource::Environment
    ));

    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("pets.rpl"), "package pets\ncat = \"cat\"\n").unwrap();
    let path = dir.path().to_string_lossy().into_owned();
    e.set_libpath(&path).unwrap();
    let changed = e.libpath().unwrap();
    assert_eq!(changed.path, path);
    assert_eq!(changed.source, LibpathSource::Api);

    assert!(e.import("pets", None).unwrap().ok);
    // the standard library is no longer on the path
    assert!(!e.import("num", None).unwrap().ok);
}

#[test]
fn test_engines_have_separate_environments() {
    let a = engine();
    let b = engine();
    assert!(a.load("only_in_a = \"a\"").unwrap().ok);
    assert!(a.compile("only_in_a").unwrap().pattern.is_some());
    assert!(b.compile("only_in_a").unwrap().pattern.is_none());
}
