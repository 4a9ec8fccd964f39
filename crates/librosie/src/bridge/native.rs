// Native capabilities of the runtime
//
// The rpeg_* functions give the bootstrap program access to the pattern
// compiler. Their state lives in a thread local of the worker thread, so
// each engine has its own environment and compiled programs.
//
// Match input crosses as raw bytes. Diagnostics and import lists come
// back as Lua tables built from their serde form.

use std::cell::RefCell;
use std::sync::Arc;
use std::time::Instant;

use ahash::AHashMap;
use luars::{LuaResult, LuaState, LuaVM, LuaValue};
use rpl::{Encoded, Encoder, Environment, MatchNode, Outcome, Program, TraceStyle, Violation};
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::error::{ERR_NO_ENCODER, ERR_NO_PATTERN};

pub(crate) const ROSIE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Default)]
struct NativeState {
    env: Environment,
    programs: AHashMap<i64, Arc<Program>>,
    next_key: i64,
}

thread_local! {
    static NATIVE: RefCell<NativeState> = RefCell::new(NativeState::default());
}

fn with_native<R>(f: impl FnOnce(&mut NativeState) -> R) -> R {
    NATIVE.with(|cell| f(&mut cell.borrow_mut()))
}

/// The program stored under `key`.
pub(super) fn program(key: i64) -> Option<Arc<Program>> {
    with_native(|n| n.programs.get(&key).cloned())
}

pub(super) fn register_all(vm: &mut LuaVM) -> LuaResult<()> {
    with_native(|n| *n = NativeState::default());
    vm.register_function("rpeg_compile", rpeg_compile)?;
    vm.register_function("rpeg_load", rpeg_load)?;
    vm.register_function("rpeg_load_package", rpeg_load_package)?;
    vm.register_function("rpeg_bind", rpeg_bind)?;
    vm.register_function("rpeg_has_package", rpeg_has_package)?;
    vm.register_function("rpeg_match", rpeg_match)?;
    vm.register_function("rpeg_match_tree", rpeg_match_tree)?;
    vm.register_function("rpeg_trace", rpeg_trace)?;
    vm.register_function("rpeg_release", rpeg_release)?;
    vm.register_function("rpeg_json_encode", rpeg_json_encode)?;
    vm.register_function("rpeg_codes", rpeg_codes)?;
    vm.register_function("rpeg_version", rpeg_version)?;
    vm.register_function("rpeg_builtins", rpeg_builtins)?;
    vm.register_function("rpeg_packages", rpeg_packages)?;
    Ok(())
}

fn bytes_arg(state: &mut LuaState, index: usize, func: &str) -> LuaResult<Vec<u8>> {
    match state.get_arg(index).and_then(|v| v.as_bytes().map(<[u8]>::to_vec)) {
        Some(bytes) => Ok(bytes),
        None => Err(state.error(format!(
            "bad argument #{} to '{}' (string expected)",
            index, func
        ))),
    }
}

/// Source text, names and encoder names. Invalid UTF-8 is replaced.
fn string_arg(state: &mut LuaState, index: usize, func: &str) -> LuaResult<String> {
    let bytes = bytes_arg(state, index, func)?;
    Ok(match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    })
}

fn opt_string_arg(state: &mut LuaState, index: usize) -> Option<String> {
    let value = state.get_arg(index)?;
    value.as_str().map(str::to_owned)
}

fn integer_arg(state: &mut LuaState, index: usize, func: &str) -> LuaResult<i64> {
    match state.get_arg(index).and_then(|v| v.as_integer()) {
        Some(n) => Ok(n),
        None => Err(state.error(format!(
            "bad argument #{} to '{}' (integer expected)",
            index, func
        ))),
    }
}

fn push_string(state: &mut LuaState, s: &str) -> LuaResult<()> {
    let value = state.create_string(s)?;
    state.push_value(value)
}

fn push_opt_string(state: &mut LuaState, s: Option<&str>) -> LuaResult<()> {
    match s {
        Some(s) => push_string(state, s),
        None => state.push_value(LuaValue::nil()),
    }
}

/// Build a Lua value from JSON. Integers stay integers.
fn json_to_lua(state: &mut LuaState, json: &JsonValue) -> LuaResult<LuaValue> {
    Ok(match json {
        JsonValue::Null => LuaValue::nil(),
        JsonValue::Bool(b) => LuaValue::boolean(*b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => LuaValue::integer(i),
            None => LuaValue::number(n.as_f64().unwrap_or(f64::NAN)),
        },
        JsonValue::String(s) => state.create_string(s)?,
        JsonValue::Array(items) => {
            let table = state.create_table(items.len(), 0)?;
            for (i, item) in items.iter().enumerate() {
                let item = json_to_lua(state, item)?;
                state.raw_set(&table, LuaValue::integer(i as i64 + 1), item);
            }
            table
        }
        JsonValue::Object(fields) => {
            let table = state.create_table(0, fields.len())?;
            for (key, field) in fields {
                let key = state.create_string(key)?;
                let field = json_to_lua(state, field)?;
                state.raw_set(&table, key, field);
            }
            table
        }
    })
}

/// Push a list of records (violations, import declarations) as a table.
fn push_records<T: Serialize>(state: &mut LuaState, records: &[T]) -> LuaResult<()> {
    let json = match serde_json::to_value(records) {
        Ok(json) => json,
        Err(e) => return Err(state.error(format!("cannot convert records: {}", e))),
    };
    let table = json_to_lua(state, &json)?;
    state.push_value(table)
}

/// rpeg_compile(expression) -> key | false, messages
fn rpeg_compile(state: &mut LuaState) -> LuaResult<usize> {
    let expression = string_arg(state, 1, "rpeg_compile")?;
    let (key, messages) = with_native(|n| match n.env.compile(&expression) {
        Ok(compiled) => {
            n.next_key += 1;
            let key = n.next_key;
            n.programs.insert(key, Arc::new(compiled.program));
            (Some(key), compiled.warnings)
        }
        Err(violations) => (None, violations),
    });
    match key {
        Some(key) => state.push_value(LuaValue::integer(key))?,
        None => state.push_value(LuaValue::boolean(false))?,
    }
    push_records(state, &messages)?;
    Ok(2)
}

/// rpeg_load(source, origin) -> ok, package | nil, messages, imports
fn rpeg_load(state: &mut LuaState) -> LuaResult<usize> {
    let source = string_arg(state, 1, "rpeg_load")?;
    let origin = opt_string_arg(state, 2);
    let outcome = with_native(|n| n.env.load(&source, origin.as_deref()));
    state.push_value(LuaValue::boolean(outcome.ok))?;
    push_opt_string(state, outcome.package.as_deref())?;
    push_records(state, &outcome.violations)?;
    push_records(state, &outcome.imports)?;
    Ok(4)
}

/// rpeg_load_package(name, source, origin) -> ok, messages, imports
fn rpeg_load_package(state: &mut LuaState) -> LuaResult<usize> {
    let name = string_arg(state, 1, "rpeg_load_package")?;
    let source = string_arg(state, 2, "rpeg_load_package")?;
    let origin = opt_string_arg(state, 3);
    let outcome = with_native(|n| n.env.load_package(&name, &source, origin.as_deref()));
    state.push_value(LuaValue::boolean(outcome.ok))?;
    push_records(state, &outcome.violations)?;
    push_records(state, &outcome.imports)?;
    Ok(3)
}

/// rpeg_bind(package, alias) -> ok, messages
fn rpeg_bind(state: &mut LuaState) -> LuaResult<usize> {
    let name = string_arg(state, 1, "rpeg_bind")?;
    let alias = opt_string_arg(state, 2);
    let result = with_native(|n| n.env.bind(&name, alias.as_deref()));
    let violations: Vec<Violation> = result.err().into_iter().collect();
    state.push_value(LuaValue::boolean(violations.is_empty()))?;
    push_records(state, &violations)?;
    Ok(2)
}

fn rpeg_has_package(state: &mut LuaState) -> LuaResult<usize> {
    let name = string_arg(state, 1, "rpeg_has_package")?;
    let found = with_native(|n| n.env.has_package(&name));
    state.push_value(LuaValue::boolean(found))?;
    Ok(1)
}

fn push_match_status(state: &mut LuaState, code: i32) -> LuaResult<usize> {
    state.push_value(LuaValue::integer(code as i64))?;
    state.push_value(LuaValue::integer(0))?;
    state.push_value(LuaValue::boolean(false))?;
    state.push_value(LuaValue::integer(0))?;
    state.push_value(LuaValue::integer(0))?;
    Ok(5)
}

/// The four values that follow the data of a match.
fn push_match_tail(state: &mut LuaState, outcome: &Outcome, t0: Instant, tmatch: i64) -> LuaResult<usize> {
    state.push_value(LuaValue::integer(outcome.leftover as i64))?;
    state.push_value(LuaValue::boolean(outcome.abend))?;
    state.push_value(LuaValue::integer(t0.elapsed().as_micros() as i64))?;
    state.push_value(LuaValue::integer(tmatch))?;
    Ok(5)
}

/// rpeg_match(key, input, start, encoder) -> data, leftover, abend, ttotal, tmatch
fn rpeg_match(state: &mut LuaState) -> LuaResult<usize> {
    let t0 = Instant::now();
    let key = integer_arg(state, 1, "rpeg_match")?;
    let input = bytes_arg(state, 2, "rpeg_match")?;
    let start = integer_arg(state, 3, "rpeg_match")?.max(1) as usize;
    let encoder = string_arg(state, 4, "rpeg_match")?;

    let Some(program) = program(key) else {
        return push_match_status(state, ERR_NO_PATTERN);
    };
    let Some(encoder) = Encoder::from_name(&encoder) else {
        return push_match_status(state, ERR_NO_ENCODER);
    };

    let t1 = Instant::now();
    let outcome = program.find(&input, start);
    let tmatch = t1.elapsed().as_micros() as i64;
    match encoder.encode(&outcome, &input) {
        Encoded::Bytes(out) => {
            let data = state.create_bytes(&out)?;
            state.push_value(data)?;
        }
        Encoded::Status(code) => state.push_value(LuaValue::integer(code as i64))?,
    }
    push_match_tail(state, &outcome, t0, tmatch)
}

/// Match tree as nested `{type, s, e, data, subs}` tables. Positions are
/// 1-based with `e` exclusive; `subs` is absent on leaves.
fn tree_table(state: &mut LuaState, node: &MatchNode, input: &[u8]) -> LuaResult<LuaValue> {
    let table = state.create_table(0, 5)?;
    let fields = [
        ("type", state.create_string(&node.name)?),
        ("s", LuaValue::integer(node.start as i64 + 1)),
        ("e", LuaValue::integer(node.end as i64 + 1)),
        ("data", state.create_string(&String::from_utf8_lossy(node.text(input)))?),
    ];
    for (key, value) in fields {
        let key = state.create_string(key)?;
        state.raw_set(&table, key, value);
    }
    if !node.subs.is_empty() {
        let subs = state.create_table(node.subs.len(), 0)?;
        for (i, sub) in node.subs.iter().enumerate() {
            let sub = tree_table(state, sub, input)?;
            state.raw_set(&subs, LuaValue::integer(i as i64 + 1), sub);
        }
        let key = state.create_string("subs")?;
        state.raw_set(&table, key, subs);
    }
    Ok(table)
}

/// rpeg_match_tree(key, input, start) -> tree | code, leftover, abend, ttotal, tmatch
fn rpeg_match_tree(state: &mut LuaState) -> LuaResult<usize> {
    let t0 = Instant::now();
    let key = integer_arg(state, 1, "rpeg_match_tree")?;
    let input = bytes_arg(state, 2, "rpeg_match_tree")?;
    let start = integer_arg(state, 3, "rpeg_match_tree")?.max(1) as usize;

    let Some(program) = program(key) else {
        return push_match_status(state, ERR_NO_PATTERN);
    };
    let t1 = Instant::now();
    let outcome = program.find(&input, start);
    let tmatch = t1.elapsed().as_micros() as i64;
    match &outcome.tree {
        Some(tree) => {
            let tree = tree_table(state, tree, &input)?;
            state.push_value(tree)?;
        }
        None => state.push_value(LuaValue::integer(rpl::NO_MATCH as i64))?,
    }
    push_match_tail(state, &outcome, t0, tmatch)
}

/// rpeg_trace(key, input, start, style) -> matched, trace
fn rpeg_trace(state: &mut LuaState) -> LuaResult<usize> {
    let key = integer_arg(state, 1, "rpeg_trace")?;
    let input = bytes_arg(state, 2, "rpeg_trace")?;
    let start = integer_arg(state, 3, "rpeg_trace")?.max(1) as usize;
    let style_name = string_arg(state, 4, "rpeg_trace")?;

    let style = match TraceStyle::from_name(&style_name) {
        Ok(style) => style,
        Err(e) => return Err(state.error(e.to_string())),
    };
    let Some(program) = program(key) else {
        return Err(state.error(format!("no compiled pattern with key {}", key)));
    };
    let trace = program.trace(&input, start);
    state.push_value(LuaValue::boolean(trace.matched))?;
    push_string(state, &trace.render(&program, &input, style))?;
    Ok(2)
}

fn rpeg_release(state: &mut LuaState) -> LuaResult<usize> {
    let key = integer_arg(state, 1, "rpeg_release")?;
    with_native(|n| n.programs.remove(&key));
    Ok(0)
}

/// rpeg_json_encode(value, pretty) -> text
fn rpeg_json_encode(state: &mut LuaState) -> LuaResult<usize> {
    let value = state.get_arg(1).unwrap_or_default();
    let pretty = state
        .get_arg(2)
        .and_then(|v| v.as_boolean())
        .unwrap_or(false);
    match luars::serde::lua_to_json_string(&value, pretty) {
        Ok(text) => push_string(state, &text)?,
        Err(e) => return Err(state.error(format!("json: {}", e))),
    }
    Ok(1)
}

/// rpeg_codes() -> NO_MATCH, MATCHED, ERR_NO_ENCODER, ERR_NO_PATTERN
fn rpeg_codes(state: &mut LuaState) -> LuaResult<usize> {
    for code in [rpl::NO_MATCH, rpl::MATCHED, ERR_NO_ENCODER, ERR_NO_PATTERN] {
        state.push_value(LuaValue::integer(code as i64))?;
    }
    Ok(4)
}

fn rpeg_version(state: &mut LuaState) -> LuaResult<usize> {
    push_string(state, ROSIE_VERSION)?;
    push_string(state, rpl::RPL_VERSION)?;
    Ok(2)
}

fn rpeg_builtins(state: &mut LuaState) -> LuaResult<usize> {
    for encoder in Encoder::ALL {
        push_string(state, encoder.name())?;
    }
    Ok(Encoder::ALL.len())
}

fn rpeg_packages(state: &mut LuaState) -> LuaResult<usize> {
    let names = with_native(|n| n.env.package_names().join(","));
    push_string(state, &names)?;
    Ok(1)
}
