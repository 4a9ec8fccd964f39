// Engine worker thread
// Owns the VM, boots the bootstrap program and serves calls until the
// engine closes the channel.

use luars::{LuaError, LuaResult, LuaVM, LuaValue, SafeOption, Stdlib};
use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use super::native;
use super::{Call, Compiled, Data, Fault, FileResult, Loaded, Matched, RcRead, Traced};
use crate::home::{Installation, LibpathSource};

type Outcome<T> = std::result::Result<T, Fault>;

/// Entry point of the worker thread.
pub(super) fn run(
    installation: Installation,
    mut rx: mpsc::UnboundedReceiver<Call>,
    ready: oneshot::Sender<std::result::Result<(), &'static str>>,
) {
    let mut runtime = match Runtime::boot(&installation) {
        Ok(runtime) => runtime,
        Err(msg) => {
            let _ = ready.send(Err(msg));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        return;
    }
    while let Some(call) = rx.blocking_recv() {
        runtime.dispatch(call);
    }
    debug!("engine worker shutting down");
}

/// Values the worker needs on every call. All of them are reachable from
/// the global `rosie` table, which keeps them alive.
struct Runtime {
    rosie: LuaValue,
    engine: LuaValue,
    match_fn: LuaValue,
    strip_each: LuaValue,
    heap_kb: LuaValue,
    collect: LuaValue,
    vm: Box<LuaVM>,
}

impl Runtime {
    /// Failures are logged here with their detail; the caller gets a
    /// fixed description.
    fn boot(installation: &Installation) -> std::result::Result<Runtime, &'static str> {
        let source = std::fs::read_to_string(installation.bootscript()).map_err(|e| {
            error!(
                "cannot read {}: {}",
                installation.bootscript().display(),
                e
            );
            "cannot read the bootstrap program"
        })?;

        let mut vm = LuaVM::new(SafeOption::default());
        vm.open_stdlib(Stdlib::All).map_err(|e| {
            error!("cannot open standard library: {}", e);
            "cannot open the runtime standard library"
        })?;
        native::register_all(&mut vm).map_err(|e| {
            error!("cannot register native functions: {}", e);
            "cannot register native functions"
        })?;

        let rosie = match Self::run_boot(&mut vm, installation, &source) {
            Ok(rosie) => rosie,
            Err(e) => {
                let full = vm.into_full_error(e);
                error!("bootstrap failed: {}", full);
                return Err("bootstrap program failed");
            }
        };

        let mut runtime = Runtime {
            rosie,
            engine: LuaValue::nil(),
            match_fn: LuaValue::nil(),
            strip_each: LuaValue::nil(),
            heap_kb: LuaValue::nil(),
            collect: LuaValue::nil(),
            vm,
        };
        runtime.resolve_anchors().map_err(|fault| {
            error!("bootstrap incomplete: {:?}", fault);
            "bootstrap program is incomplete"
        })?;
        Ok(runtime)
    }

    fn run_boot(vm: &mut LuaVM, installation: &Installation, source: &str) -> LuaResult<LuaValue> {
        let chunk = vm.execute(source)?;
        let boot = chunk.first().copied().unwrap_or_default();
        if !boot.is_function() {
            return Err(vm.error("bootstrap program did not return a function"));
        }
        let args = vec![
            vm.create_string(&installation.home().to_string_lossy())?,
            vm.create_string(installation.libpath())?,
            vm.create_string(installation.libpath_source().as_str())?,
            vm.create_string(&installation.rcfile().to_string_lossy())?,
        ];
        let results = vm.call_raw(boot, args)?;
        Ok(results.first().copied().unwrap_or_default())
    }

    fn resolve_anchors(&mut self) -> Outcome<()> {
        let new_engine = self.path(self.rosie, &["engine", "new"])?;
        let engine = self.call1(new_engine, vec![])?;
        let rosie = self
            .vm
            .to_table_ref(self.rosie)
            .ok_or(Fault::Shape("rosie is not a table"))?;
        rosie
            .set("current_engine", engine)
            .map_err(|e| self.fault(e))?;
        self.engine = engine;
        self.match_fn = self.path(engine, &["match"])?;
        self.strip_each = self.path(self.rosie, &["env", "violation", "strip_each"])?;
        self.heap_kb = self.path(self.rosie, &["env", "heap_kb"])?;
        self.collect = self.path(self.rosie, &["env", "collect"])?;
        Ok(())
    }

    /// Log a runtime error with its full text and turn it into a fault.
    fn fault(&mut self, e: LuaError) -> Fault {
        let full = self.vm.into_full_error(e);
        error!("runtime error: {}", full);
        Fault::Runtime
    }

    fn path(&mut self, root: LuaValue, keys: &[&str]) -> Outcome<LuaValue> {
        let mut value = root;
        for key in keys {
            let table = self
                .vm
                .to_table_ref(value)
                .ok_or(Fault::Shape("expected a table in the rosie environment"))?;
            value = table.get(key).map_err(|e| self.fault(e))?;
        }
        if value.is_nil() {
            return Err(Fault::Shape("missing entry in the rosie environment"));
        }
        Ok(value)
    }

    fn call(&mut self, func: LuaValue, args: Vec<LuaValue>) -> Outcome<Vec<LuaValue>> {
        if !func.is_function() {
            return Err(Fault::Shape("expected a function"));
        }
        self.vm.call_raw(func, args).map_err(|e| self.fault(e))
    }

    fn call1(&mut self, func: LuaValue, args: Vec<LuaValue>) -> Outcome<LuaValue> {
        let results = self.call(func, args)?;
        Ok(results.first().copied().unwrap_or_default())
    }

    /// Call engine method `name` with the engine object as first argument.
    fn method(&mut self, name: &str, mut args: Vec<LuaValue>) -> Outcome<Vec<LuaValue>> {
        let func = self.path(self.engine, &[name])?;
        args.insert(0, self.engine);
        let mut results = self.call(func, args)?;
        // missing trailing results read as nil
        results.resize(8, LuaValue::nil());
        Ok(results)
    }

    fn string(&mut self, s: &str) -> Outcome<LuaValue> {
        self.vm.create_string(s).map_err(|e| self.fault(e))
    }

    fn bytes(&mut self, b: &[u8]) -> Outcome<LuaValue> {
        self.vm.create_bytes(b).map_err(|e| self.fault(e))
    }

    fn encode(&mut self, value: LuaValue) -> Outcome<String> {
        luars::serde::lua_to_json_string(&value, false).map_err(|e| {
            error!("json encoding failed: {}", e);
            Fault::Encode
        })
    }

    /// JSON for a list of messages, `None` when the list is empty.
    fn messages(&mut self, value: LuaValue, sanitize: bool) -> Outcome<Option<String>> {
        if !value.is_table() {
            return Ok(None);
        }
        let value = if sanitize {
            self.call1(self.strip_each, vec![value])?
        } else {
            value
        };
        let json = luars::serde::lua_to_json(&value).map_err(|e| {
            error!("json encoding failed: {}", e);
            Fault::Encode
        })?;
        match json {
            JsonValue::Array(items) if items.is_empty() => Ok(None),
            JsonValue::Object(fields) if fields.is_empty() => Ok(None),
            json => Ok(Some(json.to_string())),
        }
    }

    fn heap_kb(&mut self) -> Outcome<i64> {
        let usage = self.call1(self.heap_kb, vec![])?;
        usage
            .as_number()
            .or_else(|| usage.as_integer().map(|kb| kb as f64))
            .map(|kb| kb as i64)
            .ok_or(Fault::Shape("heap usage is not a number"))
    }

    fn collect(&mut self) -> Outcome<()> {
        self.call(self.collect, vec![])?;
        Ok(())
    }

    fn dispatch(&mut self, call: Call) {
        match call {
            Call::Compile { expression, reply } => {
                let _ = reply.send(self.compile(&expression));
            }
            Call::Release { key } => {
                if let Err(fault) = self.method("release", vec![LuaValue::integer(key)]) {
                    debug!("release of pattern {} failed: {:?}", key, fault);
                }
            }
            Call::Match {
                key,
                input,
                start,
                encoder,
                reply,
            } => {
                let _ = reply.send(self.general_match(key, &input, start, &encoder));
            }
            Call::Trace {
                key,
                input,
                start,
                style,
                reply,
            } => {
                let _ = reply.send(self.trace(key, &input, start, &style));
            }
            Call::Load { source, reply } => {
                let _ = reply.send(self.load("load", vec![source], None));
            }
            Call::LoadFile { path, reply } => {
                let _ = reply.send(self.load("loadfile", vec![path], None));
            }
            Call::Import { name, alias, reply } => {
                let _ = reply.send(self.load("import", vec![name], alias));
            }
            Call::MatchFile {
                key,
                encoder,
                infile,
                outfile,
                errfile,
                wholefile,
                reply,
            } => {
                let files = [encoder, infile, outfile, errfile];
                let _ = reply.send(self.matchfile(key, &files, wholefile));
            }
            Call::Config { reply } => {
                let _ = reply.send(self.config());
            }
            Call::GetLibpath { reply } => {
                let _ = reply.send(self.libpath());
            }
            Call::SetLibpath {
                path,
                source,
                reply,
            } => {
                let _ = reply.send(self.set_libpath(&path, source));
            }
            Call::ReadRcfile { filename, reply } => {
                let _ = reply.send(self.read_rcfile(&filename));
            }
            Call::ExecuteRcfile {
                filename,
                is_default,
                reply,
            } => {
                let _ = reply.send(self.execute_rcfile(&filename, is_default));
            }
            Call::Usage { collect, reply } => {
                let usage = if collect {
                    // the second pass reclaims what the first one finalized
                    self.collect()
                        .and_then(|_| self.collect())
                        .and_then(|_| self.heap_kb())
                } else {
                    self.heap_kb()
                };
                let _ = reply.send(usage);
            }
        }
    }

    fn compile(&mut self, expression: &str) -> Outcome<Compiled> {
        let expression = self.string(expression)?;
        let results = self.method("compile", vec![expression])?;
        let messages = self.messages(results[1], false)?;
        match results[0].as_integer() {
            Some(key) => {
                let program = native::program(key)
                    .ok_or(Fault::Shape("compiled pattern is missing"))?;
                Ok(Compiled {
                    key: Some(key),
                    program: Some(program),
                    messages,
                })
            }
            None => Ok(Compiled {
                key: None,
                program: None,
                messages,
            }),
        }
    }

    fn general_match(&mut self, key: i64, input: &[u8], start: i64, encoder: &str) -> Outcome<Matched> {
        let args = vec![
            self.engine,
            LuaValue::integer(key),
            self.bytes(input)?,
            LuaValue::integer(start),
            self.string(encoder)?,
        ];
        let mut results = self.call(self.match_fn, args)?;
        results.resize(5, LuaValue::nil());
        let data = if let Some(code) = results[0].as_integer() {
            Data::Status(code as i32)
        } else if let Some(bytes) = results[0].as_bytes() {
            Data::Text(bytes.to_vec())
        } else {
            return Err(Fault::Shape("match returned neither a string nor a code"));
        };
        Ok(Matched {
            data,
            leftover: results[1].as_integer().unwrap_or(0),
            abend: results[2].as_boolean().unwrap_or(false),
            ttotal: results[3].as_integer().unwrap_or(0),
            tmatch: results[4].as_integer().unwrap_or(0),
        })
    }

    fn trace(&mut self, key: i64, input: &[u8], start: i64, style: &str) -> Outcome<Traced> {
        let args = vec![
            LuaValue::integer(key),
            self.bytes(input)?,
            LuaValue::integer(start),
            self.string(style)?,
        ];
        let results = self.method("trace", args)?;
        let valid = results[0].as_boolean().unwrap_or(false);
        let matched = results[1].as_boolean().unwrap_or(false);
        let text = match text_of(results[2]) {
            Some(text) => text,
            None if results[2].is_table() => self.encode(results[2])?,
            None => return Err(Fault::Shape("trace returned neither text nor a table")),
        };
        Ok(Traced {
            valid,
            matched,
            text,
        })
    }

    fn load(&mut self, method: &str, args: Vec<String>, alias: Option<String>) -> Outcome<Loaded> {
        let mut values = Vec::with_capacity(args.len() + 1);
        for arg in &args {
            values.push(self.string(arg)?);
        }
        if let Some(alias) = alias {
            values.push(self.string(&alias)?);
        }
        let results = self.method(method, values)?;
        let ok = results[0].as_boolean().unwrap_or(false);
        let name = text_of(results[1]);
        let messages = self.messages(results[2], true)?;
        Ok(Loaded { ok, name, messages })
    }

    fn matchfile(&mut self, key: i64, files: &[String; 4], wholefile: bool) -> Outcome<FileResult> {
        let mut args = vec![LuaValue::integer(key)];
        for name in files {
            args.push(self.string(name)?);
        }
        args.push(LuaValue::boolean(wholefile));
        let results = self.method("matchfile", args)?;
        if results[0].is_nil() {
            let msg = text_of(results[1]).unwrap_or_else(|| "matchfile failed".to_string());
            return Ok(FileResult::Fault(msg));
        }
        let count = |v: LuaValue| v.as_integer().ok_or(Fault::Shape("matchfile count is not an integer"));
        Ok(FileResult::Counts {
            cin: count(results[0])?,
            cout: count(results[1])?,
            cerr: count(results[2])?,
        })
    }

    fn config(&mut self) -> Outcome<String> {
        let results = self.method("config", vec![])?;
        self.encode(results[0])
    }

    fn libpath(&mut self) -> Outcome<(String, LibpathSource)> {
        let results = self.method("get_libpath", vec![])?;
        let path = text_of(results[0]).ok_or(Fault::Shape("libpath is not a string"))?;
        let source = text_of(results[1])
            .and_then(|s| LibpathSource::from_name(&s))
            .unwrap_or(LibpathSource::Api);
        Ok((path, source))
    }

    fn set_libpath(&mut self, path: &str, source: LibpathSource) -> Outcome<()> {
        let args = vec![self.string(path)?, self.string(source.as_str())?];
        self.method("set_libpath", args)?;
        Ok(())
    }

    fn read_rcfile(&mut self, filename: &str) -> Outcome<RcRead> {
        let filename = self.string(filename)?;
        let results = self.method("read_rcfile", vec![filename])?;
        let exists = results[0].as_boolean().unwrap_or(false);
        let options = if results[1].is_table() {
            Some(self.encode(results[1])?)
        } else {
            None
        };
        Ok(RcRead { exists, options })
    }

    fn execute_rcfile(&mut self, filename: &str, is_default: bool) -> Outcome<(bool, bool)> {
        let args = vec![
            self.string(filename)?,
            LuaValue::boolean(is_default),
            self.string(LibpathSource::RcFile.as_str())?,
        ];
        let results = self.method("execute_rcfile", args)?;
        Ok((
            results[0].as_boolean().unwrap_or(false),
            results[1].as_boolean().unwrap_or(false),
        ))
    }
}

fn text_of(value: LuaValue) -> Option<String> {
    value
        .as_bytes()
        .map(|b| String::from_utf8_lossy(b).into_owned())
}
