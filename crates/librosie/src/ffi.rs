//! C interface.
//!
//! Every function returns a status code (`SUCCESS` or one of the `ERR_*`
//! codes) and writes its results through out-pointers. Strings handed to
//! the caller are caller-owned and must be released with
//! [`rosie_free_string`], except the match data in [`RosieMatch`], which
//! the engine keeps until its next match or until it is finalized.
//!
//! Panics never cross the boundary; they are reported as
//! `ERR_ENGINE_CALL_FAILED`.

use std::ffi::{CStr, c_char};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;

use tracing::error;

use crate::engine::{Engine, MatchData};
use crate::error::{ERR_ENGINE_CALL_FAILED, ERR_NO_ENCODER, ERR_OUT_OF_MEMORY, SUCCESS};
use crate::string::{RosieString, owned_or_null};

/// Diagnostics for a call that failed in the plumbing, not in the pattern
/// language.
const FAULT_MESSAGE: &str = "call to the rosie engine failed (see log)";

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RosieMatch {
    pub data: RosieString,
    pub leftover: i32,
    pub abend: i32,
    pub ttotal: i32,
    pub tmatch: i32,
}

fn guarded(name: &str, f: impl FnOnce() -> i32) -> i32 {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(code) => code,
        Err(_) => {
            error!("panic in {}", name);
            ERR_ENGINE_CALL_FAILED
        }
    }
}

unsafe fn put<T>(out: *mut T, value: T) {
    if !out.is_null() {
        unsafe { out.write(value) };
    }
}

unsafe fn engine_ref<'a>(engine: *mut Engine) -> Option<&'a Engine> {
    unsafe { engine.as_ref() }
}

unsafe fn text_arg(s: *const RosieString) -> Option<String> {
    let s = unsafe { s.as_ref() }?;
    unsafe { s.to_str_lossy() }
}

unsafe fn cstr_arg(s: *const c_char) -> Option<String> {
    if s.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(s) }.to_string_lossy().into_owned())
}

/// Allocate a caller-owned copy of `len` bytes at `msg`.
///
/// # Safety
/// `msg` must be valid for `len` bytes, or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rosie_new_string(msg: *const u8, len: usize) -> RosieString {
    if msg.is_null() {
        return RosieString::null();
    }
    let bytes = unsafe { std::slice::from_raw_parts(msg, len) };
    RosieString::owned(bytes)
}

/// A borrowed view of `len` bytes at `msg`. Must not be freed. A length
/// over `u32::MAX` gives the status string `ERR_OUT_OF_MEMORY`.
#[unsafe(no_mangle)]
pub extern "C" fn rosie_string_from(msg: *const u8, len: usize) -> RosieString {
    RosieString::view(msg, len)
}

/// # Safety
/// `s` must be a string this library allocated, freed at most once.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rosie_free_string(s: RosieString) {
    unsafe { s.free() };
}

/// Create an engine. On failure returns null and, when `messages` is not
/// null, a description of the problem.
///
/// # Safety
/// `messages` must be null or valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rosie_new(messages: *mut RosieString) -> *mut Engine {
    let created = catch_unwind(Engine::new);
    match created {
        Ok(Ok(engine)) => {
            unsafe { put(messages, RosieString::null()) };
            Box::into_raw(Box::new(engine))
        }
        Ok(Err(e)) => {
            unsafe { put(messages, RosieString::copied(&e.to_string())) };
            std::ptr::null_mut()
        }
        Err(_) => {
            error!("panic in rosie_new");
            unsafe { put(messages, RosieString::copied(FAULT_MESSAGE)) };
            std::ptr::null_mut()
        }
    }
}

/// Destroy an engine. No other call may be in progress on it, and none may
/// follow.
///
/// # Safety
/// `engine` must come from [`rosie_new`] and not have been finalized.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rosie_finalize(engine: *mut Engine) {
    if engine.is_null() {
        return;
    }
    let engine = unsafe { Box::from_raw(engine) };
    if catch_unwind(AssertUnwindSafe(|| engine.finalize())).is_err() {
        error!("panic in rosie_finalize");
    }
}

/// Compile `expression`. `*pat` is 0 when it does not compile, in which
/// case `messages` explains why.
///
/// # Safety
/// Pointers must be null or valid; `engine` as for [`rosie_finalize`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rosie_compile(
    engine: *mut Engine,
    expression: *const RosieString,
    pat: *mut i32,
    messages: *mut RosieString,
) -> i32 {
    guarded("rosie_compile", || {
        unsafe { put(messages, RosieString::null()) };
        let Some(engine) = (unsafe { engine_ref(engine) }) else {
            return ERR_ENGINE_CALL_FAILED;
        };
        if pat.is_null() {
            return ERR_ENGINE_CALL_FAILED;
        }
        let Some(expression) = (unsafe { text_arg(expression) }) else {
            unsafe { put(pat, 0) };
            return ERR_ENGINE_CALL_FAILED;
        };
        match engine.compile(&expression) {
            Ok(compiled) => {
                unsafe {
                    put(pat, compiled.pattern.map_or(0, |p| p.raw()));
                    put(messages, owned_or_null(compiled.messages.into_json()));
                }
                SUCCESS
            }
            Err(e) => {
                unsafe {
                    put(pat, 0);
                    put(messages, RosieString::copied(FAULT_MESSAGE));
                }
                e.code()
            }
        }
    })
}

/// Release a compiled pattern.
///
/// # Safety
/// `engine` as for [`rosie_finalize`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rosie_free_rplx(engine: *mut Engine, pat: i32) -> i32 {
    guarded("rosie_free_rplx", || {
        let Some(engine) = (unsafe { engine_ref(engine) }) else {
            return ERR_ENGINE_CALL_FAILED;
        };
        engine.free_pattern(engine.handle_from_raw(pat));
        SUCCESS
    })
}

/// Match `input` against pattern `pat` from `start` (1-based). An invalid
/// pattern or encoder is reported in `match.data` as a null string whose
/// length is the status code.
///
/// # Safety
/// `input` must describe readable memory; `encoder` must be null or a
/// NUL-terminated string; `m` must be valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rosie_match(
    engine: *mut Engine,
    pat: i32,
    start: i32,
    encoder: *const c_char,
    input: *const RosieString,
    m: *mut RosieMatch,
) -> i32 {
    guarded("rosie_match", || {
        let Some(engine) = (unsafe { engine_ref(engine) }) else {
            return ERR_ENGINE_CALL_FAILED;
        };
        if m.is_null() {
            return ERR_ENGINE_CALL_FAILED;
        }
        let Some(encoder) = (unsafe { cstr_arg(encoder) }) else {
            let no_encoder = RosieMatch {
                data: RosieString::status(ERR_NO_ENCODER),
                ..Default::default()
            };
            unsafe { put(m, no_encoder) };
            return SUCCESS;
        };
        let Some(bytes) = (unsafe { input.as_ref().and_then(|s| s.as_bytes()) }) else {
            return ERR_ENGINE_CALL_FAILED;
        };
        let handle = engine.handle_from_raw(pat);
        match engine.match_transient(handle, start, &encoder, bytes) {
            Ok((lent, result)) => {
                let data = match (lent, &result.data) {
                    (Some((ptr, len)), _) => {
                        let data = RosieString::view(ptr, len);
                        if data.is_null() {
                            return ERR_OUT_OF_MEMORY;
                        }
                        data
                    }
                    (None, MatchData::Status(code)) => RosieString::status(*code),
                    (None, _) => return ERR_ENGINE_CALL_FAILED,
                };
                unsafe {
                    put(m, RosieMatch {
                        data,
                        leftover: result.leftover,
                        abend: result.abend as i32,
                        ttotal: result.ttotal,
                        tmatch: result.tmatch,
                    })
                };
                SUCCESS
            }
            Err(e) => e.code(),
        }
    })
}

/// Trace a match. `trace` receives a caller-owned string, or a status
/// string when the pattern or style is not usable.
///
/// # Safety
/// As for [`rosie_match`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rosie_trace(
    engine: *mut Engine,
    pat: i32,
    start: i32,
    trace_style: *const c_char,
    input: *const RosieString,
    matched: *mut i32,
    trace: *mut RosieString,
) -> i32 {
    guarded("rosie_trace", || {
        let Some(engine) = (unsafe { engine_ref(engine) }) else {
            return ERR_ENGINE_CALL_FAILED;
        };
        unsafe { put(matched, 0) };
        let Some(style) = (unsafe { cstr_arg(trace_style) }) else {
            unsafe { put(trace, RosieString::status(ERR_NO_ENCODER)) };
            return SUCCESS;
        };
        let Some(bytes) = (unsafe { input.as_ref().and_then(|s| s.as_bytes()) }) else {
            return ERR_ENGINE_CALL_FAILED;
        };
        match engine.trace(engine.handle_from_raw(pat), start, &style, bytes) {
            Ok(result) => {
                let out = match result.data {
                    MatchData::Status(code) => RosieString::status(code),
                    MatchData::Text(text) => RosieString::owned(text),
                    MatchData::Buffer(bytes) => RosieString::owned(bytes),
                };
                unsafe {
                    put(matched, result.matched as i32);
                    put(trace, out);
                }
                SUCCESS
            }
            Err(e) => {
                unsafe { put(trace, RosieString::null()) };
                e.code()
            }
        }
    })
}

/// Shared tail of load, loadfile and import.
unsafe fn report_loaded(
    result: crate::Result<crate::engine::Loaded>,
    ok: *mut i32,
    pkgname: *mut RosieString,
    messages: *mut RosieString,
) -> i32 {
    match result {
        Ok(loaded) => {
            unsafe {
                put(ok, loaded.ok as i32);
                put(pkgname, owned_or_null(loaded.name));
                put(messages, owned_or_null(loaded.messages.into_json()));
            }
            SUCCESS
        }
        Err(e) => {
            unsafe {
                put(ok, 0);
                put(pkgname, RosieString::null());
                put(messages, RosieString::copied(FAULT_MESSAGE));
            }
            e.code()
        }
    }
}

/// Load RPL source.
///
/// # Safety
/// Pointers must be null or valid; `engine` as for [`rosie_finalize`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rosie_load(
    engine: *mut Engine,
    ok: *mut i32,
    src: *const RosieString,
    pkgname: *mut RosieString,
    messages: *mut RosieString,
) -> i32 {
    guarded("rosie_load", || {
        let Some(engine) = (unsafe { engine_ref(engine) }) else {
            return ERR_ENGINE_CALL_FAILED;
        };
        let Some(src) = (unsafe { text_arg(src) }) else {
            return ERR_ENGINE_CALL_FAILED;
        };
        unsafe { report_loaded(engine.load(&src), ok, pkgname, messages) }
    })
}

/// Load RPL source from the file `fname`.
///
/// # Safety
/// As for [`rosie_load`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rosie_loadfile(
    engine: *mut Engine,
    ok: *mut i32,
    fname: *const RosieString,
    pkgname: *mut RosieString,
    messages: *mut RosieString,
) -> i32 {
    guarded("rosie_loadfile", || {
        let Some(engine) = (unsafe { engine_ref(engine) }) else {
            return ERR_ENGINE_CALL_FAILED;
        };
        let Some(fname) = (unsafe { text_arg(fname) }) else {
            return ERR_ENGINE_CALL_FAILED;
        };
        unsafe { report_loaded(engine.loadfile(fname), ok, pkgname, messages) }
    })
}

/// Import package `pkgname`, optionally as `as_name` (null for none).
///
/// # Safety
/// As for [`rosie_load`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rosie_import(
    engine: *mut Engine,
    ok: *mut i32,
    pkgname: *const RosieString,
    as_name: *const RosieString,
    actual_pkgname: *mut RosieString,
    messages: *mut RosieString,
) -> i32 {
    guarded("rosie_import", || {
        let Some(engine) = (unsafe { engine_ref(engine) }) else {
            return ERR_ENGINE_CALL_FAILED;
        };
        let Some(name) = (unsafe { text_arg(pkgname) }) else {
            return ERR_ENGINE_CALL_FAILED;
        };
        let alias = unsafe { text_arg(as_name) };
        let result = engine.import(&name, alias.as_deref());
        unsafe { report_loaded(result, ok, actual_pkgname, messages) }
    })
}

/// Match a file line by line (or whole). On an I/O fault `*cin` is -1,
/// `*cout` is 3 and `err` describes the problem.
///
/// # Safety
/// File names must be null or NUL-terminated; other pointers null or valid.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rosie_matchfile(
    engine: *mut Engine,
    pat: i32,
    encoder: *const c_char,
    wholefileflag: i32,
    infilename: *const c_char,
    outfilename: *const c_char,
    errfilename: *const c_char,
    cin: *mut i32,
    cout: *mut i32,
    cerr: *mut i32,
    err: *mut RosieString,
) -> i32 {
    guarded("rosie_matchfile", || {
        let Some(engine) = (unsafe { engine_ref(engine) }) else {
            return ERR_ENGINE_CALL_FAILED;
        };
        unsafe { put(err, RosieString::null()) };
        let Some(encoder) = (unsafe { cstr_arg(encoder) }) else {
            unsafe {
                put(cin, -1);
                put(cout, ERR_NO_ENCODER);
                put(cerr, 0);
            }
            return SUCCESS;
        };
        let name = |p| unsafe { cstr_arg(p) }.unwrap_or_default();
        let result = engine.matchfile(
            engine.handle_from_raw(pat),
            &encoder,
            wholefileflag != 0,
            &name(infilename),
            &name(outfilename),
            &name(errfilename),
        );
        match result {
            Ok(counts) => {
                unsafe {
                    put(cin, counts.cin);
                    put(cout, counts.cout);
                    put(cerr, counts.cerr);
                    put(err, owned_or_null(counts.err));
                }
                SUCCESS
            }
            Err(e) => e.code(),
        }
    })
}

/// Engine configuration as JSON, caller-owned.
///
/// # Safety
/// `retvals` must be valid for writes; `engine` as for [`rosie_finalize`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rosie_config(engine: *mut Engine, retvals: *mut RosieString) -> i32 {
    guarded("rosie_config", || {
        let Some(engine) = (unsafe { engine_ref(engine) }) else {
            return ERR_ENGINE_CALL_FAILED;
        };
        match engine.config() {
            Ok(json) => {
                unsafe { put(retvals, RosieString::owned(json.into_bytes())) };
                SUCCESS
            }
            Err(e) => {
                unsafe { put(retvals, RosieString::null()) };
                e.code()
            }
        }
    })
}

/// With a null `newpath->ptr`, store the current library path into
/// `*newpath` (caller-owned); otherwise set the library path.
///
/// # Safety
/// `newpath` must be valid for reads and writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rosie_libpath(engine: *mut Engine, newpath: *mut RosieString) -> i32 {
    guarded("rosie_libpath", || {
        let Some(engine) = (unsafe { engine_ref(engine) }) else {
            return ERR_ENGINE_CALL_FAILED;
        };
        if newpath.is_null() {
            return ERR_ENGINE_CALL_FAILED;
        }
        match unsafe { text_arg(newpath) } {
            Some(path) => match engine.set_libpath(&path) {
                Ok(()) => SUCCESS,
                Err(e) => e.code(),
            },
            None => match engine.libpath() {
                Ok(libpath) => {
                    unsafe { put(newpath, RosieString::owned(libpath.path.into_bytes())) };
                    SUCCESS
                }
                Err(e) => e.code(),
            },
        }
    })
}

/// Query or set the allocation limit in MB (-1 queries, 0 removes the
/// limit). Writes back the limit in force and the heap usage in KB.
///
/// # Safety
/// Pointers must be null or valid.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rosie_alloc_limit(
    engine: *mut Engine,
    newlimit: *mut i32,
    usage: *mut i32,
) -> i32 {
    guarded("rosie_alloc_limit", || {
        let Some(engine) = (unsafe { engine_ref(engine) }) else {
            return ERR_ENGINE_CALL_FAILED;
        };
        let requested = unsafe { newlimit.as_ref() }.copied();
        match engine.alloc_limit(requested) {
            Ok(limit) => {
                unsafe {
                    put(newlimit, limit.limit_mb);
                    put(usage, limit.usage_kb.min(i32::MAX as i64) as i32);
                }
                SUCCESS
            }
            Err(e) => e.code(),
        }
    })
}

unsafe fn rcfile_arg(filename: *mut RosieString) -> Option<PathBuf> {
    unsafe { text_arg(filename) }.map(PathBuf::from)
}

/// Parse an rc-file. A null `filename` (or `filename->ptr`) selects the
/// default file, whose name is then stored into `*filename`.
///
/// # Safety
/// Pointers must be null or valid.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rosie_read_rcfile(
    engine: *mut Engine,
    filename: *mut RosieString,
    file_exists: *mut i32,
    options: *mut RosieString,
) -> i32 {
    guarded("rosie_read_rcfile", || {
        let Some(engine) = (unsafe { engine_ref(engine) }) else {
            return ERR_ENGINE_CALL_FAILED;
        };
        let path = unsafe { rcfile_arg(filename) };
        let use_default = path.is_none();
        match engine.read_rcfile(path.as_deref()) {
            Ok(rc) => {
                unsafe {
                    if use_default {
                        put(filename, RosieString::owned(rc.filename.into_bytes()));
                    }
                    put(file_exists, rc.exists as i32);
                    put(options, owned_or_null(rc.options));
                }
                SUCCESS
            }
            Err(e) => e.code(),
        }
    })
}

/// Apply an rc-file, reporting whether it exists and applied cleanly.
///
/// # Safety
/// As for [`rosie_read_rcfile`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rosie_execute_rcfile(
    engine: *mut Engine,
    filename: *mut RosieString,
    file_exists: *mut i32,
    no_errors: *mut i32,
) -> i32 {
    guarded("rosie_execute_rcfile", || {
        let Some(engine) = (unsafe { engine_ref(engine) }) else {
            return ERR_ENGINE_CALL_FAILED;
        };
        let path = unsafe { rcfile_arg(filename) };
        let use_default = path.is_none();
        match engine.execute_rcfile(path.as_deref()) {
            Ok(rc) => {
                unsafe {
                    if use_default {
                        put(filename, RosieString::owned(rc.filename.into_bytes()));
                    }
                    put(file_exists, rc.exists as i32);
                    put(no_errors, rc.no_errors as i32);
                }
                SUCCESS
            }
            Err(e) => e.code(),
        }
    })
}
