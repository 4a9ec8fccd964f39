// Tests for the C interface
use std::ptr;

use crate::ffi::*;
use crate::{ERR_ENGINE_CALL_FAILED, ERR_NO_PATTERN, RosieString, SUCCESS};

fn text(s: &RosieString) -> String {
    unsafe { s.to_str_lossy() }.unwrap_or_default()
}

#[test]
fn test_c_compile_match_free() {
    unsafe {
        let mut messages = RosieString::null();
        let e = rosie_new(&mut messages);
        assert!(!e.is_null(), "{}", text(&messages));
        assert!(messages.is_null());

        let expression = rosie_string_from(b"[0-9]+".as_ptr(), 6);
        let mut pat = 0;
        assert_eq!(rosie_compile(e, &expression, &mut pat, &mut messages), SUCCESS);
        assert!(pat > 0);
        assert!(messages.is_null());

        let input = rosie_string_from(b"abc123".as_ptr(), 6);
        let mut m = RosieMatch::default();
        assert_eq!(rosie_match(e, pat, 1, c"json".as_ptr(), &input, &mut m), SUCCESS);
        assert!(!m.data.is_null());
        assert_eq!(text(&m.data), r#"{"type":"*","s":4,"e":7,"data":"123"}"#);
        assert_eq!(m.leftover, 0);
        assert_eq!(m.abend, 0);

        // general path results are lent the same way
        assert_eq!(rosie_match(e, pat, 1, c"subs".as_ptr(), &input, &mut m), SUCCESS);
        assert_eq!(text(&m.data), "123");

        assert_eq!(rosie_free_rplx(e, pat), SUCCESS);
        assert_eq!(rosie_match(e, pat, 1, c"json".as_ptr(), &input, &mut m), SUCCESS);
        assert!(m.data.is_null());
        assert_eq!(m.data.code(), ERR_NO_PATTERN);

        rosie_finalize(e);
    }
}

#[test]
fn test_c_compile_failure_and_null_arguments() {
    unsafe {
        let e = rosie_new(ptr::null_mut());
        assert!(!e.is_null());

        let expression = rosie_string_from(b"[0-9".as_ptr(), 4);
        let mut pat = -1;
        let mut messages = RosieString::null();
        assert_eq!(rosie_compile(e, &expression, &mut pat, &mut messages), SUCCESS);
        assert_eq!(pat, 0);
        assert!(!messages.is_null());
        let parsed: serde_json::Value = serde_json::from_str(&text(&messages)).unwrap();
        assert!(!parsed.as_array().unwrap().is_empty());
        rosie_free_string(messages);

        assert_eq!(
            rosie_compile(e, ptr::null(), &mut pat, &mut messages),
            ERR_ENGINE_CALL_FAILED
        );
        assert_eq!(
            rosie_compile(e, &expression, ptr::null_mut(), &mut messages),
            ERR_ENGINE_CALL_FAILED
        );
        assert_eq!(
            rosie_compile(ptr::null_mut(), &expression, &mut pat, &mut messages),
            ERR_ENGINE_CALL_FAILED
        );

        rosie_finalize(e);
    }
}

#[test]
fn test_c_load_config_libpath() {
    unsafe {
        let e = rosie_new(ptr::null_mut());
        assert!(!e.is_null());

        let src = rosie_string_from(b"package pets\ncat = \"cat\"".as_ptr(), 24);
        let mut ok = 0;
        let mut pkgname = RosieString::null();
        let mut messages = RosieString::null();
        assert_eq!(rosie_load(e, &mut ok, &src, &mut pkgname, &mut messages), SUCCESS);
        assert_eq!(ok, 1);
        assert_eq!(text(&pkgname), "pets");
        assert!(messages.is_null());
        rosie_free_string(pkgname);

        let mut config = RosieString::null();
        assert_eq!(rosie_config(e, &mut config), SUCCESS);
        let records: Vec<serde_json::Value> = serde_json::from_str(&text(&config)).unwrap();
        assert!(records.iter().any(|r| r["name"] == "ROSIE_LIBPATH"));
        rosie_free_string(config);

        let mut libpath = RosieString::null();
        assert_eq!(rosie_libpath(e, &mut libpath), SUCCESS);
        assert!(!libpath.is_null());
        rosie_free_string(libpath);

        let mut limit = -1;
        let mut usage = 0;
        assert_eq!(rosie_alloc_limit(e, &mut limit, &mut usage), SUCCESS);
        assert_eq!(limit, 0);
        assert!(usage > 0);
        let mut too_small = 1;
        assert_eq!(
            rosie_alloc_limit(e, &mut too_small, &mut usage),
            ERR_ENGINE_CALL_FAILED
        );

        rosie_finalize(e);
    }
}

#[test]
fn test_c_trace_invalid_pattern() {
    unsafe {
        let e = rosie_new(ptr::null_mut());
        let input = rosie_string_from(b"1".as_ptr(), 1);
        let mut matched = 1;
        let mut trace = RosieString::null();
        assert_eq!(
            rosie_trace(e, 12345, 1, c"full".as_ptr(), &input, &mut matched, &mut trace),
            SUCCESS
        );
        assert_eq!(matched, 0);
        assert!(trace.is_null());
        assert_eq!(trace.code(), ERR_NO_PATTERN);
        rosie_finalize(e);
    }
}

#[test]
fn test_c_new_string_copies() {
    let bytes = b"copied".to_vec();
    let s = unsafe { rosie_new_string(bytes.as_ptr(), bytes.len()) };
    drop(bytes);
    assert_eq!(text(&s), "copied");
    unsafe { rosie_free_string(s) };
}

#[cfg(target_pointer_width = "64")]
#[test]
fn test_c_string_from_oversized_length() {
    let s = rosie_string_from(b"x".as_ptr(), u32::MAX as usize + 1);
    assert!(s.is_null());
    assert_eq!(s.code(), crate::ERR_OUT_OF_MEMORY);
}
