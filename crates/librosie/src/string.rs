// Strings crossing the C boundary
//
// A RosieString is one of: a borrowed view of caller memory, a buffer this
// library allocated and the caller must free with `rosie_free_string`, or
// a status code (null pointer, `len` holding the code). Lengths that do
// not fit in 32 bits become the status ERR_OUT_OF_MEMORY.

use std::ptr;

use crate::error::ERR_OUT_OF_MEMORY;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RosieString {
    pub len: u32,
    pub ptr: *mut u8,
}

impl RosieString {
    pub const fn null() -> Self {
        RosieString {
            len: 0,
            ptr: ptr::null_mut(),
        }
    }

    /// "No data, see code".
    pub const fn status(code: i32) -> Self {
        RosieString {
            len: code as u32,
            ptr: ptr::null_mut(),
        }
    }

    pub fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    /// The code of a status string.
    pub fn code(&self) -> i32 {
        self.len as i32
    }

    /// A view of `len` bytes at `ptr` that does not own them.
    pub fn view(ptr: *const u8, len: usize) -> Self {
        match u32::try_from(len) {
            Ok(len) => RosieString {
                len,
                ptr: ptr as *mut u8,
            },
            Err(_) => RosieString::status(ERR_OUT_OF_MEMORY),
        }
    }

    /// Hand `bytes` over to the caller.
    pub fn owned(bytes: impl Into<Box<[u8]>>) -> Self {
        let boxed: Box<[u8]> = bytes.into();
        let Ok(len) = u32::try_from(boxed.len()) else {
            return RosieString::status(ERR_OUT_OF_MEMORY);
        };
        let ptr = Box::into_raw(boxed) as *mut u8;
        RosieString { len, ptr }
    }

    /// Owned copy of a constant or any other text.
    pub fn copied(text: &str) -> Self {
        RosieString::owned(text.as_bytes())
    }

    /// # Safety
    /// `ptr` must be null or valid for `len` bytes for the lifetime `'a`.
    pub unsafe fn as_bytes<'a>(&self) -> Option<&'a [u8]> {
        if self.ptr.is_null() {
            return None;
        }
        if self.len == 0 {
            return Some(&[]);
        }
        Some(unsafe { std::slice::from_raw_parts(self.ptr, self.len as usize) })
    }

    /// # Safety
    /// As for [`RosieString::as_bytes`].
    pub unsafe fn to_str_lossy(&self) -> Option<String> {
        unsafe { self.as_bytes() }.map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// Release a string created by [`RosieString::owned`].
    ///
    /// # Safety
    /// Must be called at most once, and only on an owned string.
    pub unsafe fn free(self) {
        if self.ptr.is_null() {
            return;
        }
        let slice = ptr::slice_from_raw_parts_mut(self.ptr, self.len as usize);
        drop(unsafe { Box::from_raw(slice) });
    }
}

impl Default for RosieString {
    fn default() -> Self {
        RosieString::null()
    }
}

/// Allocate a caller-owned string for `text`, or a null string.
pub fn owned_or_null(text: Option<String>) -> RosieString {
    match text {
        Some(text) => RosieString::owned(text.into_bytes()),
        None => RosieString::null(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owned_roundtrip_and_free() {
        let s = RosieString::copied("hello");
        assert_eq!(s.len, 5);
        assert_eq!(unsafe { s.as_bytes() }, Some(&b"hello"[..]));
        unsafe { s.free() };
    }

    #[test]
    fn test_status_codes_survive() {
        let s = RosieString::status(crate::error::ERR_NO_PATTERN);
        assert!(s.is_null());
        assert_eq!(s.code(), crate::error::ERR_NO_PATTERN);
    }

    #[test]
    fn test_view_keeps_length() {
        let bytes = b"abc";
        let s = RosieString::view(bytes.as_ptr(), bytes.len());
        assert_eq!(unsafe { s.as_bytes() }, Some(&b"abc"[..]));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_view_too_long_is_a_status() {
        let bytes = b"abc";
        let s = RosieString::view(bytes.as_ptr(), u32::MAX as usize + 1);
        assert!(s.is_null());
        assert_eq!(s.code(), ERR_OUT_OF_MEMORY);
    }

    #[test]
    fn test_empty_owned_is_not_null() {
        let s = RosieString::owned(Vec::new());
        assert!(!s.is_null());
        assert_eq!(unsafe { s.as_bytes() }, Some(&b""[..]));
        unsafe { s.free() };
    }
}
