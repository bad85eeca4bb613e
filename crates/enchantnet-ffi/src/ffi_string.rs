//! Strings whose ownership crosses the C boundary.

use std::ffi::{c_char, CStr, CString};

/// A NUL-terminated string allocated here and released by `free_string`.
///
/// Interior NUL bytes are dropped so any Rust string can be handed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedCString(CString);

impl OwnedCString {
    pub fn new(s: &str) -> Self {
        let bytes: Vec<u8> = s.bytes().filter(|b| *b != 0).collect();
        Self(CString::new(bytes).unwrap_or_default())
    }

    pub fn as_c_str(&self) -> &CStr {
        &self.0
    }

    /// Hand the allocation to the caller.
    pub fn into_raw(self) -> *const c_char {
        self.0.into_raw().cast_const()
    }

    /// Reclaim a pointer produced by [`OwnedCString::into_raw`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from `into_raw` and must not have been reclaimed
    /// before.
    pub(crate) unsafe fn from_raw(ptr: *const c_char) -> Self {
        // SAFETY: upheld by the caller.
        Self(unsafe { CString::from_raw(ptr.cast_mut()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interior_nul_is_stripped() {
        let s = OwnedCString::new("a\0b");
        assert_eq!(s.as_c_str().to_str().unwrap(), "ab");
    }

    #[test]
    fn test_raw_round_trip() {
        let raw = OwnedCString::new("hello").into_raw();
        let back = unsafe { OwnedCString::from_raw(raw) };
        assert_eq!(back.as_c_str().to_bytes(), b"hello");
    }
}
