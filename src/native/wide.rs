//! Wide-string (UTF-16) conversion for native payloads.

/// Convert UTF-16 code units to a `String`.
///
/// Unpaired surrogates have no `String` representation and become U+FFFD.
pub fn wide_to_string(units: &[u16]) -> String {
    match String::from_utf16(units) {
        Ok(text) => text,
        Err(_) => {
            log::warn!(
                target: "title_bridge::sink",
                "Native string contains unpaired surrogates; replacing them"
            );
            String::from_utf16_lossy(units)
        }
    }
}

/// Borrow a NUL-terminated UTF-16 string as a slice (without the terminator).
///
/// A null pointer yields an empty slice.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated sequence of `u16` that stays
/// valid and unmodified for `'a`.
pub unsafe fn wide_units<'a>(ptr: *const u16) -> &'a [u16] {
    if ptr.is_null() {
        return &[];
    }
    let mut len = 0usize;
    // SAFETY: caller guarantees a terminator exists within the allocation.
    unsafe {
        while *ptr.add(len) != 0 {
            len += 1;
        }
        std::slice::from_raw_parts(ptr, len)
    }
}
