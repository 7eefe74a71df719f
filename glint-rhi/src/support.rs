//! Helpers for working with the NUL-terminated name lists the native API
//! reports (layers, extensions) and for checking required-name support.

use std::ffi::c_char;

/// Convert a fixed-size NUL-terminated `c_char` array (as found in native
/// property structs) into an owned `String`, dropping the NUL and anything
/// after it.
pub fn name_from_raw(raw: &[c_char]) -> String {
    let bytes: Vec<u8> = raw
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Remove duplicates while preserving first-seen order.
pub fn dedupe(names: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for name in names {
        if seen.insert(name.as_str()) {
            out.push(name.clone());
        }
    }
    out
}

/// The required names not present in `available`, in `required` order.
pub fn missing_names(required: &[String], available: &[String]) -> Vec<String> {
    required
        .iter()
        .filter(|name| !available.iter().any(|a| a == *name))
        .cloned()
        .collect()
}
