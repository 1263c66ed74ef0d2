//! Unicode normalization of claim names.
//!
//! From the normalization fork height onward, names are indexed by their
//! case-folded, canonically decomposed (NFD) form. Names that are not
//! valid UTF-8 keep their raw bytes. The output stays in NFD; that is
//! what the legacy chain committed to.

use std::borrow::Cow;

use unicode_normalization::UnicodeNormalization;

/// Case-fold and canonically decompose a name.
///
/// Pure and idempotent. Invalid UTF-8 passes through untouched.
pub fn normalize(name: &[u8]) -> Cow<'_, [u8]> {
    let Ok(s) = std::str::from_utf8(name) else {
        return Cow::Borrowed(name);
    };

    let folded = caseless::default_case_fold_str(s);
    let decomposed: String = folded.nfd().collect();

    if decomposed.as_bytes() == name {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(decomposed.into_bytes())
    }
}

/// Normalize only when `height` has reached the fork.
pub fn normalize_if_necessary(name: &[u8], height: i32, fork_height: i32) -> Cow<'_, [u8]> {
    if height < fork_height {
        return Cow::Borrowed(name);
    }
    normalize(name)
}
