//! Fixed-capacity, stack-allocated UTF-8 strings.
//!
//! Mailbox payloads (secrets, error messages) are copied into these buffers on
//! the I/O thread so that neither publishing nor dispatching allocates.

use std::fmt;

/// A UTF-8 string stored inline in `N` bytes with an explicit length.
///
/// [`set`](FixedStr::set) truncates on a character boundary and never
/// writes past the buffer.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FixedStr<const N: usize> {
    bytes: [u8; N],
    len: usize,
}

impl<const N: usize> FixedStr<N> {
    /// An empty string.
    pub const fn new() -> Self {
        Self {
            bytes: [0; N],
            len: 0,
        }
    }

    /// Build a string from `value`, truncating if needed.
    pub fn from_str_truncated(value: &str) -> Self {
        let mut fixed = Self::new();
        fixed.set(value);
        fixed
    }

    /// Replace the contents with `value`, truncated to at most `N` bytes on
    /// a character boundary. Returns `true` if the whole value fit.
    pub fn set(&mut self, value: &str) -> bool {
        let mut end = value.len().min(N);
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        let source = value.as_bytes().get(..end).unwrap_or_default();
        if let Some(target) = self.bytes.get_mut(..end) {
            target.copy_from_slice(source);
            self.len = end;
        } else {
            self.len = 0;
        }
        end == value.len()
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub fn as_str(&self) -> &str {
        let bytes = self.bytes.get(..self.len).unwrap_or_default();
        // `set` only ever stores whole characters.
        std::str::from_utf8(bytes).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<const N: usize> Default for FixedStr<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> fmt::Debug for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl<const N: usize> fmt::Display for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<const N: usize> PartialEq<str> for FixedStr<N> {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl<const N: usize> PartialEq<&str> for FixedStr<N> {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_short_values_verbatim() {
        let mut s = FixedStr::<16>::new();
        assert!(s.set("abc123"));
        assert_eq!(s, "abc123");
        assert_eq!(s.len(), 6);
    }

    #[test]
    fn truncates_long_values() {
        let mut s = FixedStr::<4>::new();
        assert!(!s.set("abcdef"));
        assert_eq!(s.as_str(), "abcd");
        assert_eq!(s.capacity(), 4);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        // "é" is two bytes; a 3-byte buffer must not split the second one.
        let s = FixedStr::<3>::from_str_truncated("aéé");
        assert_eq!(s.as_str(), "aé");
        let s = FixedStr::<2>::from_str_truncated("éa");
        assert_eq!(s.as_str(), "é");
        let s = FixedStr::<1>::from_str_truncated("é");
        assert!(s.is_empty());
    }

    #[test]
    fn overwrite_replaces_previous_value() {
        let mut s = FixedStr::<8>::from_str_truncated("longer!!");
        s.set("ab");
        assert_eq!(s.as_str(), "ab");
        s.clear();
        assert!(s.is_empty());
    }
}
