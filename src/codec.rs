//! The packed attribute encoding.
//!
//! A packed blob is a flat list of fields separated by [`SEPARATOR`], read
//! two at a time as `name, value` pairs:
//!
//! ```text
//! name SEP value SEP name SEP value ... name SEP value
//! ```
//!
//! A trailing field without a partner is ignored, and the empty string holds
//! no attributes at all. Names and values must never contain the separator;
//! nothing here checks that, since the encoding has no escape mechanism.
//! Duplicate names are passed through untouched, the persistence layer is
//! the one that refuses them.

use std::str::Split;

/// ASCII unit separator, the only reserved byte in a packed blob.
pub const SEPARATOR: u8 = 0x1F;
/// [`SEPARATOR`] as a `char`, for splitting and building `str`s.
pub const SEPARATOR_CHAR: char = SEPARATOR as char;

/// Lazy iterator over the `(name, value)` pairs of a packed blob.
///
/// Holds nothing but a position in the borrowed blob, so any number of
/// iterations over the same blob can run side by side.
#[derive(Debug, Clone)]
pub struct Pairs<'a> {
    fields: Split<'a, char>,
}

impl<'a> Iterator for Pairs<'a> {
    type Item = (&'a str, &'a str);
    fn next(&mut self) -> Option<Self::Item> {
        let name = self.fields.next()?;
        let value = self.fields.next()?;
        Some((name, value))
    }
}

pub fn pairs(blob: &str) -> Pairs<'_> {
    Pairs {
        fields: blob.split(SEPARATOR_CHAR),
    }
}

// the value runs until the next separator or the end of the blob
fn value_span(rest: &str) -> &str {
    match rest.find(SEPARATOR_CHAR) {
        Some(end) => &rest[..end],
        None => rest,
    }
}

/// Finds the value of the first pair called `name`.
///
/// The common single-attribute case is answered by a prefix check. Otherwise
/// the blob is searched for `SEP name SEP`; a hit only counts when it sits on
/// a name field (an even number of separators precedes it), so a value that
/// happens to spell `name` is never mistaken for the key.
pub fn lookup<'a>(blob: &'a str, name: &str) -> Option<&'a str> {
    if let Some(rest) = blob
        .strip_prefix(name)
        .and_then(|rest| rest.strip_prefix(SEPARATOR_CHAR))
    {
        return Some(value_span(rest));
    }
    let mut pattern = String::with_capacity(name.len() + 2);
    pattern.push(SEPARATOR_CHAR);
    pattern.push_str(name);
    pattern.push(SEPARATOR_CHAR);

    let bytes = blob.as_bytes();
    let mut separators = 0usize; // separators in bytes[..counted]
    let mut counted = 0usize;
    let mut from = 0usize;
    while let Some(offset) = blob[from..].find(&pattern) {
        let at = from + offset;
        separators += bytes[counted..=at]
            .iter()
            .filter(|b| **b == SEPARATOR)
            .count();
        counted = at + 1;
        if separators % 2 == 0 {
            return Some(value_span(&blob[at + pattern.len()..]));
        }
        // matches may overlap, so resume right after the leading separator
        from = at + 1;
    }
    None
}

/// Packs pairs in the given order. No pairs gives the empty blob.
pub fn encode<I, N, V>(pairs: I) -> String
where
    I: IntoIterator<Item = (N, V)>,
    N: AsRef<str>,
    V: AsRef<str>,
{
    let mut blob = String::new();
    for (name, value) in pairs {
        if !blob.is_empty() {
            blob.push(SEPARATOR_CHAR);
        }
        blob.push_str(name.as_ref());
        blob.push(SEPARATOR_CHAR);
        blob.push_str(value.as_ref());
    }
    blob
}
