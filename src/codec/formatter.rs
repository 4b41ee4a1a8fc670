//! Element formatter
//!
//! Writing is two-pass: parents must declare the exact byte length of
//! their children before those children are serialized, so writers
//! measure bottom-up with [`Formatter::part_size`] and then emit.
//! Declared sizes are enforced: closing a container that was not filled
//! to exactly its declared size is a hard error.

use crate::codec::{uvarint_len, write_uvarint, Tag, Value};
use crate::common::{Error, Result};

pub struct Formatter {
    out: Vec<u8>,
    scopes: Vec<(Tag, usize)>,
}

impl Formatter {
    pub fn new() -> Self {
        Self {
            out: Vec::new(),
            scopes: Vec::new(),
        }
    }

    /// Total encoded size of an element with `body_size` body bytes,
    /// including its tag and size varints.
    pub fn part_size(tag: Tag, body_size: u64) -> u64 {
        uvarint_len(u64::from(tag)) + uvarint_len(body_size) + body_size
    }

    /// Total encoded size of a value element.
    pub fn value_size<V: Value>(tag: Tag, value: &V) -> u64 {
        Self::part_size(tag, value.measure())
    }

    /// Open a container element, declaring its exact body size.
    pub fn begin(&mut self, tag: Tag, body_size: u64) {
        self.header(tag, body_size);
        self.scopes.push((tag, self.out.len() + body_size as usize));
    }

    /// Close a container element, verifying the declared size was filled
    /// exactly.
    pub fn end(&mut self, tag: Tag) -> Result<()> {
        let (open_tag, expected_end) = self
            .scopes
            .pop()
            .ok_or_else(|| Error::NestingViolation(format!("end {:#06x} without begin", tag)))?;
        if open_tag != tag {
            return Err(Error::NestingViolation(format!(
                "end {:#06x} does not match begin {:#06x}",
                tag, open_tag
            )));
        }
        if self.out.len() != expected_end {
            return Err(Error::NestingViolation(format!(
                "container {:#06x} declared size not met: off by {}",
                tag,
                expected_end as i64 - self.out.len() as i64
            )));
        }
        Ok(())
    }

    /// Write a complete value element.
    pub fn write_value<V: Value>(&mut self, tag: Tag, value: &V) {
        self.header(tag, value.measure());
        value.encode(&mut self.out);
    }

    /// Write a value element with a raw, pre-encoded body.
    pub fn write_bytes(&mut self, tag: Tag, body: &[u8]) {
        self.header(tag, body.len() as u64);
        self.out.extend_from_slice(body);
    }

    /// Splice pre-encoded child elements into the current container.
    pub fn write_raw(&mut self, encoded: &[u8]) {
        self.out.extend_from_slice(encoded);
    }

    fn header(&mut self, tag: Tag, body_size: u64) {
        write_uvarint(&mut self.out, u64::from(tag));
        write_uvarint(&mut self.out, body_size);
    }

    pub fn len(&self) -> usize {
        self.out.len()
    }

    pub fn is_empty(&self) -> bool {
        self.out.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.out
    }
}

impl Default for Formatter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OUTER: Tag = 0x10;
    const CHILD: Tag = 0x11;

    #[test]
    fn test_part_size_matches_emission() {
        let value = 300u64;
        let mut f = Formatter::new();
        f.write_value(CHILD, &value);
        assert_eq!(f.len() as u64, Formatter::value_size(CHILD, &value));
    }

    #[test]
    fn test_declared_size_enforced() {
        let value = "abc".to_string();
        let mut f = Formatter::new();
        f.begin(OUTER, Formatter::value_size(CHILD, &value));
        f.write_value(CHILD, &value);
        f.end(OUTER).unwrap();
    }

    #[test]
    fn test_underfilled_container_rejected() {
        let mut f = Formatter::new();
        f.begin(OUTER, 10);
        f.write_bytes(CHILD, b"x");
        assert!(f.end(OUTER).is_err());
    }

    #[test]
    fn test_end_without_begin_rejected() {
        let mut f = Formatter::new();
        assert!(f.end(OUTER).is_err());
    }

    #[test]
    fn test_mismatched_end_rejected() {
        let mut f = Formatter::new();
        f.begin(OUTER, 0);
        assert!(f.end(CHILD).is_err());
    }
}
