//! Streaming element parser
//!
//! The parser walks a decoded frame as a cursor over nested elements.
//! Containers are entered and left explicitly; `leave` with unconsumed
//! bytes, or with the wrong tag, is a hard protocol error. Digest frames
//! can be pushed to observe every raw byte an element contributes as it
//! is consumed; a header that has been read but not yet consumed feeds
//! nothing, so a reader can decide per element whether its bytes belong
//! in the running hash.

use crate::codec::{read_uvarint, Tag, UnknownElements};
use crate::common::digest::{ContentDigest, DigestContext};
use crate::common::{Error, Result};

/// Header of the element at the cursor: its tag, declared body size, and
/// the span of its own tag/size encoding.
#[derive(Debug, Clone, Copy)]
pub struct ElementHeader {
    pub tag: Tag,
    pub size: u64,
    header_start: usize,
    body_start: usize,
}

impl ElementHeader {
    pub fn body_len(&self) -> usize {
        self.size as usize
    }

    /// Offset of the element's first byte (its tag) in the input.
    pub fn start(&self) -> usize {
        self.header_start
    }

    /// Offset one past the element's last body byte.
    pub fn end(&self) -> usize {
        self.body_start + self.body_len()
    }
}

struct Scope {
    tag: Tag,
    end: usize,
}

pub struct Parser<'a> {
    buf: &'a [u8],
    pos: usize,
    scopes: Vec<Scope>,
    digests: Vec<DigestContext>,
    policy: UnknownElements,
}

impl<'a> Parser<'a> {
    pub fn new(buf: &'a [u8], policy: UnknownElements) -> Self {
        Self {
            buf,
            pos: 0,
            scopes: Vec::new(),
            digests: Vec::new(),
            policy,
        }
    }

    /// End offset of the innermost open container (or of the input).
    fn limit(&self) -> usize {
        self.scopes.last().map(|s| s.end).unwrap_or(self.buf.len())
    }

    /// Read the header of the next child element, or `None` when the
    /// enclosing container (or the input) is exhausted.
    ///
    /// The cursor advances past the tag/size encoding, but nothing is fed
    /// to digest frames until the element is actually consumed.
    pub fn read_header(&mut self) -> Result<Option<ElementHeader>> {
        let limit = self.limit();
        if self.pos == limit {
            return Ok(None);
        }
        let header_start = self.pos;

        let (tag, used) = read_uvarint(&self.buf[self.pos..limit])?;
        self.pos += used;
        let tag = Tag::try_from(tag)
            .map_err(|_| Error::MalformedElement(format!("tag {:#x} out of range", tag)))?;

        let (size, used) = read_uvarint(&self.buf[self.pos..limit])?;
        self.pos += used;

        let body_start = self.pos;
        if size as usize > limit - body_start {
            return Err(Error::MalformedElement(format!(
                "element {:#06x} body ({} bytes) overruns its container",
                tag, size
            )));
        }

        Ok(Some(ElementHeader {
            tag,
            size,
            header_start,
            body_start,
        }))
    }

    /// BEGIN event: open a container element and position the cursor at
    /// its first child.
    pub fn enter(&mut self, header: &ElementHeader) -> Result<()> {
        self.observe_span(header.header_start, header.body_start);
        self.scopes.push(Scope {
            tag: header.tag,
            end: header.body_start + header.body_len(),
        });
        self.pos = header.body_start;
        Ok(())
    }

    /// END event: close the innermost container. The tag must match the
    /// corresponding BEGIN and every body byte must have been consumed.
    pub fn leave(&mut self, tag: Tag) -> Result<()> {
        let scope = self
            .scopes
            .pop()
            .ok_or_else(|| Error::NestingViolation(format!("end {:#06x} without begin", tag)))?;
        if scope.tag != tag {
            return Err(Error::NestingViolation(format!(
                "end {:#06x} does not match begin {:#06x}",
                tag, scope.tag
            )));
        }
        if self.pos != scope.end {
            return Err(Error::NestingViolation(format!(
                "container {:#06x} left with {} bytes unconsumed",
                tag,
                scope.end - self.pos
            )));
        }
        Ok(())
    }

    /// Discard an element's body without interpreting it.
    pub fn skip(&mut self, header: &ElementHeader) -> Result<()> {
        let end = header.body_start + header.body_len();
        self.observe_span(header.header_start, end);
        self.pos = end;
        Ok(())
    }

    /// Skip an unrecognized element according to the configured policy.
    pub fn skip_unknown(&mut self, header: &ElementHeader, context: &'static str) -> Result<()> {
        match self.policy {
            UnknownElements::Error => Err(Error::UnexpectedElement {
                tag: header.tag,
                context,
            }),
            UnknownElements::Skip => {
                tracing::warn!(
                    tag = format!("{:#06x}", header.tag),
                    context,
                    "skipping unknown element"
                );
                self.skip(header)
            }
        }
    }

    /// Decode a typed value from the element at the cursor.
    pub fn read_value<V: crate::codec::Value>(&mut self, header: &ElementHeader) -> Result<V> {
        let end = header.body_start + header.body_len();
        let body = &self.buf[header.body_start..end];
        let value = V::decode(body)?;
        self.observe_span(header.header_start, end);
        self.pos = end;
        Ok(value)
    }

    /// Raw body bytes of the element at the cursor (consumes it).
    pub fn read_bytes(&mut self, header: &ElementHeader) -> Result<&'a [u8]> {
        let end = header.body_start + header.body_len();
        let body = &self.buf[header.body_start..end];
        self.observe_span(header.header_start, end);
        self.pos = end;
        Ok(body)
    }

    /// Attach a digest frame. Every raw byte consumed from now until the
    /// matching `pop_digest` is fed to it (and to any outer frames).
    pub fn push_digest(&mut self) {
        self.digests.push(DigestContext::new());
    }

    /// Detach the innermost digest frame and finalize it.
    pub fn pop_digest(&mut self) -> ContentDigest {
        self.digests
            .pop()
            .expect("pop_digest without push_digest")
            .finalize()
    }

    /// Number of attached digest frames. Readers assert balance on their
    /// exit paths.
    pub fn digest_depth(&self) -> usize {
        self.digests.len()
    }

    fn observe_span(&mut self, start: usize, end: usize) {
        if self.digests.is_empty() {
            return;
        }
        let bytes = &self.buf[start..end];
        for digest in &mut self.digests {
            digest.update(bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Formatter;

    const OUTER: Tag = 0x10;
    const CHILD_A: Tag = 0x11;
    const CHILD_B: Tag = 0x12;

    fn sample() -> Vec<u8> {
        let mut f = Formatter::new();
        let a = 42u64;
        let b = "hello".to_string();
        let body = Formatter::value_size(CHILD_A, &a) + Formatter::value_size(CHILD_B, &b);
        f.begin(OUTER, body);
        f.write_value(CHILD_A, &a);
        f.write_value(CHILD_B, &b);
        f.end(OUTER).unwrap();
        f.into_bytes()
    }

    #[test]
    fn test_nested_walk() {
        let buf = sample();
        let mut p = Parser::new(&buf, UnknownElements::Error);

        let outer = p.read_header().unwrap().unwrap();
        assert_eq!(outer.tag, OUTER);
        p.enter(&outer).unwrap();

        let a = p.read_header().unwrap().unwrap();
        assert_eq!(a.tag, CHILD_A);
        assert_eq!(p.read_value::<u64>(&a).unwrap(), 42);

        let b = p.read_header().unwrap().unwrap();
        assert_eq!(b.tag, CHILD_B);
        assert_eq!(p.read_value::<String>(&b).unwrap(), "hello");

        assert!(p.read_header().unwrap().is_none());
        p.leave(OUTER).unwrap();
        assert!(p.read_header().unwrap().is_none());
    }

    #[test]
    fn test_skip_leaves_cursor_aligned() {
        let buf = sample();
        let mut p = Parser::new(&buf, UnknownElements::Error);

        let outer = p.read_header().unwrap().unwrap();
        p.enter(&outer).unwrap();

        let a = p.read_header().unwrap().unwrap();
        p.skip(&a).unwrap();

        let b = p.read_header().unwrap().unwrap();
        assert_eq!(p.read_value::<String>(&b).unwrap(), "hello");
        p.leave(OUTER).unwrap();
    }

    #[test]
    fn test_leave_with_unconsumed_bytes() {
        let buf = sample();
        let mut p = Parser::new(&buf, UnknownElements::Error);

        let outer = p.read_header().unwrap().unwrap();
        p.enter(&outer).unwrap();
        let a = p.read_header().unwrap().unwrap();
        p.skip(&a).unwrap();

        assert!(matches!(
            p.leave(OUTER),
            Err(Error::NestingViolation(_))
        ));
    }

    #[test]
    fn test_leave_tag_mismatch() {
        let buf = sample();
        let mut p = Parser::new(&buf, UnknownElements::Error);

        let outer = p.read_header().unwrap().unwrap();
        p.enter(&outer).unwrap();
        let a = p.read_header().unwrap().unwrap();
        p.skip(&a).unwrap();
        let b = p.read_header().unwrap().unwrap();
        p.skip(&b).unwrap();

        assert!(matches!(
            p.leave(CHILD_A),
            Err(Error::NestingViolation(_))
        ));
    }

    #[test]
    fn test_child_overrunning_container() {
        let mut f = Formatter::new();
        // Declared child size larger than the container body
        f.begin(OUTER, 3);
        let mut raw = f.into_bytes();
        raw.extend_from_slice(&[0x11, 0x09, 0x00]); // child claims 9-byte body

        let mut p = Parser::new(&raw, UnknownElements::Error);
        let outer = p.read_header().unwrap().unwrap();
        p.enter(&outer).unwrap();
        assert!(p.read_header().is_err());
    }

    #[test]
    fn test_unknown_policy_error_vs_skip() {
        let buf = sample();

        let mut strict = Parser::new(&buf, UnknownElements::Error);
        let outer = strict.read_header().unwrap().unwrap();
        strict.enter(&outer).unwrap();
        let a = strict.read_header().unwrap().unwrap();
        assert!(matches!(
            strict.skip_unknown(&a, "test"),
            Err(Error::UnexpectedElement { .. })
        ));

        let mut lenient = Parser::new(&buf, UnknownElements::Skip);
        let outer = lenient.read_header().unwrap().unwrap();
        lenient.enter(&outer).unwrap();
        let a = lenient.read_header().unwrap().unwrap();
        lenient.skip_unknown(&a, "test").unwrap();
        let b = lenient.read_header().unwrap().unwrap();
        assert_eq!(lenient.read_value::<String>(&b).unwrap(), "hello");
    }

    #[test]
    fn test_digest_covers_consumed_elements_only() {
        let buf = sample();
        let mut p = Parser::new(&buf, UnknownElements::Error);

        let outer = p.read_header().unwrap().unwrap();
        p.enter(&outer).unwrap();

        p.push_digest();
        let a = p.read_header().unwrap().unwrap();
        p.read_value::<u64>(&a).unwrap();
        let digest = p.pop_digest();

        // The frame saw exactly the first child's encoded bytes
        let mut f = Formatter::new();
        f.write_value(CHILD_A, &42u64);
        assert_eq!(digest, ContentDigest::of(&f.into_bytes()));

        // The second child was read after the pop and is not included
        let b = p.read_header().unwrap().unwrap();
        p.read_value::<String>(&b).unwrap();
        p.leave(OUTER).unwrap();
        assert_eq!(p.digest_depth(), 0);
    }
}
