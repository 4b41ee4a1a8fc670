//! Typed value encodings for the element codec
//!
//! Integers are minimal-width big-endian (two's complement when signed);
//! the element's declared size carries the width, so no terminator or
//! continuation bits are needed inside the body. A value body is at least
//! one byte.

use uuid::Uuid;

use crate::common::digest::{Address, ContentDigest, DIGEST_LEN};
use crate::common::{Error, Result};

/// A value that can live in a value element's body.
pub trait Value: Sized {
    /// Body size in bytes.
    fn measure(&self) -> u64;
    /// Append exactly `measure()` bytes.
    fn encode(&self, out: &mut Vec<u8>);
    /// Decode from a full element body.
    fn decode(body: &[u8]) -> Result<Self>;
}

impl Value for u64 {
    fn measure(&self) -> u64 {
        let used = 8 - (self.leading_zeros() as u64 / 8);
        used.max(1)
    }

    fn encode(&self, out: &mut Vec<u8>) {
        let width = self.measure() as usize;
        out.extend_from_slice(&self.to_be_bytes()[8 - width..]);
    }

    fn decode(body: &[u8]) -> Result<Self> {
        if body.is_empty() || body.len() > 8 {
            return Err(Error::MalformedElement(format!(
                "unsigned integer width {}",
                body.len()
            )));
        }
        let mut value: u64 = 0;
        for &b in body {
            value = (value << 8) | u64::from(b);
        }
        Ok(value)
    }
}

impl Value for i64 {
    fn measure(&self) -> u64 {
        minimal_signed(&self.to_be_bytes()).len() as u64
    }

    fn encode(&self, out: &mut Vec<u8>) {
        let bytes = self.to_be_bytes();
        out.extend_from_slice(minimal_signed(&bytes));
    }

    fn decode(body: &[u8]) -> Result<Self> {
        if body.is_empty() || body.len() > 8 {
            return Err(Error::MalformedElement(format!(
                "signed integer width {}",
                body.len()
            )));
        }
        let fill = if body[0] & 0x80 != 0 { 0xff } else { 0x00 };
        let mut bytes = [fill; 8];
        bytes[8 - body.len()..].copy_from_slice(body);
        Ok(i64::from_be_bytes(bytes))
    }
}

/// Strip redundant sign-extension bytes from a big-endian two's-complement
/// representation. Always keeps at least one byte.
fn minimal_signed(bytes: &[u8]) -> &[u8] {
    let mut start = 0;
    while start + 1 < bytes.len() {
        let lead = bytes[start];
        let next = bytes[start + 1];
        let redundant = (lead == 0x00 && next & 0x80 == 0) || (lead == 0xff && next & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    &bytes[start..]
}

/// Arbitrary-precision integer carried as minimal-width big-endian
/// two's-complement bytes. The codec transports these; nothing in the
/// system computes with them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BigIntBytes(Vec<u8>);

impl BigIntBytes {
    pub fn from_twos_complement(bytes: Vec<u8>) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::MalformedElement("empty big integer".into()));
        }
        Ok(Self(bytes))
    }

    pub fn from_i64(v: i64) -> Self {
        let mut out = Vec::new();
        v.encode(&mut out);
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Narrowing view for small amounts; fails when the value does not
    /// fit an i64.
    pub fn to_i64(&self) -> Result<i64> {
        i64::decode(&self.0)
    }
}

impl Value for BigIntBytes {
    fn measure(&self) -> u64 {
        self.0.len() as u64
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0);
    }

    fn decode(body: &[u8]) -> Result<Self> {
        Self::from_twos_complement(body.to_vec())
    }
}

impl Value for String {
    fn measure(&self) -> u64 {
        self.len() as u64
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.as_bytes());
    }

    fn decode(body: &[u8]) -> Result<Self> {
        String::from_utf8(body.to_vec())
            .map_err(|_| Error::MalformedElement("invalid UTF-8 string".into()))
    }
}

/// ASCII-only string (printable identifiers on the wire).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AsciiString(String);

impl AsciiString {
    pub fn new(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        if !s.is_ascii() {
            return Err(Error::MalformedElement("non-ASCII string".into()));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AsciiString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Value for AsciiString {
    fn measure(&self) -> u64 {
        self.0.len() as u64
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.0.as_bytes());
    }

    fn decode(body: &[u8]) -> Result<Self> {
        if !body.is_ascii() {
            return Err(Error::MalformedElement("non-ASCII string".into()));
        }
        // Safe: ASCII is valid UTF-8
        Ok(Self(String::from_utf8(body.to_vec()).unwrap()))
    }
}

impl Value for Vec<u8> {
    fn measure(&self) -> u64 {
        self.len() as u64
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }

    fn decode(body: &[u8]) -> Result<Self> {
        Ok(body.to_vec())
    }
}

/// Millisecond-granularity timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimestampMs(pub i64);

impl TimestampMs {
    pub fn now() -> Self {
        Self(crate::common::timestamp_now_millis())
    }
}

impl std::fmt::Display for TimestampMs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match chrono::DateTime::from_timestamp_millis(self.0) {
            Some(dt) => write!(f, "{}", dt.to_rfc3339()),
            None => write!(f, "{}ms", self.0),
        }
    }
}

impl Value for TimestampMs {
    fn measure(&self) -> u64 {
        self.0.measure()
    }

    fn encode(&self, out: &mut Vec<u8>) {
        self.0.encode(out)
    }

    fn decode(body: &[u8]) -> Result<Self> {
        Ok(Self(i64::decode(body)?))
    }
}

impl Value for Uuid {
    fn measure(&self) -> u64 {
        16
    }

    fn encode(&self, out: &mut Vec<u8>) {
        // Two big-endian u64 halves
        let (hi, lo) = self.as_u64_pair();
        out.extend_from_slice(&hi.to_be_bytes());
        out.extend_from_slice(&lo.to_be_bytes());
    }

    fn decode(body: &[u8]) -> Result<Self> {
        if body.len() != 16 {
            return Err(Error::MalformedElement(format!("UUID width {}", body.len())));
        }
        let hi = u64::from_be_bytes(body[..8].try_into().unwrap());
        let lo = u64::from_be_bytes(body[8..].try_into().unwrap());
        Ok(Uuid::from_u64_pair(hi, lo))
    }
}

impl Value for ContentDigest {
    fn measure(&self) -> u64 {
        DIGEST_LEN as u64
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.as_bytes());
    }

    fn decode(body: &[u8]) -> Result<Self> {
        ContentDigest::from_slice(body)
    }
}

impl Value for Address {
    fn measure(&self) -> u64 {
        DIGEST_LEN as u64
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.as_bytes());
    }

    fn decode(body: &[u8]) -> Result<Self> {
        Address::from_slice(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip<V: Value + PartialEq + std::fmt::Debug + Clone>(v: V) {
        let mut buf = Vec::new();
        v.encode(&mut buf);
        assert_eq!(buf.len() as u64, v.measure());
        assert_eq!(V::decode(&buf).unwrap(), v);
    }

    #[test]
    fn test_unsigned_boundaries() {
        for v in [0u64, 1, 127, 128, 255, 256, u32::MAX as u64, u64::MAX] {
            roundtrip(v);
        }
    }

    #[test]
    fn test_signed_boundaries() {
        for v in [0i64, -1, 1, 127, -128, 128, -129, i64::MAX, i64::MIN] {
            roundtrip(v);
        }
    }

    #[test]
    fn test_signed_minimal_width() {
        let mut buf = Vec::new();
        (-1i64).encode(&mut buf);
        assert_eq!(buf, vec![0xff]);

        buf.clear();
        127i64.encode(&mut buf);
        assert_eq!(buf, vec![0x7f]);

        buf.clear();
        128i64.encode(&mut buf);
        assert_eq!(buf, vec![0x00, 0x80]);
    }

    #[test]
    fn test_big_integer() {
        roundtrip(BigIntBytes::from_i64(0));
        roundtrip(BigIntBytes::from_i64(-1));
        roundtrip(BigIntBytes::from_i64(i64::MAX));
        // Wider than any machine integer
        let wide = BigIntBytes::from_twos_complement(vec![0x01; 24]).unwrap();
        roundtrip(wide.clone());
        assert!(wide.to_i64().is_err());
    }

    #[test]
    fn test_strings() {
        roundtrip(String::new());
        roundtrip("grüße".to_string());
        roundtrip(AsciiString::new("plain").unwrap());
        assert!(AsciiString::new("grüße").is_err());
        assert!(<AsciiString as Value>::decode("grüße".as_bytes()).is_err());
    }

    #[test]
    fn test_bytes() {
        roundtrip(Vec::<u8>::new());
        roundtrip(vec![0u8, 255, 1, 2]);
    }

    #[test]
    fn test_timestamp() {
        roundtrip(TimestampMs(0));
        roundtrip(TimestampMs(-1));
        roundtrip(TimestampMs(1_700_000_000_000));
    }

    #[test]
    fn test_uuid_boundaries() {
        roundtrip(Uuid::nil());
        roundtrip(Uuid::from_u64_pair(u64::MAX, u64::MAX));
        roundtrip(Uuid::new_v4());
        assert!(<Uuid as Value>::decode(&[0u8; 15]).is_err());
    }

    #[test]
    fn test_integer_width_limits() {
        assert!(<u64 as Value>::decode(&[0u8; 9]).is_err());
        assert!(<u64 as Value>::decode(&[]).is_err());
        assert!(<i64 as Value>::decode(&[0u8; 9]).is_err());
    }
}
