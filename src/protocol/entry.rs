//! Entry data model: headers, fields, cheques
//!
//! An entry is immutable once hashed; a newer write supersedes it by
//! carrying `old_hash` pointing at the prior header hash. The header's
//! `fields_hash` commits to every field: it is the digest of the sorted
//! (by field name) concatenation of each field's own hash.

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::codec::{AsciiString, BigIntBytes, Formatter, TimestampMs, Value};
use crate::common::digest::{Address, ContentDigest, DigestContext, Keypair};
use crate::common::hash::{partition_key, PartitionKey};
use crate::common::{timestamp_now_millis, Error, Result};
use crate::protocol::tags;

/// Value type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Unsigned,
    Signed,
    BigInt,
    Utf8,
    Ascii,
    Bytes,
    Timestamp,
    Uuid,
}

impl FieldType {
    pub fn code(&self) -> u64 {
        match self {
            FieldType::Unsigned => 1,
            FieldType::Signed => 2,
            FieldType::BigInt => 3,
            FieldType::Utf8 => 4,
            FieldType::Ascii => 5,
            FieldType::Bytes => 6,
            FieldType::Timestamp => 7,
            FieldType::Uuid => 8,
        }
    }

    pub fn from_code(code: u64) -> Result<Self> {
        Ok(match code {
            1 => FieldType::Unsigned,
            2 => FieldType::Signed,
            3 => FieldType::BigInt,
            4 => FieldType::Utf8,
            5 => FieldType::Ascii,
            6 => FieldType::Bytes,
            7 => FieldType::Timestamp,
            8 => FieldType::Uuid,
            other => {
                return Err(Error::MalformedElement(format!(
                    "unknown field type code {}",
                    other
                )))
            }
        })
    }
}

impl std::str::FromStr for FieldType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "u64" | "unsigned" => FieldType::Unsigned,
            "i64" | "signed" => FieldType::Signed,
            "bigint" => FieldType::BigInt,
            "string" | "utf8" => FieldType::Utf8,
            "ascii" => FieldType::Ascii,
            "bytes" => FieldType::Bytes,
            "timestamp" => FieldType::Timestamp,
            "uuid" => FieldType::Uuid,
            other => return Err(Error::InvalidConfig(format!("unknown field type {}", other))),
        })
    }
}

/// A typed field value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldValue {
    Unsigned(u64),
    Signed(i64),
    BigInt(BigIntBytes),
    Utf8(String),
    Ascii(AsciiString),
    Bytes(Vec<u8>),
    Timestamp(TimestampMs),
    Uuid(Uuid),
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::Unsigned(_) => FieldType::Unsigned,
            FieldValue::Signed(_) => FieldType::Signed,
            FieldValue::BigInt(_) => FieldType::BigInt,
            FieldValue::Utf8(_) => FieldType::Utf8,
            FieldValue::Ascii(_) => FieldType::Ascii,
            FieldValue::Bytes(_) => FieldType::Bytes,
            FieldValue::Timestamp(_) => FieldType::Timestamp,
            FieldValue::Uuid(_) => FieldType::Uuid,
        }
    }

    pub fn measure(&self) -> u64 {
        match self {
            FieldValue::Unsigned(v) => v.measure(),
            FieldValue::Signed(v) => v.measure(),
            FieldValue::BigInt(v) => v.measure(),
            FieldValue::Utf8(v) => v.measure(),
            FieldValue::Ascii(v) => v.measure(),
            FieldValue::Bytes(v) => v.measure(),
            FieldValue::Timestamp(v) => v.measure(),
            FieldValue::Uuid(v) => v.measure(),
        }
    }

    pub fn encode_body(&self, out: &mut Vec<u8>) {
        match self {
            FieldValue::Unsigned(v) => v.encode(out),
            FieldValue::Signed(v) => v.encode(out),
            FieldValue::BigInt(v) => v.encode(out),
            FieldValue::Utf8(v) => v.encode(out),
            FieldValue::Ascii(v) => v.encode(out),
            FieldValue::Bytes(v) => v.encode(out),
            FieldValue::Timestamp(v) => v.encode(out),
            FieldValue::Uuid(v) => v.encode(out),
        }
    }

    pub fn decode_body(field_type: FieldType, body: &[u8]) -> Result<Self> {
        Ok(match field_type {
            FieldType::Unsigned => FieldValue::Unsigned(u64::decode(body)?),
            FieldType::Signed => FieldValue::Signed(i64::decode(body)?),
            FieldType::BigInt => FieldValue::BigInt(BigIntBytes::decode(body)?),
            FieldType::Utf8 => FieldValue::Utf8(String::decode(body)?),
            FieldType::Ascii => FieldValue::Ascii(AsciiString::decode(body)?),
            FieldType::Bytes => FieldValue::Bytes(Vec::<u8>::decode(body)?),
            FieldType::Timestamp => FieldValue::Timestamp(TimestampMs::decode(body)?),
            FieldType::Uuid => FieldValue::Uuid(Uuid::decode(body)?),
        })
    }

    /// Encoded body bytes; the field hash is the digest of exactly these.
    pub fn body_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.measure() as usize);
        self.encode_body(&mut out);
        out
    }

    /// Digest of the value body, as woven into the parse pass.
    pub fn hash(&self) -> ContentDigest {
        ContentDigest::of(&self.body_bytes())
    }
}

/// A field: either a disclosed value or a hash commitment to one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: AsciiString,
    pub field_type: FieldType,
    /// `None` when only a hash commitment was transmitted.
    pub value: Option<FieldValue>,
    /// Computed from the value when present, carried from the wire
    /// otherwise.
    pub hash: ContentDigest,
}

impl Field {
    pub fn with_value(name: impl Into<String>, value: FieldValue) -> Result<Self> {
        let name = AsciiString::new(name)?;
        let hash = value.hash();
        Ok(Self {
            name,
            field_type: value.field_type(),
            value: Some(value),
            hash,
        })
    }

    pub fn with_hash(
        name: impl Into<String>,
        field_type: FieldType,
        hash: ContentDigest,
    ) -> Result<Self> {
        Ok(Self {
            name: AsciiString::new(name)?,
            field_type,
            value: None,
            hash,
        })
    }
}

/// An accounting instrument threaded through entries. Carried and
/// re-emitted verbatim; never interpreted or verified here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cheque {
    pub version: u64,
    pub network_id: u64,
    pub session: Uuid,
    pub number: u64,
    pub crop: BigIntBytes,
    pub tablespace: AsciiString,
    pub table: AsciiString,
    pub signer: Address,
    pub signature: Vec<u8>,
}

/// Entry header: addressing, versioning, and the signed commitments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryHeader {
    pub tablespace: AsciiString,
    pub table: AsciiString,
    pub timestamp: TimestampMs,
    pub version: u64,
    pub network_id: u64,
    /// Header hash of the superseded entry, if any.
    pub old_hash: Option<ContentDigest>,
    /// Digest over the sorted field hashes.
    pub fields_hash: ContentDigest,
    pub signer: Address,
    pub signature: Vec<u8>,
    /// Digest of the header's signed elements. Computed, never
    /// transmitted.
    pub content_hash: ContentDigest,
}

impl EntryHeader {
    /// Encoded form of the signed header elements: every child element in
    /// wire order, up to but excluding the signature. The content hash is
    /// the digest of exactly these bytes; the parse pass feeds the same
    /// bytes to its digest frame.
    pub fn signed_bytes(&self) -> Vec<u8> {
        let mut f = Formatter::new();
        f.write_value(tags::HEADER_TABLESPACE, &self.tablespace);
        f.write_value(tags::HEADER_TABLE, &self.table);
        f.write_value(tags::HEADER_TIMESTAMP, &self.timestamp);
        f.write_value(tags::HEADER_VERSION, &self.version);
        f.write_value(tags::HEADER_NETWORK, &self.network_id);
        if let Some(old_hash) = &self.old_hash {
            f.write_value(tags::HEADER_OLD_HASH, old_hash);
        }
        f.write_value(tags::HEADER_FIELDS_HASH, &self.fields_hash);
        f.write_value(tags::HEADER_SIGNER, &self.signer);
        f.into_bytes()
    }

    pub fn compute_content_hash(&self) -> ContentDigest {
        ContentDigest::of(&self.signed_bytes())
    }
}

/// A logical record: header + fields + cheques.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub header: EntryHeader,
    /// Keyed by field name; iteration order is the hash order.
    pub fields: BTreeMap<String, Field>,
    pub cheques: Vec<Cheque>,
}

impl Entry {
    /// Content hash used to merge identical entries across replicas: the
    /// header content hash, which commits to every field hash.
    pub fn content_hash(&self) -> ContentDigest {
        self.header.content_hash
    }

    /// Aggregate hash over the fields, sorted by name.
    pub fn compute_fields_hash(fields: &BTreeMap<String, Field>) -> ContentDigest {
        let mut ctx = DigestContext::new();
        for field in fields.values() {
            ctx.update(field.hash.as_bytes());
        }
        ctx.finalize()
    }

    /// Partition key over this entry's primary-key field values.
    pub fn partition(&self, primary_key_fields: &[String]) -> Result<PartitionKey> {
        let mut pairs: Vec<(String, Vec<u8>)> = Vec::with_capacity(primary_key_fields.len());
        for name in primary_key_fields {
            let field = self.fields.get(name).ok_or_else(|| {
                Error::MalformedElement(format!("missing primary key field {}", name))
            })?;
            let value = field.value.as_ref().ok_or_else(|| {
                Error::MalformedElement(format!("primary key field {} has no value", name))
            })?;
            pairs.push((name.clone(), value.body_bytes()));
        }
        let borrowed: Vec<(&str, &[u8])> = pairs
            .iter()
            .map(|(n, v)| (n.as_str(), v.as_slice()))
            .collect();
        Ok(partition_key(&borrowed))
    }

    /// Merge a donor's disclosed field values into this entry: value
    /// fields take precedence over hash-only fields. Hashes must agree;
    /// a donor value whose hash differs is ignored.
    pub fn merge_values_from(&self, donor: &Entry) -> Entry {
        let mut merged = self.clone();
        for (name, field) in &mut merged.fields {
            if field.value.is_some() {
                continue;
            }
            if let Some(donor_field) = donor.fields.get(name) {
                if donor_field.hash == field.hash {
                    field.value = donor_field.value.clone();
                }
            }
        }
        merged
    }

    /// Copy of this entry with cheques erased (healing propagation).
    pub fn without_cheques(&self) -> Entry {
        Entry {
            header: self.header.clone(),
            fields: self.fields.clone(),
            cheques: Vec::new(),
        }
    }
}

/// Builds and signs entries.
pub struct EntryBuilder {
    tablespace: AsciiString,
    table: AsciiString,
    timestamp: TimestampMs,
    version: u64,
    network_id: u64,
    old_hash: Option<ContentDigest>,
    fields: BTreeMap<String, Field>,
    cheques: Vec<Cheque>,
}

impl EntryBuilder {
    pub fn new(tablespace: impl Into<String>, table: impl Into<String>) -> Result<Self> {
        Ok(Self {
            tablespace: AsciiString::new(tablespace)?,
            table: AsciiString::new(table)?,
            timestamp: TimestampMs(timestamp_now_millis()),
            version: 1,
            network_id: 1,
            old_hash: None,
            fields: BTreeMap::new(),
            cheques: Vec::new(),
        })
    }

    pub fn timestamp(mut self, timestamp: TimestampMs) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn network(mut self, network_id: u64) -> Self {
        self.network_id = network_id;
        self
    }

    pub fn supersedes(mut self, old_hash: ContentDigest) -> Self {
        self.old_hash = Some(old_hash);
        self
    }

    pub fn field(mut self, name: &str, value: FieldValue) -> Result<Self> {
        let field = Field::with_value(name, value)?;
        self.fields.insert(name.to_string(), field);
        Ok(self)
    }

    pub fn field_hash(
        mut self,
        name: &str,
        field_type: FieldType,
        hash: ContentDigest,
    ) -> Result<Self> {
        let field = Field::with_hash(name, field_type, hash)?;
        self.fields.insert(name.to_string(), field);
        Ok(self)
    }

    pub fn cheque(mut self, cheque: Cheque) -> Self {
        self.cheques.push(cheque);
        self
    }

    /// Finalize: compute the fields hash and content hash, sign the
    /// content hash, and assemble the entry.
    pub fn sign(self, keypair: &Keypair) -> Entry {
        let fields_hash = Entry::compute_fields_hash(&self.fields);
        let mut header = EntryHeader {
            tablespace: self.tablespace,
            table: self.table,
            timestamp: self.timestamp,
            version: self.version,
            network_id: self.network_id,
            old_hash: self.old_hash,
            fields_hash,
            signer: keypair.address(),
            signature: Vec::new(),
            content_hash: ContentDigest::from_bytes([0u8; 32]),
        };
        header.content_hash = header.compute_content_hash();
        header.signature = keypair.sign(&header.content_hash);
        Entry {
            header,
            fields: self.fields,
            cheques: self.cheques,
        }
    }
}
