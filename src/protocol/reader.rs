//! Protocol message readers
//!
//! All readers share one driver loop: read a child header, offer it to a
//! per-message handler that returns whether it recognized and consumed
//! the element, and route unrecognized tags through the configured
//! unknown-element policy. Entry headers are digested as they are read;
//! the signature element is excluded from the digest and verified
//! against it immediately.

use std::collections::BTreeMap;

use crate::codec::{AsciiString, BigIntBytes, ElementHeader, Parser, TimestampMs, UnknownElements};
use crate::common::digest::{Address, ContentDigest, SignatureScheme};
use crate::common::{Error, Result};
use crate::protocol::entry::{Cheque, Entry, EntryHeader, Field, FieldType, FieldValue};
use crate::protocol::messages::*;
use crate::protocol::query::{Argument, FilterOp, FilterPredicate, FunctionCall, Selector};
use crate::protocol::tags;

fn require<T>(value: Option<T>, what: &'static str) -> Result<T> {
    value.ok_or_else(|| Error::MalformedElement(format!("missing element: {}", what)))
}

pub struct MessageReader<'a> {
    scheme: &'a dyn SignatureScheme,
    policy: UnknownElements,
}

impl<'a> MessageReader<'a> {
    pub fn new(scheme: &'a dyn SignatureScheme, policy: UnknownElements) -> Self {
        Self { scheme, policy }
    }

    /// Decode a request frame into (message id, request).
    pub fn read_request(&self, frame: &[u8]) -> Result<(u64, NodeRequest)> {
        let mut parser = Parser::new(frame, self.policy);
        let envelope = require(parser.read_header()?, "request envelope")?;
        let decoded = match envelope.tag {
            tags::MODIFICATION_REQUEST => self.read_modification_request(&mut parser, &envelope)?,
            tags::RECOLLECTION_REQUEST => self.read_recollection_request(&mut parser, &envelope)?,
            tags::HEALING_REQUEST => self.read_healing_request(&mut parser, &envelope)?,
            tags::SCHEMA_REQUEST => self.read_schema_request(&mut parser, &envelope)?,
            tags::BILLING_REQUEST => self.read_billing_request(&mut parser, &envelope)?,
            tag => {
                return Err(Error::UnexpectedElement {
                    tag,
                    context: "request envelope",
                })
            }
        };
        if parser.read_header()?.is_some() {
            return Err(Error::MalformedElement("data after request envelope".into()));
        }
        Ok(decoded)
    }

    /// Decode a response frame into (message id, response).
    pub fn read_response(&self, frame: &[u8]) -> Result<(u64, NodeResponse)> {
        let mut parser = Parser::new(frame, self.policy);
        let envelope = require(parser.read_header()?, "response envelope")?;
        let decoded = match envelope.tag {
            tags::MODIFICATION_RESPONSE => {
                self.read_modification_response(&mut parser, &envelope)?
            }
            tags::RECOLLECTION_RESPONSE => {
                self.read_recollection_response(&mut parser, &envelope)?
            }
            tags::HEALING_RESPONSE => self.read_healing_response(&mut parser, &envelope)?,
            tags::SCHEMA_RESPONSE => self.read_schema_response(&mut parser, &envelope)?,
            tags::BILLING_RESPONSE => self.read_billing_response(&mut parser, &envelope)?,
            tag => {
                return Err(Error::UnexpectedElement {
                    tag,
                    context: "response envelope",
                })
            }
        };
        if parser.read_header()?.is_some() {
            return Err(Error::MalformedElement(
                "data after response envelope".into(),
            ));
        }
        Ok(decoded)
    }

    /// Shared driver loop: dispatch each child to `handle`; unrecognized
    /// children fall through to the unknown-element policy.
    fn read_children<F>(
        &self,
        parser: &mut Parser,
        container: &ElementHeader,
        context: &'static str,
        mut handle: F,
    ) -> Result<()>
    where
        F: FnMut(&mut Parser, &ElementHeader) -> Result<bool>,
    {
        parser.enter(container)?;
        while let Some(child) = parser.read_header()? {
            if !handle(parser, &child)? {
                parser.skip_unknown(&child, context)?;
            }
        }
        parser.leave(container.tag)
    }

    // === Requests ===

    fn read_modification_request(
        &self,
        parser: &mut Parser,
        envelope: &ElementHeader,
    ) -> Result<(u64, NodeRequest)> {
        let mut message_id = None;
        let mut kind = None;
        let mut consistency = None;
        let mut entry = None;

        self.read_children(parser, envelope, "modification request", |p, child| {
            Ok(match child.tag {
                tags::MESSAGE_ID => {
                    message_id = Some(p.read_value::<u64>(child)?);
                    true
                }
                tags::MODIFICATION_KIND => {
                    kind = Some(ModificationKind::from_code(p.read_value::<u64>(child)?)?);
                    true
                }
                tags::CONSISTENCY => {
                    consistency = Some(self.read_consistency(p, child)?);
                    true
                }
                tags::ENTRY => {
                    entry = Some(self.read_entry(p, child)?);
                    true
                }
                _ => false,
            })
        })?;

        Ok((
            require(message_id, "message id")?,
            NodeRequest::Modification(ModificationRequest {
                kind: require(kind, "modification kind")?,
                consistency: require(consistency, "consistency")?,
                entry: require(entry, "entry")?,
            }),
        ))
    }

    fn read_recollection_request(
        &self,
        parser: &mut Parser,
        envelope: &ElementHeader,
    ) -> Result<(u64, NodeRequest)> {
        let mut message_id = None;
        let mut consistency = None;
        let mut tablespace = None;
        let mut table = None;
        let mut retrieve = Vec::new();
        let mut filters = Vec::new();

        self.read_children(parser, envelope, "recollection request", |p, child| {
            Ok(match child.tag {
                tags::MESSAGE_ID => {
                    message_id = Some(p.read_value::<u64>(child)?);
                    true
                }
                tags::CONSISTENCY => {
                    consistency = Some(self.read_consistency(p, child)?);
                    true
                }
                tags::TARGET_TABLESPACE => {
                    tablespace = Some(p.read_value::<AsciiString>(child)?);
                    true
                }
                tags::TARGET_TABLE => {
                    table = Some(p.read_value::<AsciiString>(child)?);
                    true
                }
                tags::RETRIEVE_LIST => {
                    retrieve = self.read_retrieve_list(p, child)?;
                    true
                }
                tags::FILTER_LIST => {
                    filters = self.read_filter_list(p, child)?;
                    true
                }
                _ => false,
            })
        })?;

        Ok((
            require(message_id, "message id")?,
            NodeRequest::Recollection(RecollectionRequest {
                consistency: require(consistency, "consistency")?,
                tablespace: require(tablespace, "tablespace")?,
                table: require(table, "table")?,
                retrieve,
                filters,
            }),
        ))
    }

    fn read_healing_request(
        &self,
        parser: &mut Parser,
        envelope: &ElementHeader,
    ) -> Result<(u64, NodeRequest)> {
        let mut message_id = None;
        let mut entry = None;

        self.read_children(parser, envelope, "healing request", |p, child| {
            Ok(match child.tag {
                tags::MESSAGE_ID => {
                    message_id = Some(p.read_value::<u64>(child)?);
                    true
                }
                tags::ENTRY => {
                    entry = Some(self.read_entry(p, child)?);
                    true
                }
                _ => false,
            })
        })?;

        Ok((
            require(message_id, "message id")?,
            NodeRequest::Healing(HealingRequest {
                entry: require(entry, "entry")?,
            }),
        ))
    }

    fn read_schema_request(
        &self,
        parser: &mut Parser,
        envelope: &ElementHeader,
    ) -> Result<(u64, NodeRequest)> {
        let mut message_id = None;
        let mut tablespace = None;
        let mut table = None;

        self.read_children(parser, envelope, "schema request", |p, child| {
            Ok(match child.tag {
                tags::MESSAGE_ID => {
                    message_id = Some(p.read_value::<u64>(child)?);
                    true
                }
                tags::TARGET_TABLESPACE => {
                    tablespace = Some(p.read_value::<AsciiString>(child)?);
                    true
                }
                tags::TARGET_TABLE => {
                    table = Some(p.read_value::<AsciiString>(child)?);
                    true
                }
                _ => false,
            })
        })?;

        Ok((
            require(message_id, "message id")?,
            NodeRequest::Schema(SchemaRequest {
                tablespace: require(tablespace, "tablespace")?,
                table: require(table, "table")?,
            }),
        ))
    }

    fn read_billing_request(
        &self,
        parser: &mut Parser,
        envelope: &ElementHeader,
    ) -> Result<(u64, NodeRequest)> {
        let mut message_id = None;
        let mut tablespace = None;
        let mut table = None;
        let mut limits = None;

        self.read_children(parser, envelope, "billing request", |p, child| {
            Ok(match child.tag {
                tags::MESSAGE_ID => {
                    message_id = Some(p.read_value::<u64>(child)?);
                    true
                }
                tags::TARGET_TABLESPACE => {
                    tablespace = Some(p.read_value::<AsciiString>(child)?);
                    true
                }
                tags::TARGET_TABLE => {
                    table = Some(p.read_value::<AsciiString>(child)?);
                    true
                }
                tags::BILLING_LIMITS => {
                    limits = Some(self.read_billing_limits(p, child)?);
                    true
                }
                _ => false,
            })
        })?;

        Ok((
            require(message_id, "message id")?,
            NodeRequest::Billing(BillingRequest {
                tablespace: require(tablespace, "tablespace")?,
                table: require(table, "table")?,
                limits: require(limits, "billing limits")?,
            }),
        ))
    }

    fn read_billing_limits(
        &self,
        parser: &mut Parser,
        container: &ElementHeader,
    ) -> Result<BillingLimits> {
        let mut count_limit = None;
        let mut amount_threshold = None;

        self.read_children(parser, container, "billing limits", |p, child| {
            Ok(match child.tag {
                tags::BILLING_COUNT_LIMIT => {
                    count_limit = Some(p.read_value::<u64>(child)?);
                    true
                }
                tags::BILLING_AMOUNT_THRESHOLD => {
                    amount_threshold = Some(p.read_value::<BigIntBytes>(child)?);
                    true
                }
                _ => false,
            })
        })?;

        Ok(BillingLimits {
            count_limit: require(count_limit, "count limit")?,
            amount_threshold: require(amount_threshold, "amount threshold")?,
        })
    }

    // === Responses ===

    fn read_modification_response(
        &self,
        parser: &mut Parser,
        envelope: &ElementHeader,
    ) -> Result<(u64, NodeResponse)> {
        let mut message_id = None;
        let mut header_hash = None;
        let mut status = None;

        self.read_children(parser, envelope, "modification response", |p, child| {
            Ok(match child.tag {
                tags::MESSAGE_ID => {
                    message_id = Some(p.read_value::<u64>(child)?);
                    true
                }
                tags::RESULT_HEADER_HASH => {
                    header_hash = Some(p.read_value::<ContentDigest>(child)?);
                    true
                }
                tags::STATUS_OK => {
                    p.skip(child)?;
                    status = Some(ApplyStatus::Applied);
                    true
                }
                tags::STATUS_ERROR => {
                    status = Some(ApplyStatus::Rejected(p.read_value::<String>(child)?));
                    true
                }
                _ => false,
            })
        })?;

        Ok((
            require(message_id, "message id")?,
            NodeResponse::Modification(ModificationResponse {
                header_hash: require(header_hash, "header hash")?,
                status: require(status, "status")?,
            }),
        ))
    }

    fn read_recollection_response(
        &self,
        parser: &mut Parser,
        envelope: &ElementHeader,
    ) -> Result<(u64, NodeResponse)> {
        let mut message_id = None;
        let mut entries = Vec::new();
        let mut error = None;

        self.read_children(parser, envelope, "recollection response", |p, child| {
            Ok(match child.tag {
                tags::MESSAGE_ID => {
                    message_id = Some(p.read_value::<u64>(child)?);
                    true
                }
                tags::ENTRY => {
                    entries.push(self.read_entry(p, child)?);
                    true
                }
                tags::STATUS_ERROR => {
                    error = Some(p.read_value::<String>(child)?);
                    true
                }
                _ => false,
            })
        })?;

        Ok((
            require(message_id, "message id")?,
            NodeResponse::Recollection(RecollectionResponse { entries, error }),
        ))
    }

    fn read_healing_response(
        &self,
        parser: &mut Parser,
        envelope: &ElementHeader,
    ) -> Result<(u64, NodeResponse)> {
        let mut message_id = None;
        let mut status = None;

        self.read_children(parser, envelope, "healing response", |p, child| {
            Ok(match child.tag {
                tags::MESSAGE_ID => {
                    message_id = Some(p.read_value::<u64>(child)?);
                    true
                }
                tags::STATUS_OK => {
                    p.skip(child)?;
                    status = Some(ApplyStatus::Applied);
                    true
                }
                tags::STATUS_ERROR => {
                    status = Some(ApplyStatus::Rejected(p.read_value::<String>(child)?));
                    true
                }
                _ => false,
            })
        })?;

        Ok((
            require(message_id, "message id")?,
            NodeResponse::Healing(HealingResponse {
                status: require(status, "status")?,
            }),
        ))
    }

    fn read_schema_response(
        &self,
        parser: &mut Parser,
        envelope: &ElementHeader,
    ) -> Result<(u64, NodeResponse)> {
        let mut message_id = None;
        let mut fields = Vec::new();

        self.read_children(parser, envelope, "schema response", |p, child| {
            Ok(match child.tag {
                tags::MESSAGE_ID => {
                    message_id = Some(p.read_value::<u64>(child)?);
                    true
                }
                tags::SCHEMA_FIELD => {
                    fields.push(self.read_schema_field(p, child)?);
                    true
                }
                _ => false,
            })
        })?;

        Ok((
            require(message_id, "message id")?,
            NodeResponse::Schema(SchemaResponse { fields }),
        ))
    }

    fn read_schema_field(
        &self,
        parser: &mut Parser,
        container: &ElementHeader,
    ) -> Result<FieldDescription> {
        let mut name = None;
        let mut field_type = None;
        let mut primary_key = None;

        self.read_children(parser, container, "schema field", |p, child| {
            Ok(match child.tag {
                tags::SCHEMA_FIELD_NAME => {
                    name = Some(p.read_value::<AsciiString>(child)?);
                    true
                }
                tags::SCHEMA_FIELD_TYPE => {
                    field_type = Some(FieldType::from_code(p.read_value::<u64>(child)?)?);
                    true
                }
                tags::SCHEMA_FIELD_PRIMARY => {
                    primary_key = Some(p.read_value::<u64>(child)? != 0);
                    true
                }
                _ => false,
            })
        })?;

        Ok(FieldDescription {
            name: require(name, "schema field name")?,
            field_type: require(field_type, "schema field type")?,
            primary_key: require(primary_key, "schema field primary flag")?,
        })
    }

    fn read_billing_response(
        &self,
        parser: &mut Parser,
        envelope: &ElementHeader,
    ) -> Result<(u64, NodeResponse)> {
        let mut message_id = None;
        let mut cheques = Vec::new();

        self.read_children(parser, envelope, "billing response", |p, child| {
            Ok(match child.tag {
                tags::MESSAGE_ID => {
                    message_id = Some(p.read_value::<u64>(child)?);
                    true
                }
                tags::CHEQUE => {
                    cheques.push(self.read_cheque(p, child)?);
                    true
                }
                _ => false,
            })
        })?;

        Ok((
            require(message_id, "message id")?,
            NodeResponse::Billing(BillingResponse { cheques }),
        ))
    }

    // === Shared element families ===

    fn read_consistency(
        &self,
        parser: &mut Parser,
        container: &ElementHeader,
    ) -> Result<ConsistencyRequirement> {
        let mut requirement = None;

        self.read_children(parser, container, "consistency", |p, child| {
            Ok(match child.tag {
                tags::CONSISTENCY_COUNT => {
                    let n = p.read_value::<u64>(child)?;
                    let n = u32::try_from(n).map_err(|_| {
                        Error::MalformedElement(format!("consistency count {} out of range", n))
                    })?;
                    requirement = Some(ConsistencyRequirement::Count(n));
                    true
                }
                tags::CONSISTENCY_PERCENT => {
                    let p_value = p.read_value::<u64>(child)?;
                    if p_value > 100 {
                        return Err(Error::MalformedElement(format!(
                            "consistency percent {} out of range",
                            p_value
                        )));
                    }
                    requirement = Some(ConsistencyRequirement::Percent(p_value as u8));
                    true
                }
                tags::CONSISTENCY_QUORUM => {
                    p.skip(child)?;
                    requirement = Some(ConsistencyRequirement::Quorum);
                    true
                }
                _ => false,
            })
        })?;

        require(requirement, "consistency requirement")
    }

    /// Read an entry: one header, fields, cheques. Verifies the header
    /// signature and the aggregate fields hash.
    pub fn read_entry(&self, parser: &mut Parser, container: &ElementHeader) -> Result<Entry> {
        let mut header: Option<EntryHeader> = None;
        let mut fields: BTreeMap<String, Field> = BTreeMap::new();
        let mut cheques = Vec::new();

        self.read_children(parser, container, "entry", |p, child| {
            Ok(match child.tag {
                tags::ENTRY_HEADER => {
                    if header.is_some() {
                        return Err(Error::DuplicateHeader);
                    }
                    header = Some(self.read_entry_header(p, child)?);
                    true
                }
                tags::FIELD => {
                    let field = self.read_field(p, child)?;
                    let name = field.name.as_str().to_string();
                    if fields.insert(name.clone(), field).is_some() {
                        return Err(Error::MalformedElement(format!(
                            "duplicate field {}",
                            name
                        )));
                    }
                    true
                }
                tags::CHEQUE => {
                    cheques.push(self.read_cheque(p, child)?);
                    true
                }
                _ => false,
            })
        })?;

        let header = header.ok_or(Error::MissingHeader)?;

        let computed = Entry::compute_fields_hash(&fields);
        if computed != header.fields_hash {
            return Err(Error::FieldsHashMismatch {
                declared: header.fields_hash.to_string(),
                computed: computed.to_string(),
            });
        }

        Ok(Entry {
            header,
            fields,
            cheques,
        })
    }

    /// Read an entry header, digesting every signed element as it goes
    /// by. The digest frame is detached either at the signature element
    /// (success path) or before propagating an error.
    fn read_entry_header(
        &self,
        parser: &mut Parser,
        container: &ElementHeader,
    ) -> Result<EntryHeader> {
        parser.enter(container)?;
        let depth_before = parser.digest_depth();
        parser.push_digest();

        let result = self.read_entry_header_children(parser);

        // Balance the digest frame on every exit path
        while parser.digest_depth() > depth_before {
            parser.pop_digest();
        }
        let header = result?;
        parser.leave(container.tag)?;
        Ok(header)
    }

    fn read_entry_header_children(&self, parser: &mut Parser) -> Result<EntryHeader> {
        let mut tablespace = None;
        let mut table = None;
        let mut timestamp = None;
        let mut version = None;
        let mut network_id = None;
        let mut old_hash = None;
        let mut fields_hash = None;
        let mut signer: Option<Address> = None;

        while let Some(child) = parser.read_header()? {
            match child.tag {
                tags::HEADER_TABLESPACE => {
                    tablespace = Some(parser.read_value::<AsciiString>(&child)?)
                }
                tags::HEADER_TABLE => table = Some(parser.read_value::<AsciiString>(&child)?),
                tags::HEADER_TIMESTAMP => {
                    timestamp = Some(parser.read_value::<TimestampMs>(&child)?)
                }
                tags::HEADER_VERSION => version = Some(parser.read_value::<u64>(&child)?),
                tags::HEADER_NETWORK => network_id = Some(parser.read_value::<u64>(&child)?),
                tags::HEADER_OLD_HASH => {
                    old_hash = Some(parser.read_value::<ContentDigest>(&child)?)
                }
                tags::HEADER_FIELDS_HASH => {
                    fields_hash = Some(parser.read_value::<ContentDigest>(&child)?)
                }
                tags::HEADER_SIGNER => signer = Some(parser.read_value::<Address>(&child)?),
                tags::HEADER_SIGNATURE => {
                    // The signature element is excluded from the signed span
                    let content_hash = parser.pop_digest();
                    let signature = parser.read_value::<Vec<u8>>(&child)?;
                    if parser.read_header()?.is_some() {
                        return Err(Error::MalformedElement(
                            "element after header signature".into(),
                        ));
                    }

                    let signer = require(signer, "signer")?;
                    let recovered = self.scheme.recover(&content_hash, &signature)?;
                    if recovered != signer {
                        return Err(Error::SignatureCheckFailed(signer.to_string()));
                    }

                    return Ok(EntryHeader {
                        tablespace: require(tablespace, "tablespace")?,
                        table: require(table, "table")?,
                        timestamp: require(timestamp, "timestamp")?,
                        version: require(version, "version")?,
                        network_id: require(network_id, "network id")?,
                        old_hash,
                        fields_hash: require(fields_hash, "fields hash")?,
                        signer,
                        signature,
                        content_hash,
                    });
                }
                _ => parser.skip_unknown(&child, "entry header")?,
            }
        }

        Err(Error::MalformedElement("header missing signature".into()))
    }

    /// Read one field. The value body is hashed unless only a hash
    /// commitment was transmitted.
    fn read_field(&self, parser: &mut Parser, container: &ElementHeader) -> Result<Field> {
        let mut name = None;
        let mut field_type = None;
        let mut value_body: Option<Vec<u8>> = None;
        let mut hash = None;

        self.read_children(parser, container, "field", |p, child| {
            Ok(match child.tag {
                tags::FIELD_NAME => {
                    name = Some(p.read_value::<AsciiString>(child)?);
                    true
                }
                tags::FIELD_TYPE => {
                    field_type = Some(FieldType::from_code(p.read_value::<u64>(child)?)?);
                    true
                }
                tags::FIELD_VALUE => {
                    value_body = Some(p.read_bytes(child)?.to_vec());
                    true
                }
                tags::FIELD_HASH => {
                    hash = Some(p.read_value::<ContentDigest>(child)?);
                    true
                }
                _ => false,
            })
        })?;

        let name = require(name, "field name")?;
        let field_type = require(field_type, "field type")?;

        match (value_body, hash) {
            (Some(body), None) => {
                let value = FieldValue::decode_body(field_type, &body)?;
                let hash = ContentDigest::of(&body);
                Ok(Field {
                    name,
                    field_type,
                    value: Some(value),
                    hash,
                })
            }
            (None, Some(hash)) => Ok(Field {
                name,
                field_type,
                value: None,
                hash,
            }),
            (Some(_), Some(_)) => Err(Error::MalformedElement(format!(
                "field {} carries both value and hash",
                name
            ))),
            (None, None) => Err(Error::MalformedElement(format!(
                "field {} carries neither value nor hash",
                name
            ))),
        }
    }

    fn read_cheque(&self, parser: &mut Parser, container: &ElementHeader) -> Result<Cheque> {
        let mut version = None;
        let mut network_id = None;
        let mut session = None;
        let mut number = None;
        let mut crop = None;
        let mut tablespace = None;
        let mut table = None;
        let mut signer = None;
        let mut signature = None;

        self.read_children(parser, container, "cheque", |p, child| {
            Ok(match child.tag {
                tags::CHEQUE_VERSION => {
                    version = Some(p.read_value::<u64>(child)?);
                    true
                }
                tags::CHEQUE_NETWORK => {
                    network_id = Some(p.read_value::<u64>(child)?);
                    true
                }
                tags::CHEQUE_SESSION => {
                    session = Some(p.read_value::<uuid::Uuid>(child)?);
                    true
                }
                tags::CHEQUE_NUMBER => {
                    number = Some(p.read_value::<u64>(child)?);
                    true
                }
                tags::CHEQUE_CROP => {
                    crop = Some(p.read_value::<BigIntBytes>(child)?);
                    true
                }
                tags::CHEQUE_TABLESPACE => {
                    tablespace = Some(p.read_value::<AsciiString>(child)?);
                    true
                }
                tags::CHEQUE_TABLE => {
                    table = Some(p.read_value::<AsciiString>(child)?);
                    true
                }
                tags::CHEQUE_SIGNER => {
                    signer = Some(p.read_value::<Address>(child)?);
                    true
                }
                tags::CHEQUE_SIGNATURE => {
                    signature = Some(p.read_value::<Vec<u8>>(child)?);
                    true
                }
                _ => false,
            })
        })?;

        Ok(Cheque {
            version: require(version, "cheque version")?,
            network_id: require(network_id, "cheque network")?,
            session: require(session, "cheque session")?,
            number: require(number, "cheque number")?,
            crop: require(crop, "cheque crop amount")?,
            tablespace: require(tablespace, "cheque tablespace")?,
            table: require(table, "cheque table")?,
            signer: require(signer, "cheque signer")?,
            signature: require(signature, "cheque signature")?,
        })
    }

    fn read_retrieve_list(
        &self,
        parser: &mut Parser,
        container: &ElementHeader,
    ) -> Result<Vec<Selector>> {
        let mut selectors = Vec::new();

        self.read_children(parser, container, "retrieve list", |p, child| {
            Ok(match child.tag {
                tags::RETRIEVE_FIELD => {
                    selectors.push(Selector::Field(p.read_value::<AsciiString>(child)?));
                    true
                }
                tags::RETRIEVE_COMPUTE => {
                    let mut call = None;
                    self.read_children(p, child, "compute selector", |p, inner| {
                        Ok(match inner.tag {
                            tags::FUNCTION_CALL => {
                                call = Some(self.read_function_call(p, inner)?);
                                true
                            }
                            _ => false,
                        })
                    })?;
                    selectors.push(Selector::Compute(require(call, "function call")?));
                    true
                }
                _ => false,
            })
        })?;

        Ok(selectors)
    }

    /// Read a function call; arguments recurse without a depth limit.
    fn read_function_call(
        &self,
        parser: &mut Parser,
        container: &ElementHeader,
    ) -> Result<FunctionCall> {
        let mut name = None;
        let mut args = Vec::new();

        self.read_children(parser, container, "function call", |p, child| {
            Ok(match child.tag {
                tags::FUNCTION_NAME => {
                    name = Some(p.read_value::<AsciiString>(child)?);
                    true
                }
                tags::ARG_LITERAL => {
                    args.push(Argument::Literal(self.read_literal(p, child)?));
                    true
                }
                tags::ARG_FIELD_REF => {
                    args.push(Argument::FieldRef(p.read_value::<AsciiString>(child)?));
                    true
                }
                tags::FUNCTION_CALL => {
                    args.push(Argument::Call(self.read_function_call(p, child)?));
                    true
                }
                _ => false,
            })
        })?;

        Ok(FunctionCall {
            name: require(name, "function name")?,
            args,
        })
    }

    fn read_literal(&self, parser: &mut Parser, container: &ElementHeader) -> Result<FieldValue> {
        let mut field_type = None;
        let mut body: Option<Vec<u8>> = None;

        self.read_children(parser, container, "literal", |p, child| {
            Ok(match child.tag {
                tags::FIELD_TYPE => {
                    field_type = Some(FieldType::from_code(p.read_value::<u64>(child)?)?);
                    true
                }
                tags::FIELD_VALUE => {
                    body = Some(p.read_bytes(child)?.to_vec());
                    true
                }
                _ => false,
            })
        })?;

        FieldValue::decode_body(
            require(field_type, "literal type")?,
            &require(body, "literal value")?,
        )
    }

    fn read_filter_list(
        &self,
        parser: &mut Parser,
        container: &ElementHeader,
    ) -> Result<Vec<FilterPredicate>> {
        let mut filters = Vec::new();

        self.read_children(parser, container, "filter list", |p, child| {
            Ok(match child.tag {
                tags::FILTER => {
                    filters.push(self.read_filter(p, child)?);
                    true
                }
                _ => false,
            })
        })?;

        Ok(filters)
    }

    fn read_filter(
        &self,
        parser: &mut Parser,
        container: &ElementHeader,
    ) -> Result<FilterPredicate> {
        let mut field = None;
        let mut op = None;
        let mut operand = None;

        self.read_children(parser, container, "filter", |p, child| {
            Ok(match child.tag {
                tags::FILTER_FIELD => {
                    field = Some(p.read_value::<AsciiString>(child)?);
                    true
                }
                tags::FILTER_OP => {
                    op = Some(FilterOp::from_code(p.read_value::<u64>(child)?)?);
                    true
                }
                tags::FILTER_OPERAND => {
                    operand = Some(self.read_literal(p, child)?);
                    true
                }
                _ => false,
            })
        })?;

        Ok(FilterPredicate {
            field: require(field, "filter field")?,
            op: require(op, "filter op")?,
            operand: require(operand, "filter operand")?,
        })
    }
}
