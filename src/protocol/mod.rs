//! Wire protocol: data model, message types, readers and writers
//!
//! Built on the element codec. Readers verify header signatures and
//! field-hash commitments as part of the parse pass; writers measure
//! bottom-up and emit byte-identical forms, so hashes derived on either
//! side always agree.

pub mod entry;
pub mod messages;
pub mod query;
pub mod reader;
pub mod tags;
pub mod writer;

pub use entry::{Cheque, Entry, EntryBuilder, EntryHeader, Field, FieldType, FieldValue};
pub use messages::{
    ApplyStatus, BillingLimits, BillingRequest, BillingResponse, ConsistencyRequirement,
    FieldDescription, HealingRequest, HealingResponse, ModificationKind, ModificationRequest,
    ModificationResponse, NodeRequest, NodeResponse, RecollectionRequest, RecollectionResponse,
    SchemaRequest, SchemaResponse,
};
pub use query::{Argument, FilterOp, FilterPredicate, FunctionCall, Selector};
pub use reader::MessageReader;
pub use writer::{write_request, write_response};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{AsciiString, BigIntBytes, Formatter, TimestampMs, UnknownElements};
    use crate::common::digest::ContentDigest;
    use crate::common::{Ed25519Scheme, Error, Keypair};
    use uuid::Uuid;

    static SCHEME: Ed25519Scheme = Ed25519Scheme;

    fn reader() -> MessageReader<'static> {
        MessageReader::new(&SCHEME, UnknownElements::Error)
    }

    fn ascii(s: &str) -> AsciiString {
        AsciiString::new(s).unwrap()
    }

    fn rich_entry(keypair: &Keypair) -> Entry {
        EntryBuilder::new("signedspace", "harvest")
            .unwrap()
            .timestamp(TimestampMs(1_700_000_000_000))
            .version(5)
            .network(7)
            .supersedes(ContentDigest::of(b"previous header"))
            .field("count", FieldValue::Unsigned(u64::MAX))
            .unwrap()
            .field("delta", FieldValue::Signed(-42))
            .unwrap()
            .field("amount", FieldValue::BigInt(BigIntBytes::from_i64(1 << 40)))
            .unwrap()
            .field("label", FieldValue::Utf8("grüße".into()))
            .unwrap()
            .field("code", FieldValue::Ascii(ascii("plain")))
            .unwrap()
            .field("blob", FieldValue::Bytes(vec![0, 255, 1]))
            .unwrap()
            .field("seen", FieldValue::Timestamp(TimestampMs(-1)))
            .unwrap()
            .field("tag", FieldValue::Uuid(Uuid::from_u64_pair(u64::MAX, 1)))
            .unwrap()
            .field_hash(
                "secret",
                FieldType::Bytes,
                ContentDigest::of(b"undisclosed value"),
            )
            .unwrap()
            .cheque(Cheque {
                version: 1,
                network_id: 7,
                session: Uuid::new_v4(),
                number: 12,
                crop: BigIntBytes::from_i64(500),
                tablespace: ascii("signedspace"),
                table: ascii("harvest"),
                signer: keypair.address(),
                signature: vec![1u8; 96],
            })
            .sign(keypair)
    }

    #[test]
    fn test_modification_request_roundtrip() {
        let keypair = Keypair::generate();
        let entry = rich_entry(&keypair);
        let request = NodeRequest::Modification(ModificationRequest {
            kind: ModificationKind::Update,
            consistency: ConsistencyRequirement::Quorum,
            entry: entry.clone(),
        });

        let frame = write_request(99, &request).unwrap();
        let (id, decoded) = reader().read_request(&frame).unwrap();

        assert_eq!(id, 99);
        let NodeRequest::Modification(decoded) = decoded else {
            panic!("wrong request kind");
        };
        assert_eq!(decoded.kind, ModificationKind::Update);
        assert_eq!(decoded.consistency, ConsistencyRequirement::Quorum);
        assert_eq!(decoded.entry, entry);
        assert_eq!(decoded.entry.header.content_hash, entry.header.content_hash);
    }

    #[test]
    fn test_recollection_request_roundtrip() {
        let request = NodeRequest::Recollection(RecollectionRequest {
            consistency: ConsistencyRequirement::Percent(66),
            tablespace: ascii("crops"),
            table: ascii("harvest"),
            retrieve: vec![
                Selector::Field(ascii("id")),
                Selector::Compute(FunctionCall {
                    name: ascii("add"),
                    args: vec![
                        Argument::FieldRef(ascii("yield")),
                        Argument::Call(FunctionCall {
                            name: ascii("length"),
                            args: vec![Argument::Literal(FieldValue::Utf8("abc".into()))],
                        }),
                    ],
                }),
            ],
            filters: vec![FilterPredicate {
                field: ascii("id"),
                op: FilterOp::Ge,
                operand: FieldValue::Unsigned(10),
            }],
        });

        let frame = write_request(3, &request).unwrap();
        let (id, decoded) = reader().read_request(&frame).unwrap();
        assert_eq!(id, 3);
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_healing_request_strips_nothing_by_itself() {
        let keypair = Keypair::generate();
        let entry = rich_entry(&keypair).without_cheques();
        let request = NodeRequest::Healing(HealingRequest {
            entry: entry.clone(),
        });

        let frame = write_request(11, &request).unwrap();
        let (_, decoded) = reader().read_request(&frame).unwrap();
        let NodeRequest::Healing(decoded) = decoded else {
            panic!("wrong request kind");
        };
        assert_eq!(decoded.entry, entry);
        assert!(decoded.entry.cheques.is_empty());
    }

    #[test]
    fn test_schema_and_billing_roundtrip() {
        let schema = NodeRequest::Schema(SchemaRequest {
            tablespace: ascii("crops"),
            table: ascii("harvest"),
        });
        let frame = write_request(5, &schema).unwrap();
        assert_eq!(reader().read_request(&frame).unwrap(), (5, schema));

        let billing = NodeRequest::Billing(BillingRequest {
            tablespace: ascii("crops"),
            table: ascii("harvest"),
            limits: BillingLimits {
                count_limit: 64,
                amount_threshold: BigIntBytes::from_i64(1_000_000),
            },
        });
        let frame = write_request(6, &billing).unwrap();
        assert_eq!(reader().read_request(&frame).unwrap(), (6, billing));
    }

    #[test]
    fn test_response_roundtrips() {
        let keypair = Keypair::generate();
        let entry = rich_entry(&keypair);

        let cases = vec![
            NodeResponse::Modification(ModificationResponse {
                header_hash: entry.header.content_hash,
                status: ApplyStatus::Applied,
            }),
            NodeResponse::Modification(ModificationResponse {
                header_hash: entry.header.content_hash,
                status: ApplyStatus::Rejected("version too old".into()),
            }),
            NodeResponse::Recollection(RecollectionResponse {
                entries: vec![entry.clone()],
                error: Some("one replica grumbled".into()),
            }),
            NodeResponse::Recollection(RecollectionResponse {
                entries: vec![],
                error: None,
            }),
            NodeResponse::Healing(HealingResponse {
                status: ApplyStatus::Applied,
            }),
            NodeResponse::Schema(SchemaResponse {
                fields: vec![
                    FieldDescription {
                        name: ascii("id"),
                        field_type: FieldType::Unsigned,
                        primary_key: true,
                    },
                    FieldDescription {
                        name: ascii("name"),
                        field_type: FieldType::Utf8,
                        primary_key: false,
                    },
                ],
            }),
            NodeResponse::Billing(BillingResponse {
                cheques: entry.cheques.clone(),
            }),
        ];

        for response in cases {
            let frame = write_response(42, &response).unwrap();
            let (id, decoded) = reader().read_response(&frame).unwrap();
            assert_eq!(id, 42);
            assert_eq!(decoded, response);
        }
    }

    #[test]
    fn test_tampered_signed_byte_fails_signature_check() {
        let keypair = Keypair::generate();
        let request = NodeRequest::Modification(ModificationRequest {
            kind: ModificationKind::Insert,
            consistency: ConsistencyRequirement::Quorum,
            entry: rich_entry(&keypair),
        });
        let frame = write_request(1, &request).unwrap();

        // Flip a byte inside the signed span: the tablespace string
        // "signedspace" first occurs in the entry header.
        let needle = b"signedspace";
        let pos = frame
            .windows(needle.len())
            .position(|w| w == needle)
            .unwrap();
        let mut tampered = frame.clone();
        tampered[pos] ^= 0x01;

        let err = reader().read_request(&tampered).unwrap_err();
        assert!(
            matches!(err, Error::SignatureCheckFailed(_)),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn test_corrupted_field_hash_fails_decode() {
        let keypair = Keypair::generate();
        let mut entry = rich_entry(&keypair);
        // Corrupt one field's value after signing: its recomputed hash no
        // longer matches the header's aggregate commitment.
        let field = entry.fields.get_mut("label").unwrap();
        field.value = Some(FieldValue::Utf8("tampered".into()));

        let request = NodeRequest::Modification(ModificationRequest {
            kind: ModificationKind::Insert,
            consistency: ConsistencyRequirement::Quorum,
            entry,
        });
        let frame = write_request(1, &request).unwrap();

        let err = reader().read_request(&frame).unwrap_err();
        assert!(
            matches!(err, Error::FieldsHashMismatch { .. }),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn test_unknown_element_policy() {
        // A schema request with a stray element only a newer peer would
        // produce.
        let tablespace = ascii("crops");
        let table = ascii("harvest");
        let message_id = 8u64;
        let stray_body = b"future payload";
        let body = Formatter::value_size(tags::MESSAGE_ID, &message_id)
            + Formatter::value_size(tags::TARGET_TABLESPACE, &tablespace)
            + Formatter::value_size(tags::TARGET_TABLE, &table)
            + Formatter::part_size(0xee, stray_body.len() as u64);

        let mut f = Formatter::new();
        f.begin(tags::SCHEMA_REQUEST, body);
        f.write_value(tags::MESSAGE_ID, &message_id);
        f.write_value(tags::TARGET_TABLESPACE, &tablespace);
        f.write_value(tags::TARGET_TABLE, &table);
        f.write_bytes(0xee, stray_body);
        f.end(tags::SCHEMA_REQUEST).unwrap();
        let frame = f.into_bytes();

        // Strict policy aborts
        let strict = MessageReader::new(&SCHEME, UnknownElements::Error);
        assert!(matches!(
            strict.read_request(&frame).unwrap_err(),
            Error::UnexpectedElement { tag: 0xee, .. }
        ));

        // Skip policy decodes around it
        let lenient = MessageReader::new(&SCHEME, UnknownElements::Skip);
        let (id, decoded) = lenient.read_request(&frame).unwrap();
        assert_eq!(id, 8);
        assert!(matches!(decoded, NodeRequest::Schema(_)));
    }

    #[test]
    fn test_duplicate_header_rejected() {
        let keypair = Keypair::generate();
        let entry = rich_entry(&keypair);

        let mut inner = Formatter::new();
        writer::write_entry(&mut inner, &entry).unwrap();
        let encoded_entry = inner.into_bytes();

        // Locate the header element (first child of the entry body) and
        // build an entry body that carries it twice.
        let mut p = crate::codec::Parser::new(&encoded_entry, UnknownElements::Skip);
        let entry_el = p.read_header().unwrap().unwrap();
        p.enter(&entry_el).unwrap();
        let header_el = p.read_header().unwrap().unwrap();

        let entry_body = &encoded_entry[entry_el.end() - entry_el.body_len()..entry_el.end()];
        let header_bytes = &encoded_entry[header_el.start()..header_el.end()];
        let mut doubled_body = header_bytes.to_vec();
        doubled_body.extend_from_slice(entry_body);

        let mut request = Formatter::new();
        let message_id = 1u64;
        let entry_part = Formatter::part_size(tags::ENTRY, doubled_body.len() as u64);
        let body = Formatter::value_size(tags::MESSAGE_ID, &message_id) + entry_part;
        request.begin(tags::HEALING_REQUEST, body);
        request.write_value(tags::MESSAGE_ID, &message_id);
        request.begin(tags::ENTRY, doubled_body.len() as u64);
        request.write_raw(&doubled_body);
        request.end(tags::ENTRY).unwrap();
        request.end(tags::HEALING_REQUEST).unwrap();

        let err = reader().read_request(&request.into_bytes()).unwrap_err();
        assert!(matches!(err, Error::DuplicateHeader), "unexpected: {err}");
    }
}
