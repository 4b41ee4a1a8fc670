//! Element tag registry
//!
//! Tags are globally unique across the protocol. Request and response
//! envelopes are distinct tags; the remaining families (entry, field,
//! cheque, query, schema, billing) appear inside either context.

use crate::codec::Tag;

// === Envelope ===
pub const MESSAGE_ID: Tag = 0x01;

// === Request envelopes ===
pub const MODIFICATION_REQUEST: Tag = 0x10;
pub const RECOLLECTION_REQUEST: Tag = 0x11;
pub const HEALING_REQUEST: Tag = 0x12;
pub const SCHEMA_REQUEST: Tag = 0x13;
pub const BILLING_REQUEST: Tag = 0x14;

// === Response envelopes ===
pub const MODIFICATION_RESPONSE: Tag = 0x20;
pub const RECOLLECTION_RESPONSE: Tag = 0x21;
pub const HEALING_RESPONSE: Tag = 0x22;
pub const SCHEMA_RESPONSE: Tag = 0x23;
pub const BILLING_RESPONSE: Tag = 0x24;

// === Consistency declaration ===
pub const CONSISTENCY: Tag = 0x30;
pub const CONSISTENCY_COUNT: Tag = 0x31;
pub const CONSISTENCY_PERCENT: Tag = 0x32;
pub const CONSISTENCY_QUORUM: Tag = 0x33;

// === Entry ===
pub const ENTRY: Tag = 0x40;
pub const ENTRY_HEADER: Tag = 0x41;
pub const HEADER_TABLESPACE: Tag = 0x42;
pub const HEADER_TABLE: Tag = 0x43;
pub const HEADER_TIMESTAMP: Tag = 0x44;
pub const HEADER_VERSION: Tag = 0x45;
pub const HEADER_NETWORK: Tag = 0x46;
pub const HEADER_OLD_HASH: Tag = 0x47;
pub const HEADER_FIELDS_HASH: Tag = 0x48;
pub const HEADER_SIGNER: Tag = 0x49;
pub const HEADER_SIGNATURE: Tag = 0x4a;

// === Field ===
pub const FIELD: Tag = 0x50;
pub const FIELD_NAME: Tag = 0x51;
pub const FIELD_TYPE: Tag = 0x52;
pub const FIELD_HASH: Tag = 0x53;
pub const FIELD_VALUE: Tag = 0x54;

// === Cheque ===
pub const CHEQUE: Tag = 0x60;
pub const CHEQUE_VERSION: Tag = 0x61;
pub const CHEQUE_NETWORK: Tag = 0x62;
pub const CHEQUE_SESSION: Tag = 0x63;
pub const CHEQUE_NUMBER: Tag = 0x64;
pub const CHEQUE_CROP: Tag = 0x65;
pub const CHEQUE_TABLESPACE: Tag = 0x66;
pub const CHEQUE_TABLE: Tag = 0x67;
pub const CHEQUE_SIGNER: Tag = 0x68;
pub const CHEQUE_SIGNATURE: Tag = 0x69;

// === Query: retrieve list ===
pub const RETRIEVE_LIST: Tag = 0x70;
pub const RETRIEVE_FIELD: Tag = 0x71;
pub const RETRIEVE_COMPUTE: Tag = 0x72;
pub const FUNCTION_CALL: Tag = 0x73;
pub const FUNCTION_NAME: Tag = 0x74;
pub const ARG_LITERAL: Tag = 0x75;
pub const ARG_FIELD_REF: Tag = 0x76;

// === Query: filter list ===
pub const FILTER_LIST: Tag = 0x78;
pub const FILTER: Tag = 0x79;
pub const FILTER_FIELD: Tag = 0x7a;
pub const FILTER_OP: Tag = 0x7b;
pub const FILTER_OPERAND: Tag = 0x7c;

// === Request targets ===
pub const TARGET_TABLESPACE: Tag = 0x80;
pub const TARGET_TABLE: Tag = 0x81;
pub const MODIFICATION_KIND: Tag = 0x82;

// === Response payloads ===
pub const STATUS_OK: Tag = 0x90;
pub const STATUS_ERROR: Tag = 0x91;
pub const RESULT_HEADER_HASH: Tag = 0x92;

// === Schema ===
pub const SCHEMA_FIELD: Tag = 0xa0;
pub const SCHEMA_FIELD_NAME: Tag = 0xa1;
pub const SCHEMA_FIELD_TYPE: Tag = 0xa2;
pub const SCHEMA_FIELD_PRIMARY: Tag = 0xa3;

// === Billing ===
pub const BILLING_LIMITS: Tag = 0xb0;
pub const BILLING_COUNT_LIMIT: Tag = 0xb1;
pub const BILLING_AMOUNT_THRESHOLD: Tag = 0xb2;
