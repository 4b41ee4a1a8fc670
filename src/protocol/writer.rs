//! Protocol message writers
//!
//! Writers mirror the readers element for element. Every container's body
//! size is measured bottom-up before emission, and the formatter verifies
//! each declared size was filled exactly. Header and field hashes are
//! derived from the same encoded bytes the parse pass digests, so reader
//! and writer always agree on them.

use crate::codec::Formatter;
use crate::common::Result;
use crate::protocol::entry::{Cheque, Entry, EntryHeader, Field, FieldValue};
use crate::protocol::messages::*;
use crate::protocol::query::{Argument, FilterPredicate, FunctionCall, Selector};
use crate::protocol::tags;

/// Encode a request frame.
pub fn write_request(message_id: u64, request: &NodeRequest) -> Result<Vec<u8>> {
    match request {
        NodeRequest::Modification(r) => write_modification_request(message_id, r),
        NodeRequest::Recollection(r) => write_recollection_request(message_id, r),
        NodeRequest::Healing(r) => write_healing_request(message_id, r),
        NodeRequest::Schema(r) => write_schema_request(message_id, r),
        NodeRequest::Billing(r) => write_billing_request(message_id, r),
    }
}

/// Encode a response frame.
pub fn write_response(message_id: u64, response: &NodeResponse) -> Result<Vec<u8>> {
    match response {
        NodeResponse::Modification(r) => write_modification_response(message_id, r),
        NodeResponse::Recollection(r) => write_recollection_response(message_id, r),
        NodeResponse::Healing(r) => write_healing_response(message_id, r),
        NodeResponse::Schema(r) => write_schema_response(message_id, r),
        NodeResponse::Billing(r) => write_billing_response(message_id, r),
    }
}

// === Requests ===

fn write_modification_request(message_id: u64, r: &ModificationRequest) -> Result<Vec<u8>> {
    let kind = r.kind.code();
    let body = Formatter::value_size(tags::MESSAGE_ID, &message_id)
        + Formatter::value_size(tags::MODIFICATION_KIND, &kind)
        + consistency_size(&r.consistency)
        + entry_size(&r.entry);

    let mut f = Formatter::new();
    f.begin(tags::MODIFICATION_REQUEST, body);
    f.write_value(tags::MESSAGE_ID, &message_id);
    f.write_value(tags::MODIFICATION_KIND, &kind);
    write_consistency(&mut f, &r.consistency)?;
    write_entry(&mut f, &r.entry)?;
    f.end(tags::MODIFICATION_REQUEST)?;
    Ok(f.into_bytes())
}

fn write_recollection_request(message_id: u64, r: &RecollectionRequest) -> Result<Vec<u8>> {
    let retrieve_body: u64 = r.retrieve.iter().map(selector_size).sum();
    let filter_body: u64 = r.filters.iter().map(filter_size).sum();
    let body = Formatter::value_size(tags::MESSAGE_ID, &message_id)
        + consistency_size(&r.consistency)
        + Formatter::value_size(tags::TARGET_TABLESPACE, &r.tablespace)
        + Formatter::value_size(tags::TARGET_TABLE, &r.table)
        + Formatter::part_size(tags::RETRIEVE_LIST, retrieve_body)
        + Formatter::part_size(tags::FILTER_LIST, filter_body);

    let mut f = Formatter::new();
    f.begin(tags::RECOLLECTION_REQUEST, body);
    f.write_value(tags::MESSAGE_ID, &message_id);
    write_consistency(&mut f, &r.consistency)?;
    f.write_value(tags::TARGET_TABLESPACE, &r.tablespace);
    f.write_value(tags::TARGET_TABLE, &r.table);

    f.begin(tags::RETRIEVE_LIST, retrieve_body);
    for selector in &r.retrieve {
        write_selector(&mut f, selector)?;
    }
    f.end(tags::RETRIEVE_LIST)?;

    f.begin(tags::FILTER_LIST, filter_body);
    for filter in &r.filters {
        write_filter(&mut f, filter)?;
    }
    f.end(tags::FILTER_LIST)?;

    f.end(tags::RECOLLECTION_REQUEST)?;
    Ok(f.into_bytes())
}

fn write_healing_request(message_id: u64, r: &HealingRequest) -> Result<Vec<u8>> {
    let body = Formatter::value_size(tags::MESSAGE_ID, &message_id) + entry_size(&r.entry);

    let mut f = Formatter::new();
    f.begin(tags::HEALING_REQUEST, body);
    f.write_value(tags::MESSAGE_ID, &message_id);
    write_entry(&mut f, &r.entry)?;
    f.end(tags::HEALING_REQUEST)?;
    Ok(f.into_bytes())
}

fn write_schema_request(message_id: u64, r: &SchemaRequest) -> Result<Vec<u8>> {
    let body = Formatter::value_size(tags::MESSAGE_ID, &message_id)
        + Formatter::value_size(tags::TARGET_TABLESPACE, &r.tablespace)
        + Formatter::value_size(tags::TARGET_TABLE, &r.table);

    let mut f = Formatter::new();
    f.begin(tags::SCHEMA_REQUEST, body);
    f.write_value(tags::MESSAGE_ID, &message_id);
    f.write_value(tags::TARGET_TABLESPACE, &r.tablespace);
    f.write_value(tags::TARGET_TABLE, &r.table);
    f.end(tags::SCHEMA_REQUEST)?;
    Ok(f.into_bytes())
}

fn write_billing_request(message_id: u64, r: &BillingRequest) -> Result<Vec<u8>> {
    let limits_body = Formatter::value_size(tags::BILLING_COUNT_LIMIT, &r.limits.count_limit)
        + Formatter::value_size(tags::BILLING_AMOUNT_THRESHOLD, &r.limits.amount_threshold);
    let body = Formatter::value_size(tags::MESSAGE_ID, &message_id)
        + Formatter::value_size(tags::TARGET_TABLESPACE, &r.tablespace)
        + Formatter::value_size(tags::TARGET_TABLE, &r.table)
        + Formatter::part_size(tags::BILLING_LIMITS, limits_body);

    let mut f = Formatter::new();
    f.begin(tags::BILLING_REQUEST, body);
    f.write_value(tags::MESSAGE_ID, &message_id);
    f.write_value(tags::TARGET_TABLESPACE, &r.tablespace);
    f.write_value(tags::TARGET_TABLE, &r.table);
    f.begin(tags::BILLING_LIMITS, limits_body);
    f.write_value(tags::BILLING_COUNT_LIMIT, &r.limits.count_limit);
    f.write_value(tags::BILLING_AMOUNT_THRESHOLD, &r.limits.amount_threshold);
    f.end(tags::BILLING_LIMITS)?;
    f.end(tags::BILLING_REQUEST)?;
    Ok(f.into_bytes())
}

// === Responses ===

fn status_size(status: &ApplyStatus) -> u64 {
    match status {
        ApplyStatus::Applied => Formatter::part_size(tags::STATUS_OK, 0),
        ApplyStatus::Rejected(message) => {
            Formatter::part_size(tags::STATUS_ERROR, message.len() as u64)
        }
    }
}

fn write_status(f: &mut Formatter, status: &ApplyStatus) {
    match status {
        ApplyStatus::Applied => f.write_bytes(tags::STATUS_OK, &[]),
        ApplyStatus::Rejected(message) => f.write_bytes(tags::STATUS_ERROR, message.as_bytes()),
    }
}

fn write_modification_response(message_id: u64, r: &ModificationResponse) -> Result<Vec<u8>> {
    let body = Formatter::value_size(tags::MESSAGE_ID, &message_id)
        + Formatter::value_size(tags::RESULT_HEADER_HASH, &r.header_hash)
        + status_size(&r.status);

    let mut f = Formatter::new();
    f.begin(tags::MODIFICATION_RESPONSE, body);
    f.write_value(tags::MESSAGE_ID, &message_id);
    f.write_value(tags::RESULT_HEADER_HASH, &r.header_hash);
    write_status(&mut f, &r.status);
    f.end(tags::MODIFICATION_RESPONSE)?;
    Ok(f.into_bytes())
}

fn write_recollection_response(message_id: u64, r: &RecollectionResponse) -> Result<Vec<u8>> {
    let entries_size: u64 = r.entries.iter().map(entry_size).sum();
    let error_size = match &r.error {
        Some(message) => Formatter::part_size(tags::STATUS_ERROR, message.len() as u64),
        None => 0,
    };
    let body =
        Formatter::value_size(tags::MESSAGE_ID, &message_id) + entries_size + error_size;

    let mut f = Formatter::new();
    f.begin(tags::RECOLLECTION_RESPONSE, body);
    f.write_value(tags::MESSAGE_ID, &message_id);
    for entry in &r.entries {
        write_entry(&mut f, entry)?;
    }
    if let Some(message) = &r.error {
        f.write_bytes(tags::STATUS_ERROR, message.as_bytes());
    }
    f.end(tags::RECOLLECTION_RESPONSE)?;
    Ok(f.into_bytes())
}

fn write_healing_response(message_id: u64, r: &HealingResponse) -> Result<Vec<u8>> {
    let body = Formatter::value_size(tags::MESSAGE_ID, &message_id) + status_size(&r.status);

    let mut f = Formatter::new();
    f.begin(tags::HEALING_RESPONSE, body);
    f.write_value(tags::MESSAGE_ID, &message_id);
    write_status(&mut f, &r.status);
    f.end(tags::HEALING_RESPONSE)?;
    Ok(f.into_bytes())
}

fn schema_field_size(field: &FieldDescription) -> u64 {
    let type_code = field.field_type.code();
    let primary = u64::from(field.primary_key);
    let body = Formatter::value_size(tags::SCHEMA_FIELD_NAME, &field.name)
        + Formatter::value_size(tags::SCHEMA_FIELD_TYPE, &type_code)
        + Formatter::value_size(tags::SCHEMA_FIELD_PRIMARY, &primary);
    Formatter::part_size(tags::SCHEMA_FIELD, body)
}

fn write_schema_response(message_id: u64, r: &SchemaResponse) -> Result<Vec<u8>> {
    let fields_size: u64 = r.fields.iter().map(schema_field_size).sum();
    let body = Formatter::value_size(tags::MESSAGE_ID, &message_id) + fields_size;

    let mut f = Formatter::new();
    f.begin(tags::SCHEMA_RESPONSE, body);
    f.write_value(tags::MESSAGE_ID, &message_id);
    for field in &r.fields {
        let type_code = field.field_type.code();
        let primary = u64::from(field.primary_key);
        let field_body = Formatter::value_size(tags::SCHEMA_FIELD_NAME, &field.name)
            + Formatter::value_size(tags::SCHEMA_FIELD_TYPE, &type_code)
            + Formatter::value_size(tags::SCHEMA_FIELD_PRIMARY, &primary);
        f.begin(tags::SCHEMA_FIELD, field_body);
        f.write_value(tags::SCHEMA_FIELD_NAME, &field.name);
        f.write_value(tags::SCHEMA_FIELD_TYPE, &type_code);
        f.write_value(tags::SCHEMA_FIELD_PRIMARY, &primary);
        f.end(tags::SCHEMA_FIELD)?;
    }
    f.end(tags::SCHEMA_RESPONSE)?;
    Ok(f.into_bytes())
}

fn write_billing_response(message_id: u64, r: &BillingResponse) -> Result<Vec<u8>> {
    let cheques_size: u64 = r.cheques.iter().map(cheque_size).sum();
    let body = Formatter::value_size(tags::MESSAGE_ID, &message_id) + cheques_size;

    let mut f = Formatter::new();
    f.begin(tags::BILLING_RESPONSE, body);
    f.write_value(tags::MESSAGE_ID, &message_id);
    for cheque in &r.cheques {
        write_cheque(&mut f, cheque)?;
    }
    f.end(tags::BILLING_RESPONSE)?;
    Ok(f.into_bytes())
}

// === Shared element families ===

fn consistency_size(c: &ConsistencyRequirement) -> u64 {
    let body = match c {
        ConsistencyRequirement::Count(n) => {
            Formatter::value_size(tags::CONSISTENCY_COUNT, &u64::from(*n))
        }
        ConsistencyRequirement::Percent(p) => {
            Formatter::value_size(tags::CONSISTENCY_PERCENT, &u64::from(*p))
        }
        ConsistencyRequirement::Quorum => Formatter::part_size(tags::CONSISTENCY_QUORUM, 0),
    };
    Formatter::part_size(tags::CONSISTENCY, body)
}

fn write_consistency(f: &mut Formatter, c: &ConsistencyRequirement) -> Result<()> {
    let body = match c {
        ConsistencyRequirement::Count(n) => {
            Formatter::value_size(tags::CONSISTENCY_COUNT, &u64::from(*n))
        }
        ConsistencyRequirement::Percent(p) => {
            Formatter::value_size(tags::CONSISTENCY_PERCENT, &u64::from(*p))
        }
        ConsistencyRequirement::Quorum => Formatter::part_size(tags::CONSISTENCY_QUORUM, 0),
    };
    f.begin(tags::CONSISTENCY, body);
    match c {
        ConsistencyRequirement::Count(n) => f.write_value(tags::CONSISTENCY_COUNT, &u64::from(*n)),
        ConsistencyRequirement::Percent(p) => {
            f.write_value(tags::CONSISTENCY_PERCENT, &u64::from(*p))
        }
        ConsistencyRequirement::Quorum => f.write_bytes(tags::CONSISTENCY_QUORUM, &[]),
    }
    f.end(tags::CONSISTENCY)
}

fn header_body_size(header: &EntryHeader) -> u64 {
    header.signed_bytes().len() as u64
        + Formatter::part_size(tags::HEADER_SIGNATURE, header.signature.len() as u64)
}

fn field_body_size(field: &Field) -> u64 {
    let type_code = field.field_type.code();
    let mut body = Formatter::value_size(tags::FIELD_NAME, &field.name)
        + Formatter::value_size(tags::FIELD_TYPE, &type_code);
    body += match &field.value {
        Some(value) => Formatter::part_size(tags::FIELD_VALUE, value.measure()),
        None => Formatter::value_size(tags::FIELD_HASH, &field.hash),
    };
    body
}

fn cheque_size(cheque: &Cheque) -> u64 {
    let body = Formatter::value_size(tags::CHEQUE_VERSION, &cheque.version)
        + Formatter::value_size(tags::CHEQUE_NETWORK, &cheque.network_id)
        + Formatter::value_size(tags::CHEQUE_SESSION, &cheque.session)
        + Formatter::value_size(tags::CHEQUE_NUMBER, &cheque.number)
        + Formatter::value_size(tags::CHEQUE_CROP, &cheque.crop)
        + Formatter::value_size(tags::CHEQUE_TABLESPACE, &cheque.tablespace)
        + Formatter::value_size(tags::CHEQUE_TABLE, &cheque.table)
        + Formatter::value_size(tags::CHEQUE_SIGNER, &cheque.signer)
        + Formatter::value_size(tags::CHEQUE_SIGNATURE, &cheque.signature);
    Formatter::part_size(tags::CHEQUE, body)
}

pub(crate) fn entry_size(entry: &Entry) -> u64 {
    let mut body = Formatter::part_size(tags::ENTRY_HEADER, header_body_size(&entry.header));
    for field in entry.fields.values() {
        body += Formatter::part_size(tags::FIELD, field_body_size(field));
    }
    for cheque in &entry.cheques {
        body += cheque_size(cheque);
    }
    Formatter::part_size(tags::ENTRY, body)
}

pub(crate) fn write_entry(f: &mut Formatter, entry: &Entry) -> Result<()> {
    let mut body = Formatter::part_size(tags::ENTRY_HEADER, header_body_size(&entry.header));
    for field in entry.fields.values() {
        body += Formatter::part_size(tags::FIELD, field_body_size(field));
    }
    for cheque in &entry.cheques {
        body += cheque_size(cheque);
    }

    f.begin(tags::ENTRY, body);

    // Header: the signed span, then the signature element
    f.begin(tags::ENTRY_HEADER, header_body_size(&entry.header));
    f.write_raw(&entry.header.signed_bytes());
    f.write_bytes(tags::HEADER_SIGNATURE, &entry.header.signature);
    f.end(tags::ENTRY_HEADER)?;

    for field in entry.fields.values() {
        f.begin(tags::FIELD, field_body_size(field));
        f.write_value(tags::FIELD_NAME, &field.name);
        f.write_value(tags::FIELD_TYPE, &field.field_type.code());
        match &field.value {
            Some(value) => f.write_bytes(tags::FIELD_VALUE, &value.body_bytes()),
            None => f.write_value(tags::FIELD_HASH, &field.hash),
        }
        f.end(tags::FIELD)?;
    }

    for cheque in &entry.cheques {
        write_cheque(f, cheque)?;
    }

    f.end(tags::ENTRY)
}

fn write_cheque(f: &mut Formatter, cheque: &Cheque) -> Result<()> {
    let body = Formatter::value_size(tags::CHEQUE_VERSION, &cheque.version)
        + Formatter::value_size(tags::CHEQUE_NETWORK, &cheque.network_id)
        + Formatter::value_size(tags::CHEQUE_SESSION, &cheque.session)
        + Formatter::value_size(tags::CHEQUE_NUMBER, &cheque.number)
        + Formatter::value_size(tags::CHEQUE_CROP, &cheque.crop)
        + Formatter::value_size(tags::CHEQUE_TABLESPACE, &cheque.tablespace)
        + Formatter::value_size(tags::CHEQUE_TABLE, &cheque.table)
        + Formatter::value_size(tags::CHEQUE_SIGNER, &cheque.signer)
        + Formatter::value_size(tags::CHEQUE_SIGNATURE, &cheque.signature);

    f.begin(tags::CHEQUE, body);
    f.write_value(tags::CHEQUE_VERSION, &cheque.version);
    f.write_value(tags::CHEQUE_NETWORK, &cheque.network_id);
    f.write_value(tags::CHEQUE_SESSION, &cheque.session);
    f.write_value(tags::CHEQUE_NUMBER, &cheque.number);
    f.write_value(tags::CHEQUE_CROP, &cheque.crop);
    f.write_value(tags::CHEQUE_TABLESPACE, &cheque.tablespace);
    f.write_value(tags::CHEQUE_TABLE, &cheque.table);
    f.write_value(tags::CHEQUE_SIGNER, &cheque.signer);
    f.write_value(tags::CHEQUE_SIGNATURE, &cheque.signature);
    f.end(tags::CHEQUE)
}

fn selector_size(selector: &Selector) -> u64 {
    match selector {
        Selector::Field(name) => Formatter::value_size(tags::RETRIEVE_FIELD, name),
        Selector::Compute(call) => {
            Formatter::part_size(tags::RETRIEVE_COMPUTE, function_call_size(call))
        }
    }
}

fn write_selector(f: &mut Formatter, selector: &Selector) -> Result<()> {
    match selector {
        Selector::Field(name) => {
            f.write_value(tags::RETRIEVE_FIELD, name);
            Ok(())
        }
        Selector::Compute(call) => {
            f.begin(tags::RETRIEVE_COMPUTE, function_call_size(call));
            write_function_call(f, call)?;
            f.end(tags::RETRIEVE_COMPUTE)
        }
    }
}

fn function_call_body_size(call: &FunctionCall) -> u64 {
    let mut body = Formatter::value_size(tags::FUNCTION_NAME, &call.name);
    for arg in &call.args {
        body += argument_size(arg);
    }
    body
}

fn function_call_size(call: &FunctionCall) -> u64 {
    Formatter::part_size(tags::FUNCTION_CALL, function_call_body_size(call))
}

fn write_function_call(f: &mut Formatter, call: &FunctionCall) -> Result<()> {
    f.begin(tags::FUNCTION_CALL, function_call_body_size(call));
    f.write_value(tags::FUNCTION_NAME, &call.name);
    for arg in &call.args {
        write_argument(f, arg)?;
    }
    f.end(tags::FUNCTION_CALL)
}

fn literal_body_size(value: &FieldValue) -> u64 {
    Formatter::value_size(tags::FIELD_TYPE, &value.field_type().code())
        + Formatter::part_size(tags::FIELD_VALUE, value.measure())
}

fn write_literal_body(f: &mut Formatter, value: &FieldValue) {
    f.write_value(tags::FIELD_TYPE, &value.field_type().code());
    f.write_bytes(tags::FIELD_VALUE, &value.body_bytes());
}

fn argument_size(arg: &Argument) -> u64 {
    match arg {
        Argument::Literal(value) => Formatter::part_size(tags::ARG_LITERAL, literal_body_size(value)),
        Argument::FieldRef(name) => Formatter::value_size(tags::ARG_FIELD_REF, name),
        Argument::Call(call) => function_call_size(call),
    }
}

fn write_argument(f: &mut Formatter, arg: &Argument) -> Result<()> {
    match arg {
        Argument::Literal(value) => {
            f.begin(tags::ARG_LITERAL, literal_body_size(value));
            write_literal_body(f, value);
            f.end(tags::ARG_LITERAL)
        }
        Argument::FieldRef(name) => {
            f.write_value(tags::ARG_FIELD_REF, name);
            Ok(())
        }
        Argument::Call(call) => write_function_call(f, call),
    }
}

fn filter_size(filter: &FilterPredicate) -> u64 {
    let body = Formatter::value_size(tags::FILTER_FIELD, &filter.field)
        + Formatter::value_size(tags::FILTER_OP, &filter.op.code())
        + Formatter::part_size(tags::FILTER_OPERAND, literal_body_size(&filter.operand));
    Formatter::part_size(tags::FILTER, body)
}

fn write_filter(f: &mut Formatter, filter: &FilterPredicate) -> Result<()> {
    let body = Formatter::value_size(tags::FILTER_FIELD, &filter.field)
        + Formatter::value_size(tags::FILTER_OP, &filter.op.code())
        + Formatter::part_size(tags::FILTER_OPERAND, literal_body_size(&filter.operand));
    f.begin(tags::FILTER, body);
    f.write_value(tags::FILTER_FIELD, &filter.field);
    f.write_value(tags::FILTER_OP, &filter.op.code());
    f.begin(tags::FILTER_OPERAND, literal_body_size(&filter.operand));
    write_literal_body(f, &filter.operand);
    f.end(tags::FILTER_OPERAND)?;
    f.end(tags::FILTER)
}
