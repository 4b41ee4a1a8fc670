//! Query selectors and filter predicates
//!
//! A recollection's retrieve list names the fields a node must disclose:
//! plain field selectors, or compute selectors carrying a function call
//! whose arguments may be literals, field references, or nested calls
//! (to any depth). Fields not reachable from any selector are returned
//! as hash commitments instead of values.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::codec::AsciiString;
use crate::common::{Error, Result};
use crate::protocol::entry::{Entry, FieldValue};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Disclose one field by name.
    Field(AsciiString),
    /// A computed value over the entry's fields.
    Compute(FunctionCall),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCall {
    pub name: AsciiString,
    pub args: Vec<Argument>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Argument {
    Literal(FieldValue),
    FieldRef(AsciiString),
    Call(FunctionCall),
}

impl FunctionCall {
    /// Every field name referenced anywhere in the argument tree.
    pub fn referenced_fields(&self, out: &mut BTreeSet<String>) {
        for arg in &self.args {
            match arg {
                Argument::Literal(_) => {}
                Argument::FieldRef(name) => {
                    out.insert(name.as_str().to_string());
                }
                Argument::Call(call) => call.referenced_fields(out),
            }
        }
    }
}

/// Field names a retrieve list requires a node to disclose. An empty
/// retrieve list means everything.
pub fn disclosed_fields(selectors: &[Selector]) -> Option<BTreeSet<String>> {
    if selectors.is_empty() {
        return None;
    }
    let mut out = BTreeSet::new();
    for selector in selectors {
        match selector {
            Selector::Field(name) => {
                out.insert(name.as_str().to_string());
            }
            Selector::Compute(call) => call.referenced_fields(&mut out),
        }
    }
    Some(out)
}

/// Evaluate a function call against an entry's disclosed fields.
pub fn evaluate(call: &FunctionCall, entry: &Entry) -> Result<FieldValue> {
    let mut values = Vec::with_capacity(call.args.len());
    for arg in &call.args {
        values.push(evaluate_arg(arg, entry)?);
    }

    match call.name.as_str() {
        "add" => {
            let mut sum: i64 = 0;
            for value in &values {
                let term = match value {
                    FieldValue::Unsigned(v) => i64::try_from(*v)
                        .map_err(|_| Error::Other("add: operand out of range".into()))?,
                    FieldValue::Signed(v) => *v,
                    other => {
                        return Err(Error::Other(format!(
                            "add: non-numeric operand {:?}",
                            other.field_type()
                        )))
                    }
                };
                sum = sum
                    .checked_add(term)
                    .ok_or_else(|| Error::Other("add: overflow".into()))?;
            }
            Ok(FieldValue::Signed(sum))
        }
        "concat" => {
            let mut out = String::new();
            for value in &values {
                match value {
                    FieldValue::Utf8(s) => out.push_str(s),
                    FieldValue::Ascii(s) => out.push_str(s.as_str()),
                    other => {
                        return Err(Error::Other(format!(
                            "concat: non-string operand {:?}",
                            other.field_type()
                        )))
                    }
                }
            }
            Ok(FieldValue::Utf8(out))
        }
        "length" => match values.as_slice() {
            [FieldValue::Utf8(s)] => Ok(FieldValue::Unsigned(s.len() as u64)),
            [FieldValue::Ascii(s)] => Ok(FieldValue::Unsigned(s.as_str().len() as u64)),
            [FieldValue::Bytes(b)] => Ok(FieldValue::Unsigned(b.len() as u64)),
            _ => Err(Error::Other("length: expects one string or bytes operand".into())),
        },
        other => Err(Error::Other(format!("unknown function {}", other))),
    }
}

fn evaluate_arg(arg: &Argument, entry: &Entry) -> Result<FieldValue> {
    match arg {
        Argument::Literal(value) => Ok(value.clone()),
        Argument::FieldRef(name) => {
            let field = entry
                .fields
                .get(name.as_str())
                .ok_or_else(|| Error::Other(format!("no such field {}", name)))?;
            field
                .value
                .clone()
                .ok_or_else(|| Error::Other(format!("field {} not disclosed", name)))
        }
        Argument::Call(call) => evaluate(call, entry),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl FilterOp {
    pub fn code(&self) -> u64 {
        match self {
            FilterOp::Eq => 1,
            FilterOp::Ne => 2,
            FilterOp::Lt => 3,
            FilterOp::Le => 4,
            FilterOp::Gt => 5,
            FilterOp::Ge => 6,
        }
    }

    pub fn from_code(code: u64) -> Result<Self> {
        Ok(match code {
            1 => FilterOp::Eq,
            2 => FilterOp::Ne,
            3 => FilterOp::Lt,
            4 => FilterOp::Le,
            5 => FilterOp::Gt,
            6 => FilterOp::Ge,
            other => {
                return Err(Error::MalformedElement(format!(
                    "unknown filter op code {}",
                    other
                )))
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterPredicate {
    pub field: AsciiString,
    pub op: FilterOp,
    pub operand: FieldValue,
}

impl FilterPredicate {
    pub fn equals(field: &str, operand: FieldValue) -> Result<Self> {
        Ok(Self {
            field: AsciiString::new(field)?,
            op: FilterOp::Eq,
            operand,
        })
    }

    /// Does an entry satisfy this predicate? Entries missing the field,
    /// holding only a hash commitment, or holding an incomparable type
    /// do not match.
    pub fn matches(&self, entry: &Entry) -> bool {
        let field = match entry.fields.get(self.field.as_str()) {
            Some(f) => f,
            None => return false,
        };
        let value = match &field.value {
            Some(v) => v,
            None => return false,
        };
        match (self.op, compare(value, &self.operand)) {
            (FilterOp::Eq, Some(Ordering::Equal)) => true,
            (FilterOp::Ne, Some(ordering)) => ordering != Ordering::Equal,
            (FilterOp::Lt, Some(Ordering::Less)) => true,
            (FilterOp::Le, Some(Ordering::Less | Ordering::Equal)) => true,
            (FilterOp::Gt, Some(Ordering::Greater)) => true,
            (FilterOp::Ge, Some(Ordering::Greater | Ordering::Equal)) => true,
            _ => false,
        }
    }
}

/// Compare two field values of the same type; `None` for mixed types or
/// types with no defined ordering beyond equality.
fn compare(a: &FieldValue, b: &FieldValue) -> Option<Ordering> {
    match (a, b) {
        (FieldValue::Unsigned(x), FieldValue::Unsigned(y)) => Some(x.cmp(y)),
        (FieldValue::Signed(x), FieldValue::Signed(y)) => Some(x.cmp(y)),
        (FieldValue::Timestamp(x), FieldValue::Timestamp(y)) => Some(x.cmp(y)),
        (FieldValue::Utf8(x), FieldValue::Utf8(y)) => Some(x.cmp(y)),
        (FieldValue::Ascii(x), FieldValue::Ascii(y)) => Some(x.cmp(y)),
        (FieldValue::Bytes(x), FieldValue::Bytes(y)) => Some(x.cmp(y)),
        (FieldValue::Uuid(x), FieldValue::Uuid(y)) => Some(x.cmp(y)),
        (FieldValue::BigInt(x), FieldValue::BigInt(y)) => {
            match (x.to_i64(), y.to_i64()) {
                (Ok(x), Ok(y)) => Some(x.cmp(&y)),
                // Wide amounts: only equality is defined
                _ if x == y => Some(Ordering::Equal),
                _ => None,
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Keypair;
    use crate::protocol::entry::EntryBuilder;

    fn entry() -> Entry {
        EntryBuilder::new("crops", "harvest")
            .unwrap()
            .field("id", FieldValue::Unsigned(7))
            .unwrap()
            .field("name", FieldValue::Utf8("wheat".into()))
            .unwrap()
            .field("yield", FieldValue::Signed(120))
            .unwrap()
            .sign(&Keypair::generate())
    }

    fn ascii(s: &str) -> AsciiString {
        AsciiString::new(s).unwrap()
    }

    #[test]
    fn test_filter_matching() {
        let e = entry();
        assert!(FilterPredicate::equals("id", FieldValue::Unsigned(7))
            .unwrap()
            .matches(&e));
        assert!(!FilterPredicate::equals("id", FieldValue::Unsigned(8))
            .unwrap()
            .matches(&e));
        assert!(FilterPredicate {
            field: ascii("yield"),
            op: FilterOp::Gt,
            operand: FieldValue::Signed(100),
        }
        .matches(&e));
        // Mixed types never match
        assert!(!FilterPredicate::equals("id", FieldValue::Utf8("7".into()))
            .unwrap()
            .matches(&e));
        // Missing field never matches
        assert!(!FilterPredicate::equals("absent", FieldValue::Unsigned(1))
            .unwrap()
            .matches(&e));
    }

    #[test]
    fn test_filter_rejects_hash_only_field() {
        let mut e = entry();
        e.fields.get_mut("id").unwrap().value = None;
        assert!(!FilterPredicate::equals("id", FieldValue::Unsigned(7))
            .unwrap()
            .matches(&e));
    }

    #[test]
    fn test_evaluate_nested_call() {
        let e = entry();
        // add(yield, length(concat(name, "!")))
        let call = FunctionCall {
            name: ascii("add"),
            args: vec![
                Argument::FieldRef(ascii("yield")),
                Argument::Call(FunctionCall {
                    name: ascii("length"),
                    args: vec![Argument::Call(FunctionCall {
                        name: ascii("concat"),
                        args: vec![
                            Argument::FieldRef(ascii("name")),
                            Argument::Literal(FieldValue::Utf8("!".into())),
                        ],
                    })],
                }),
            ],
        };
        assert_eq!(evaluate(&call, &e).unwrap(), FieldValue::Signed(126));
    }

    #[test]
    fn test_evaluate_unknown_function() {
        let call = FunctionCall {
            name: ascii("median"),
            args: vec![],
        };
        assert!(evaluate(&call, &entry()).is_err());
    }

    #[test]
    fn test_disclosed_fields() {
        let selectors = vec![
            Selector::Field(ascii("id")),
            Selector::Compute(FunctionCall {
                name: ascii("length"),
                args: vec![Argument::FieldRef(ascii("name"))],
            }),
        ];
        let fields = disclosed_fields(&selectors).unwrap();
        assert!(fields.contains("id"));
        assert!(fields.contains("name"));
        assert!(!fields.contains("yield"));

        assert!(disclosed_fields(&[]).is_none());
    }
}
