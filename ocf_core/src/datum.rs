use std::collections::BTreeMap;
use std::io;

use serde_json::{Map, Number, Value as JsonValue};

use crate::error::{OcfError, Result};
use crate::schema::{NamedTypes, Schema};
use crate::varint;

/// A decoded value, shaped by the schema it was read with.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Null,
    Boolean(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Bytes(Vec<u8>),
    String(String),
    Fixed(Vec<u8>),
    Enum { index: u32, symbol: String },
    Array(Vec<Datum>),
    Map(BTreeMap<String, Datum>),
    Union { branch: u32, value: Box<Datum> },
    Record(Vec<(String, Datum)>),
}

impl Datum {
    /// Look up a record field by name.
    pub fn field(&self, name: &str) -> Option<&Datum> {
        match self {
            Datum::Record(fields) => fields.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Render as JSON. Unions are written as their branch value; bytes and
    /// fixed map each byte to the code point of the same value.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Datum::Null => JsonValue::Null,
            Datum::Boolean(b) => JsonValue::Bool(*b),
            Datum::Int(i) => JsonValue::from(*i),
            Datum::Long(l) => JsonValue::from(*l),
            Datum::Float(f) => Number::from_f64(*f as f64).map_or(JsonValue::Null, JsonValue::Number),
            Datum::Double(d) => Number::from_f64(*d).map_or(JsonValue::Null, JsonValue::Number),
            Datum::Bytes(b) | Datum::Fixed(b) => {
                JsonValue::String(b.iter().map(|&c| c as char).collect())
            }
            Datum::String(s) => JsonValue::String(s.clone()),
            Datum::Enum { symbol, .. } => JsonValue::String(symbol.clone()),
            Datum::Array(items) => JsonValue::Array(items.iter().map(Datum::to_json).collect()),
            Datum::Map(entries) => JsonValue::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect::<Map<_, _>>(),
            ),
            Datum::Union { value, .. } => value.to_json(),
            Datum::Record(fields) => JsonValue::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect::<Map<_, _>>(),
            ),
        }
    }
}

/// Most items a single array may hold when they encode in zero bytes.
pub(crate) const MAX_ZERO_WIDTH_ITEMS: usize = 1 << 20;

/// Deepest chain of recursive-type expansions within one datum.
const MAX_RECURSION: usize = 256;

fn malformed(what: &str, e: io::Error) -> OcfError {
    match e.kind() {
        io::ErrorKind::UnexpectedEof => {
            OcfError::Deserialization(format!("input ended while reading {what}"))
        }
        _ => OcfError::Deserialization(format!("bad {what}: {e}")),
    }
}

fn take<'a>(buf: &mut &'a [u8], n: usize, what: &str) -> Result<&'a [u8]> {
    if buf.len() < n {
        return Err(OcfError::Deserialization(format!(
            "{what} needs {n} bytes but only {} remain",
            buf.len()
        )));
    }
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

fn read_len(buf: &mut &[u8], what: &str) -> Result<usize> {
    let len = varint::read_long(buf).map_err(|e| malformed(what, e))?;
    usize::try_from(len)
        .map_err(|_| OcfError::Deserialization(format!("negative {what} length {len}")))
}

/// Reads an array or map block header, returning the entry count; zero ends the sequence.
fn read_block_count(buf: &mut &[u8], what: &str) -> Result<usize> {
    let count = varint::read_long(buf).map_err(|e| malformed(what, e))?;
    if count < 0 {
        // A negative count is followed by the block's byte size, which we don't need.
        varint::read_long(buf).map_err(|e| malformed(what, e))?;
    }
    usize::try_from(count.unsigned_abs())
        .map_err(|_| OcfError::Deserialization(format!("{what} block count {count} too large")))
}

/// Items of a non-empty encoding take at least a byte each, so a count beyond
/// the remaining input is corrupt. Zero-width items are capped outright.
fn check_count(what: &str, count: usize, decoded: usize, remaining: usize, zero_width: bool) -> Result<()> {
    let limit = if zero_width {
        MAX_ZERO_WIDTH_ITEMS.saturating_sub(decoded)
    } else {
        remaining
    };
    if count > limit {
        return Err(OcfError::Deserialization(format!(
            "{what} block claims {count} items but at most {limit} can follow"
        )));
    }
    Ok(())
}

/// Decode one datum of `schema` from the front of `buf`, advancing it past the bytes consumed.
pub fn decode(schema: &Schema, buf: &mut &[u8]) -> Result<Datum> {
    decode_with(schema, &NamedTypes::collect(schema), buf)
}

/// Like [`decode`], resolving recursive references through a table built once
/// for the whole schema.
pub fn decode_with(schema: &Schema, names: &NamedTypes, buf: &mut &[u8]) -> Result<Datum> {
    Decoder { names, depth: 0 }.decode(schema, buf)
}

struct Decoder<'a> {
    names: &'a NamedTypes,
    depth: usize,
}

impl Decoder<'_> {
    fn decode(&mut self, schema: &Schema, buf: &mut &[u8]) -> Result<Datum> {
        Ok(match schema {
            Schema::Null => Datum::Null,
            Schema::Boolean => match take(buf, 1, "boolean")?[0] {
                0 => Datum::Boolean(false),
                1 => Datum::Boolean(true),
                b => return Err(OcfError::Deserialization(format!("invalid boolean byte {b:#04x}"))),
            },
            Schema::Int => Datum::Int(varint::read_int(buf).map_err(|e| malformed("int", e))?),
            Schema::Long => Datum::Long(varint::read_long(buf).map_err(|e| malformed("long", e))?),
            Schema::Float => {
                let raw = take(buf, 4, "float")?;
                Datum::Float(f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
            }
            Schema::Double => {
                let raw = take(buf, 8, "double")?;
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(raw);
                Datum::Double(f64::from_le_bytes(bytes))
            }
            Schema::Bytes => {
                let len = read_len(buf, "bytes")?;
                Datum::Bytes(take(buf, len, "bytes")?.to_vec())
            }
            Schema::String => Datum::String(decode_string(buf)?),
            Schema::Fixed(f) => Datum::Fixed(take(buf, f.size, "fixed")?.to_vec()),
            Schema::Enum(e) => {
                let index = varint::read_int(buf).map_err(|err| malformed("enum index", err))?;
                let symbol = usize::try_from(index)
                    .ok()
                    .and_then(|i| e.symbols.get(i))
                    .ok_or_else(|| {
                        OcfError::Deserialization(format!(
                            "enum index {index} out of range for {} symbols",
                            e.symbols.len()
                        ))
                    })?;
                Datum::Enum {
                    index: index as u32,
                    symbol: symbol.clone(),
                }
            }
            Schema::Array(items) => {
                let zero_width = items.encodes_empty();
                let mut out = Vec::new();
                loop {
                    let count = read_block_count(buf, "array")?;
                    if count == 0 {
                        break;
                    }
                    check_count("array", count, out.len(), buf.len(), zero_width)?;
                    for _ in 0..count {
                        out.push(self.decode(items, buf)?);
                    }
                }
                Datum::Array(out)
            }
            Schema::Map(values) => {
                let mut out = BTreeMap::new();
                let mut decoded = 0;
                loop {
                    let count = read_block_count(buf, "map")?;
                    if count == 0 {
                        break;
                    }
                    // Every entry starts with a key, so entries are never zero-width.
                    check_count("map", count, decoded, buf.len(), false)?;
                    for _ in 0..count {
                        let key = decode_string(buf)?;
                        out.insert(key, self.decode(values, buf)?);
                    }
                    decoded += count;
                }
                Datum::Map(out)
            }
            Schema::Union(branches) => {
                let index = varint::read_long(buf).map_err(|e| malformed("union index", e))?;
                let branch = usize::try_from(index)
                    .ok()
                    .and_then(|i| branches.get(i))
                    .ok_or_else(|| {
                        OcfError::Deserialization(format!(
                            "union index {index} out of range for {} branches",
                            branches.len()
                        ))
                    })?;
                Datum::Union {
                    branch: index as u32,
                    value: Box::new(self.decode(branch, buf)?),
                }
            }
            Schema::Record(r) => {
                let mut fields = Vec::with_capacity(r.fields.len());
                for field in &r.fields {
                    fields.push((field.name.clone(), self.decode(&field.schema, buf)?));
                }
                Datum::Record(fields)
            }
            Schema::Ref(name) => {
                let target = self.names.get(name).ok_or_else(|| {
                    OcfError::Deserialization(format!("unknown named type '{}'", name.fullname()))
                })?;
                if self.depth >= MAX_RECURSION {
                    return Err(OcfError::Deserialization(format!(
                        "'{}' nests deeper than {MAX_RECURSION} levels",
                        name.fullname()
                    )));
                }
                self.depth += 1;
                let datum = self.decode(target, buf);
                self.depth -= 1;
                datum?
            }
        })
    }
}

fn decode_string(buf: &mut &[u8]) -> Result<String> {
    let len = read_len(buf, "string")?;
    let raw = take(buf, len, "string")?;
    String::from_utf8(raw.to_vec())
        .map_err(|e| OcfError::Deserialization(format!("string is not UTF-8: {e}")))
}

/// Conversion from a decoded [`Datum`] into a Rust type.
///
/// `accepts` is checked against the configured schema before any record is
/// read, so `from_datum` only fails on data that contradicts its schema.
pub trait FromDatum: Sized {
    fn accepts(schema: &Schema) -> bool;

    fn from_datum(datum: Datum) -> Result<Self>;
}

fn unexpected<T>(wanted: &str, got: &Datum) -> Result<T> {
    Err(OcfError::Deserialization(format!(
        "expected {wanted}, decoded {got:?}"
    )))
}

macro_rules! from_datum_primitive {
    ($ty:ty, $schema:ident, $variant:ident, $label:literal) => {
        impl FromDatum for $ty {
            fn accepts(schema: &Schema) -> bool {
                matches!(schema, Schema::$schema)
            }

            fn from_datum(datum: Datum) -> Result<Self> {
                match datum {
                    Datum::$variant(v) => Ok(v),
                    other => unexpected($label, &other),
                }
            }
        }
    };
}

from_datum_primitive!(bool, Boolean, Boolean, "boolean");
from_datum_primitive!(i32, Int, Int, "int");
from_datum_primitive!(i64, Long, Long, "long");
from_datum_primitive!(f32, Float, Float, "float");
from_datum_primitive!(f64, Double, Double, "double");
from_datum_primitive!(String, String, String, "string");

impl FromDatum for Vec<u8> {
    fn accepts(schema: &Schema) -> bool {
        matches!(schema, Schema::Bytes | Schema::Fixed(_))
    }

    fn from_datum(datum: Datum) -> Result<Self> {
        match datum {
            Datum::Bytes(b) | Datum::Fixed(b) => Ok(b),
            other => unexpected("bytes", &other),
        }
    }
}

impl FromDatum for () {
    fn accepts(schema: &Schema) -> bool {
        matches!(schema, Schema::Null)
    }

    fn from_datum(datum: Datum) -> Result<Self> {
        match datum {
            Datum::Null => Ok(()),
            other => unexpected("null", &other),
        }
    }
}

impl<T: FromDatum> FromDatum for Option<T> {
    fn accepts(schema: &Schema) -> bool {
        schema
            .nullable_branch()
            .map_or(false, |(_, inner)| T::accepts(inner))
    }

    fn from_datum(datum: Datum) -> Result<Self> {
        match datum {
            Datum::Union { value, .. } => match *value {
                Datum::Null => Ok(None),
                inner => T::from_datum(inner).map(Some),
            },
            other => unexpected("nullable union", &other),
        }
    }
}

impl FromDatum for Datum {
    fn accepts(_: &Schema) -> bool {
        true
    }

    fn from_datum(datum: Datum) -> Result<Self> {
        Ok(datum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::varint::write_long;

    fn long(v: i64) -> Vec<u8> {
        let mut out = Vec::new();
        write_long(&mut out, v).unwrap();
        out
    }

    #[test]
    fn decodes_a_record_and_consumes_exactly_its_bytes() {
        let schema = Schema::parse_str(
            r#"{"type":"record","name":"R","fields":[
                {"name":"s","type":"string"},{"name":"d","type":"double"},{"name":"ok","type":"boolean"}
            ]}"#,
        )
        .unwrap();
        let mut bytes = long(2);
        bytes.extend_from_slice(b"hi");
        bytes.extend_from_slice(&1.5f64.to_le_bytes());
        bytes.push(1);
        bytes.push(0xEE); // belongs to the next datum

        let mut buf = bytes.as_slice();
        let datum = decode(&schema, &mut buf).unwrap();
        assert_eq!(datum.field("s"), Some(&Datum::String("hi".into())));
        assert_eq!(datum.field("d"), Some(&Datum::Double(1.5)));
        assert_eq!(datum.field("ok"), Some(&Datum::Boolean(true)));
        assert_eq!(buf, &[0xEE]);
    }

    #[test]
    fn arrays_accept_negative_block_counts() {
        let schema = Schema::Array(Box::new(Schema::Int));
        let mut bytes = long(-2);
        bytes.extend(long(2)); // byte size of the block
        bytes.extend(long(7));
        bytes.extend(long(-3));
        bytes.extend(long(1));
        bytes.extend(long(9));
        bytes.extend(long(0));
        let datum = decode(&schema, &mut bytes.as_slice()).unwrap();
        assert_eq!(
            datum,
            Datum::Array(vec![Datum::Int(7), Datum::Int(-3), Datum::Int(9)])
        );
    }

    #[test]
    fn maps_and_unions() {
        let schema = Schema::parse_str(r#"{"type":"map","values":["null","long"]}"#).unwrap();
        let mut bytes = long(2);
        bytes.extend(long(1));
        bytes.extend_from_slice(b"a");
        bytes.extend(long(1));
        bytes.extend(long(42));
        bytes.extend(long(1));
        bytes.extend_from_slice(b"b");
        bytes.extend(long(0));
        bytes.extend(long(0));
        let datum = decode(&schema, &mut bytes.as_slice()).unwrap();
        let Datum::Map(entries) = &datum else {
            panic!("expected map, got {datum:?}");
        };
        assert_eq!(Option::<i64>::from_datum(entries["a"].clone()).unwrap(), Some(42));
        assert_eq!(Option::<i64>::from_datum(entries["b"].clone()).unwrap(), None);
        assert_eq!(datum.to_json(), serde_json::json!({"a": 42, "b": null}));
    }

    #[test]
    fn malformed_input_is_a_deserialization_error() {
        let cases: Vec<(Schema, Vec<u8>)> = vec![
            (Schema::String, long(5)),
            (Schema::String, [long(2), vec![0xFF, 0xFE]].concat()),
            (Schema::Boolean, vec![2]),
            (Schema::Int, long(1 << 40)),
            (Schema::parse_str(r#"["null","int"]"#).unwrap(), long(2)),
            (
                Schema::parse_str(r#"{"type":"enum","name":"E","symbols":["A"]}"#).unwrap(),
                long(1),
            ),
            (Schema::Bytes, long(-1)),
        ];
        for (schema, bytes) in cases {
            let result = decode(&schema, &mut bytes.as_slice());
            assert!(
                matches!(result, Err(OcfError::Deserialization(_))),
                "{schema} / {bytes:?} gave {result:?}"
            );
        }
    }

    #[test]
    fn collection_counts_are_bounded_by_the_input() {
        // 20 000 000 nulls claimed by five bytes.
        let nulls = Schema::Array(Box::new(Schema::Null));
        let result = decode(&nulls, &mut [0x80, 0xDA, 0xC4, 0x09, 0x00].as_slice());
        assert!(matches!(result, Err(OcfError::Deserialization(_))), "got {result:?}");

        let ints = Schema::Array(Box::new(Schema::Int));
        let bytes = [long(1000), long(1), long(2), long(0)].concat();
        assert!(matches!(decode(&ints, &mut bytes.as_slice()), Err(OcfError::Deserialization(_))));

        let map = Schema::Map(Box::new(Schema::Null));
        let bytes = [long(i64::MAX), long(0)].concat();
        assert!(matches!(decode(&map, &mut bytes.as_slice()), Err(OcfError::Deserialization(_))));

        let bytes = [long(-(i64::MAX)), long(1), long(0)].concat();
        assert!(matches!(decode(&ints, &mut bytes.as_slice()), Err(OcfError::Deserialization(_))));
    }

    #[test]
    fn small_zero_width_arrays_still_decode() {
        let empty = Schema::parse_str(r#"{"type":"record","name":"Unit","fields":[]}"#).unwrap();
        let schema = Schema::Array(Box::new(empty));
        let bytes = [long(3), long(0)].concat();
        let datum = decode(&schema, &mut bytes.as_slice()).unwrap();
        assert_eq!(datum, Datum::Array(vec![Datum::Record(vec![]); 3]));
    }

    fn linked_list() -> Schema {
        Schema::parse_str(
            r#"{"type":"record","name":"Node","fields":[
                {"name":"value","type":"int"},
                {"name":"next","type":["null","Node"]}
            ]}"#,
        )
        .unwrap()
    }

    /// `values` as a linked list, head first.
    fn encode_list(values: &[i32]) -> Vec<u8> {
        let mut out = Vec::new();
        for (i, v) in values.iter().enumerate() {
            out.extend(long(*v as i64));
            out.extend(long(if i + 1 < values.len() { 1 } else { 0 }));
        }
        out
    }

    #[test]
    fn recursive_records_decode() {
        let schema = linked_list();
        let bytes = encode_list(&[1, 2, 3]);
        let mut buf = bytes.as_slice();
        let datum = decode(&schema, &mut buf).unwrap();
        assert!(buf.is_empty());

        let tail = Datum::Record(vec![
            ("value".into(), Datum::Int(3)),
            ("next".into(), Datum::Union { branch: 0, value: Box::new(Datum::Null) }),
        ]);
        let middle = Datum::Record(vec![
            ("value".into(), Datum::Int(2)),
            ("next".into(), Datum::Union { branch: 1, value: Box::new(tail) }),
        ]);
        assert_eq!(datum.field("value"), Some(&Datum::Int(1)));
        assert_eq!(
            datum.field("next"),
            Some(&Datum::Union { branch: 1, value: Box::new(middle) })
        );
        assert_eq!(
            datum.to_json(),
            serde_json::json!({"value": 1, "next": {"value": 2, "next": {"value": 3, "next": null}}})
        );
    }

    #[test]
    fn recursion_depth_is_limited() {
        let schema = linked_list();
        let values: Vec<i32> = (0..(MAX_RECURSION as i32 + 10)).collect();
        let bytes = encode_list(&values);
        let result = decode(&schema, &mut bytes.as_slice());
        assert!(matches!(result, Err(OcfError::Deserialization(ref m)) if m.contains("deeper")), "got {result:?}");

        let values: Vec<i32> = (0..100).collect();
        assert!(decode(&schema, &mut encode_list(&values).as_slice()).is_ok());
    }

    #[test]
    fn typed_conversions_check_schemas() {
        assert!(String::accepts(&Schema::String));
        assert!(!i64::accepts(&Schema::Int));
        assert!(Vec::<u8>::accepts(&Schema::Bytes));
        assert!(Option::<String>::accepts(&Schema::parse_str(r#"["null","string"]"#).unwrap()));
        assert!(!Option::<String>::accepts(&Schema::String));
        assert!(Datum::accepts(&Schema::Map(Box::new(Schema::Null))));
        assert!(i32::from_datum(Datum::Long(1)).is_err());
    }

    #[test]
    fn bytes_render_as_latin1_json() {
        assert_eq!(
            Datum::Bytes(vec![0x41, 0xFF]).to_json(),
            JsonValue::String("A\u{ff}".into())
        );
    }
}
