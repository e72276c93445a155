//! The two-field `{key, value}` record layout used for key/value container files.

use crate::datum::Datum;
use crate::error::{OcfError, Result};
use crate::schema::{Name, RecordField, RecordSchema, Schema};

pub const KEY_FIELD: &str = "key";
pub const VALUE_FIELD: &str = "value";
pub const RECORD_NAME: &str = "KeyValuePair";
pub const RECORD_NAMESPACE: &str = "org.apache.avro.mapreduce";

/// The combined record schema for independently specified key and value schemas.
pub fn key_value_schema(key: Schema, value: Schema) -> Schema {
    Schema::Record(RecordSchema {
        name: Name::new(RECORD_NAME, Some(RECORD_NAMESPACE)),
        fields: vec![
            RecordField {
                name: KEY_FIELD.to_string(),
                schema: key,
            },
            RecordField {
                name: VALUE_FIELD.to_string(),
                schema: value,
            },
        ],
    })
}

/// Check that `file_schema` is a record of exactly `key` then `value` with
/// the given field schemas. The record's own name is not compared.
pub fn validate(file_schema: &Schema, key: &Schema, value: &Schema) -> Result<()> {
    let mismatch = || OcfError::SchemaMismatch {
        expected: key_value_schema(key.clone(), value.clone()).canonical_form(),
        found: file_schema.canonical_form(),
    };
    match file_schema.record_fields() {
        Some([k, v])
            if k.name == KEY_FIELD && v.name == VALUE_FIELD && &k.schema == key && &v.schema == value =>
        {
            Ok(())
        }
        _ => Err(mismatch()),
    }
}

/// Split a decoded key/value record into its two fields.
pub fn split(record: Datum) -> Result<(Datum, Datum)> {
    let Datum::Record(fields) = record else {
        return Err(OcfError::FieldMissing(KEY_FIELD));
    };
    let mut key = None;
    let mut value = None;
    for (name, datum) in fields {
        match name.as_str() {
            KEY_FIELD => key = Some(datum),
            VALUE_FIELD => value = Some(datum),
            _ => {}
        }
    }
    let key = key.ok_or(OcfError::FieldMissing(KEY_FIELD))?;
    let value = value.ok_or(OcfError::FieldMissing(VALUE_FIELD))?;
    Ok((key, value))
}
