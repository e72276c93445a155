use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value as JsonValue};

use crate::error::{OcfError, Result};

/// Structural description of a datum, as embedded in the `avro.schema` header entry.
///
/// Only the parts that affect the binary encoding are kept: names, field order,
/// field types, enum symbols and fixed sizes. Docs, defaults, aliases and
/// logical-type annotations are dropped on parse, so two schemas compare equal
/// exactly when they describe the same encoding under the same names.
///
/// References to a named type that is already complete are inlined. A record
/// that refers to itself, directly or through nested types, holds a
/// [`Schema::Ref`] at that point instead; see [`NamedTypes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schema {
    Null,
    Boolean,
    Int,
    Long,
    Float,
    Double,
    Bytes,
    String,
    Record(RecordSchema),
    Enum(EnumSchema),
    Array(Box<Schema>),
    Map(Box<Schema>),
    Union(Vec<Schema>),
    Fixed(FixedSchema),
    /// Reference to an enclosing named type that was still being defined.
    Ref(Name),
}

/// Full name of a named type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Name {
    pub name: String,
    pub namespace: Option<String>,
}

impl Name {
    pub fn new(name: impl Into<String>, namespace: Option<&str>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.filter(|ns| !ns.is_empty()).map(str::to_string),
        }
    }

    pub fn fullname(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}.{}", ns, self.name),
            None => self.name.clone(),
        }
    }

    /// Split a full name at its last dot.
    fn from_fullname(full: &str) -> Self {
        match full.rsplit_once('.') {
            Some((namespace, name)) => Name::new(name, Some(namespace)),
            None => Name::new(full, None),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSchema {
    pub name: Name,
    pub fields: Vec<RecordField>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordField {
    pub name: String,
    pub schema: Schema,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumSchema {
    pub name: Name,
    pub symbols: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedSchema {
    pub name: Name,
    pub size: usize,
}

impl Schema {
    /// Parse schema JSON text.
    pub fn parse_str(text: &str) -> Result<Self> {
        let json: JsonValue = serde_json::from_str(text)
            .map_err(|e| OcfError::InvalidSchema(format!("not valid JSON: {e}")))?;
        Self::parse_json(&json)
    }

    /// Parse an already-decoded JSON schema document.
    pub fn parse_json(json: &JsonValue) -> Result<Self> {
        Parser::default().parse(json, None)
    }

    /// Fields of a record schema, `None` for every other kind.
    pub fn record_fields(&self) -> Option<&[RecordField]> {
        match self {
            Schema::Record(r) => Some(&r.fields),
            _ => None,
        }
    }

    /// Whether this is a two-branch union with `null` in one branch, returning
    /// the other branch and its index.
    pub fn nullable_branch(&self) -> Option<(usize, &Schema)> {
        match self {
            Schema::Union(branches) if branches.len() == 2 => match (&branches[0], &branches[1]) {
                (Schema::Null, other) => Some((1, other)),
                (other, Schema::Null) => Some((0, other)),
                _ => None,
            },
            _ => None,
        }
    }

    /// Parsing canonical form: attributes in a fixed order, no whitespace,
    /// named types written in full on first use and by name afterwards.
    pub fn canonical_form(&self) -> String {
        let mut out = String::new();
        let mut seen = HashSet::new();
        self.write_canonical(&mut out, &mut seen);
        out
    }

    fn write_canonical(&self, out: &mut String, seen: &mut HashSet<String>) {
        match self {
            Schema::Null => out.push_str("\"null\""),
            Schema::Boolean => out.push_str("\"boolean\""),
            Schema::Int => out.push_str("\"int\""),
            Schema::Long => out.push_str("\"long\""),
            Schema::Float => out.push_str("\"float\""),
            Schema::Double => out.push_str("\"double\""),
            Schema::Bytes => out.push_str("\"bytes\""),
            Schema::String => out.push_str("\"string\""),
            Schema::Record(r) => {
                if !write_name_or_start(out, seen, &r.name) {
                    return;
                }
                out.push_str(",\"type\":\"record\",\"fields\":[");
                for (i, field) in r.fields.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str("{\"name\":");
                    push_json_str(out, &field.name);
                    out.push_str(",\"type\":");
                    field.schema.write_canonical(out, seen);
                    out.push('}');
                }
                out.push_str("]}");
            }
            Schema::Enum(e) => {
                if !write_name_or_start(out, seen, &e.name) {
                    return;
                }
                out.push_str(",\"type\":\"enum\",\"symbols\":[");
                for (i, symbol) in e.symbols.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    push_json_str(out, symbol);
                }
                out.push_str("]}");
            }
            Schema::Array(items) => {
                out.push_str("{\"type\":\"array\",\"items\":");
                items.write_canonical(out, seen);
                out.push('}');
            }
            Schema::Map(values) => {
                out.push_str("{\"type\":\"map\",\"values\":");
                values.write_canonical(out, seen);
                out.push('}');
            }
            Schema::Union(branches) => {
                out.push('[');
                for (i, branch) in branches.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    branch.write_canonical(out, seen);
                }
                out.push(']');
            }
            Schema::Fixed(f) => {
                if !write_name_or_start(out, seen, &f.name) {
                    return;
                }
                out.push_str(&format!(",\"type\":\"fixed\",\"size\":{}}}", f.size));
            }
            // Always inside the definition it names, so written by name.
            Schema::Ref(name) => push_json_str(out, &name.fullname()),
        }
    }
}

impl Schema {
    /// Whether a datum of this schema can encode in zero bytes.
    ///
    /// A reference counts as non-empty: a record that contains itself without
    /// an intervening union or collection has no finite encoding anyway.
    pub(crate) fn encodes_empty(&self) -> bool {
        match self {
            Schema::Null => true,
            Schema::Fixed(f) => f.size == 0,
            Schema::Record(r) => r.fields.iter().all(|f| f.schema.encodes_empty()),
            _ => false,
        }
    }
}

/// Definitions of the named types reachable from a schema, by full name.
///
/// Decoding looks up [`Schema::Ref`] targets here.
#[derive(Debug, Clone, Default)]
pub struct NamedTypes {
    types: HashMap<String, Schema>,
}

impl NamedTypes {
    pub fn collect(schema: &Schema) -> Self {
        let mut table = Self::default();
        table.visit(schema);
        table
    }

    fn visit(&mut self, schema: &Schema) {
        match schema {
            Schema::Record(r) => {
                if self.insert(&r.name, schema) {
                    for field in &r.fields {
                        self.visit(&field.schema);
                    }
                }
            }
            Schema::Enum(e) => {
                self.insert(&e.name, schema);
            }
            Schema::Fixed(f) => {
                self.insert(&f.name, schema);
            }
            Schema::Array(inner) | Schema::Map(inner) => self.visit(inner),
            Schema::Union(branches) => branches.iter().for_each(|b| self.visit(b)),
            _ => {}
        }
    }

    fn insert(&mut self, name: &Name, schema: &Schema) -> bool {
        let full = name.fullname();
        if self.types.contains_key(&full) {
            return false;
        }
        self.types.insert(full, schema.clone());
        true
    }

    pub fn get(&self, name: &Name) -> Option<&Schema> {
        self.types.get(&name.fullname())
    }
}

/// Writes `"fullname"` and returns false if the name was already emitted,
/// otherwise opens the object with its name attribute and returns true.
fn write_name_or_start(out: &mut String, seen: &mut HashSet<String>, name: &Name) -> bool {
    let full = name.fullname();
    if seen.contains(&full) {
        push_json_str(out, &full);
        return false;
    }
    out.push_str("{\"name\":");
    push_json_str(out, &full);
    seen.insert(full);
    true
}

fn push_json_str(out: &mut String, s: &str) {
    out.push_str(&JsonValue::String(s.to_string()).to_string());
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_form())
    }
}

impl<'de> Deserialize<'de> for Schema {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let json = JsonValue::deserialize(deserializer)?;
        Schema::parse_json(&json).map_err(serde::de::Error::custom)
    }
}

fn primitive(name: &str) -> Option<Schema> {
    Some(match name {
        "null" => Schema::Null,
        "boolean" => Schema::Boolean,
        "int" => Schema::Int,
        "long" => Schema::Long,
        "float" => Schema::Float,
        "double" => Schema::Double,
        "bytes" => Schema::Bytes,
        "string" => Schema::String,
        _ => return None,
    })
}

fn invalid(msg: impl Into<String>) -> OcfError {
    OcfError::InvalidSchema(msg.into())
}

#[derive(Default)]
struct Parser {
    /// Named types defined so far, by full name.
    named: HashMap<String, Schema>,
    /// Records whose fields are still being parsed; references to them become [`Schema::Ref`].
    open: HashSet<String>,
}

impl Parser {
    fn parse(&mut self, json: &JsonValue, ns: Option<&str>) -> Result<Schema> {
        match json {
            JsonValue::String(s) => self.resolve(s, ns),
            JsonValue::Array(branches) => {
                let mut parsed = Vec::with_capacity(branches.len());
                for branch in branches {
                    let schema = self.parse(branch, ns)?;
                    if matches!(schema, Schema::Union(_)) {
                        return Err(invalid("unions may not immediately contain other unions"));
                    }
                    parsed.push(schema);
                }
                Ok(Schema::Union(parsed))
            }
            JsonValue::Object(map) => self.parse_object(map, ns),
            other => Err(invalid(format!("unexpected schema value {other}"))),
        }
    }

    /// A primitive type name or a reference to an already defined named type.
    fn resolve(&self, name: &str, ns: Option<&str>) -> Result<Schema> {
        if let Some(p) = primitive(name) {
            return Ok(p);
        }
        let mut candidates = Vec::with_capacity(2);
        if !name.contains('.') {
            if let Some(ns) = ns.filter(|ns| !ns.is_empty()) {
                candidates.push(format!("{ns}.{name}"));
            }
        }
        candidates.push(name.to_string());
        for full in &candidates {
            if self.open.contains(full) {
                return Ok(Schema::Ref(Name::from_fullname(full)));
            }
            if let Some(schema) = self.named.get(full) {
                return Ok(schema.clone());
            }
        }
        Err(invalid(format!("unknown type '{name}'")))
    }

    fn parse_object(&mut self, map: &Map<String, JsonValue>, ns: Option<&str>) -> Result<Schema> {
        let ty = map
            .get("type")
            .ok_or_else(|| invalid("schema object has no 'type' attribute"))?;
        let ty = match ty {
            JsonValue::String(t) => t.as_str(),
            nested => return self.parse(nested, ns),
        };
        match ty {
            "record" | "error" => self.parse_record(map, ns),
            "enum" => {
                let name = self.name_of(map, ns)?;
                let symbols = map
                    .get("symbols")
                    .and_then(JsonValue::as_array)
                    .ok_or_else(|| invalid("enum has no 'symbols' array"))?
                    .iter()
                    .map(|s| {
                        s.as_str()
                            .map(str::to_string)
                            .ok_or_else(|| invalid("enum symbols must be strings"))
                    })
                    .collect::<Result<Vec<_>>>()?;
                self.define(Schema::Enum(EnumSchema { name, symbols }))
            }
            "fixed" => {
                let name = self.name_of(map, ns)?;
                let size = map
                    .get("size")
                    .and_then(JsonValue::as_u64)
                    .ok_or_else(|| invalid("fixed has no non-negative 'size'"))?;
                self.define(Schema::Fixed(FixedSchema {
                    name,
                    size: size as usize,
                }))
            }
            "array" => {
                let items = map
                    .get("items")
                    .ok_or_else(|| invalid("array has no 'items'"))?;
                Ok(Schema::Array(Box::new(self.parse(items, ns)?)))
            }
            "map" => {
                let values = map
                    .get("values")
                    .ok_or_else(|| invalid("map has no 'values'"))?;
                Ok(Schema::Map(Box::new(self.parse(values, ns)?)))
            }
            // Primitives in object form, possibly carrying a logicalType.
            other => self.resolve(other, ns),
        }
    }

    fn parse_record(&mut self, map: &Map<String, JsonValue>, ns: Option<&str>) -> Result<Schema> {
        let name = self.name_of(map, ns)?;
        let full = name.fullname();
        let fields_json = map
            .get("fields")
            .and_then(JsonValue::as_array)
            .ok_or_else(|| invalid(format!("record '{full}' has no 'fields' array")))?;

        self.open.insert(full.clone());
        let mut fields: Vec<RecordField> = Vec::with_capacity(fields_json.len());
        for field in fields_json {
            let field_name = field
                .get("name")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| invalid(format!("field of '{full}' has no name")))?;
            if fields.iter().any(|f| f.name == field_name) {
                return Err(invalid(format!("duplicate field '{field_name}' in '{full}'")));
            }
            let field_type = field
                .get("type")
                .ok_or_else(|| invalid(format!("field '{field_name}' of '{full}' has no type")))?;
            let schema = self.parse(field_type, name.namespace.as_deref())?;
            fields.push(RecordField {
                name: field_name.to_string(),
                schema,
            });
        }
        self.open.remove(&full);

        self.define(Schema::Record(RecordSchema { name, fields }))
    }

    fn name_of(&self, map: &Map<String, JsonValue>, ns: Option<&str>) -> Result<Name> {
        let raw = map
            .get("name")
            .and_then(JsonValue::as_str)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| invalid("named type has no 'name'"))?;
        if let Some((namespace, name)) = raw.rsplit_once('.') {
            return Ok(Name::new(name, Some(namespace)));
        }
        let namespace = match map.get("namespace") {
            Some(JsonValue::String(s)) => Some(s.as_str()),
            Some(_) => return Err(invalid("'namespace' must be a string")),
            None => ns,
        };
        Ok(Name::new(raw, namespace))
    }

    fn define(&mut self, schema: Schema) -> Result<Schema> {
        let full = match &schema {
            Schema::Record(r) => r.name.fullname(),
            Schema::Enum(e) => e.name.fullname(),
            Schema::Fixed(f) => f.name.fullname(),
            _ => return Ok(schema),
        };
        if primitive(&full).is_some() {
            return Err(invalid(format!("'{full}' redefines a primitive type")));
        }
        if let Some(existing) = self.named.get(&full) {
            if existing != &schema {
                return Err(invalid(format!("'{full}' is defined twice with different shapes")));
            }
        }
        self.named.insert(full, schema.clone());
        Ok(schema)
    }
}
