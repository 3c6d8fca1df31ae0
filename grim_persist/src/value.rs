//! Plain tagged values with copy semantics.
//!
//! `RuntimeValue` backs configuration-like state such as the registry. It
//! never shares ownership and never forms cycles, so its codec is a straight
//! recursive transcription with none of the identity handling the object
//! graph layer needs.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Number, Value as JsonValue};

use crate::cursor::{ByteReader, ByteWriter};
use crate::error::{KindMismatch, ValueCodecError};

const TAG_NULL: u8 = 0x00;
const TAG_BOOL: u8 = 0x01;
const TAG_INT: u8 = 0x02;
const TAG_FLOAT: u8 = 0x03;
const TAG_STRING: u8 = 0x04;
const TAG_ARRAY: u8 = 0x05;
const TAG_TABLE: u8 = 0x06;

/// Deepest nesting accepted by [`RuntimeValue::unserialize`].
pub const MAX_DEPTH: usize = 256;

static NULL_SENTINEL: RuntimeValue = RuntimeValue::Null;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Float,
    String,
    Array,
    Table,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::String => "string",
            ValueKind::Array => "array",
            ValueKind::Table => "table",
        };
        f.write_str(name)
    }
}

/// A possibly nested value. Tables keep insertion order and are searched
/// linearly; the first matching key wins.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RuntimeValue {
    #[default]
    Null,
    Bool(bool),
    Int(i32),
    Float(f32),
    String(String),
    Array(Vec<RuntimeValue>),
    Table(Vec<(String, RuntimeValue)>),
}

impl RuntimeValue {
    /// Shared value returned by lookups that miss or hit the wrong kind.
    pub fn sentinel() -> &'static RuntimeValue {
        &NULL_SENTINEL
    }

    pub fn create_table() -> Self {
        RuntimeValue::Table(Vec::new())
    }

    pub fn create_array() -> Self {
        RuntimeValue::Array(Vec::new())
    }

    pub fn create_string(value: impl Into<String>) -> Self {
        RuntimeValue::String(value.into())
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            RuntimeValue::Null => ValueKind::Null,
            RuntimeValue::Bool(_) => ValueKind::Bool,
            RuntimeValue::Int(_) => ValueKind::Int,
            RuntimeValue::Float(_) => ValueKind::Float,
            RuntimeValue::String(_) => ValueKind::String,
            RuntimeValue::Array(_) => ValueKind::Array,
            RuntimeValue::Table(_) => ValueKind::Table,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RuntimeValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            RuntimeValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            RuntimeValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            RuntimeValue::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            RuntimeValue::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Element or member count; zero for scalars.
    pub fn len(&self) -> usize {
        match self {
            RuntimeValue::Array(items) => items.len(),
            RuntimeValue::Table(entries) => entries.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks up `key`, returning the shared sentinel on a miss.
    ///
    /// Null values answer every lookup with the sentinel so callers can
    /// chain through missing levels. Any other non-table kind is a kind
    /// mismatch: it is logged and the sentinel is returned.
    pub fn find_in_table(&self, key: &str) -> &RuntimeValue {
        match self {
            RuntimeValue::Table(entries) => entries
                .iter()
                .find(|(entry_key, _)| entry_key == key)
                .map(|(_, value)| value)
                .unwrap_or(&NULL_SENTINEL),
            RuntimeValue::Null => &NULL_SENTINEL,
            other => {
                KindMismatch::report("find_in_table", ValueKind::Table, other.kind());
                &NULL_SENTINEL
            }
        }
    }

    pub fn find_in_table_mut(&mut self, key: &str) -> Option<&mut RuntimeValue> {
        match self {
            RuntimeValue::Table(entries) => entries
                .iter_mut()
                .find(|(entry_key, _)| entry_key == key)
                .map(|(_, value)| value),
            _ => None,
        }
    }

    /// Stores `value` under `key`, overwriting in place or appending.
    ///
    /// A Null receiver is promoted to an empty table first.
    pub fn set_in_table(&mut self, key: impl Into<String>, value: RuntimeValue) -> bool {
        match self.table_slot("set_in_table", key.into()) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Returns the slot stored under `key`, creating a Null entry (and
    /// promoting a Null receiver to a table) when it does not exist yet.
    pub fn table_entry(&mut self, key: &str) -> Option<&mut RuntimeValue> {
        self.table_slot("table_entry", key.to_string())
    }

    fn table_slot(&mut self, operation: &'static str, key: String) -> Option<&mut RuntimeValue> {
        if self.is_null() {
            *self = RuntimeValue::create_table();
        }
        match self {
            RuntimeValue::Table(entries) => {
                let position = match entries.iter().position(|(entry_key, _)| *entry_key == key) {
                    Some(position) => position,
                    None => {
                        entries.push((key, RuntimeValue::Null));
                        entries.len() - 1
                    }
                };
                Some(&mut entries[position].1)
            }
            other => {
                KindMismatch::report(operation, ValueKind::Table, other.kind());
                None
            }
        }
    }

    pub fn remove_from_table(&mut self, key: &str) -> Option<RuntimeValue> {
        match self {
            RuntimeValue::Table(entries) => {
                let position = entries.iter().position(|(entry_key, _)| entry_key == key)?;
                Some(entries.remove(position).1)
            }
            RuntimeValue::Null => None,
            other => {
                KindMismatch::report("remove_from_table", ValueKind::Table, other.kind());
                None
            }
        }
    }

    /// Table members in insertion order; empty for every other kind.
    pub fn table_entries(&self) -> &[(String, RuntimeValue)] {
        match self {
            RuntimeValue::Table(entries) => entries,
            _ => &[],
        }
    }

    /// Appends to an array, promoting a Null receiver to an empty array.
    pub fn push(&mut self, value: RuntimeValue) -> bool {
        if self.is_null() {
            *self = RuntimeValue::create_array();
        }
        match self {
            RuntimeValue::Array(items) => {
                items.push(value);
                true
            }
            other => {
                KindMismatch::report("push", ValueKind::Array, other.kind());
                false
            }
        }
    }

    pub fn get_at(&self, index: usize) -> &RuntimeValue {
        match self {
            RuntimeValue::Array(items) => items.get(index).unwrap_or(&NULL_SENTINEL),
            RuntimeValue::Null => &NULL_SENTINEL,
            other => {
                KindMismatch::report("get_at", ValueKind::Array, other.kind());
                &NULL_SENTINEL
            }
        }
    }

    /// Overwrites an existing array slot; out-of-range writes are refused.
    pub fn set_at(&mut self, index: usize, value: RuntimeValue) -> bool {
        match self {
            RuntimeValue::Array(items) => match items.get_mut(index) {
                Some(slot) => {
                    *slot = value;
                    true
                }
                None => false,
            },
            other => {
                KindMismatch::report("set_at", ValueKind::Array, other.kind());
                false
            }
        }
    }

    pub fn elements(&self) -> &[RuntimeValue] {
        match self {
            RuntimeValue::Array(items) => items,
            _ => &[],
        }
    }

    pub fn serialize(&self, writer: &mut ByteWriter) -> Result<(), ValueCodecError> {
        match self {
            RuntimeValue::Null => writer.put_u8(TAG_NULL),
            RuntimeValue::Bool(value) => {
                writer.put_u8(TAG_BOOL);
                writer.put_bool(*value);
            }
            RuntimeValue::Int(value) => {
                writer.put_u8(TAG_INT);
                writer.put_i32(*value);
            }
            RuntimeValue::Float(value) => {
                writer.put_u8(TAG_FLOAT);
                writer.put_f32(*value);
            }
            RuntimeValue::String(value) => {
                writer.put_u8(TAG_STRING);
                writer.put_str(value)?;
            }
            RuntimeValue::Array(items) => {
                writer.put_u8(TAG_ARRAY);
                writer.put_len(items.len())?;
                for item in items {
                    item.serialize(writer)?;
                }
            }
            RuntimeValue::Table(entries) => {
                writer.put_u8(TAG_TABLE);
                writer.put_len(entries.len())?;
                for (key, value) in entries {
                    writer.put_str(key)?;
                    value.serialize(writer)?;
                }
            }
        }
        Ok(())
    }

    pub fn unserialize(reader: &mut ByteReader<'_>) -> Result<Self, ValueCodecError> {
        Self::unserialize_at(reader, 0)
    }

    fn unserialize_at(reader: &mut ByteReader<'_>, depth: usize) -> Result<Self, ValueCodecError> {
        if depth > MAX_DEPTH {
            return Err(ValueCodecError::TooDeep(MAX_DEPTH));
        }
        let tag = reader.get_u8()?;
        let value = match tag {
            TAG_NULL => RuntimeValue::Null,
            TAG_BOOL => RuntimeValue::Bool(reader.get_bool()?),
            TAG_INT => RuntimeValue::Int(reader.get_i32()?),
            TAG_FLOAT => RuntimeValue::Float(reader.get_f32()?),
            TAG_STRING => RuntimeValue::String(reader.get_str()?.to_string()),
            TAG_ARRAY => {
                let count = reader.get_len()?;
                reader.ensure_items(count, 1)?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(Self::unserialize_at(reader, depth + 1)?);
                }
                RuntimeValue::Array(items)
            }
            TAG_TABLE => {
                let count = reader.get_len()?;
                // Each member is at least a key length and a value tag.
                reader.ensure_items(count, 5)?;
                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    let key = reader.get_str()?.to_string();
                    let value = Self::unserialize_at(reader, depth + 1)?;
                    entries.push((key, value));
                }
                RuntimeValue::Table(entries)
            }
            other => return Err(ValueCodecError::UnknownTag(other)),
        };
        Ok(value)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ValueCodecError> {
        let mut writer = ByteWriter::new();
        self.serialize(&mut writer)?;
        Ok(writer.into_inner())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ValueCodecError> {
        Self::unserialize(&mut ByteReader::new(bytes))
    }

    pub fn to_json(&self) -> Result<JsonValue, ValueCodecError> {
        let json = match self {
            RuntimeValue::Null => JsonValue::Null,
            RuntimeValue::Bool(value) => JsonValue::Bool(*value),
            RuntimeValue::Int(value) => JsonValue::Number((*value).into()),
            RuntimeValue::Float(value) => Number::from_f64(f64::from(*value))
                .map(JsonValue::Number)
                .ok_or(ValueCodecError::NonFiniteFloat(*value))?,
            RuntimeValue::String(value) => JsonValue::String(value.clone()),
            RuntimeValue::Array(items) => JsonValue::Array(
                items
                    .iter()
                    .map(RuntimeValue::to_json)
                    .collect::<Result<_, _>>()?,
            ),
            RuntimeValue::Table(entries) => {
                let mut map = Map::with_capacity(entries.len());
                for (key, value) in entries {
                    // Lookups stop at the first match, so later duplicates are shadowed.
                    if !map.contains_key(key) {
                        map.insert(key.clone(), value.to_json()?);
                    }
                }
                JsonValue::Object(map)
            }
        };
        Ok(json)
    }

    /// Integral JSON numbers that fit in 32 bits become `Int`; every other
    /// number becomes `Float`.
    pub fn from_json(json: &JsonValue) -> Result<Self, ValueCodecError> {
        let value = match json {
            JsonValue::Null => RuntimeValue::Null,
            JsonValue::Bool(value) => RuntimeValue::Bool(*value),
            JsonValue::Number(number) => match number.as_i64().map(i32::try_from) {
                Some(Ok(value)) => RuntimeValue::Int(value),
                _ => match number.as_f64() {
                    Some(value) => RuntimeValue::Float(value as f32),
                    None => return Err(ValueCodecError::UnsupportedJson(number.to_string())),
                },
            },
            JsonValue::String(value) => RuntimeValue::String(value.clone()),
            JsonValue::Array(items) => RuntimeValue::Array(
                items
                    .iter()
                    .map(RuntimeValue::from_json)
                    .collect::<Result<_, _>>()?,
            ),
            JsonValue::Object(map) => {
                let mut entries = Vec::with_capacity(map.len());
                for (key, value) in map {
                    entries.push((key.clone(), RuntimeValue::from_json(value)?));
                }
                RuntimeValue::Table(entries)
            }
        };
        Ok(value)
    }
}

impl fmt::Display for RuntimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeValue::Null => f.write_str("null"),
            RuntimeValue::Bool(value) => write!(f, "{value}"),
            RuntimeValue::Int(value) => write!(f, "{value}"),
            RuntimeValue::Float(value) => write!(f, "{value:?}"),
            RuntimeValue::String(value) => write!(f, "{value:?}"),
            RuntimeValue::Array(items) => {
                f.write_str("[")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            RuntimeValue::Table(entries) => {
                f.write_str("{")?;
                for (index, (key, value)) in entries.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key} = {value}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<bool> for RuntimeValue {
    fn from(value: bool) -> Self {
        RuntimeValue::Bool(value)
    }
}

impl From<i32> for RuntimeValue {
    fn from(value: i32) -> Self {
        RuntimeValue::Int(value)
    }
}

impl From<f32> for RuntimeValue {
    fn from(value: f32) -> Self {
        RuntimeValue::Float(value)
    }
}

impl From<&str> for RuntimeValue {
    fn from(value: &str) -> Self {
        RuntimeValue::String(value.to_string())
    }
}

impl From<String> for RuntimeValue {
    fn from(value: String) -> Self {
        RuntimeValue::String(value)
    }
}

impl From<Vec<RuntimeValue>> for RuntimeValue {
    fn from(items: Vec<RuntimeValue>) -> Self {
        RuntimeValue::Array(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn character() -> RuntimeValue {
        let mut value = RuntimeValue::create_table();
        value.set_in_table("hp", 10.into());
        value.set_in_table("name", "foo".into());
        value.set_in_table("tags", vec!["a".into(), "b".into()].into());
        value
    }

    #[test]
    fn codec_preserves_kind_nesting_and_key_order() {
        let mut value = character();
        let mut nested = RuntimeValue::create_table();
        nested.set_in_table("z", 1.25f32.into());
        nested.set_in_table("a", RuntimeValue::Null);
        nested.set_in_table("m", true.into());
        value.set_in_table("nested", nested);

        let bytes = value.to_bytes().unwrap();
        let decoded = RuntimeValue::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, value);
        let keys: Vec<&str> = decoded
            .find_in_table("nested")
            .table_entries()
            .iter()
            .map(|(key, _)| key.as_str())
            .collect();
        assert_eq!(keys, ["z", "a", "m"]);
    }

    #[test]
    fn set_overwrites_in_place_and_appends_new_keys() {
        let mut value = character();
        assert!(value.set_in_table("hp", 3.into()));
        assert!(value.set_in_table("mp", 7.into()));
        let keys: Vec<&str> = value
            .table_entries()
            .iter()
            .map(|(key, _)| key.as_str())
            .collect();
        assert_eq!(keys, ["hp", "name", "tags", "mp"]);
        assert_eq!(value.find_in_table("hp").as_int(), Some(3));
    }

    #[test]
    fn null_is_promoted_to_table_on_set() {
        let mut value = RuntimeValue::Null;
        assert!(value.set_in_table("door", "open".into()));
        assert_eq!(value.kind(), ValueKind::Table);
        assert_eq!(value.find_in_table("door").as_str(), Some("open"));
    }

    #[test]
    fn kind_mismatch_returns_sentinel_and_false() {
        let mut value = RuntimeValue::Float(2.5);
        assert!(!value.set_in_table("x", 1.into()));
        assert_eq!(value, RuntimeValue::Float(2.5));
        let found = value.find_in_table("x").find_in_table("y");
        assert!(std::ptr::eq(found, RuntimeValue::sentinel()));
        assert!(!RuntimeValue::Int(1).push(2.into()));
        assert!(RuntimeValue::String("s".into()).get_at(0).is_null());
    }

    #[test]
    fn array_slots_are_bounded() {
        let mut value = RuntimeValue::Null;
        assert!(value.push(1.into()));
        assert!(value.set_at(0, 5.into()));
        assert!(!value.set_at(3, 5.into()));
        assert_eq!(value.get_at(0).as_int(), Some(5));
        assert!(value.get_at(9).is_null());
    }

    #[test]
    fn rejects_unknown_tag_and_truncated_members() {
        assert!(matches!(
            RuntimeValue::from_bytes(&[0x42]),
            Err(ValueCodecError::UnknownTag(0x42))
        ));
        let mut bytes = character().to_bytes().unwrap();
        bytes.truncate(bytes.len() - 3);
        assert!(matches!(
            RuntimeValue::from_bytes(&bytes),
            Err(ValueCodecError::Stream(_))
        ));
    }

    #[test]
    fn rejects_excessive_nesting() {
        let mut bytes = Vec::new();
        for _ in 0..=MAX_DEPTH + 1 {
            bytes.push(TAG_ARRAY);
            bytes.extend_from_slice(&1u32.to_le_bytes());
        }
        bytes.push(TAG_NULL);
        assert!(matches!(
            RuntimeValue::from_bytes(&bytes),
            Err(ValueCodecError::TooDeep(MAX_DEPTH))
        ));
    }

    #[test]
    fn json_conversion_round_trips_through_serde() {
        let json = json!({ "hp": 10, "ratio": 0.5, "tags": ["a"], "alive": true });
        let value = RuntimeValue::from_json(&json).unwrap();
        assert_eq!(value.find_in_table("hp"), &RuntimeValue::Int(10));
        assert_eq!(value.find_in_table("ratio"), &RuntimeValue::Float(0.5));
        assert_eq!(value.to_json().unwrap(), json);
        assert!(matches!(
            RuntimeValue::Float(f32::NAN).to_json(),
            Err(ValueCodecError::NonFiniteFloat(_))
        ));
    }

    #[test]
    fn json_conversion_keeps_member_order() {
        let mut value = RuntimeValue::create_table();
        value.set_in_table("z", 1.into());
        value.set_in_table("a", 2.into());
        value.set_in_table("m", character());
        let json = value.to_json().unwrap();
        let keys: Vec<&str> = json
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(keys, ["z", "a", "m"]);
        assert_eq!(RuntimeValue::from_json(&json).unwrap(), value);
        assert_eq!(
            serde_json::to_string(&json).unwrap(),
            r#"{"z":1,"a":2,"m":{"hp":10,"name":"foo","tags":["a","b"]}}"#
        );
    }

    #[test]
    fn display_renders_nested_values() {
        assert_eq!(
            character().to_string(),
            r#"{hp = 10, name = "foo", tags = ["a", "b"]}"#
        );
    }
}
