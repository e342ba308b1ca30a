//! Payload decoding and canonical rendering.
//!
//! A [`Codec`] is resolved once from the configured [`MessageFormat`] and
//! turns raw delivery bodies into a [`DecodedMessage`]. Every decoded
//! message renders to the same indented JSON text, which is what gets
//! displayed, logged to file and matched by the filter.

use crate::config::MessageFormat;
use crate::error::{Result, ReaderError};
use chrono::{DateTime, SecondsFormat};
use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde_json::{Map, Number, Value};
use std::fmt;
use std::io::Cursor;

/// MessagePack extension type reserved for timestamps.
const TIMESTAMP_EXT: i8 = -1;

/// Decoder for one wire format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Codec {
    Json,
    MessagePack,
}

impl Codec {
    /// Resolve the decoder for a format.
    pub fn for_format(format: MessageFormat) -> Self {
        match format {
            MessageFormat::Json => Codec::Json,
            MessageFormat::MessagePack => Codec::MessagePack,
        }
    }

    /// Format this codec reads.
    pub fn format(&self) -> MessageFormat {
        match self {
            Codec::Json => MessageFormat::Json,
            Codec::MessagePack => MessageFormat::MessagePack,
        }
    }

    /// Decode a single delivery body.
    pub fn decode(&self, payload: &[u8]) -> Result<DecodedMessage> {
        let value = match self {
            Codec::Json => serde_json::from_slice::<Value>(payload)?,
            Codec::MessagePack => decode_messagepack(payload)?,
        };
        Ok(DecodedMessage(value))
    }
}

/// Decode exactly one MessagePack value spanning the whole payload.
fn decode_messagepack(payload: &[u8]) -> Result<Value> {
    let mut de = rmp_serde::Deserializer::new(Cursor::new(payload));
    let AnyValue(value) = AnyValue::deserialize(&mut de)?;

    let consumed = de.get_ref().position();
    let total = payload.len() as u64;
    if consumed != total {
        return Err(ReaderError::Decode(format!(
            "{} trailing bytes after message",
            total - consumed
        )));
    }
    Ok(value)
}

impl From<MessageFormat> for Codec {
    fn from(format: MessageFormat) -> Self {
        Codec::for_format(format)
    }
}

/// An untyped message tree.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedMessage(Value);

impl DecodedMessage {
    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Canonical indented rendering.
    pub fn render(&self) -> String {
        serde_json::to_string_pretty(&self.0).unwrap_or_else(|_| self.0.to_string())
    }
}

// MessagePack is richer than JSON: binary blobs, extensions and non-string
// map keys have no direct JSON counterpart, so they go through this visitor
// instead of `serde_json::Value`'s own impl. Blobs become hex strings,
// timestamps become RFC 3339 strings, keys are stringified.

struct AnyValue(Value);

impl<'de> Deserialize<'de> for AnyValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor).map(AnyValue)
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("any MessagePack value")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Value, E> {
        Ok(Value::Number(v.into()))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Value, E> {
        Ok(Value::Number(v.into()))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Value, E> {
        // NaN and infinities have no JSON form.
        Ok(Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Value, E> {
        Ok(Value::String(v.to_owned()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<Value, E> {
        Ok(Value::String(v))
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> std::result::Result<Value, E> {
        Ok(Value::String(hex::encode(v)))
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> std::result::Result<Value, E> {
        Ok(Value::String(hex::encode(v)))
    }

    fn visit_none<E: de::Error>(self) -> std::result::Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> std::result::Result<Value, D::Error> {
        d.deserialize_any(ValueVisitor)
    }

    // rmp-serde hands extension values over as a newtype wrapping (tag, data).
    fn visit_newtype_struct<D: Deserializer<'de>>(
        self,
        d: D,
    ) -> std::result::Result<Value, D::Error> {
        d.deserialize_any(ExtVisitor)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0).min(4096));
        while let Some(AnyValue(item)) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Value, A::Error> {
        let mut object = Map::new();
        while let Some((MapKey(key), AnyValue(value))) = map.next_entry()? {
            object.insert(key, value);
        }
        Ok(Value::Object(object))
    }
}

struct ExtVisitor;

impl<'de> Visitor<'de> for ExtVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a MessagePack extension")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Value, A::Error> {
        let tag: i8 = seq
            .next_element()?
            .ok_or_else(|| <A::Error as de::Error>::invalid_length(0, &self))?;
        let ExtData(data) = seq
            .next_element()?
            .ok_or_else(|| <A::Error as de::Error>::invalid_length(1, &self))?;
        Ok(ext_value(tag, &data))
    }
}

struct ExtData(Vec<u8>);

impl<'de> Deserialize<'de> for ExtData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(ExtDataVisitor).map(ExtData)
    }
}

struct ExtDataVisitor;

impl<'de> Visitor<'de> for ExtDataVisitor {
    type Value = Vec<u8>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("extension data")
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> std::result::Result<Vec<u8>, E> {
        Ok(v.to_vec())
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> std::result::Result<Vec<u8>, E> {
        Ok(v)
    }
}

/// Timestamps render as dates; other extensions as `[tag, "hex"]`.
fn ext_value(tag: i8, data: &[u8]) -> Value {
    if tag == TIMESTAMP_EXT {
        if let Some(date) = timestamp(data) {
            return Value::String(date);
        }
    }
    Value::Array(vec![Value::from(tag), Value::String(hex::encode(data))])
}

/// Decode the 32, 64 and 96 bit timestamp layouts.
fn timestamp(data: &[u8]) -> Option<String> {
    let (secs, nanos) = match data.len() {
        4 => (i64::from(u32::from_be_bytes(data.try_into().ok()?)), 0),
        8 => {
            let raw = u64::from_be_bytes(data.try_into().ok()?);
            ((raw & 0x3_ffff_ffff) as i64, (raw >> 34) as u32)
        }
        12 => (
            i64::from_be_bytes(data[4..].try_into().ok()?),
            u32::from_be_bytes(data[..4].try_into().ok()?),
        ),
        _ => return None,
    };
    DateTime::from_timestamp(secs, nanos)
        .map(|date| date.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

struct MapKey(String);

impl<'de> Deserialize<'de> for MapKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(KeyVisitor).map(MapKey)
    }
}

struct KeyVisitor;

impl<'de> Visitor<'de> for KeyVisitor {
    type Value = String;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a scalar map key")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<String, E> {
        Ok(v.to_string())
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<String, E> {
        Ok(v.to_string())
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<String, E> {
        Ok(v.to_string())
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<String, E> {
        Ok(v.to_string())
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<String, E> {
        Ok(v.to_owned())
    }

    fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<String, E> {
        Ok(v)
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> std::result::Result<String, E> {
        Ok(hex::encode(v))
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<String, E> {
        Ok("null".to_string())
    }

    // Compound keys keep their compact JSON text.
    fn visit_seq<A: SeqAccess<'de>>(self, seq: A) -> std::result::Result<String, A::Error> {
        ValueVisitor.visit_seq(seq).map(key_text)
    }

    fn visit_map<A: MapAccess<'de>>(self, map: A) -> std::result::Result<String, A::Error> {
        ValueVisitor.visit_map(map).map(key_text)
    }

    fn visit_newtype_struct<D: Deserializer<'de>>(
        self,
        d: D,
    ) -> std::result::Result<String, D::Error> {
        d.deserialize_any(ExtVisitor).map(key_text)
    }
}

fn key_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}
