//! Conductor wire protocol
//!
//! Single responsibility: encode and decode the msgpack frames exchanged
//! with the conductor's app interface.
//!
//! # Wire Format
//!
//! Requests travel in an outer envelope:
//!
//! ```text
//! {
//!     "id": <u64>,           // Correlation id
//!     "type": "request",
//!     "data": <binary>,      // Inner request as msgpack bytes
//! }
//! ```
//!
//! The inner request is `{"type": <name>, "value": <map>}`. Responses come
//! back as `{"id", "type": "response" | "error", "data"}`. Signal frames
//! have no id:
//!
//! ```text
//! {
//!     "type": "signal",
//!     "data": <binary>,      // {"App": {"cell_id", "zome_name", "signal"}}
//! }
//! ```

use rmpv::Value;
use std::io::Cursor;

use crate::cell::CellAddress;
use crate::error::{ProxyError, Result};
use crate::signal::AppSignal;

/// A request ready to be sent over the wire.
pub struct EncodedRequest {
    pub id: u64,
    pub bytes: Vec<u8>,
}

/// One decoded incoming frame.
pub enum WireFrame {
    /// Response to a request, matched by id.
    Response {
        id: u64,
        result: std::result::Result<Value, String>,
    },
    /// Unsolicited signal frame.
    Signal(AppSignal),
}

fn write(value: &Value) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    rmpv::encode::write_value(&mut bytes, value)
        .map_err(|e| ProxyError::Wire(format!("encode failed: {}", e)))?;
    Ok(bytes)
}

fn read(bytes: &[u8]) -> Result<Value> {
    let mut cursor = Cursor::new(bytes);
    rmpv::decode::read_value(&mut cursor)
        .map_err(|e| ProxyError::Wire(format!("decode failed: {}", e)))
}

fn get_field<'a>(map: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    map.iter()
        .find(|(k, _)| k.as_str() == Some(key))
        .map(|(_, v)| v)
}

/// Encode a named request into the outer envelope.
pub fn encode_request(id: u64, request_type: &str, value: Value) -> Result<EncodedRequest> {
    let inner = Value::Map(vec![
        (Value::String("type".into()), Value::String(request_type.into())),
        (Value::String("value".into()), value),
    ]);
    let inner_bytes = write(&inner)?;

    let envelope = Value::Map(vec![
        (Value::String("id".into()), Value::Integer(id.into())),
        (Value::String("type".into()), Value::String("request".into())),
        (Value::String("data".into()), Value::Binary(inner_bytes)),
    ]);

    Ok(EncodedRequest {
        id,
        bytes: write(&envelope)?,
    })
}

/// Encode a zome call. The function arguments are msgpack-packed into
/// the payload field.
pub fn encode_zome_call(
    id: u64,
    cell_id: &CellAddress,
    zome_name: &str,
    fn_name: &str,
    payload: &serde_json::Value,
    cap_secret: Option<&[u8]>,
    provenance: &[u8],
) -> Result<EncodedRequest> {
    let payload_bytes = rmp_serde::to_vec_named(payload)
        .map_err(|e| ProxyError::Wire(format!("payload encode failed: {}", e)))?;
    let call = Value::Map(vec![
        (
            Value::String("cell_id".into()),
            Value::Array(vec![
                Value::Binary(cell_id.dna_hash.clone()),
                Value::Binary(cell_id.agent_key.clone()),
            ]),
        ),
        (Value::String("zome_name".into()), Value::String(zome_name.into())),
        (Value::String("fn_name".into()), Value::String(fn_name.into())),
        (Value::String("payload".into()), Value::Binary(payload_bytes)),
        (
            Value::String("cap_secret".into()),
            match cap_secret {
                Some(secret) => Value::Binary(secret.to_vec()),
                None => Value::Nil,
            },
        ),
        (Value::String("provenance".into()), Value::Binary(provenance.to_vec())),
    ]);
    encode_request(id, "call_zome", call)
}

/// Encode the authentication frame sent right after connecting.
pub fn encode_authenticate(token: &[u8]) -> Result<Vec<u8>> {
    let inner = Value::Map(vec![(
        Value::String("token".into()),
        Value::Binary(token.to_vec()),
    )]);
    let inner_bytes = write(&inner)?;

    let envelope = Value::Map(vec![
        (Value::String("type".into()), Value::String("authenticate".into())),
        (Value::String("data".into()), Value::Binary(inner_bytes)),
    ]);
    write(&envelope)
}

/// Decode an incoming frame into a response or a signal.
pub fn decode_frame(bytes: &[u8]) -> Result<WireFrame> {
    let value = read(bytes)?;
    let map = value
        .as_map()
        .ok_or_else(|| ProxyError::Wire("frame is not a map".into()))?;

    let frame_type = get_field(map, "type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ProxyError::Wire("frame missing 'type'".into()))?;

    match frame_type {
        "signal" => {
            let data = get_field(map, "data")
                .and_then(|v| v.as_slice())
                .ok_or_else(|| ProxyError::Wire("signal frame missing 'data'".into()))?;
            Ok(WireFrame::Signal(decode_signal(data)?))
        }
        "response" | "error" => {
            let id = get_field(map, "id")
                .and_then(|v| v.as_u64())
                .ok_or_else(|| ProxyError::Wire("frame missing 'id'".into()))?;
            let data = get_field(map, "data")
                .ok_or_else(|| ProxyError::Wire("frame missing 'data'".into()))?;
            let result = if frame_type == "response" {
                let payload = match data.as_slice() {
                    Some(bytes) if !bytes.is_empty() => read(bytes)?,
                    _ => Value::Nil,
                };
                Ok(payload)
            } else {
                Err(data.as_str().unwrap_or("unknown error").to_string())
            };
            Ok(WireFrame::Response { id, result })
        }
        other => Err(ProxyError::Wire(format!("unknown frame type: {}", other))),
    }
}

/// Decode the inner signal payload: `{"App": {"cell_id", "zome_name", "signal"}}`.
fn decode_signal(bytes: &[u8]) -> Result<AppSignal> {
    let value = read(bytes)?;
    let outer = value
        .as_map()
        .ok_or_else(|| ProxyError::Wire("signal is not a map".into()))?;
    let app = get_field(outer, "App")
        .and_then(|v| v.as_map())
        .ok_or_else(|| ProxyError::Wire("signal missing 'App'".into()))?;

    let cell_id = get_field(app, "cell_id")
        .and_then(|v| v.as_array())
        .ok_or_else(|| ProxyError::Wire("signal missing 'cell_id'".into()))?;
    if cell_id.len() != 2 {
        return Err(ProxyError::Wire("cell_id is not a pair".into()));
    }
    let dna_hash = cell_id[0]
        .as_slice()
        .ok_or_else(|| ProxyError::Wire("cell_id dna is not binary".into()))?;
    let agent_key = cell_id[1]
        .as_slice()
        .ok_or_else(|| ProxyError::Wire("cell_id agent is not binary".into()))?;

    let zome_name = get_field(app, "zome_name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ProxyError::Wire("signal missing 'zome_name'".into()))?;

    let payload = match get_field(app, "signal").and_then(|v| v.as_slice()) {
        Some(bytes) if !bytes.is_empty() => rmpv_to_json(&read(bytes)?),
        _ => serde_json::Value::Null,
    };

    Ok(AppSignal {
        cell_address: CellAddress::new(dna_hash.to_vec(), agent_key.to_vec()),
        zome_name: zome_name.to_string(),
        payload,
    })
}

/// Convert a JSON value into its msgpack representation.
pub fn json_to_rmpv(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Nil,
        serde_json::Value::Bool(b) => Value::Boolean(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Integer(i.into())
            } else if let Some(u) = n.as_u64() {
                Value::Integer(u.into())
            } else {
                Value::F64(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::String(s.as_str().into()),
        serde_json::Value::Array(items) => {
            Value::Array(items.iter().map(json_to_rmpv).collect())
        }
        serde_json::Value::Object(map) => Value::Map(
            map.iter()
                .map(|(k, v)| (Value::String(k.as_str().into()), json_to_rmpv(v)))
                .collect(),
        ),
    }
}

/// Convert a msgpack value into JSON. Binary becomes an array of numbers,
/// non-string map keys are stringified.
pub fn rmpv_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Nil => serde_json::Value::Null,
        Value::Boolean(b) => serde_json::Value::Bool(*b),
        Value::Integer(i) => {
            if let Some(n) = i.as_i64() {
                serde_json::Value::from(n)
            } else {
                serde_json::Value::from(i.as_u64().unwrap_or(0))
            }
        }
        Value::F32(f) => serde_json::json!(*f),
        Value::F64(f) => serde_json::json!(*f),
        Value::String(s) => serde_json::Value::String(s.as_str().unwrap_or_default().to_string()),
        Value::Binary(bytes) => serde_json::Value::Array(
            bytes.iter().map(|b| serde_json::Value::from(*b)).collect(),
        ),
        Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(rmpv_to_json).collect())
        }
        Value::Map(entries) => {
            let mut map = serde_json::Map::new();
            for (k, v) in entries {
                let key = match k.as_str() {
                    Some(s) => s.to_string(),
                    None => k.to_string(),
                };
                map.insert(key, rmpv_to_json(v));
            }
            serde_json::Value::Object(map)
        }
        Value::Ext(_, _) => serde_json::Value::Null,
    }
}
