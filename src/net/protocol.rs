//! Network protocols: how frame payloads and transmitted values are encoded.
//!
//! A protocol only has to encode and decode dynamic values; framing and the
//! mapping of frame kinds to payload structs are shared by every protocol.

use bytes::BytesMut;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use super::codec::{
    encode_frame, split_frame, DEFAULT_MAX_FRAME_BYTES, FRAME_ERROR, FRAME_EVENT, FRAME_HELLO,
    FRAME_REQUEST, FRAME_RESPONSE,
};
use super::frame::Frame;
use crate::types::{Error, Result};

/// Scheme of the msgpack protocol.
pub const MSGPACK_SCHEME: &str = "corabus";
/// Scheme of the JSON protocol.
pub const JSON_SCHEME: &str = "corabus+json";

pub trait NetworkProtocol: Send + Sync + fmt::Debug {
    fn scheme(&self) -> &str;

    fn max_frame_bytes(&self) -> u32 {
        DEFAULT_MAX_FRAME_BYTES
    }

    /// Encode a transmitted value.
    fn encode(&self, value: &Value) -> Result<Vec<u8>>;

    /// Decode a transmitted value.
    fn decode(&self, bytes: &[u8]) -> Result<Value>;

    /// Take one frame off the front of `buf`, tolerating partial input.
    ///
    /// `Error::Serialization` means one frame was consumed but could not be
    /// decoded; the stream itself is still in sync. Any other error is fatal
    /// for the connection.
    fn read(&self, buf: &mut BytesMut) -> Result<Option<Frame>> {
        let Some((frame_type, payload)) = split_frame(buf, self.max_frame_bytes())? else {
            return Ok(None);
        };
        let value = self.decode(&payload)?;
        let frame = match frame_type {
            FRAME_REQUEST => Frame::Request(from_value(value)?),
            FRAME_RESPONSE => Frame::Response(from_value(value)?),
            FRAME_EVENT => Frame::Event(from_value(value)?),
            FRAME_HELLO => Frame::Hello(from_value(value)?),
            FRAME_ERROR => Frame::Error(from_value(value)?),
            other => {
                return Err(Error::Serialization(format!(
                    "unexpected frame type: 0x{:02X}",
                    other
                )))
            }
        };
        Ok(Some(frame))
    }

    /// Frame header plus encoded payload.
    fn serialize(&self, frame: &Frame) -> Result<Vec<u8>> {
        let value = match frame {
            Frame::Request(request) => to_value(request)?,
            Frame::Response(response) => to_value(response)?,
            Frame::Event(event) => to_value(event)?,
            Frame::Hello(hello) => to_value(hello)?,
            Frame::Error(error) => to_value(error)?,
        };
        encode_frame(frame.frame_type(), &self.encode(&value)?)
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| Error::Serialization(e.to_string()))
}

fn from_value<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::Serialization(e.to_string()))
}

/// Encode any serializable value with `protocol`.
pub fn encode_value<T: Serialize>(protocol: &dyn NetworkProtocol, value: &T) -> Result<Vec<u8>> {
    protocol.encode(&to_value(value)?)
}

/// Decode bytes produced by [`encode_value`] back into `T`.
pub fn decode_value<T: DeserializeOwned>(protocol: &dyn NetworkProtocol, bytes: &[u8]) -> Result<T> {
    from_value(protocol.decode(bytes)?)
}

// =============================================================================
// Implementations
// =============================================================================

/// Msgpack payloads via `rmp-serde`, maps with named fields.
#[derive(Debug, Clone)]
pub struct MsgpackProtocol {
    max_frame_bytes: u32,
}

impl MsgpackProtocol {
    pub fn new() -> Self {
        Self::with_max_frame_bytes(DEFAULT_MAX_FRAME_BYTES)
    }

    pub fn with_max_frame_bytes(max_frame_bytes: u32) -> Self {
        Self { max_frame_bytes }
    }
}

impl Default for MsgpackProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkProtocol for MsgpackProtocol {
    fn scheme(&self) -> &str {
        MSGPACK_SCHEME
    }

    fn max_frame_bytes(&self) -> u32 {
        self.max_frame_bytes
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(value).map_err(|e| {
            tracing::error!("msgpack encoding failed: {}", e);
            Error::from(e)
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// JSON payloads via `serde_json`; handy for debugging with plain tools.
#[derive(Debug, Clone)]
pub struct JsonProtocol {
    max_frame_bytes: u32,
}

impl JsonProtocol {
    pub fn new() -> Self {
        Self::with_max_frame_bytes(DEFAULT_MAX_FRAME_BYTES)
    }

    pub fn with_max_frame_bytes(max_frame_bytes: u32) -> Self {
        Self { max_frame_bytes }
    }
}

impl Default for JsonProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkProtocol for JsonProtocol {
    fn scheme(&self) -> &str {
        JSON_SCHEME
    }

    fn max_frame_bytes(&self) -> u32 {
        self.max_frame_bytes
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Scheme → protocol.
#[derive(Debug, Clone, Default)]
pub struct ProtocolRegistry {
    protocols: IndexMap<String, Arc<dyn NetworkProtocol>>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the msgpack and JSON protocols.
    pub fn with_defaults(max_frame_bytes: u32) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(MsgpackProtocol::with_max_frame_bytes(max_frame_bytes)));
        registry.register(Arc::new(JsonProtocol::with_max_frame_bytes(max_frame_bytes)));
        registry
    }

    /// Register `protocol` under its scheme, replacing any previous one.
    pub fn register(&mut self, protocol: Arc<dyn NetworkProtocol>) {
        self.protocols.insert(protocol.scheme().to_string(), protocol);
    }

    pub fn get(&self, scheme: &str) -> Result<Arc<dyn NetworkProtocol>> {
        self.protocols
            .get(scheme)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("no protocol for scheme {}", scheme)))
    }

    pub fn schemes(&self) -> Vec<&str> {
        self.protocols.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::BusPath;
    use crate::message::{Outcome, Response};
    use crate::net::frame::{Hello, WireRequest};
    use crate::types::{InformationId, SessionId};
    use chrono::NaiveDate;
    use proptest::prelude::*;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn protocols() -> Vec<Arc<dyn NetworkProtocol>> {
        vec![Arc::new(MsgpackProtocol::new()), Arc::new(JsonProtocol::new())]
    }

    #[test]
    fn test_request_frame_survives_both_protocols() {
        for protocol in protocols() {
            let frame = Frame::Request(WireRequest {
                id: InformationId::new(),
                path: "corabus://m/app/echo".parse::<BusPath>().unwrap(),
                name: "echo".to_string(),
                properties: BTreeMap::from([("session".to_string(), "s1".to_string())]),
                body: Some(protocol.encode(&serde_json::json!({"n": 1})).unwrap()),
            });
            let bytes = protocol.serialize(&frame).unwrap();
            let mut buf = BytesMut::from(&bytes[..]);
            let decoded = protocol.read(&mut buf).unwrap().unwrap();
            assert_eq!(decoded, frame, "scheme {}", protocol.scheme());
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn test_response_frame_keeps_code_and_cause() {
        let protocol = MsgpackProtocol::new();
        let response = Response::from_outcome(
            SessionId::new(),
            InformationId::new(),
            &Outcome::Failed(Error::failed("boom")),
            None,
        );
        let bytes = protocol.serialize(&Frame::Response(response.clone())).unwrap();
        let mut buf = BytesMut::from(&bytes[..]);
        assert_eq!(
            protocol.read(&mut buf).unwrap(),
            Some(Frame::Response(response))
        );
    }

    #[test]
    fn test_unknown_frame_type_consumed() {
        let protocol = JsonProtocol::new();
        let mut buf = BytesMut::from(&encode_frame(0x42, b"null").unwrap()[..]);
        let hello = protocol
            .serialize(&Frame::Hello(Hello {
                scheme: JSON_SCHEME.to_string(),
                peer: "corabus://a".to_string(),
            }))
            .unwrap();
        buf.extend_from_slice(&hello);

        assert!(matches!(protocol.read(&mut buf), Err(Error::Serialization(_))));
        assert!(matches!(protocol.read(&mut buf), Ok(Some(Frame::Hello(_)))));
    }

    #[test]
    fn test_garbage_payload_is_serialization_error() {
        let protocol = MsgpackProtocol::new();
        let mut buf = BytesMut::from(&encode_frame(FRAME_REQUEST, &[0xC1]).unwrap()[..]);
        assert!(matches!(protocol.read(&mut buf), Err(Error::Serialization(_))));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_registry_lookup() {
        let registry = ProtocolRegistry::with_defaults(1024);
        assert_eq!(registry.schemes(), vec![MSGPACK_SCHEME, JSON_SCHEME]);
        assert_eq!(registry.get(JSON_SCHEME).unwrap().max_frame_bytes(), 1024);
        assert!(matches!(registry.get("http"), Err(Error::NotFound(_))));
    }

    proptest! {
        #[test]
        fn prop_typed_values_round_trip(
            bits in any::<u128>(),
            n in any::<i64>(),
            days in 0i32..100_000,
        ) {
            let uuid = Uuid::from_u128(bits);
            let date = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap() + chrono::Duration::days(days as i64);
            for protocol in protocols() {
                let protocol = protocol.as_ref();
                let decoded: Uuid = decode_value(protocol, &encode_value(protocol, &uuid).unwrap()).unwrap();
                prop_assert_eq!(decoded, uuid);
                let decoded: i64 = decode_value(protocol, &encode_value(protocol, &n).unwrap()).unwrap();
                prop_assert_eq!(decoded, n);
                let decoded: NaiveDate = decode_value(protocol, &encode_value(protocol, &date).unwrap()).unwrap();
                prop_assert_eq!(decoded, date);
            }
        }
    }
}
