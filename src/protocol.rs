// MIT License - Copyright (c) 2026 Peter Wright
// LAN protocol wire messages

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::constants::{KEY_EXCHANGE_PROTO, KEY_EXCHANGE_VERSION};
use crate::error::{AirconError, Result};
use crate::properties::WireType;

/// First frame on every connection, sent by the device in plaintext.
///
/// Wire format: `{"key_exchange": {"ver": 1, "proto": 1, "key_id": 8888,
/// "random_1": "...", "time_1": 201111111111111}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyExchangeHello {
    pub key_exchange: KeyExchange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyExchange {
    pub ver: u32,
    pub proto: u32,
    pub key_id: u32,
    pub random_1: String,
    pub time_1: u64,
    /// Present only on secure-setup variants the gateway cannot speak.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sec: Option<serde_json::Value>,
}

impl KeyExchange {
    /// Reject exchange flavours other than plain version 1 / protocol 1.
    pub fn check_supported(&self) -> Result<()> {
        if self.ver != KEY_EXCHANGE_VERSION || self.proto != KEY_EXCHANGE_PROTO {
            return Err(AirconError::invalid_response(format!(
                "unsupported key exchange ver={} proto={}",
                self.ver, self.proto
            )));
        }
        if self.sec.is_some() {
            return Err(AirconError::invalid_response(
                "secure key exchange is not supported",
            ));
        }
        Ok(())
    }
}

/// Gateway's answer to the key exchange, also plaintext.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyExchangeReply {
    pub random_2: String,
    pub time_2: u64,
}

/// Encrypted frame: base64 ciphertext plus base64 HMAC of the plaintext.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SealedFrame {
    pub enc: String,
    pub sign: String,
}

/// Plaintext carried inside a [`SealedFrame`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub seq_no: u64,
    pub data: T,
}

/// Requests sent by the gateway. Exactly one may be outstanding per session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Request {
    /// Poll: `{"method": "get", "properties": ["t_power", ...]}`
    Get { properties: Vec<String> },
    /// Batched writes: `{"method": "set", "properties": [{"name", "base_type", "value"}]}`
    Set { properties: Vec<WireWrite> },
    /// Keep-alive: `{"method": "ping"}`. The device answers with no properties.
    Ping,
}

impl Request {
    pub fn method(&self) -> &'static str {
        match self {
            Request::Get { .. } => "get",
            Request::Set { .. } => "set",
            Request::Ping => "ping",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireWrite {
    pub name: String,
    pub base_type: WireType,
    pub value: serde_json::Value,
}

/// Device reply: the current values of the requested (or written) properties.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub properties: Vec<WireReading>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireReading {
    pub name: String,
    pub value: serde_json::Value,
}

/// Serialize a message into frame bytes (without the delimiter).
pub fn encode_frame<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(message)?)
}

/// Parse frame bytes into a message. Malformed input is a protocol error.
pub fn decode_frame<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| {
        AirconError::invalid_response(format!(
            "{e}: {}",
            String::from_utf8_lossy(&bytes[..bytes.len().min(120)])
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_key_exchange() {
        let raw = br#"{"key_exchange":{"ver":1,"proto":1,"key_id":8888,"random_1":"YYYYYYYYYYYYYYYY","time_1":201111111111111}}"#;
        let hello: KeyExchangeHello = decode_frame(raw).unwrap();
        assert_eq!(hello.key_exchange.key_id, 8888);
        assert_eq!(hello.key_exchange.time_1, 201111111111111);
        assert!(hello.key_exchange.check_supported().is_ok());
    }

    #[test]
    fn test_key_exchange_rejects_secure_variant() {
        let raw = br#"{"key_exchange":{"ver":1,"proto":1,"key_id":1,"random_1":"a","time_1":1,"sec":1}}"#;
        let hello: KeyExchangeHello = decode_frame(raw).unwrap();
        assert!(hello.key_exchange.check_supported().is_err());
    }

    #[test]
    fn test_key_exchange_rejects_other_versions() {
        let kx = KeyExchange {
            ver: 2,
            proto: 1,
            key_id: 1,
            random_1: "a".into(),
            time_1: 1,
            sec: None,
        };
        assert!(matches!(
            kx.check_supported(),
            Err(AirconError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn test_request_wire_format() {
        let set = Request::Set {
            properties: vec![WireWrite {
                name: "t_power".into(),
                base_type: WireType::Boolean,
                value: json!(1),
            }],
        };
        assert_eq!(
            serde_json::to_value(&set).unwrap(),
            json!({"method": "set", "properties": [{"name": "t_power", "base_type": "boolean", "value": 1}]})
        );
        assert_eq!(
            serde_json::to_value(Request::Ping).unwrap(),
            json!({"method": "ping"})
        );
    }

    #[test]
    fn test_response_without_properties() {
        let env: Envelope<Response> = decode_frame(br#"{"seq_no":4,"data":{}}"#).unwrap();
        assert_eq!(env.seq_no, 4);
        assert!(env.data.properties.is_empty());
    }

    #[test]
    fn test_decode_garbage_is_invalid_response() {
        let err = decode_frame::<Envelope<Response>>(b"\x00\x01not json").unwrap_err();
        assert!(matches!(err, AirconError::InvalidResponse { .. }));
    }
}
