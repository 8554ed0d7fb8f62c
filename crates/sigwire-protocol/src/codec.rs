//! Codec trait and implementations for turning messages into datagrams.
//!
//! A "codec" (coder/decoder) converts between [`Message`]s and raw bytes.
//! The transport layer only needs something that implements [`Codec`],
//! so the binary wire form and the JSON trace form are interchangeable.
//!
//! [`OscCodec`] speaks OSC 1.0 through the `rosc` encoder and decoder.
//! This module only converts between `rosc`'s packet types and
//! [`Message`]/[`Value`]; the byte layout is `rosc`'s.

use rosc::{OscMessage, OscPacket, OscTime, OscType};

use crate::{Message, ProtocolError, Value};

/// A codec that can encode messages to bytes and decode bytes back.
///
/// `decode` returns a list because one datagram may be a bundle of
/// several messages.
pub trait Codec: Send + Sync + 'static {
    /// Encodes one message into one datagram.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if the message can't be
    /// represented (a string containing NUL, say).
    fn encode(&self, message: &Message) -> Result<Vec<u8>, ProtocolError>;

    /// Decodes one datagram.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed or
    /// truncated.
    fn decode(&self, data: &[u8]) -> Result<Vec<Message>, ProtocolError>;
}

// ---------------------------------------------------------------------------
// OscCodec
// ---------------------------------------------------------------------------

/// Binary OSC 1.0 encoding.
///
/// Bundles are flattened on decode: their messages are returned in order
/// and dispatched immediately, whatever the timetag says.
///
/// ## Example
///
/// ```rust
/// use sigwire_protocol::{Codec, Message, OscCodec};
///
/// let codec = OscCodec;
/// let msg = Message::new("/signal/hello", ("mixer", "osc.udp://host:9000/"));
///
/// let bytes = codec.encode(&msg).unwrap();
/// assert_eq!(bytes.len() % 4, 0);
///
/// let decoded = codec.decode(&bytes).unwrap();
/// assert_eq!(decoded, vec![msg]);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct OscCodec;

impl Codec for OscCodec {
    fn encode(&self, message: &Message) -> Result<Vec<u8>, ProtocolError> {
        if !message.address.starts_with('/') {
            return Err(ProtocolError::Encode(format!(
                "address {:?} must start with '/'",
                message.address
            )));
        }
        let args = message.args.iter().map(to_osc).collect::<Result<Vec<_>, _>>()?;
        let packet = OscPacket::Message(OscMessage {
            addr: message.address.clone(),
            args,
        });
        rosc::encoder::encode(&packet).map_err(|e| ProtocolError::Encode(format!("{e:?}")))
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<Message>, ProtocolError> {
        let (_, packet) = rosc::decoder::decode_udp(data).map_err(|e| ProtocolError::Decode(format!("{e:?}")))?;
        let mut out = Vec::new();
        flatten(packet, &mut out)?;
        Ok(out)
    }
}

fn flatten(packet: OscPacket, out: &mut Vec<Message>) -> Result<(), ProtocolError> {
    match packet {
        OscPacket::Message(msg) => {
            if !msg.addr.starts_with('/') {
                return Err(ProtocolError::Decode(format!("address {:?} must start with '/'", msg.addr)));
            }
            let args = msg.args.into_iter().map(from_osc).collect::<Result<Vec<_>, _>>()?;
            out.push(Message { address: msg.addr, args });
        }
        OscPacket::Bundle(bundle) => {
            for inner in bundle.content {
                flatten(inner, out)?;
            }
        }
    }
    Ok(())
}

fn to_osc(value: &Value) -> Result<OscType, ProtocolError> {
    Ok(match value {
        Value::Int(v) => OscType::Int(*v),
        Value::Float(v) => OscType::Float(*v),
        Value::Double(v) => OscType::Double(*v),
        Value::Str(s) => {
            // A NUL would end the string early on the wire.
            if s.contains('\0') {
                return Err(ProtocolError::Encode(format!("string {s:?} contains NUL")));
            }
            OscType::String(s.clone())
        }
        Value::Nil => OscType::Nil,
        Value::Long(v) => OscType::Long(*v),
        Value::Bool(v) => OscType::Bool(*v),
        Value::Blob(b) => OscType::Blob(b.clone()),
        Value::Time(t) => OscType::Time(OscTime {
            seconds: (t >> 32) as u32,
            fractional: (t & 0xffff_ffff) as u32,
        }),
        Value::Char(c) => OscType::Char(*c),
        Value::Inf => OscType::Inf,
    })
}

fn from_osc(arg: OscType) -> Result<Value, ProtocolError> {
    Ok(match arg {
        OscType::Int(v) => Value::Int(v),
        OscType::Float(v) => Value::Float(v),
        OscType::Double(v) => Value::Double(v),
        OscType::String(s) => Value::Str(s),
        OscType::Nil => Value::Nil,
        OscType::Long(v) => Value::Long(v),
        OscType::Bool(v) => Value::Bool(v),
        OscType::Blob(b) => Value::Blob(b),
        OscType::Time(t) => Value::Time((u64::from(t.seconds) << 32) | u64::from(t.fractional)),
        OscType::Char(c) => Value::Char(c),
        OscType::Inf => Value::Inf,
        other => return Err(ProtocolError::Decode(format!("unsupported argument {other:?}"))),
    })
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that writes one JSON object per message (via `serde_json`).
///
/// Useful for traces and debugging tools; peers on the wire always speak
/// [`OscCodec`]. Behind the `json` feature flag (enabled by default).
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode(&self, message: &Message) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(message).map_err(ProtocolError::JsonEncode)
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<Message>, ProtocolError> {
        let message = serde_json::from_slice(data).map_err(ProtocolError::JsonDecode)?;
        Ok(vec![message])
    }
}
