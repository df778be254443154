//! Wire encoding for packets.
//!
//! Packets travel either as JSON inside text frames or as bincode inside
//! binary frames. The sender picks one format; the receiver decodes by frame
//! kind, so both peers interoperate as long as each frame is self-consistent.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    #[default]
    Json,
    Bincode,
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireFormat::Json => f.write_str("json"),
            WireFormat::Bincode => f.write_str("bincode"),
        }
    }
}

impl FromStr for WireFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" | "text" => Ok(WireFormat::Json),
            "bincode" | "binary" => Ok(WireFormat::Bincode),
            other => Err(format!("unknown wire format '{}'", other)),
        }
    }
}

/// An encoded packet, ready to be wrapped in a transport frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("json codec error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bincode codec error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("unsupported frame: {0}")]
    UnsupportedFrame(&'static str),
}

pub fn encode<T: Serialize>(value: &T, format: WireFormat) -> Result<Frame, ProtocolError> {
    match format {
        WireFormat::Json => Ok(Frame::Text(serde_json::to_string(value)?)),
        WireFormat::Bincode => Ok(Frame::Binary(bincode::serialize(value)?)),
    }
}

pub fn decode_text<T: DeserializeOwned>(text: &str) -> Result<T, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

pub fn decode_binary<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    Ok(bincode::deserialize(bytes)?)
}

pub fn decode<T: DeserializeOwned>(frame: &Frame) -> Result<T, ProtocolError> {
    match frame {
        Frame::Text(text) => decode_text(text),
        Frame::Binary(bytes) => decode_binary(bytes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClientPacket, Direction, PlayerState, ServerPacket};
    use std::collections::HashMap;

    #[test]
    fn test_json_encoding_produces_text_frame() {
        let frame = encode(&ClientPacket::MoveStop, WireFormat::Json).unwrap();
        assert_eq!(frame, Frame::Text(r#""moveStop""#.to_string()));
    }

    #[test]
    fn test_bincode_encoding_produces_binary_frame() {
        let packet = ClientPacket::MoveStart {
            direction: Direction::Right,
        };
        let frame = encode(&packet, WireFormat::Bincode).unwrap();
        assert!(matches!(frame, Frame::Binary(_)));

        let decoded: ClientPacket = decode(&frame).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_snapshot_survives_both_formats() {
        let mut players = HashMap::new();
        players.insert(
            2,
            PlayerState {
                x: 12.5,
                y: 40.0,
                direction: Direction::Down,
                moving: true,
            },
        );
        let packet = ServerPacket::State { tick: 99, players };

        for format in [WireFormat::Json, WireFormat::Bincode] {
            let frame = encode(&packet, format).unwrap();
            let decoded: ServerPacket = decode(&frame).unwrap();
            assert_eq!(decoded, packet, "format {}", format);
        }
    }

    #[test]
    fn test_malformed_payloads_are_errors() {
        assert!(decode_text::<ClientPacket>("not json").is_err());
        assert!(decode_text::<ClientPacket>(r#"{"chat":42}"#).is_err());
        assert!(decode_text::<ClientPacket>(r#"{"teleport":{"x":1}}"#).is_err());
        assert!(decode_binary::<ClientPacket>(&[]).is_err());
        assert!(decode_binary::<ClientPacket>(&[0xFF, 0xFF, 0xFF, 0xFF]).is_err());
    }

    #[test]
    fn test_truncated_bincode_is_error() {
        let frame = encode(
            &ClientPacket::Chat {
                text: "hello there".to_string(),
                sequence: Some(1),
            },
            WireFormat::Bincode,
        )
        .unwrap();
        let Frame::Binary(bytes) = frame else {
            panic!("expected binary frame");
        };
        let truncated = &bytes[..bytes.len() / 2];
        assert!(decode_binary::<ClientPacket>(truncated).is_err());
    }

    #[test]
    fn test_wire_format_parsing() {
        assert_eq!("json".parse::<WireFormat>(), Ok(WireFormat::Json));
        assert_eq!("BINCODE".parse::<WireFormat>(), Ok(WireFormat::Bincode));
        assert!("xml".parse::<WireFormat>().is_err());
        assert_eq!(WireFormat::default(), WireFormat::Json);
    }
}
