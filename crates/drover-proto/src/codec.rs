//! Frame encoding and decoding utilities.

use rkyv::api::high::{HighDeserializer, HighSerializer, HighValidator};
use rkyv::bytecheck::CheckBytes;
use rkyv::rancor::Error as RkyvError;
use rkyv::ser::allocator::ArenaHandle;
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize};

use crate::error::ProtocolError;

/// Two-byte preamble opening every frame.
///
/// A reader that lands mid-stream (reconnect, truncated write) fails the
/// magic check on the next read instead of treating body bytes as a
/// length field.
pub const FRAME_MAGIC: [u8; 2] = *b"DR";

/// Frame header size in bytes.
pub const FRAME_HEADER_SIZE: usize = 8;

/// Maximum message size (4 MB). Offer batches dominate; a full cluster
/// sweep stays well under this.
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Current protocol version.
pub const CURRENT_VERSION: u8 = crate::version::CURRENT;

/// What kind of payload a frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Master → host manager event (`MasterEvent`).
    Event = 1,
    /// Host manager → master call (`MasterCall`).
    Call = 2,
    /// Host manager → subscriber watch event (`HostEvent`).
    Watch = 3,
}

impl MessageType {
    /// Maps a wire byte back to a message kind.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Event),
            2 => Some(Self::Call),
            3 => Some(Self::Watch),
            _ => None,
        }
    }

    /// The wire byte for this kind.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

/// The fixed eight-byte preamble of a frame.
///
/// Layout: magic (2 bytes), version (1), kind (1), then the body length
/// as a big-endian u32. The body is the rkyv-serialised message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Protocol version the sender speaks.
    pub version: u8,
    /// Payload kind carried by the frame.
    pub kind: MessageType,
    /// Body length in bytes, excluding the header itself.
    pub body_len: u32,
}

impl FrameHeader {
    /// Header for a body of the given kind and length, stamped with the
    /// current version.
    #[must_use]
    pub const fn for_body(kind: MessageType, body_len: u32) -> Self {
        Self {
            version: CURRENT_VERSION,
            kind,
            body_len,
        }
    }

    /// Serialises the header.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; FRAME_HEADER_SIZE] {
        let len = self.body_len.to_be_bytes();
        [
            FRAME_MAGIC[0],
            FRAME_MAGIC[1],
            self.version,
            self.kind.as_u8(),
            len[0],
            len[1],
            len[2],
            len[3],
        ]
    }

    /// Parses a header, rejecting frames that do not open with the
    /// magic preamble or carry an unknown kind byte.
    pub fn parse(buf: &[u8; FRAME_HEADER_SIZE]) -> Result<Self, ProtocolError> {
        if buf[..2] != FRAME_MAGIC {
            return Err(ProtocolError::BadMagic {
                found: [buf[0], buf[1]],
            });
        }
        let kind =
            MessageType::from_u8(buf[3]).ok_or(ProtocolError::UnknownMessageType(buf[3]))?;
        Ok(Self {
            version: buf[2],
            kind,
            body_len: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }

    /// True when a receiver on the current version can handle this
    /// sender.
    #[must_use]
    pub fn version_supported(&self) -> bool {
        (crate::version::MIN_SUPPORTED..=crate::version::CURRENT).contains(&self.version)
    }

    /// Rejects bodies past the size ceiling before any allocation.
    pub fn check_body_len(&self) -> Result<(), ProtocolError> {
        let len = self.body_len as usize;
        if len > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: len,
                max: MAX_MESSAGE_SIZE,
            });
        }
        Ok(())
    }
}

/// Codec for encoding and decoding protocol messages.
#[derive(Debug, Default)]
pub struct Codec {
    /// Reusable buffer for encoding.
    buffer: Vec<u8>,
}

impl Codec {
    /// Creates a new codec.
    #[must_use]
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Encodes a message to bytes (frame header + body).
    ///
    /// Returns the complete frame including the 8-byte header.
    pub fn encode<T>(&mut self, message: &T, kind: MessageType) -> Result<&[u8], ProtocolError>
    where
        T: for<'a> Serialize<HighSerializer<AlignedVec, ArenaHandle<'a>, RkyvError>>,
    {
        let body = rkyv::to_bytes::<RkyvError>(message)
            .map_err(|e| ProtocolError::Serialisation(e.to_string()))?;

        if body.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: body.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        let header = FrameHeader::for_body(kind, body.len() as u32);
        self.buffer.clear();
        self.buffer.extend_from_slice(&header.to_bytes());
        self.buffer.extend_from_slice(&body);

        Ok(&self.buffer)
    }

    /// Decodes a message body.
    ///
    /// The bytes should NOT include the frame header - just the body.
    pub fn decode<T>(bytes: &[u8]) -> Result<T, ProtocolError>
    where
        T: Archive,
        T::Archived: for<'a> CheckBytes<HighValidator<'a, RkyvError>>
            + Deserialize<T, HighDeserializer<RkyvError>>,
    {
        rkyv::from_bytes::<T, RkyvError>(bytes)
            .map_err(|e| ProtocolError::Deserialisation(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::master::{MasterCall, MasterEvent};
    use crate::types::{FrameworkId, OfferId, StreamId};

    #[test]
    fn header_roundtrip() {
        let header = FrameHeader::for_body(MessageType::Call, 1024);
        let parsed = FrameHeader::parse(&header.to_bytes()).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn header_layout_on_the_wire() {
        let bytes = FrameHeader::for_body(MessageType::Watch, 0x0102_0304).to_bytes();
        assert_eq!(&bytes[..2], b"DR");
        assert_eq!(bytes[2], CURRENT_VERSION);
        assert_eq!(bytes[3], MessageType::Watch.as_u8());
        assert_eq!(bytes[4..8], [0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn parse_rejects_bad_magic() {
        let mut bytes = FrameHeader::for_body(MessageType::Event, 8).to_bytes();
        bytes[0] = b'X';
        assert!(matches!(
            FrameHeader::parse(&bytes),
            Err(ProtocolError::BadMagic { .. })
        ));
    }

    #[test]
    fn parse_rejects_unknown_kind() {
        let mut bytes = FrameHeader::for_body(MessageType::Event, 8).to_bytes();
        bytes[3] = 0xAB;
        assert!(matches!(
            FrameHeader::parse(&bytes),
            Err(ProtocolError::UnknownMessageType(0xAB))
        ));
    }

    #[test]
    fn version_window() {
        let header = FrameHeader::for_body(MessageType::Event, 100);
        assert!(header.version_supported());

        let from_the_future = FrameHeader {
            version: CURRENT_VERSION + 1,
            ..header
        };
        assert!(!from_the_future.version_supported());

        let prehistoric = FrameHeader {
            version: 0,
            ..header
        };
        assert!(!prehistoric.version_supported());
    }

    #[test]
    fn body_length_ceiling() {
        assert!(FrameHeader::for_body(MessageType::Watch, 1000)
            .check_body_len()
            .is_ok());
        assert!(FrameHeader::for_body(MessageType::Watch, (MAX_MESSAGE_SIZE + 1) as u32)
            .check_body_len()
            .is_err());
    }

    #[test]
    fn message_kind_bytes_are_stable() {
        for kind in [MessageType::Event, MessageType::Call, MessageType::Watch] {
            assert_eq!(MessageType::from_u8(kind.as_u8()), Some(kind));
        }
        assert_eq!(MessageType::from_u8(0), None);
        assert_eq!(MessageType::from_u8(0xFF), None);
    }

    #[test]
    fn codec_encode_decode_call() {
        let mut codec = Codec::new();
        let call = MasterCall::Decline {
            framework_id: FrameworkId::from("fw-1"),
            stream_id: StreamId::new(),
            offer_ids: vec![OfferId::from("o1"), OfferId::from("o2")],
        };

        let bytes = codec.encode(&call, MessageType::Call).unwrap();
        assert!(bytes.len() > FRAME_HEADER_SIZE);

        let header_bytes: [u8; FRAME_HEADER_SIZE] = bytes[..FRAME_HEADER_SIZE].try_into().unwrap();
        let header = FrameHeader::parse(&header_bytes).unwrap();
        assert_eq!(header.kind, MessageType::Call);
        assert_eq!(header.body_len as usize, bytes.len() - FRAME_HEADER_SIZE);

        let body = &bytes[FRAME_HEADER_SIZE..];
        let decoded: MasterCall = Codec::decode(body).unwrap();
        assert_eq!(decoded, call);
    }

    #[test]
    fn codec_encode_decode_event() {
        let mut codec = Codec::new();
        let event = MasterEvent::Rescind(OfferId::from("o-gone"));

        let bytes = codec.encode(&event, MessageType::Event).unwrap();
        let body = &bytes[FRAME_HEADER_SIZE..];
        let decoded: MasterEvent = Codec::decode(body).unwrap();
        assert_eq!(decoded, event);
    }
}
