//! Framing: 8-byte header (metadata length, payload length; both u32 BE) + JSON metadata + raw payload.

use crate::protocol::Message;

pub const HEADER_SIZE: usize = 8;
pub const MAX_METADATA_LEN: u32 = 1024 * 1024; // 1 MiB
pub const MAX_PAYLOAD_LEN: u32 = 256 * 1024 * 1024; // 256 MiB

/// One decoded frame. An absent payload decodes as an empty vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub metadata: Message,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(metadata: Message) -> Self {
        Self {
            metadata,
            payload: Vec::new(),
        }
    }

    pub fn with_payload(metadata: Message, payload: Vec<u8>) -> Self {
        Self { metadata, payload }
    }

    pub fn encode(&self) -> Result<Vec<u8>, FrameEncodeError> {
        let payload = if self.payload.is_empty() {
            None
        } else {
            Some(self.payload.as_slice())
        };
        encode_frame(&self.metadata, payload)
    }
}

/// Lengths announced by a frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub metadata_len: u32,
    pub payload_len: u32,
}

impl FrameHeader {
    pub fn to_bytes(self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..4].copy_from_slice(&self.metadata_len.to_be_bytes());
        out[4..].copy_from_slice(&self.payload_len.to_be_bytes());
        out
    }

    /// Parse and bounds-check a header.
    pub fn parse(bytes: &[u8; HEADER_SIZE]) -> Result<Self, FrameDecodeError> {
        let metadata_len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let payload_len = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if metadata_len > MAX_METADATA_LEN || payload_len > MAX_PAYLOAD_LEN {
            return Err(FrameDecodeError::TooLarge);
        }
        Ok(Self {
            metadata_len,
            payload_len,
        })
    }

    pub fn body_len(&self) -> usize {
        self.metadata_len as usize + self.payload_len as usize
    }
}

/// Encode metadata and optional payload into a single frame.
pub fn encode_frame(metadata: &Message, payload: Option<&[u8]>) -> Result<Vec<u8>, FrameEncodeError> {
    let json = serde_json::to_vec(metadata).map_err(FrameEncodeError::Encode)?;
    let payload = payload.unwrap_or(&[]);
    let metadata_len = u32::try_from(json.len()).map_err(|_| FrameEncodeError::TooLarge)?;
    let payload_len = u32::try_from(payload.len()).map_err(|_| FrameEncodeError::TooLarge)?;
    if metadata_len > MAX_METADATA_LEN || payload_len > MAX_PAYLOAD_LEN {
        return Err(FrameEncodeError::TooLarge);
    }
    let header = FrameHeader {
        metadata_len,
        payload_len,
    };
    let mut out = Vec::with_capacity(HEADER_SIZE + json.len() + payload.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(&json);
    out.extend_from_slice(payload);
    Ok(out)
}

/// Error encoding a frame (serde_json or size limit).
#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("frame too large")]
    TooLarge,
}

/// Parse metadata bytes into a [`Message`].
pub fn decode_metadata(bytes: &[u8]) -> Result<Message, FrameDecodeError> {
    serde_json::from_slice(bytes).map_err(FrameDecodeError::Metadata)
}

/// Decode one frame from the front of `bytes`. Returns the frame and the number of bytes consumed.
/// Call with partial buffer; returns `NeedMore` until the whole frame is present.
pub fn decode_frame(bytes: &[u8]) -> Result<(Frame, usize), FrameDecodeError> {
    if bytes.len() < HEADER_SIZE {
        return Err(FrameDecodeError::NeedMore);
    }
    let mut raw = [0u8; HEADER_SIZE];
    raw.copy_from_slice(&bytes[..HEADER_SIZE]);
    let header = FrameHeader::parse(&raw)?;
    let total = HEADER_SIZE + header.body_len();
    if bytes.len() < total {
        return Err(FrameDecodeError::NeedMore);
    }
    let meta_end = HEADER_SIZE + header.metadata_len as usize;
    let metadata = decode_metadata(&bytes[HEADER_SIZE..meta_end])?;
    let payload = bytes[meta_end..total].to_vec();
    Ok((Frame { metadata, payload }, total))
}

/// Error decoding a frame (need more bytes, too large, or unparseable metadata).
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("frame too large")]
    TooLarge,
    #[error("metadata decode error: {0}")]
    Metadata(#[source] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DataType, Operation, StatusCode};

    fn sample_upload() -> Frame {
        Frame::with_payload(Message::upload("tok", "photo.jpg", 5, 0), b"hello".to_vec())
    }

    #[test]
    fn roundtrip_with_payload() {
        let f = sample_upload();
        let bytes = f.encode().unwrap();
        let (decoded, n) = decode_frame(&bytes).unwrap();
        assert_eq!(n, bytes.len());
        assert_eq!(decoded, f);
    }

    #[test]
    fn roundtrip_without_payload() {
        let mut m = Message::response(DataType::Auth, Operation::Login, StatusCode::OK);
        m.token = Some("opaque".into());
        let bytes = encode_frame(&m, None).unwrap();
        assert_eq!(&bytes[4..8], &[0, 0, 0, 0]);
        let (decoded, _) = decode_frame(&bytes).unwrap();
        assert_eq!(decoded.metadata, m);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn header_is_big_endian_byte_lengths() {
        // Non-ASCII key: the metadata length counts bytes, not characters.
        let m = Message::save("t", "résumé.pdf", 1);
        let json = serde_json::to_vec(&m).unwrap();
        let bytes = encode_frame(&m, Some(&[1, 2, 3])).unwrap();
        assert_eq!(&bytes[..4], &(json.len() as u32).to_be_bytes());
        assert_eq!(&bytes[4..8], &3u32.to_be_bytes());
        assert_eq!(&bytes[8..8 + json.len()], json.as_slice());
        assert_eq!(&bytes[8 + json.len()..], &[1, 2, 3]);
    }

    #[test]
    fn partial_read_need_more() {
        let bytes = sample_upload().encode().unwrap();
        for cut in [0, 3, HEADER_SIZE, HEADER_SIZE + 4, bytes.len() - 1] {
            assert!(matches!(
                decode_frame(&bytes[..cut]),
                Err(FrameDecodeError::NeedMore)
            ));
        }
    }

    #[test]
    fn multiple_frames() {
        let a = sample_upload();
        let b = Frame::new(Message::login("u", "p"));
        let mut buf = a.encode().unwrap();
        let first = buf.len();
        buf.extend_from_slice(&b.encode().unwrap());
        let (m1, n1) = decode_frame(&buf).unwrap();
        assert_eq!(n1, first);
        let (m2, n2) = decode_frame(&buf[n1..]).unwrap();
        assert_eq!(n1 + n2, buf.len());
        assert_eq!(m1, a);
        assert_eq!(m2, b);
    }

    #[test]
    fn garbage_metadata_is_decode_error() {
        let mut bytes = FrameHeader {
            metadata_len: 5,
            payload_len: 0,
        }
        .to_bytes()
        .to_vec();
        bytes.extend_from_slice(b"{oops");
        assert!(matches!(
            decode_frame(&bytes),
            Err(FrameDecodeError::Metadata(_))
        ));
    }

    #[test]
    fn oversized_header_rejected() {
        let raw = FrameHeader {
            metadata_len: MAX_METADATA_LEN + 1,
            payload_len: 0,
        }
        .to_bytes();
        assert!(matches!(
            FrameHeader::parse(&raw),
            Err(FrameDecodeError::TooLarge)
        ));
    }
}
