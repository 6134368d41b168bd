use crate::{ProtocolError, Result, MAX_ENVELOPE_SIZE};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// An ordered list of frames exchanged as one unit. Empty frames are legal
/// and are used as the delimiter between routing and payload frames.
pub type Envelope = Vec<Bytes>;

/// Codec for multi-frame envelopes with length-prefixed framing
///
/// Envelope format: [4-byte length (big-endian)] [2-byte frame count] then,
/// per frame, [4-byte frame length] [frame bytes]. The leading length counts
/// everything after itself.
pub struct EnvelopeCodec;

const FRAME_COUNT_LEN: usize = 2;
const FRAME_LEN: usize = 4;

impl Decoder for EnvelopeCodec {
    type Item = Envelope;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < 4 {
            return Ok(None);
        }

        let mut length_bytes = [0u8; 4];
        length_bytes.copy_from_slice(&src[0..4]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        if length > MAX_ENVELOPE_SIZE {
            return Err(ProtocolError::EnvelopeTooLarge(length));
        }
        if length < FRAME_COUNT_LEN {
            return Err(ProtocolError::MalformedEnvelope(format!(
                "envelope length {} is shorter than its header",
                length
            )));
        }

        // Wait for the complete envelope
        if src.len() < 4 + length {
            src.reserve(4 + length - src.len());
            return Ok(None);
        }

        src.advance(4);
        let mut body = src.split_to(length).freeze();

        let count = body.get_u16() as usize;
        let mut frames = Vec::with_capacity(count);
        for index in 0..count {
            if body.remaining() < FRAME_LEN {
                return Err(ProtocolError::MalformedEnvelope(format!(
                    "frame {} header truncated",
                    index
                )));
            }
            let frame_len = body.get_u32() as usize;
            if body.remaining() < frame_len {
                return Err(ProtocolError::MalformedEnvelope(format!(
                    "frame {} declares {} bytes, {} left",
                    index,
                    frame_len,
                    body.remaining()
                )));
            }
            frames.push(body.split_to(frame_len));
        }

        if body.has_remaining() {
            return Err(ProtocolError::MalformedEnvelope(format!(
                "{} trailing bytes after {} frames",
                body.remaining(),
                count
            )));
        }

        Ok(Some(frames))
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<()> {
        if item.len() > u16::MAX as usize {
            return Err(ProtocolError::TooManyFrames(item.len()));
        }

        let total_length = FRAME_COUNT_LEN
            + item
                .iter()
                .map(|frame| FRAME_LEN + frame.len())
                .sum::<usize>();
        if total_length > MAX_ENVELOPE_SIZE {
            return Err(ProtocolError::EnvelopeTooLarge(total_length));
        }

        dst.reserve(4 + total_length);
        dst.put_u32(total_length as u32);
        dst.put_u16(item.len() as u16);
        for frame in &item {
            dst.put_u32(frame.len() as u32);
            dst.put_slice(frame);
        }

        Ok(())
    }
}
