//! Frame layouts of the dispatch exchange.
//!
//! A worker asks for work with `[""][ack-id]` and is answered with
//! `[""][json message]`. The router adds and strips the identity frame, so
//! both sides see the same two-frame shape.

use crate::codec::Envelope;
use crate::{ProtocolError, Result};
use broke_core::{Message, MessageId};
use bytes::Bytes;

/// Frames a worker sends to acknowledge `ack` and ask for the next message
pub fn request_frames(ack: MessageId) -> Envelope {
    vec![Bytes::new(), Bytes::from(ack.to_string())]
}

/// Acknowledged id carried by a worker request
pub fn parse_request(frames: &[Bytes]) -> Result<MessageId> {
    let body = split_delimited(frames)?;
    let text = std::str::from_utf8(body)
        .map_err(|_| ProtocolError::MalformedEnvelope("ack id is not UTF-8".to_string()))?;
    Ok(text.parse::<MessageId>()?)
}

/// Frames the broker sends to hand `message` to a worker
pub fn reply_frames(message: &Message) -> Result<Envelope> {
    Ok(vec![Bytes::new(), Bytes::from(message.to_json()?)])
}

/// Message carried by a broker reply
pub fn parse_reply(frames: &[Bytes]) -> Result<Message> {
    let body = split_delimited(frames)?;
    let text = std::str::from_utf8(body)
        .map_err(|_| ProtocolError::MalformedEnvelope("message is not UTF-8".to_string()))?;
    Ok(Message::from_json(text)?)
}

fn split_delimited(frames: &[Bytes]) -> Result<&Bytes> {
    let [delimiter, body] = frames else {
        return Err(ProtocolError::MalformedEnvelope(format!(
            "expected 2 frames, got {}",
            frames.len()
        )));
    };
    if !delimiter.is_empty() {
        return Err(ProtocolError::MalformedEnvelope(
            "missing empty delimiter frame".to_string(),
        ));
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_layout() {
        let frames = request_frames(MessageId::new(42));
        assert!(frames[0].is_empty());
        assert_eq!(&frames[1][..], b"42");
        assert_eq!(parse_request(&frames).unwrap(), MessageId::new(42));
    }

    #[test]
    fn test_first_contact_request() {
        let frames = request_frames(MessageId::INVALID);
        assert_eq!(&frames[1][..], b"0");
        assert_eq!(parse_request(&frames).unwrap(), MessageId::INVALID);

        let empty_ack = vec![Bytes::new(), Bytes::new()];
        assert_eq!(parse_request(&empty_ack).unwrap(), MessageId::INVALID);
    }

    #[test]
    fn test_reply_layout() {
        let frames = reply_frames(&Message::new(1, "Yo !")).unwrap();
        assert!(frames[0].is_empty());
        assert_eq!(&frames[1][..], br#"{"ID":1,"msg":"Yo !"}"#);

        let message = parse_reply(&frames).unwrap();
        assert_eq!(message, Message::new(1, "Yo !"));
    }

    #[test]
    fn test_malformed_request() {
        let no_delimiter = vec![Bytes::from_static(b"x"), Bytes::from_static(b"1")];
        assert!(matches!(
            parse_request(&no_delimiter),
            Err(ProtocolError::MalformedEnvelope(_))
        ));

        let one_frame = vec![Bytes::from_static(b"1")];
        assert!(matches!(
            parse_request(&one_frame),
            Err(ProtocolError::MalformedEnvelope(_))
        ));

        let not_a_number = vec![Bytes::new(), Bytes::from_static(b"abc")];
        assert!(matches!(parse_request(&not_a_number), Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_malformed_reply() {
        let garbage = vec![Bytes::new(), Bytes::from_static(b"{not json")];
        assert!(matches!(parse_reply(&garbage), Err(ProtocolError::Decode(_))));
    }
}
