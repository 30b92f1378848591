//! Payload framing for the polling transport.
//!
//! A payload carries several encoded Engine.IO packets in one HTTP body,
//! separated by the record separator byte `0x1E`. Packets that are not
//! plain text are either passed through (binary-capable clients) or
//! base64-encoded behind a `b` prefix. JSONP clients receive every packet,
//! binary ones in their `b` form, wrapped in `___eio[INDEX]('...');` calls.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::ProtocolError;

/// Separator between packets in a payload.
pub const SEPARATOR: u8 = 0x1E;

/// Prefix marking a base64-encoded binary packet.
pub const BINARY_PREFIX: u8 = b'b';

/// Returns `true` if the packet cannot travel as plain text.
///
/// Invalid UTF-8 and ASCII control characters other than tab, line feed,
/// and carriage return mark a packet as binary.
#[must_use]
pub fn is_binary(packet: &[u8]) -> bool {
    if std::str::from_utf8(packet).is_err() {
        return true;
    }
    packet
        .iter()
        .any(|&b| (b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r')) || b == 0x7F)
}

/// Escape text for a single-quoted JavaScript string literal.
fn escape_js(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            _ => out.push(c),
        }
    }
    out
}

/// Framing options negotiated per request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PayloadProcessor {
    supports_binary: bool,
    jsonp_index: Option<u32>,
}

impl PayloadProcessor {
    /// Plain text framing: binary packets are base64-encoded.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Framing for clients that accept `application/octet-stream`.
    #[must_use]
    pub fn binary() -> Self {
        Self {
            supports_binary: true,
            jsonp_index: None,
        }
    }

    /// JSONP framing with the callback index sent by the client as `j`.
    #[must_use]
    pub fn jsonp(index: u32) -> Self {
        Self {
            supports_binary: false,
            jsonp_index: Some(index),
        }
    }

    /// Whether binary packets are passed through unmodified.
    #[must_use]
    pub fn supports_binary(&self) -> bool {
        self.supports_binary
    }

    /// JSONP callback index, if JSONP framing is active.
    #[must_use]
    pub fn jsonp_index(&self) -> Option<u32> {
        self.jsonp_index
    }

    /// Size in bytes of `packets` once joined by separators, before any
    /// base64 or JSONP expansion.
    #[must_use]
    pub fn framed_len(packets: &[Bytes]) -> usize {
        let body: usize = packets.iter().map(Bytes::len).sum();
        body + packets.len().saturating_sub(1)
    }

    /// Combine encoded Engine.IO packets into one payload.
    #[must_use]
    pub fn encode_payload(&self, packets: &[Bytes]) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::framed_len(packets));

        for (i, packet) in packets.iter().enumerate() {
            if i > 0 {
                buf.put_u8(SEPARATOR);
            }

            if let Some(index) = self.jsonp_index {
                let text = if is_binary(packet) {
                    format!("{}{}", char::from(BINARY_PREFIX), STANDARD.encode(packet))
                } else {
                    // Non-binary packets are valid UTF-8 by construction.
                    String::from_utf8_lossy(packet).into_owned()
                };
                buf.extend_from_slice(
                    format!("___eio[{}]('{}');", index, escape_js(&text)).as_bytes(),
                );
            } else if !is_binary(packet) || self.supports_binary {
                buf.extend_from_slice(packet);
            } else {
                buf.put_u8(BINARY_PREFIX);
                buf.extend_from_slice(STANDARD.encode(packet).as_bytes());
            }
        }

        buf.freeze()
    }

    /// Split a payload back into encoded Engine.IO packets.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidPayload`] if a `b`-prefixed chunk is
    /// not valid base64.
    pub fn decode_payload(&self, payload: &[u8]) -> Result<Vec<Bytes>, ProtocolError> {
        if payload.is_empty() {
            return Ok(Vec::new());
        }

        payload
            .split(|&b| b == SEPARATOR)
            .map(|chunk| match chunk.split_first() {
                Some((&BINARY_PREFIX, encoded)) => STANDARD
                    .decode(encoded)
                    .map(Bytes::from)
                    .map_err(|e| ProtocolError::InvalidPayload(format!("bad base64: {e}"))),
                _ => Ok(Bytes::copy_from_slice(chunk)),
            })
            .collect()
    }

    /// Extract the payload from a JSONP POST body (`d=<url-encoded payload>`).
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidPayload`] if the body has no `d`
    /// parameter.
    pub fn decode_jsonp_body(&self, body: &[u8]) -> Result<Bytes, ProtocolError> {
        url::form_urlencoded::parse(body)
            .find(|(key, _)| key == "d")
            .map(|(_, value)| Bytes::from(value.into_owned()))
            .ok_or_else(|| ProtocolError::InvalidPayload("missing JSONP 'd' parameter".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packets(items: &[&[u8]]) -> Vec<Bytes> {
        items.iter().map(|p| Bytes::copy_from_slice(p)).collect()
    }

    #[test]
    fn test_payload_roundtrip_text() {
        let processor = PayloadProcessor::new();
        let input = packets(&[b"4hello", b"2", b"4[\"chat\",\"x\"]"]);

        let payload = processor.encode_payload(&input);
        assert_eq!(&payload[..], b"4hello\x1e2\x1e4[\"chat\",\"x\"]");
        assert_eq!(processor.decode_payload(&payload).unwrap(), input);
    }

    #[test]
    fn test_payload_roundtrip_binary_base64() {
        let processor = PayloadProcessor::new();
        let input = packets(&[b"4text", &[0x04, 0x00, 0xFF, 0x1E], b"6"]);

        let payload = processor.encode_payload(&input);
        assert!(payload.windows(2).any(|w| w == b"\x1eb"));
        assert_eq!(processor.decode_payload(&payload).unwrap(), input);
    }

    #[test]
    fn test_binary_passthrough() {
        let processor = PayloadProcessor::binary();
        let input = packets(&[&[0x04, 0x01, 0x02]]);

        let payload = processor.encode_payload(&input);
        assert_eq!(&payload[..], &[0x04u8, 0x01, 0x02]);
    }

    #[test]
    fn test_invalid_base64() {
        let processor = PayloadProcessor::new();
        assert!(matches!(
            processor.decode_payload(b"4ok\x1eb!!!not-base64"),
            Err(ProtocolError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_empty_payload() {
        let processor = PayloadProcessor::new();
        assert!(processor.decode_payload(b"").unwrap().is_empty());
        assert!(processor.encode_payload(&[]).is_empty());
    }

    #[test]
    fn test_jsonp_wrapping() {
        let processor = PayloadProcessor::jsonp(3);
        let payload = processor.encode_payload(&packets(&[b"4it's"]));
        assert_eq!(&payload[..], b"___eio[3]('4it\\'s');");
    }

    #[test]
    fn test_jsonp_wraps_binary_packets() {
        let processor = PayloadProcessor::jsonp(1);
        let payload = processor.encode_payload(&packets(&[b"4a", &[0x04, 0x01]]));
        assert_eq!(&payload[..], b"___eio[1]('4a');\x1e___eio[1]('bBAE=');");
    }

    #[test]
    fn test_jsonp_body() {
        let processor = PayloadProcessor::jsonp(0);
        let body = processor
            .decode_jsonp_body(b"d=4hello%20world%1E2")
            .unwrap();
        assert_eq!(&body[..], b"4hello world\x1e2");

        assert!(matches!(
            processor.decode_jsonp_body(b"x=1"),
            Err(ProtocolError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_is_binary() {
        assert!(!is_binary(b"4hello\nworld"));
        assert!(!is_binary("4héllo".as_bytes()));
        assert!(is_binary(&[0x04, 0x00]));
        assert!(is_binary(&[0xC3, 0x28]));
    }

    #[test]
    fn test_framed_len_counts_separators() {
        let input = packets(&[&[b'4'; 400], &[b'4'; 400]]);
        assert_eq!(PayloadProcessor::framed_len(&input), 801);
    }
}
