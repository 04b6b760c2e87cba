//! Envelope framing over the kettle TCP socket.
//!
//! Wire format: `tag(4) | ascii hex length(2+) | content | "&&"`, where the tag is
//! `##00` for plain content and `##80` for AES encrypted content.

use std::time::Duration;

use serde_json::{Map, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, trace, warn};

use super::cipher::KettleCipher;
use super::types::{ENCRYPT_HEADER, PLAIN_HEADER, START_MARKER, TERMINATOR};
use crate::error::{AppError, Result};

/// Outcome of one receive call.
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    /// Nothing usable arrived (connection dropped or content was not text).
    NoFrame,
    /// Text that is not a JSON object, e.g. `KeepConnect`.
    RawText(String),
    /// JSON object content.
    Structured(Map<String, Value>),
}

/// Wrap content in an envelope, encrypting it first when asked.
pub fn encode_envelope(content: &[u8], encrypt: bool, cipher: &KettleCipher) -> Vec<u8> {
    let (header, body) = if encrypt {
        (ENCRYPT_HEADER, cipher.encrypt(content))
    } else {
        (PLAIN_HEADER, content.to_vec())
    };

    let length = format!("{:02X}", body.len());
    let mut envelope = Vec::with_capacity(header.len() + length.len() + body.len() + TERMINATOR.len());
    envelope.extend_from_slice(&header);
    envelope.extend_from_slice(length.as_bytes());
    envelope.extend_from_slice(&body);
    envelope.extend_from_slice(&TERMINATOR);
    envelope
}

/// Write a whole envelope with timeout.
pub(crate) async fn write_envelope(stream: &mut TcpStream, envelope: &[u8], timeout_duration: Duration) -> Result<()> {
    debug!("TX ({} bytes): {}", envelope.len(), String::from_utf8_lossy(envelope));
    timeout(timeout_duration, stream.write_all(envelope))
        .await
        .map_err(|_| AppError::Timeout("Write timeout".to_string()))?
        .map_err(|e| {
            error!("Write failed: {e}");
            AppError::ConnectionBroken(format!("Write failed: {e}"))
        })?;
    Ok(())
}

/// Read byte by byte until the `&&` terminator or `max_bytes`.
///
/// Errors mean the connection is gone: socket error, EOF or timeout.
pub(crate) async fn read_envelope(stream: &mut TcpStream, max_bytes: usize, timeout_duration: Duration) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(64);
    let mut byte = [0u8; 1];

    while buf.len() < max_bytes && !buf.ends_with(&TERMINATOR) {
        match timeout(timeout_duration, stream.read(&mut byte)).await {
            Ok(Ok(0)) => {
                warn!("Socket connection broken / no data");
                return Err(AppError::ConnectionBroken("Connection closed by kettle".to_string()));
            }
            Ok(Ok(_)) => buf.push(byte[0]),
            Ok(Err(e)) => {
                warn!("Socket connection broken: {e}");
                return Err(AppError::ConnectionBroken(format!("Read failed: {e}")));
            }
            Err(_) => {
                warn!("Read timeout after {} bytes", buf.len());
                return Err(AppError::Timeout("Read timeout".to_string()));
            }
        }
    }

    if !buf.ends_with(&TERMINATOR) {
        warn!("No terminator within {max_bytes} bytes");
    }
    Ok(buf)
}

/// Interpret the raw bytes of one envelope.
pub fn open_envelope(raw: &[u8], cipher: &KettleCipher) -> Received {
    // Drop anything before the first "##" (e.g. TCP headers in captured traffic).
    let frame = match find(raw, &START_MARKER) {
        Some(pos) => &raw[pos..],
        None => raw,
    };

    let content = if frame.starts_with(&ENCRYPT_HEADER) {
        cipher.decrypt(envelope_content(frame))
    } else if frame.starts_with(&PLAIN_HEADER) {
        envelope_content(frame).to_vec()
    } else {
        if !frame.is_empty() {
            warn!("Response not recognised: {:02X?}", frame);
        }
        frame.to_vec()
    };

    let text = match std::str::from_utf8(&content) {
        Ok(text) => text.trim_end_matches('\0'),
        Err(_) => {
            debug!("Envelope content is not text, dropped");
            return Received::NoFrame;
        }
    };

    if text.is_empty() {
        return Received::NoFrame;
    }

    trace!("RX: {text}");
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Received::Structured(map),
        _ => Received::RawText(text.to_string()),
    }
}

/// Content bytes between the tag, the length field and the terminator.
fn envelope_content(frame: &[u8]) -> &[u8] {
    let body = &frame[ENCRYPT_HEADER.len()..];
    let body = body.strip_suffix(&TERMINATOR).unwrap_or(body);
    let width = length_field_width(body);
    &body[width..]
}

/// Width of the hex length field. It is the minimal uppercase hex rendering
/// of the content length, never narrower than 2 characters.
fn length_field_width(body: &[u8]) -> usize {
    for width in 2..=body.len().min(8) {
        let expected = format!("{:02X}", body.len() - width);
        if expected.len() == width && body[..width].eq_ignore_ascii_case(expected.as_bytes()) {
            return width;
        }
    }
    body.len().min(2)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kettle::types::MSG_KEEP_CONNECT;

    #[test]
    fn test_encode_plain_envelope() {
        let cipher = KettleCipher::default();
        let envelope = encode_envelope(b"KeepConnect", false, &cipher);
        assert_eq!(envelope, b"##000BKeepConnect&&");
    }

    #[test]
    fn test_encode_encrypted_envelope_is_block_aligned() {
        let cipher = KettleCipher::default();
        let envelope = encode_envelope(b"hello", true, &cipher);
        assert!(envelope.starts_with(b"##8010"));
        assert!(envelope.ends_with(b"&&"));
        assert_eq!(envelope.len(), 4 + 2 + 16 + 2);
    }

    #[test]
    fn test_open_keep_connect() {
        let cipher = KettleCipher::default();
        assert_eq!(
            open_envelope(MSG_KEEP_CONNECT, &cipher),
            Received::RawText("KeepConnect".to_string())
        );
    }

    #[test]
    fn test_open_encrypted_json() {
        let cipher = KettleCipher::default();
        let content = br#"{"wifi_cmd":"62","imei":"GD0","data3":"aa00"}"#;
        let envelope = encode_envelope(content, true, &cipher);

        match open_envelope(&envelope, &cipher) {
            Received::Structured(map) => {
                assert_eq!(map["wifi_cmd"], "62");
                assert_eq!(map["data3"], "aa00");
            }
            other => panic!("expected structured frame, got {other:?}"),
        }
    }

    #[test]
    fn test_open_discards_leading_noise() {
        let cipher = KettleCipher::default();
        let mut raw = vec![0x45, 0x00, 0x13, 0x37];
        raw.extend_from_slice(MSG_KEEP_CONNECT);
        assert_eq!(open_envelope(&raw, &cipher), Received::RawText("KeepConnect".to_string()));
    }

    #[test]
    fn test_open_unrecognised_tag_returns_text() {
        let cipher = KettleCipher::default();
        assert_eq!(open_envelope(b"hello&&", &cipher), Received::RawText("hello&&".to_string()));
    }

    #[test]
    fn test_open_binary_garbage_is_no_frame() {
        let cipher = KettleCipher::default();
        assert_eq!(open_envelope(&[0xFF, 0xFE, 0x80], &cipher), Received::NoFrame);
        assert_eq!(open_envelope(b"", &cipher), Received::NoFrame);
    }

    #[test]
    fn test_open_long_content_with_three_digit_length() {
        let cipher = KettleCipher::default();
        let content = format!(r#"{{"pad":"{}"}}"#, "x".repeat(300));
        let envelope = encode_envelope(content.as_bytes(), false, &cipher);
        assert!(envelope.starts_with(b"##00"));

        match open_envelope(&envelope, &cipher) {
            Received::Structured(map) => assert_eq!(map["pad"].as_str().map(str::len), Some(300)),
            other => panic!("expected structured frame, got {other:?}"),
        }
    }

    #[test]
    fn test_length_field_width() {
        assert_eq!(length_field_width(b"0bKeepConnect"), 2);
        assert_eq!(length_field_width(b"05hello"), 2);
        assert_eq!(length_field_width(b"x"), 1);
    }
}
