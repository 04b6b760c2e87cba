//! Message checksum strategies.

/// Single-byte digest appended to every inner command.
///
/// Implementations must depend only on the input bytes.
pub trait Checksum: Send + Sync {
    /// Digest over a message without its trailing checksum byte.
    fn compute(&self, msg: &[u8]) -> u8;

    /// Check a full message whose last byte is the checksum.
    fn verify(&self, frame: &[u8]) -> bool {
        match frame.split_last() {
            Some((&last, body)) => self.compute(body) == last,
            None => false,
        }
    }
}

/// Kettle checksum: `0xFF - (sum of bytes after the head byte) mod 256`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SumComplement;

impl Checksum for SumComplement {
    fn compute(&self, msg: &[u8]) -> u8 {
        let sum = msg
            .iter()
            .skip(1)
            .fold(0u8, |acc, &b| acc.wrapping_add(b));
        0xFF - sum
    }
}

/// Append the checksum byte to an uppercase hex message.
pub fn append_checksum_hex(checksum: &dyn Checksum, msg_hex: &str) -> Result<String, hex::FromHexError> {
    let bytes = hex::decode(msg_hex)?;
    Ok(format!("{msg_hex}{:02X}", checksum.compute(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_matches_captured_off_command() {
        // App -> kettle "off", captured
        let msg = hex::decode("AA000D00000000000003B7283A0000").unwrap();
        assert_eq!(SumComplement.compute(&msg), 0xD6);
    }

    #[test]
    fn test_verify_captured_frames() {
        for frame in [
            "aa000e00000000000003b715390000c821",
            "aa001803000000000000009b360000c800030000505004b30000f1",
            "AA001200000000000003B70c390000006402000088",
        ] {
            let bytes = hex::decode(frame).unwrap();
            assert!(SumComplement.verify(&bytes), "{frame}");
        }
    }

    #[test]
    fn test_verify_rejects_modified_checksum() {
        let mut bytes = hex::decode("aa000e00000000000003b715390000c821").unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert!(!SumComplement.verify(&bytes));
    }

    #[test]
    fn test_verify_empty_frame() {
        assert!(!SumComplement.verify(&[]));
    }

    #[test]
    fn test_appended_message_verifies() {
        let msg = "AA000D00000000000003B70B410000";
        let full = append_checksum_hex(&SumComplement, msg).unwrap();
        assert!(full.starts_with(msg));
        assert_eq!(full.len(), msg.len() + 2);
        assert!(SumComplement.verify(&hex::decode(&full).unwrap()));
    }

    #[test]
    fn test_head_byte_is_not_summed() {
        let a = SumComplement.compute(&[0xAA, 0x01, 0x02]);
        let b = SumComplement.compute(&[0x00, 0x01, 0x02]);
        assert_eq!(a, b);
        assert_eq!(a, 0xFC);
    }
}
