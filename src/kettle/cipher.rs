//! AES-128-CBC with zero padding, as the kettle firmware expects.

use aes::Aes128;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use tracing::warn;

use super::types::{BLOCK_SIZE, DEFAULT_IV, DEFAULT_KEY};

type Encryptor = cbc::Encryptor<Aes128>;
type Decryptor = cbc::Decryptor<Aes128>;

/// Envelope cipher with a fixed key and IV.
#[derive(Clone)]
pub struct KettleCipher {
    key: [u8; 16],
    iv: [u8; BLOCK_SIZE],
}

impl KettleCipher {
    pub fn new(key: &[u8; 16], iv: &[u8; 16]) -> Self {
        Self { key: *key, iv: *iv }
    }

    /// Right-pad with `0x00` to the block size, then encrypt.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let data = pad(plaintext, BLOCK_SIZE);
        Encryptor::new(&self.key.into(), &self.iv.into()).encrypt_padded_vec_mut::<NoPadding>(&data)
    }

    /// Decrypt without removing padding.
    ///
    /// Input that is not block aligned is returned unchanged.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Vec<u8> {
        if ciphertext.len() % BLOCK_SIZE != 0 {
            warn!("Not 16-byte boundary data ({} bytes), left as is", ciphertext.len());
            return ciphertext.to_vec();
        }

        match Decryptor::new(&self.key.into(), &self.iv.into()).decrypt_padded_vec_mut::<NoPadding>(ciphertext) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!("Decrypt failed ({e}), left as is");
                ciphertext.to_vec()
            }
        }
    }
}

impl Default for KettleCipher {
    fn default() -> Self {
        Self::new(DEFAULT_KEY, DEFAULT_IV)
    }
}

impl std::fmt::Debug for KettleCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KettleCipher").finish_non_exhaustive()
    }
}

/// Pad with `0x00` up to a multiple of `block`.
pub fn pad(data: &[u8], block: usize) -> Vec<u8> {
    let mut out = data.to_vec();
    let extra = data.len() % block;
    if extra > 0 {
        out.resize(data.len() + block - extra, 0);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_to_block() {
        assert_eq!(pad(b"", 16).len(), 0);
        assert_eq!(pad(b"abc", 16).len(), 16);
        assert_eq!(pad(&[1u8; 16], 16).len(), 16);
        assert_eq!(pad(&[1u8; 17], 16), [vec![1u8; 17], vec![0u8; 15]].concat());
    }

    #[test]
    fn test_roundtrip_returns_zero_padded_plaintext() {
        let cipher = KettleCipher::default();
        let plaintext = br#"{"app_cmd":"62","imei":"","SubDev":"","data2":"AA000D"}"#;

        let encrypted = cipher.encrypt(plaintext);
        assert_eq!(encrypted.len() % BLOCK_SIZE, 0);
        assert_ne!(&encrypted[..plaintext.len()], &plaintext[..]);

        assert_eq!(cipher.decrypt(&encrypted), pad(plaintext, BLOCK_SIZE));
    }

    #[test]
    fn test_encrypt_known_answer() {
        let encrypted = KettleCipher::default().encrypt(b"KeepConnect");
        assert_eq!(hex::encode(encrypted), "a7bd78807a106ad67b4854863f2f7559");
    }

    #[test]
    fn test_cbc_chains_blocks() {
        // Identical plaintext blocks must not give identical ciphertext blocks.
        let cipher = KettleCipher::default();
        let encrypted = cipher.encrypt(&[0x41; 32]);
        assert_ne!(encrypted[..16], encrypted[16..]);
    }

    #[test]
    fn test_misaligned_ciphertext_returned_unchanged() {
        let cipher = KettleCipher::default();
        let data = vec![7u8; 20];
        assert_eq!(cipher.decrypt(&data), data);
    }

    #[test]
    fn test_distinct_keys_do_not_interoperate() {
        let a = KettleCipher::default();
        let b = KettleCipher::new(b"0123456789abcdef", DEFAULT_IV);
        let encrypted = a.encrypt(b"KeepConnect");
        assert_ne!(b.decrypt(&encrypted), pad(b"KeepConnect", BLOCK_SIZE));
    }
}
