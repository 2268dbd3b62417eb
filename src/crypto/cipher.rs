//! AES-256-CBC envelope encryption
//!
//! An envelope is `base64(nonce) ++ base64(ciphertext)` with no delimiter.
//! The nonce is 8 random bytes, so its encoding is always 12 characters.
//! The CBC IV is the 16 ASCII bytes of the nonce's lowercase hex form.
//!
//! There is no authentication tag. Tampering is only caught when it breaks
//! the padding or the UTF-8 decoding of the result; a modified envelope can
//! still open to different plaintext.

use aes::Aes256;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;

use super::error::{CryptoError, CryptoResult};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Size of the encryption key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of the random nonce in bytes
pub const NONCE_SIZE: usize = 8;

/// Length of the base64-encoded nonce at the front of an envelope
pub const ENCODED_NONCE_LEN: usize = 12;

const IV_SIZE: usize = 2 * NONCE_SIZE;

/// Symmetric cipher for encryption/decryption
pub struct Cipher;

impl Cipher {
    /// Encrypt plaintext under a fresh random nonce
    pub fn seal(key: &[u8; KEY_SIZE], plaintext: &str) -> String {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);
        Self::seal_with_nonce(key, &nonce, plaintext)
    }

    /// Encrypt with a specific nonce
    ///
    /// WARNING: Reusing a nonce with the same key leaks equal plaintext prefixes.
    pub fn seal_with_nonce(key: &[u8; KEY_SIZE], nonce: &[u8; NONCE_SIZE], plaintext: &str) -> String {
        let iv = iv_from_nonce(nonce);
        let ciphertext = Aes256CbcEnc::new(&(*key).into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

        let mut envelope = BASE64.encode(nonce);
        envelope.push_str(&BASE64.encode(ciphertext));
        envelope
    }

    /// Decrypt an envelope
    pub fn open(key: &[u8; KEY_SIZE], envelope: &str) -> CryptoResult<String> {
        let (encoded_nonce, encoded_ciphertext) = split_envelope(envelope)?;

        let nonce: [u8; NONCE_SIZE] = BASE64
            .decode(encoded_nonce)
            .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?
            .try_into()
            .map_err(|_| CryptoError::InvalidEncoding("nonce must be 8 bytes".to_string()))?;
        let ciphertext = BASE64
            .decode(encoded_ciphertext)
            .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;

        let iv = iv_from_nonce(&nonce);
        let plaintext = Aes256CbcDec::new(&(*key).into(), &iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptionFailed)
    }
}

fn split_envelope(envelope: &str) -> CryptoResult<(&str, &str)> {
    if envelope.len() < ENCODED_NONCE_LEN || !envelope.is_char_boundary(ENCODED_NONCE_LEN) {
        return Err(CryptoError::InvalidEncoding("envelope too short".to_string()));
    }
    Ok(envelope.split_at(ENCODED_NONCE_LEN))
}

fn iv_from_nonce(nonce: &[u8; NONCE_SIZE]) -> [u8; IV_SIZE] {
    let mut iv = [0u8; IV_SIZE];
    iv.copy_from_slice(hex::encode(nonce).as_bytes());
    iv
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encrypt_decrypt() {
        let key = [42u8; KEY_SIZE];
        let envelope = Cipher::seal(&key, "Hello, relay!");
        assert_eq!(Cipher::open(&key, &envelope).unwrap(), "Hello, relay!");
    }

    #[test]
    fn test_empty_plaintext() {
        let key = [42u8; KEY_SIZE];
        let envelope = Cipher::seal(&key, "");
        assert_eq!(Cipher::open(&key, &envelope).unwrap(), "");
    }

    #[test]
    fn test_multibyte_plaintext() {
        let key = [7u8; KEY_SIZE];
        let text = "привет, мир! 你好 🌍";
        let envelope = Cipher::seal(&key, text);
        assert_eq!(Cipher::open(&key, &envelope).unwrap(), text);
    }

    #[test]
    fn test_envelope_layout() {
        let key = [1u8; KEY_SIZE];
        let nonce = [0xAB; NONCE_SIZE];
        let envelope = Cipher::seal_with_nonce(&key, &nonce, "0123456789abcdef");

        assert_eq!(&envelope[..ENCODED_NONCE_LEN], BASE64.encode(nonce));
        // 16 bytes of plaintext pad to two blocks
        let ciphertext = BASE64.decode(&envelope[ENCODED_NONCE_LEN..]).unwrap();
        assert_eq!(ciphertext.len(), 32);
    }

    #[test]
    fn test_iv_is_hex_of_nonce() {
        let iv = iv_from_nonce(&[0x00, 0x01, 0x0a, 0xff, 0x10, 0x20, 0x30, 0x40]);
        assert_eq!(&iv, b"00010aff10203040");
    }

    #[test]
    fn test_ciphertext_different_each_time() {
        let key = [42u8; KEY_SIZE];
        assert_ne!(Cipher::seal(&key, "Hello"), Cipher::seal(&key, "Hello"));
    }

    #[test]
    fn test_deterministic_with_fixed_nonce() {
        let key = [42u8; KEY_SIZE];
        let nonce = [9u8; NONCE_SIZE];
        assert_eq!(
            Cipher::seal_with_nonce(&key, &nonce, "Hello"),
            Cipher::seal_with_nonce(&key, &nonce, "Hello")
        );
    }

    #[test]
    fn test_wrong_key_never_recovers_plaintext() {
        let envelope = Cipher::seal(&[1u8; KEY_SIZE], "Secret");
        assert_ne!(Cipher::open(&[2u8; KEY_SIZE], &envelope).ok().as_deref(), Some("Secret"));
    }

    #[test]
    fn test_tampered_ciphertext_fails_to_open() {
        let key = [42u8; KEY_SIZE];
        let nonce = [3u8; NONCE_SIZE];
        let envelope = Cipher::seal_with_nonce(&key, &nonce, "attack at dawn, hold the eastern bridge until noon");
        let mut ciphertext = BASE64.decode(&envelope[ENCODED_NONCE_LEN..]).unwrap();
        assert_eq!(ciphertext.len(), 64);

        // No MAC: this holds for these inputs, not for every envelope
        for bit in 0..ciphertext.len() * 8 {
            ciphertext[bit / 8] ^= 1 << (bit % 8);
            let tampered = format!("{}{}", &envelope[..ENCODED_NONCE_LEN], BASE64.encode(&ciphertext));
            assert_eq!(
                Cipher::open(&key, &tampered),
                Err(CryptoError::DecryptionFailed),
                "flipping bit {bit} still opened"
            );
            ciphertext[bit / 8] ^= 1 << (bit % 8);
        }
    }

    #[test]
    fn test_tampered_single_block_fails_to_open() {
        let key = [42u8; KEY_SIZE];
        let nonce = [3u8; NONCE_SIZE];
        let envelope = Cipher::seal_with_nonce(&key, &nonce, "attack at dawn");
        let mut ciphertext = BASE64.decode(&envelope[ENCODED_NONCE_LEN..]).unwrap();

        for bit in 0..ciphertext.len() * 8 {
            ciphertext[bit / 8] ^= 1 << (bit % 8);
            let tampered = format!("{}{}", &envelope[..ENCODED_NONCE_LEN], BASE64.encode(&ciphertext));
            assert!(Cipher::open(&key, &tampered).is_err(), "flipping bit {bit} still opened");
            ciphertext[bit / 8] ^= 1 << (bit % 8);
        }
    }

    #[test]
    fn test_malformed_envelopes() {
        let key = [42u8; KEY_SIZE];
        assert!(matches!(Cipher::open(&key, "short"), Err(CryptoError::InvalidEncoding(_))));
        assert!(matches!(
            Cipher::open(&key, "!!!!!!!!!!!!AAAA"),
            Err(CryptoError::InvalidEncoding(_))
        ));
        // Nonce decodes, but there is no ciphertext block
        let nonce_only = BASE64.encode([0u8; NONCE_SIZE]);
        assert_eq!(Cipher::open(&key, &nonce_only), Err(CryptoError::DecryptionFailed));
        // Multi-byte character straddling the nonce boundary
        assert!(Cipher::open(&key, "AAAAAAAAAAAé").is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_roundtrip(text in ".*", key in any::<[u8; KEY_SIZE]>()) {
            let envelope = Cipher::seal(&key, &text);
            prop_assert_eq!(Cipher::open(&key, &envelope).unwrap(), text);
        }
    }
}
