/**
 * Payload encryption used inside the `pack` field of every datagram.
 *
 * The appliance family encrypts JSON payloads with AES-128 in ECB mode, PKCS#7 padded and
 * base64 encoded. Until a device is bound every payload uses a published default key.
 */
use aes::{
    cipher::{BlockDecrypt, BlockEncrypt, KeyInit},
    Aes128,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use thiserror::Error;

/// Key shared by every appliance, used before the bind handshake hands out a device key.
pub const DEFAULT_KEY: &str = "a3K8Bx%2r8Y7#xDh";

const BLOCK_LEN: usize = 16;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("key must be 16 bytes, got {0}")]
    InvalidKey(usize),
    #[error("failed to decode base64 payload: {0}")]
    Base64DecodeError(#[from] base64::DecodeError),
    #[error("ciphertext length {0} is not a multiple of the block size")]
    InvalidLength(usize),
    #[error("invalid padding")]
    InvalidPadding,
}

/// Encrypts payloads for the wire. `key` is `None` until the device is bound.
pub trait Cipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8], key: Option<&str>) -> Result<String, CipherError>;
    fn decrypt(&self, ciphertext: &str, key: Option<&str>) -> Result<Vec<u8>, CipherError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AesEcb;

impl AesEcb {
    fn cipher(key: Option<&str>) -> Result<Aes128, CipherError> {
        let key = key.unwrap_or(DEFAULT_KEY).as_bytes();
        Aes128::new_from_slice(key).map_err(|_| CipherError::InvalidKey(key.len()))
    }
}

impl Cipher for AesEcb {
    fn encrypt(&self, plaintext: &[u8], key: Option<&str>) -> Result<String, CipherError> {
        let cipher = Self::cipher(key)?;

        // PKCS#7 always appends at least one byte of padding
        let pad = BLOCK_LEN - plaintext.len() % BLOCK_LEN;
        let mut buf = Vec::with_capacity(plaintext.len() + pad);
        buf.extend_from_slice(plaintext);
        buf.resize(plaintext.len() + pad, pad as u8);

        for block in buf.chunks_mut(BLOCK_LEN) {
            cipher.encrypt_block(block.into());
        }

        Ok(STANDARD.encode(&buf))
    }

    fn decrypt(&self, ciphertext: &str, key: Option<&str>) -> Result<Vec<u8>, CipherError> {
        let cipher = Self::cipher(key)?;

        let mut buf = STANDARD.decode(ciphertext.trim())?;
        if buf.is_empty() || buf.len() % BLOCK_LEN != 0 {
            return Err(CipherError::InvalidLength(buf.len()));
        }

        for block in buf.chunks_mut(BLOCK_LEN) {
            cipher.decrypt_block(block.into());
        }

        let pad = buf[buf.len() - 1] as usize;
        if pad == 0 || pad > BLOCK_LEN || buf[buf.len() - pad..].iter().any(|&b| b as usize != pad) {
            return Err(CipherError::InvalidPadding);
        }
        buf.truncate(buf.len() - pad);

        Ok(buf)
    }
}
