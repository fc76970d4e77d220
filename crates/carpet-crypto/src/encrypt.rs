//! Per-chunk sealing with XSalsa20-Poly1305 (NaCl secretbox).
//!
//! Wire format per chunk: nonce(24) + tag(16) + ciphertext
//!
//! Every call draws a fresh random nonce from the OS CSPRNG. With 192-bit
//! nonces random generation is safe for any realistic number of chunks.

use crypto_secretbox::aead::rand_core::RngCore;
use crypto_secretbox::aead::{Aead, KeyInit, OsRng};
use crypto_secretbox::{Key, Nonce, XSalsa20Poly1305};

use crate::error::CryptoError;
use crate::keys::KEY_SIZE;

pub const NONCE_SIZE: usize = 24;
pub const MAC_SIZE: usize = 16;
pub const SEAL_OVERHEAD: usize = NONCE_SIZE + MAC_SIZE;

/// Seal one plaintext chunk. Returns nonce || secretbox(plaintext).
pub fn encrypt_chunk(plaintext: &[u8], key: &[u8; KEY_SIZE]) -> Result<Vec<u8>, CryptoError> {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng
        .try_fill_bytes(&mut nonce)
        .map_err(|e| CryptoError::Randomness(e.to_string()))?;

    let cipher = XSalsa20Poly1305::new(Key::from_slice(key));
    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::Encryption)?;

    let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Open one sealed chunk produced by [`encrypt_chunk`] (or any secretbox peer).
pub fn decrypt_chunk(sealed: &[u8], key: &[u8; KEY_SIZE]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < SEAL_OVERHEAD {
        return Err(CryptoError::DecryptionFailed);
    }
    let (nonce, body) = sealed.split_at(NONCE_SIZE);

    let cipher = XSalsa20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), body)
        .map_err(|_| CryptoError::DecryptionFailed)
}
