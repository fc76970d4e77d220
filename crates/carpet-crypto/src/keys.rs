use std::fmt;

use rand::Rng;
use sha2::{Digest, Sha256};

use crate::error::CryptoError;

pub const KEY_SIZE: usize = 32;

/// Every link name starts with this; the rest is two digest bytes in hex.
pub const SSID_PREFIX: &str = "flyingCarpet_";

/// scrypt cost: N = 2^15, r = 8, p = 1.
const SCRYPT_LOG_N: u8 = 15;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

const PASSWORD_LENGTH: usize = 8;

/// No 0/O, 1/l/I: the password is read off one screen and typed into another.
const PASSWORD_ALPHABET: &[u8] = b"23456789abcdefghijkmnopqrstuvwxyzABCDEFGHJKLMNPQRSTUVWXYZ";

/// Link name and chunk key for one session, derived from the shared password.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub ssid: String,
    pub key: [u8; KEY_SIZE],
}

impl fmt::Debug for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionIdentity")
            .field("ssid", &self.ssid)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Derive the SSID and the chunk key from a password.
///
/// SHA-256(password) is computed once:
///   SSID = "flyingCarpet_" + hex(digest[0..2])
///   key  = scrypt(password, salt = digest[3..11], N=2^15, r=8, p=1, len=32)
///
/// Both ends run this independently and must agree byte for byte.
pub fn derive_session_identity(password: &str) -> Result<SessionIdentity, CryptoError> {
    let digest = Sha256::digest(password.as_bytes());
    let ssid = format!("{}{}", SSID_PREFIX, hex::encode(&digest[0..2]));

    let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, KEY_SIZE)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    let mut key = [0u8; KEY_SIZE];
    scrypt::scrypt(password.as_bytes(), &digest[3..11], &params, &mut key)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    Ok(SessionIdentity { ssid, key })
}

/// Random password shown on the receiving end and typed into the sending end.
pub fn generate_password() -> String {
    let mut rng = rand::rng();
    (0..PASSWORD_LENGTH)
        .map(|_| PASSWORD_ALPHABET[rng.random_range(0..PASSWORD_ALPHABET.len())] as char)
        .collect()
}
