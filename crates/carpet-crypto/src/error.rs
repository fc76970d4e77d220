use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("could not derive key from password: {0}")]
    KeyDerivation(String),

    #[error("system randomness unavailable: {0}")]
    Randomness(String),

    #[error("encryption failed")]
    Encryption,

    /// Bad MAC, wrong key, or truncated input. Never retried.
    #[error("decryption failed: chunk was corrupted, tampered with, or sealed with a different password")]
    DecryptionFailed,
}
