//! Flying Carpet crypto.
//!
//! Both peers type the same short password. From it each side derives, with no
//! exchange of the result:
//! - the SSID used to name the ad hoc link (not secret)
//! - a 32-byte scrypt key that seals every file chunk with XSalsa20-Poly1305
//!
//! Chunks use the NaCl secretbox layout so peers built on other secretbox
//! implementations interoperate byte for byte.

pub mod encrypt;
pub mod error;
pub mod keys;

pub use encrypt::{MAC_SIZE, NONCE_SIZE, SEAL_OVERHEAD, decrypt_chunk, encrypt_chunk};
pub use error::CryptoError;
pub use keys::{KEY_SIZE, SSID_PREFIX, SessionIdentity, derive_session_identity, generate_password};
