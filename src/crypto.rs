//! Field-level encryption for `crypt`-marked string fields.
//!
//! Authenticated AES-256-GCM; the stored form is
//! `<name>:<cipher>:<nonce-hex>:<base64(nonce || ciphertext)>` and is opaque
//! to the rest of the mapper.

use crate::error::Error;
use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

const CIPHER_NAME: &str = "aes-256-gcm";
const NONCE_LEN: usize = 12;

/// Keyring configuration supplied through the table parameters.
#[derive(Clone, Debug)]
pub struct CryptoParams {
    /// Keyring entry name; the writer always uses `primary`.
    pub name: String,
    /// Password hashed with SHA-256 into the AES-256 key.
    pub password: String,
}

impl CryptoParams {
    /// The `primary` keyring entry for the given password.
    pub fn primary(password: &str) -> Self {
        CryptoParams {
            name: "primary".to_string(),
            password: password.to_string(),
        }
    }
}

#[derive(Clone)]
pub(crate) struct Crypto {
    name: String,
    key: [u8; 32],
}

impl Crypto {
    pub(crate) fn new(params: &CryptoParams) -> Crypto {
        let digest = Sha256::digest(params.password.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Crypto {
            name: params.name.clone(),
            key,
        }
    }

    pub(crate) fn encrypt(&self, text: &str) -> Result<String, Error> {
        if text.is_empty() {
            return Ok(String::new());
        }
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let sealed = cipher
            .encrypt(nonce, text.as_bytes())
            .map_err(|_| Error::backend("encryption failed"))?;
        let mut payload = nonce_bytes.to_vec();
        payload.extend_from_slice(&sealed);
        let nonce_hex: String = nonce_bytes.iter().map(|b| format!("{:02x}", b)).collect();
        Ok(format!(
            "{}:{}:{}:{}",
            self.name,
            CIPHER_NAME,
            nonce_hex,
            BASE64.encode(payload)
        ))
    }

    pub(crate) fn decrypt(&self, text: &str) -> Result<String, Error> {
        if text.is_empty() {
            return Ok(String::new());
        }
        let parts: Vec<&str> = text.splitn(4, ':').collect();
        if parts.len() < 4 {
            // Not a wrapped ciphertext; return unchanged.
            return Ok(text.to_string());
        }
        if parts[0] != self.name {
            return Err(Error::argument(format!(
                "no keyring entry for \"{}\"",
                parts[0]
            )));
        }
        let payload = BASE64
            .decode(parts[3])
            .map_err(|_| Error::backend("malformed ciphertext"))?;
        if payload.len() < NONCE_LEN {
            return Err(Error::backend("ciphertext too short"));
        }
        let (nonce_bytes, sealed) = payload.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let plain = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), sealed)
            .map_err(|_| Error::backend("decryption failed"))?;
        String::from_utf8(plain).map_err(|_| Error::backend("decrypted value is not UTF-8"))
    }
}
