//! At-rest encrypted envelope for environment-supplied secrets.
//!
//! A sealed value looks like `enc:v2:<base64(nonce || ciphertext)>`. The
//! cipher is AES-256-GCM keyed by the SHA-256 digest of the passphrase found
//! in [`SECRET_KEY_ENV`].

use aes_gcm::{
    Aes256Gcm,
    aead::{Aead, KeyInit, OsRng, Payload},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};
use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// Marker prefix of a sealed value.
pub const ENVELOPE_PREFIX: &str = "enc:v2:";

/// Environment variable holding the envelope passphrase.
pub const SECRET_KEY_ENV: &str = "VIBES_SECRET_KEY";

const NONCE_BYTES: usize = 12;
const AAD: &[u8] = b"vibes-models:env-secret:v2";
const MIN_KEY_LEN: usize = 8;

/// Whether a raw value is a sealed envelope.
pub fn is_sealed(value: &str) -> bool {
    value.trim_start().starts_with(ENVELOPE_PREFIX)
}

/// Seal a secret with the given passphrase.
pub fn seal(secret: &str, key: &str) -> Result<String> {
    use aes_gcm::aead::rand_core::RngCore as _;

    let secret = secret.trim();
    if secret.is_empty() {
        return Err(Error::Decrypt("secret must not be empty".to_string()));
    }
    let cipher = cipher(key)?;
    let mut nonce = [0u8; NONCE_BYTES];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(
            (&nonce).into(),
            Payload {
                msg: secret.as_bytes(),
                aad: AAD,
            },
        )
        .map_err(|_| Error::Decrypt("encryption failed".to_string()))?;

    let mut payload = Vec::with_capacity(NONCE_BYTES + ciphertext.len());
    payload.extend_from_slice(&nonce);
    payload.extend_from_slice(&ciphertext);
    Ok(format!("{ENVELOPE_PREFIX}{}", BASE64_STANDARD.encode(payload)))
}

/// Open a sealed value. The prefix is required.
pub fn open(value: &str, key: &str) -> Result<String> {
    let encoded = value
        .trim()
        .strip_prefix(ENVELOPE_PREFIX)
        .ok_or_else(|| Error::Decrypt("missing envelope prefix".to_string()))?;
    let cipher = cipher(key)?;
    let raw = BASE64_STANDARD
        .decode(encoded)
        .map_err(|_| Error::Decrypt("payload encoding is invalid".to_string()))?;
    if raw.len() <= NONCE_BYTES {
        return Err(Error::Decrypt("payload is truncated".to_string()));
    }

    let (nonce, ciphertext) = raw.split_at(NONCE_BYTES);
    let plaintext = cipher
        .decrypt(
            nonce.into(),
            Payload {
                msg: ciphertext,
                aad: AAD,
            },
        )
        .map_err(|_| Error::Decrypt("integrity check failed".to_string()))?;
    let secret = String::from_utf8(plaintext)
        .map_err(|_| Error::Decrypt("payload is not valid UTF-8".to_string()))?;
    if secret.trim().is_empty() {
        return Err(Error::Decrypt("payload resolves to an empty secret".to_string()));
    }
    Ok(secret)
}

fn cipher(key: &str) -> Result<Aes256Gcm> {
    let key = key.trim();
    if key.len() < MIN_KEY_LEN {
        return Err(Error::Decrypt(format!(
            "{SECRET_KEY_ENV} must be at least {MIN_KEY_LEN} characters"
        )));
    }
    let digest = Sha256::digest(key.as_bytes());
    Aes256Gcm::new_from_slice(&digest)
        .map_err(|_| Error::Decrypt("key material has invalid length".to_string()))
}
