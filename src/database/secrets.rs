//! Field-level secrets.
//!
//! Account passwords and selected config keys are stored encrypted when the
//! record's `schema_version` is `1.1`; older records hold them in clear. The
//! cipher is an HMAC-SHA256 keystream over `(salt, nonce, counter)` with an
//! HMAC tag, encoded as base64 of `nonce || ciphertext || tag`. The salt is
//! the owning document id, so a value copied between records fails to open.

use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::errors::DbError;

type HmacSha256 = Hmac<Sha256>;

pub const ENCRYPTED_SCHEMA_VERSION: &str = "1.1";

const NONCE_LEN: usize = 16;
const TAG_LEN: usize = 16;
const BLOCK_LEN: usize = 32;

#[derive(Clone, Default)]
pub struct SecretCipher {
    key: Option<Vec<u8>>,
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCipher")
            .field("has_key", &self.key.is_some())
            .finish()
    }
}

impl SecretCipher {
    pub fn new(key: Option<&str>) -> Self {
        Self {
            key: key.map(|k| k.as_bytes().to_vec()),
        }
    }

    pub fn is_encrypted(schema_version: Option<&str>) -> bool {
        schema_version == Some(ENCRYPTED_SCHEMA_VERSION)
    }

    fn mac(&self) -> Result<HmacSha256, DbError> {
        let key = self
            .key
            .as_deref()
            .ok_or_else(|| DbError::Decrypt("no secret key configured".to_string()))?;
        HmacSha256::new_from_slice(key).map_err(|e| DbError::Decrypt(e.to_string()))
    }

    fn keystream(&self, salt: &str, nonce: &[u8], len: usize) -> Result<Vec<u8>, DbError> {
        let mut stream = Vec::with_capacity(len + BLOCK_LEN);
        let mut counter: u32 = 0;
        while stream.len() < len {
            let mut mac = self.mac()?;
            mac.update(salt.as_bytes());
            mac.update(nonce);
            mac.update(&counter.to_be_bytes());
            stream.extend_from_slice(&mac.finalize().into_bytes());
            counter += 1;
        }
        stream.truncate(len);
        Ok(stream)
    }

    fn tag(&self, salt: &str, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, DbError> {
        let mut mac = self.mac()?;
        mac.update(b"tag");
        mac.update(salt.as_bytes());
        mac.update(nonce);
        mac.update(ciphertext);
        let mut tag = mac.finalize().into_bytes().to_vec();
        tag.truncate(TAG_LEN);
        Ok(tag)
    }

    pub fn encrypt(&self, plaintext: &str, salt: &str) -> Result<String, DbError> {
        let nonce = *uuid::Uuid::new_v4().as_bytes();
        let stream = self.keystream(salt, &nonce, plaintext.len())?;
        let ciphertext: Vec<u8> = plaintext
            .as_bytes()
            .iter()
            .zip(stream)
            .map(|(p, k)| p ^ k)
            .collect();
        let tag = self.tag(salt, &nonce, &ciphertext)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len() + TAG_LEN);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        out.extend_from_slice(&tag);
        Ok(STANDARD.encode(out))
    }

    /// Decrypt `value` when `schema_version` marks it encrypted, else return it as is
    pub fn decrypt(
        &self,
        value: &str,
        schema_version: Option<&str>,
        salt: &str,
    ) -> Result<String, DbError> {
        if !Self::is_encrypted(schema_version) {
            return Ok(value.to_string());
        }
        let raw = STANDARD
            .decode(value)
            .map_err(|e| DbError::Decrypt(e.to_string()))?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(DbError::Decrypt("ciphertext too short".to_string()));
        }
        let (nonce, rest) = raw.split_at(NONCE_LEN);
        let (ciphertext, tag) = rest.split_at(rest.len() - TAG_LEN);
        if self.tag(salt, nonce, ciphertext)? != tag {
            return Err(DbError::Decrypt("authentication tag mismatch".to_string()));
        }
        let stream = self.keystream(salt, nonce, ciphertext.len())?;
        let plain: Vec<u8> = ciphertext.iter().zip(stream).map(|(c, k)| c ^ k).collect();
        String::from_utf8(plain).map_err(|e| DbError::Decrypt(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plaintext_schema_passes_through() {
        let cipher = SecretCipher::new(None);
        assert_eq!(cipher.decrypt("secret", None, "id").unwrap(), "secret");
        assert_eq!(cipher.decrypt("secret", Some("1.0"), "id").unwrap(), "secret");
    }

    #[test]
    fn salt_binds_ciphertext_to_document() {
        let cipher = SecretCipher::new(Some("master-key"));
        let stored = cipher.encrypt("s3cr3t-password", "vim-1").unwrap();
        assert_ne!(stored, "s3cr3t-password");
        assert_eq!(
            cipher.decrypt(&stored, Some("1.1"), "vim-1").unwrap(),
            "s3cr3t-password"
        );
        assert!(cipher.decrypt(&stored, Some("1.1"), "vim-2").is_err());
    }

    #[test]
    fn encrypted_value_needs_a_key() {
        let sealed = SecretCipher::new(Some("k")).encrypt("x", "id").unwrap();
        assert!(SecretCipher::new(None).decrypt(&sealed, Some("1.1"), "id").is_err());
    }
}
