//! Encryption of stored backend credentials.
//!
//! Passwords in backend options are kept encrypted at rest with AES-256-CBC
//! (PKCS#7 padding). Every encryption draws a fresh 16-byte IV, which is
//! prepended to the ciphertext; the pair is stored base64 encoded in the
//! `password_encrypted` option. The plaintext `password` option is kept as
//! an empty string so options render in a stable order.
//!
//! The cipher key is the SHA-256 digest of the system secret. CBC carries
//! no integrity tag: decrypting with the wrong secret usually fails the
//! padding check ([`CredentialError::Padding`]) and otherwise yields garbage,
//! which is why stored records are never trusted beyond "decodes as UTF-8".

#![forbid(unsafe_code)]

use crate::config::BackendOptions;
use aes::Aes256;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroizing;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// IV length in bytes
pub const IV_LEN: usize = 16;

/// Option holding the plaintext password
pub const PASSWORD_KEY: &str = "password";
/// Option holding the encrypted password
pub const ENCRYPTED_PASSWORD_KEY: &str = "password_encrypted";

/// Errors that can occur while decrypting a stored credential
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CredentialError {
    /// The stored value is not valid base64
    #[error("Stored credential is not valid base64: {0}")]
    Encoding(String),

    /// The decoded blob is too short to hold an IV and one block
    #[error("Stored credential is truncated ({0} bytes)")]
    Truncated(usize),

    /// Padding check failed, typically because the secret changed
    #[error("Stored credential failed to decrypt (wrong secret or corrupt data)")]
    Padding,

    /// Decrypted bytes are not UTF-8
    #[error("Decrypted credential is not valid UTF-8")]
    InvalidUtf8,
}

/// A credential as found in stored options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredCredential {
    /// Encrypted record
    Encrypted {
        /// Per-record IV
        iv: [u8; IV_LEN],
        /// Padded ciphertext
        ciphertext: Vec<u8>,
    },
    /// Record written before encryption was introduced
    Legacy {
        /// Plaintext password
        plaintext: String,
    },
}

impl StoredCredential {
    /// Classify the password fields of a stored option map.
    ///
    /// `password_encrypted` wins when present; otherwise a non-empty
    /// `password` is a legacy plaintext record.
    pub fn from_options(options: &BackendOptions) -> Result<Option<Self>, CredentialError> {
        if let Some(encoded) = options.get(ENCRYPTED_PASSWORD_KEY).and_then(Value::as_str) {
            return Self::decode(encoded).map(Some);
        }
        Ok(options
            .get(PASSWORD_KEY)
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty())
            .map(|p| Self::Legacy {
                plaintext: p.to_string(),
            }))
    }

    /// Parse the base64 `IV || ciphertext` form
    pub fn decode(encoded: &str) -> Result<Self, CredentialError> {
        let blob = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CredentialError::Encoding(e.to_string()))?;
        if blob.len() < IV_LEN + 16 {
            return Err(CredentialError::Truncated(blob.len()));
        }
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&blob[..IV_LEN]);
        Ok(Self::Encrypted {
            iv,
            ciphertext: blob[IV_LEN..].to_vec(),
        })
    }

    /// Base64 form of an encrypted record; `None` for legacy records
    pub fn encode(&self) -> Option<String> {
        match self {
            Self::Encrypted { iv, ciphertext } => {
                let mut blob = Vec::with_capacity(IV_LEN + ciphertext.len());
                blob.extend_from_slice(iv);
                blob.extend_from_slice(ciphertext);
                Some(STANDARD.encode(blob))
            }
            Self::Legacy { .. } => None,
        }
    }
}

/// Symmetric cipher for stored credentials, keyed by the system secret.
pub struct CredentialCipher {
    key: Zeroizing<[u8; 32]>,
}

impl std::fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCipher").finish_non_exhaustive()
    }
}

impl CredentialCipher {
    /// Derive the cipher key from the system secret
    pub fn new(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let mut key = Zeroizing::new([0u8; 32]);
        key.copy_from_slice(&digest);
        Self { key }
    }

    /// Encrypt with a fresh random IV
    pub fn encrypt(&self, plaintext: &str) -> StoredCredential {
        let iv: [u8; IV_LEN] = rand::random();
        self.encrypt_with_iv(plaintext, iv)
    }

    fn encrypt_with_iv(&self, plaintext: &str, iv: [u8; IV_LEN]) -> StoredCredential {
        let key: &[u8; 32] = &self.key;
        let ciphertext = Aes256CbcEnc::new(key.into(), (&iv).into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
        StoredCredential::Encrypted { iv, ciphertext }
    }

    /// Encrypt and encode in one step
    pub fn encrypt_password(&self, plaintext: &str) -> String {
        self.encrypt(plaintext).encode().unwrap_or_default()
    }

    /// Recover the plaintext of a stored credential
    pub fn decrypt(&self, credential: &StoredCredential) -> Result<String, CredentialError> {
        match credential {
            StoredCredential::Legacy { plaintext } => Ok(plaintext.clone()),
            StoredCredential::Encrypted { iv, ciphertext } => {
                let key: &[u8; 32] = &self.key;
                let plain = Aes256CbcDec::new(key.into(), iv.into())
                    .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                    .map_err(|_| CredentialError::Padding)?;
                String::from_utf8(plain).map_err(|_| CredentialError::InvalidUtf8)
            }
        }
    }

    /// Decode and decrypt a `password_encrypted` value
    pub fn decrypt_password(&self, encoded: &str) -> Result<String, CredentialError> {
        self.decrypt(&StoredCredential::decode(encoded)?)
    }

    /// Prepare options for persistence.
    ///
    /// A `password` option is encrypted into `password_encrypted` and
    /// blanked. Options that only carry an already encrypted value are left
    /// alone.
    pub fn encrypt_options(&self, options: &mut BackendOptions) {
        let plaintext = match options.get(PASSWORD_KEY) {
            Some(Value::String(p)) => Some(p.clone()),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        };
        let Some(plaintext) = plaintext else {
            return;
        };
        if plaintext.is_empty() && options.contains_key(ENCRYPTED_PASSWORD_KEY) {
            return;
        }
        options.insert(
            ENCRYPTED_PASSWORD_KEY.to_string(),
            Value::String(self.encrypt_password(&plaintext)),
        );
        options.insert(PASSWORD_KEY.to_string(), Value::String(String::new()));
    }

    /// Restore plaintext options from their stored form.
    ///
    /// `password_encrypted` is decrypted back into `password` and removed.
    /// Legacy records without it are returned as they are.
    pub fn decrypt_options(&self, options: &mut BackendOptions) -> Result<(), CredentialError> {
        let Some(encoded) = options.get(ENCRYPTED_PASSWORD_KEY).and_then(Value::as_str) else {
            return Ok(());
        };
        let plaintext = self.decrypt_password(encoded)?;
        options.remove(ENCRYPTED_PASSWORD_KEY);
        options.insert(PASSWORD_KEY.to_string(), Value::String(plaintext));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn options(value: Value) -> BackendOptions {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_encrypt_options_blanks_plaintext() {
        let cipher = CredentialCipher::new("salt");
        let mut opts = options(json!({"host": "h", "password": "hunter2"}));
        cipher.encrypt_options(&mut opts);

        assert_eq!(opts["password"], json!(""));
        let encoded = opts["password_encrypted"].as_str().unwrap();
        assert_ne!(encoded, "hunter2");
        assert_eq!(cipher.decrypt_password(encoded).unwrap(), "hunter2");
    }

    #[test]
    fn test_decrypt_options_restores_password() {
        let cipher = CredentialCipher::new("salt");
        let mut opts = options(json!({"user": "u", "password": "p@ss"}));
        cipher.encrypt_options(&mut opts);
        cipher.decrypt_options(&mut opts).unwrap();

        assert_eq!(opts, options(json!({"user": "u", "password": "p@ss"})));
    }

    #[test]
    fn test_legacy_plaintext_is_accepted_and_reencrypted() {
        let cipher = CredentialCipher::new("salt");
        let mut opts = options(json!({"password": "legacy"}));

        assert_eq!(
            StoredCredential::from_options(&opts).unwrap(),
            Some(StoredCredential::Legacy {
                plaintext: "legacy".into()
            })
        );
        cipher.decrypt_options(&mut opts).unwrap();
        assert_eq!(opts["password"], json!("legacy"));

        cipher.encrypt_options(&mut opts);
        assert!(opts.contains_key("password_encrypted"));
        assert_eq!(opts["password"], json!(""));
    }

    #[test]
    fn test_reencrypting_stored_options_is_noop() {
        let cipher = CredentialCipher::new("salt");
        let mut opts = options(json!({"password": "x"}));
        cipher.encrypt_options(&mut opts);
        let stored = opts.clone();
        cipher.encrypt_options(&mut opts);
        assert_eq!(opts, stored);
    }

    #[test]
    fn test_wrong_secret_does_not_panic() {
        let encoded = CredentialCipher::new("right").encrypt_password("secret value");
        match CredentialCipher::new("wrong").decrypt_password(&encoded) {
            Ok(garbage) => assert_ne!(garbage, "secret value"),
            Err(e) => assert!(matches!(e, CredentialError::Padding | CredentialError::InvalidUtf8)),
        }
    }

    #[test]
    fn test_malformed_records() {
        let cipher = CredentialCipher::new("salt");
        assert!(matches!(
            cipher.decrypt_password("not base64!!"),
            Err(CredentialError::Encoding(_))
        ));
        assert!(matches!(
            cipher.decrypt_password(&STANDARD.encode([0u8; 8])),
            Err(CredentialError::Truncated(8))
        ));
    }

    #[test]
    fn test_known_iv_is_prepended() {
        let cipher = CredentialCipher::new("salt");
        let record = cipher.encrypt_with_iv("abc", [7u8; IV_LEN]);
        let blob = STANDARD.decode(record.encode().unwrap()).unwrap();
        assert_eq!(&blob[..IV_LEN], &[7u8; IV_LEN]);
        assert_eq!(blob.len(), IV_LEN + 16);
    }

    proptest! {
        #[test]
        fn prop_round_trip_with_fresh_iv(password in "\\PC{1,64}") {
            let cipher = CredentialCipher::new("system-secret");
            let first = cipher.encrypt_password(&password);
            let second = cipher.encrypt_password(&password);

            prop_assert_ne!(&first, &second);
            prop_assert_eq!(first.len(), second.len());
            prop_assert_eq!(cipher.decrypt_password(&first).unwrap(), password.clone());
            prop_assert_eq!(cipher.decrypt_password(&second).unwrap(), password);
        }
    }
}
