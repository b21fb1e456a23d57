//! Credential vault: encrypts, decrypts, masks and validates credential maps.
//!
//! Ciphertext layout (URL-safe base64): `version(1) || nonce(12) || AES-256-GCM(json)`.
//! The key is derived once from the master secret with PBKDF2-HMAC-SHA256.

use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use regex::Regex;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};
use std::num::NonZeroU32;

use crate::domain::CredentialMap;

pub const DEFAULT_SALT: &str = "connection_salt_2024";
pub const DEFAULT_ITERATIONS: u32 = 100_000;

const FORMAT_VERSION: u8 = 1;
const AAD: &[u8] = b"conduit.credentials";
const SENSITIVE_KEY_PATTERN: &str =
    r"(?i)(password|passwd|pwd|secret|token|key|credential|private|authorization|connection_string)";

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("Key derivation iterations must be greater than zero")]
    InvalidIterations,

    #[error("Failed to initialise cipher key")]
    Key,

    #[error("System random generator failed")]
    Random,

    #[error("Encryption failed")]
    Encrypt,

    #[error("Ciphertext is malformed: {0}")]
    Malformed(&'static str),

    #[error("Decryption failed (wrong key or tampered ciphertext)")]
    Decrypt,

    #[error("Credential serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub struct CredentialVault {
    key: LessSafeKey,
    rng: SystemRandom,
    sensitive: Regex,
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVault").finish_non_exhaustive()
    }
}

impl CredentialVault {
    pub fn new(master_secret: &SecretString, salt: &str, iterations: u32) -> Result<Self, VaultError> {
        let iterations = NonZeroU32::new(iterations).ok_or(VaultError::InvalidIterations)?;

        let mut key_bytes = [0u8; 32];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            iterations,
            salt.as_bytes(),
            master_secret.expose_secret().as_bytes(),
            &mut key_bytes,
        );
        let unbound = UnboundKey::new(&AES_256_GCM, &key_bytes).map_err(|_| VaultError::Key)?;

        let sensitive = Regex::new(SENSITIVE_KEY_PATTERN).map_err(|_| VaultError::Key)?;

        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
            sensitive,
        })
    }

    /// Encrypt a credential map into a transport-safe string.
    pub fn encrypt(&self, credentials: &CredentialMap) -> Result<String, VaultError> {
        let canonical = canonicalize(&Value::Object(credentials.clone()));
        let mut in_out = serde_json::to_vec(&canonical)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng.fill(&mut nonce_bytes).map_err(|_| VaultError::Random)?;

        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::from(AAD),
                &mut in_out,
            )
            .map_err(|_| VaultError::Encrypt)?;

        let mut payload = Vec::with_capacity(1 + NONCE_LEN + in_out.len());
        payload.push(FORMAT_VERSION);
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&in_out);
        Ok(URL_SAFE.encode(payload))
    }

    /// Decrypt, returning an empty map on any failure.
    pub fn decrypt(&self, ciphertext: &str) -> CredentialMap {
        match self.try_decrypt(ciphertext) {
            Ok(credentials) => credentials,
            Err(e) => {
                tracing::warn!("Failed to decrypt credentials: {}", e);
                CredentialMap::new()
            }
        }
    }

    /// Decrypt an optional stored value; `None` yields an empty map.
    pub fn decrypt_stored(&self, ciphertext: Option<&str>) -> CredentialMap {
        ciphertext.map(|c| self.decrypt(c)).unwrap_or_default()
    }

    pub fn try_decrypt(&self, ciphertext: &str) -> Result<CredentialMap, VaultError> {
        let payload = URL_SAFE
            .decode(ciphertext)
            .map_err(|_| VaultError::Malformed("not base64"))?;

        let (version, rest) = payload
            .split_first()
            .ok_or(VaultError::Malformed("empty payload"))?;
        if *version != FORMAT_VERSION {
            return Err(VaultError::Malformed("unknown format version"));
        }
        if rest.len() < NONCE_LEN + AES_256_GCM.tag_len() {
            return Err(VaultError::Malformed("payload too short"));
        }

        let (nonce_bytes, sealed) = rest.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| VaultError::Malformed("bad nonce"))?;

        let mut in_out = sealed.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::from(AAD), &mut in_out)
            .map_err(|_| VaultError::Decrypt)?;

        Ok(serde_json::from_slice(plaintext)?)
    }

    /// Mask values under sensitive keys, recursing into nested maps.
    pub fn mask(&self, credentials: &CredentialMap) -> CredentialMap {
        credentials
            .iter()
            .map(|(k, v)| (k.clone(), self.mask_entry(k, v)))
            .collect()
    }

    pub fn is_sensitive_key(&self, key: &str) -> bool {
        self.sensitive.is_match(key)
    }

    fn mask_entry(&self, key: &str, value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(self.mask(map)),
            Value::Array(items) => {
                Value::Array(items.iter().map(|item| self.mask_entry(key, item)).collect())
            }
            Value::Null => Value::Null,
            _ if !self.is_sensitive_key(key) => value.clone(),
            Value::String(s) => Value::String(mask_value(s)),
            other => Value::String(mask_value(&other.to_string())),
        }
    }
}

/// `first2 + stars + last2`, or all stars for four characters or fewer.
pub fn mask_value(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    let n = chars.len();
    if n <= 4 {
        return "*".repeat(n);
    }
    let mut masked = String::with_capacity(value.len());
    masked.extend(&chars[..2]);
    masked.push_str(&"*".repeat(n - 4));
    masked.extend(&chars[n - 2..]);
    masked
}

/// Fields an authentication type requires. `None` for unknown types.
pub fn required_fields(auth_type: &str) -> Option<&'static [&'static str]> {
    let fields: &'static [&'static str] = match auth_type {
        "none" => &[],
        "api_key" => &["api_key"],
        "bearer_token" | "jwt" => &["bearer_token"],
        "basic_auth" => &["username", "password"],
        "oauth2" | "oauth1" => &["client_id", "client_secret"],
        "custom_header" => &["custom_headers"],
        "certificate" => &["certificate"],
        "aws_access_key" => &["access_key_id", "secret_access_key"],
        _ => return None,
    };
    Some(fields)
}

/// True unless a field required by `auth_type` is absent or empty.
/// Unknown authentication types always pass.
pub fn validate(credentials: &CredentialMap, auth_type: &str) -> bool {
    missing_fields(credentials, auth_type).is_empty()
}

pub fn missing_fields(credentials: &CredentialMap, auth_type: &str) -> Vec<&'static str> {
    let Some(required) = required_fields(auth_type) else {
        return Vec::new();
    };
    required
        .iter()
        .copied()
        .filter(|field| credentials.get(*field).map_or(true, is_empty_value))
        .collect()
}

/// The declared authentication type (the `type` key), `none` when absent.
pub fn auth_type_of(credentials: &CredentialMap) -> &str {
    credentials
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("none")
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Object(m) => m.is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
