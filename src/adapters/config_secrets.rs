//! Sealed values in the configuration file.
//!
//! A value such as `vault.master_key` may be written as `age:<base64>`; it is
//! opened at startup with the passphrase from `CONDUIT_SECRET_PASSPHRASE` or
//! `--secret-passphrase`. Seal a value with `conduit encrypt-secret <VALUE>`.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use secrecy::{ExposeSecret, SecretString};
use std::io::{Read, Write};

const SEALED_PREFIX: &str = "age:";

/// Environment variable consulted when the config file carries no master key.
pub const MASTER_KEY_ENV: &str = "CONNECTION_MASTER_KEY";

/// Development fallback used when nothing else is configured.
pub const DEV_MASTER_KEY: &str = "default-key-change-in-production";

pub fn is_sealed(value: &str) -> bool {
    value.starts_with(SEALED_PREFIX)
}

/// Seal `plaintext` with a passphrase, producing `age:<base64>`.
pub fn seal(plaintext: &str, passphrase: &SecretString) -> Result<String, ConfigSecretError> {
    let encryptor = age::Encryptor::with_user_passphrase(age::secrecy::SecretString::from(
        passphrase.expose_secret().to_string(),
    ));

    let mut sealed = Vec::new();
    let mut writer = encryptor.wrap_output(&mut sealed)?;
    writer.write_all(plaintext.as_bytes())?;
    writer.finish()?;

    Ok(format!("{}{}", SEALED_PREFIX, STANDARD.encode(&sealed)))
}

/// Open a sealed value. Plain values pass through untouched.
pub fn open(value: &str, passphrase: Option<&SecretString>) -> Result<SecretString, ConfigSecretError> {
    let Some(encoded) = value.strip_prefix(SEALED_PREFIX) else {
        return Ok(SecretString::from(value.to_string()));
    };
    let passphrase = passphrase.ok_or(ConfigSecretError::NoPassphrase)?;

    let sealed = STANDARD
        .decode(encoded)
        .map_err(|_| ConfigSecretError::InvalidBase64)?;

    let decryptor = match age::Decryptor::new(&sealed[..])? {
        age::Decryptor::Passphrase(d) => d,
        _ => return Err(ConfigSecretError::UnsupportedRecipient),
    };

    let mut opened = Vec::new();
    let mut reader = decryptor.decrypt(
        &age::secrecy::SecretString::from(passphrase.expose_secret().to_string()),
        None,
    )?;
    reader.read_to_end(&mut opened)?;

    String::from_utf8(opened)
        .map(SecretString::from)
        .map_err(|_| ConfigSecretError::InvalidUtf8)
}

/// Where the vault master key came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterKeySource {
    Config,
    Environment,
    DevelopmentDefault,
}

/// Resolve the vault master key: config value (possibly sealed), then
/// `CONNECTION_MASTER_KEY`, then the development default.
pub fn resolve_master_key(
    configured: Option<&str>,
    passphrase: Option<&SecretString>,
) -> Result<(SecretString, MasterKeySource), ConfigSecretError> {
    if let Some(value) = configured.filter(|v| !v.is_empty()) {
        return Ok((open(value, passphrase)?, MasterKeySource::Config));
    }
    if let Ok(value) = std::env::var(MASTER_KEY_ENV) {
        if !value.is_empty() {
            return Ok((open(&value, passphrase)?, MasterKeySource::Environment));
        }
    }
    Ok((
        SecretString::from(DEV_MASTER_KEY.to_string()),
        MasterKeySource::DevelopmentDefault,
    ))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigSecretError {
    #[error("Sealed value is not valid base64")]
    InvalidBase64,

    #[error("age encryption error: {0}")]
    Seal(#[from] age::EncryptError),

    #[error("age decryption error: {0}")]
    Open(#[from] age::DecryptError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sealed value uses a recipient type other than passphrase")]
    UnsupportedRecipient,

    #[error("Opened value is not valid UTF-8")]
    InvalidUtf8,

    #[error("Sealed value found but no passphrase was provided")]
    NoPassphrase,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pass(p: &str) -> SecretString {
        SecretString::from(p.to_string())
    }

    #[test]
    fn test_seal_then_open() {
        let sealed = seal("vault-master", &pass("hunter2")).unwrap();
        assert!(is_sealed(&sealed));

        let opened = open(&sealed, Some(&pass("hunter2"))).unwrap();
        assert_eq!(opened.expose_secret(), "vault-master");
    }

    #[test]
    fn test_open_with_wrong_passphrase_fails() {
        let sealed = seal("vault-master", &pass("right")).unwrap();
        assert!(open(&sealed, Some(&pass("wrong"))).is_err());
    }

    #[test]
    fn test_sealed_value_without_passphrase_is_rejected() {
        let sealed = seal("vault-master", &pass("right")).unwrap();
        assert!(matches!(open(&sealed, None), Err(ConfigSecretError::NoPassphrase)));
    }

    #[test]
    fn test_configured_plain_key_wins() {
        let (key, source) = resolve_master_key(Some("from-config"), None).unwrap();
        assert_eq!(key.expose_secret(), "from-config");
        assert_eq!(source, MasterKeySource::Config);
    }

    #[test]
    fn test_configured_sealed_key_is_opened() {
        let sealed = seal("sealed-master", &pass("pp")).unwrap();
        let (key, source) = resolve_master_key(Some(&sealed), Some(&pass("pp"))).unwrap();
        assert_eq!(key.expose_secret(), "sealed-master");
        assert_eq!(source, MasterKeySource::Config);
    }
}
