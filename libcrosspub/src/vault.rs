//! Credential vault: authenticated-encryption envelopes for stored secrets
//!
//! Every credential is persisted as a versioned envelope
//! `v1:<iv>:<tag>:<ciphertext>` (hex-encoded), AES-256-GCM under a key derived
//! from a deployment-wide master secret. Older records may still carry the
//! legacy unauthenticated format `<iv>:<ciphertext>` (AES-256-CTR) or raw
//! plaintext; those are only accepted in explicit migration mode, and every
//! fallback is logged.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use ctr::cipher::{KeyIvInit, StreamCipher};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::config::VaultConfig;
use crate::error::{Result, VaultError};

const ENVELOPE_PREFIX: &str = "v1:";
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const LEGACY_IV_LEN: usize = 16;

type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

/// Encrypts and decrypts stored credentials.
///
/// With no master secret configured the vault runs disabled (plaintext
/// passthrough); a production-flagged deployment refuses to construct in that
/// state rather than silently storing secrets in the clear.
pub struct CredentialVault {
    key: Option<Zeroizing<[u8; 32]>>,
    allow_legacy: bool,
}

impl CredentialVault {
    pub fn new(master_secret: Option<&str>, allow_legacy: bool, production: bool) -> Result<Self> {
        let key = match master_secret {
            Some(secret) if !secret.is_empty() => {
                let digest = Sha256::digest(secret.as_bytes());
                Some(Zeroizing::new(digest.into()))
            }
            _ if production => return Err(VaultError::MissingMasterKey.into()),
            _ => {
                warn!("No master encryption secret configured; credentials will be stored unencrypted");
                None
            }
        };

        Ok(Self { key, allow_legacy })
    }

    /// Build a vault from configuration, letting `CROSSPUB_MASTER_KEY`
    /// override the config-file secret.
    pub fn from_config(config: &VaultConfig) -> Result<Self> {
        let env_secret = std::env::var("CROSSPUB_MASTER_KEY").ok();
        let secret = env_secret.as_deref().or(config.master_secret.as_deref());
        Self::new(secret, config.allow_legacy, config.production)
    }

    /// Whether encryption is active.
    pub fn is_enabled(&self) -> bool {
        self.key.is_some()
    }

    /// Encrypt a credential into the versioned envelope form.
    pub fn seal(&self, plaintext: &str) -> Result<String> {
        let key = match &self.key {
            Some(key) => key,
            None => return Ok(plaintext.to_string()),
        };

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_ref()));
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|e| VaultError::Crypto(e.to_string()))?;

        // aes-gcm appends the tag to the ciphertext; the envelope carries it
        // as its own segment
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

        Ok(format!(
            "{}{}:{}:{}",
            ENVELOPE_PREFIX,
            hex::encode(nonce_bytes),
            hex::encode(tag),
            hex::encode(ciphertext)
        ))
    }

    /// Decrypt a stored credential.
    ///
    /// Strict mode accepts only the `v1:` envelope. Migration mode
    /// additionally tries the legacy unauthenticated format and finally
    /// returns the input unchanged, treating it as already-plaintext.
    pub fn open(&self, stored: &str) -> Result<String> {
        let key = match &self.key {
            Some(key) => key,
            None => return Ok(stored.to_string()),
        };

        if let Some(body) = stored.strip_prefix(ENVELOPE_PREFIX) {
            match open_envelope(key, body) {
                Ok(plaintext) => return Ok(plaintext),
                Err(e) if self.allow_legacy => {
                    warn!("Envelope decryption failed ({e}); treating stored value as plaintext");
                    return Ok(stored.to_string());
                }
                Err(e) => return Err(e.into()),
            }
        }

        if !self.allow_legacy {
            return Err(VaultError::Unrecognized(
                "value is not a v1 envelope and legacy migration mode is disabled".to_string(),
            )
            .into());
        }

        match open_legacy(key, stored) {
            Some(plaintext) => {
                debug!("Decrypted credential stored in legacy format");
                Ok(plaintext)
            }
            None => {
                warn!("Stored credential matches no known cipher format; treating as plaintext");
                Ok(stored.to_string())
            }
        }
    }
}

fn open_envelope(key: &[u8; 32], body: &str) -> std::result::Result<String, VaultError> {
    let mut parts = body.splitn(3, ':');
    let (iv_hex, tag_hex, ct_hex) = match (parts.next(), parts.next(), parts.next()) {
        (Some(iv), Some(tag), Some(ct)) => (iv, tag, ct),
        _ => {
            return Err(VaultError::Unrecognized(
                "envelope does not have iv:tag:ciphertext segments".to_string(),
            ))
        }
    };

    let iv = hex::decode(iv_hex)
        .map_err(|e| VaultError::Unrecognized(format!("bad iv encoding: {e}")))?;
    let tag = hex::decode(tag_hex)
        .map_err(|e| VaultError::Unrecognized(format!("bad tag encoding: {e}")))?;
    let ciphertext = hex::decode(ct_hex)
        .map_err(|e| VaultError::Unrecognized(format!("bad ciphertext encoding: {e}")))?;

    if iv.len() != NONCE_LEN || tag.len() != TAG_LEN {
        return Err(VaultError::Unrecognized(
            "envelope iv or tag has the wrong length".to_string(),
        ));
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut sealed = ciphertext;
    sealed.extend_from_slice(&tag);

    let plaintext = cipher
        .decrypt(Nonce::from_slice(&iv), sealed.as_slice())
        .map_err(|e| VaultError::Unauthentic(e.to_string()))?;

    String::from_utf8(plaintext)
        .map_err(|_| VaultError::Unauthentic("decrypted bytes are not UTF-8".to_string()))
}

/// Best-effort decrypt of the legacy `<iv>:<ciphertext>` AES-256-CTR format.
/// Unauthenticated, so the only failure signals are malformed hex, a wrong
/// IV length, or non-UTF-8 output.
fn open_legacy(key: &[u8; 32], stored: &str) -> Option<String> {
    let (iv_hex, ct_hex) = stored.split_once(':')?;
    let iv = hex::decode(iv_hex).ok()?;
    let mut buf = hex::decode(ct_hex).ok()?;

    if iv.len() != LEGACY_IV_LEN || buf.is_empty() {
        return None;
    }

    let mut cipher = Aes256Ctr::new_from_slices(key, &iv).ok()?;
    cipher.apply_keystream(&mut buf);

    String::from_utf8(buf).ok()
}
