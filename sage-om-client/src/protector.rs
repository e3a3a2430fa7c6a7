//! Machine-scoped, reversible protection of secrets stored in settings.
//!
//! Protected values are self-describing: `ENC:` followed by base64. Older
//! connection code wrapped stored secrets in an outer `ENCRYPTED:` marker;
//! that marker is peeled before decryption and never produced.

use crate::errors::{SageError, SageResult};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

#[cfg(any(test, feature = "test-support"))]
use mockall::automock;

/// Marker prefixed to every value this crate protects.
pub const PROTECTED_PREFIX: &str = "ENC:";

/// Outer marker used by legacy configurations, wrapping either a protected
/// value or plain text.
pub const LEGACY_PROTECTED_PREFIX: &str = "ENCRYPTED:";

/// Encrypts and decrypts secrets at rest.
#[cfg_attr(any(test, feature = "test-support"), automock)]
pub trait SecretProtector: Send + Sync {
    /// Protects `plain`. Blank or already protected input is returned as is.
    fn encrypt(&self, plain: &str) -> SageResult<String>;

    /// Recovers the plain value. Blank or unprotected input is returned as
    /// is; corrupt protected input is a [`SageError::Credential`].
    fn decrypt(&self, protected: &str) -> SageResult<String>;

    /// Cheap prefix check, never a decryption attempt.
    fn is_protected(&self, value: &str) -> bool {
        is_protected(value)
    }
}

pub fn is_protected(value: &str) -> bool {
    !value.trim().is_empty() && strip_marker(value).is_some()
}

fn strip_marker(value: &str) -> Option<&str> {
    value
        .strip_prefix(LEGACY_PROTECTED_PREFIX)
        .or_else(|| value.strip_prefix(PROTECTED_PREFIX))
}

/// Shared envelope handling around a raw byte cipher.
fn seal(plain: &str, cipher: impl FnOnce(&[u8]) -> SageResult<Vec<u8>>) -> SageResult<String> {
    if plain.trim().is_empty() || is_protected(plain) {
        return Ok(plain.to_owned());
    }
    let sealed = cipher(plain.as_bytes())?;
    Ok(format!("{PROTECTED_PREFIX}{}", BASE64.encode(sealed)))
}

fn open(protected: &str, cipher: impl FnOnce(&[u8]) -> SageResult<Vec<u8>>) -> SageResult<String> {
    if protected.trim().is_empty() {
        return Ok(protected.to_owned());
    }
    let inner = protected
        .strip_prefix(LEGACY_PROTECTED_PREFIX)
        .unwrap_or(protected);
    let Some(payload) = inner.strip_prefix(PROTECTED_PREFIX) else {
        return Ok(inner.to_owned());
    };
    let sealed = BASE64
        .decode(payload.trim())
        .map_err(|e| SageError::Credential(format!("malformed protected value: {e}")))?;
    let plain = cipher(&sealed)?;
    String::from_utf8(plain)
        .map_err(|_| SageError::Credential("decrypted value is not valid UTF-8".into()))
}

/// Windows DPAPI with local-machine scope.
#[cfg(windows)]
#[derive(Debug, Clone, Copy, Default)]
pub struct DpapiProtector;

#[cfg(windows)]
impl DpapiProtector {
    pub fn new() -> SageResult<Self> {
        Ok(Self)
    }
}

#[cfg(windows)]
impl SecretProtector for DpapiProtector {
    fn encrypt(&self, plain: &str) -> SageResult<String> {
        seal(plain, |bytes| dpapi::protect(bytes))
    }

    fn decrypt(&self, protected: &str) -> SageResult<String> {
        open(protected, |bytes| dpapi::unprotect(bytes))
    }
}

#[cfg(windows)]
mod dpapi {
    use crate::errors::{SageError, SageResult};
    use windows::Win32::Foundation::{HLOCAL, LocalFree};
    use windows::Win32::Security::Cryptography::{
        CRYPT_INTEGER_BLOB, CRYPTPROTECT_LOCAL_MACHINE, CRYPTPROTECT_UI_FORBIDDEN,
        CryptProtectData, CryptUnprotectData,
    };
    use windows::core::PCWSTR;

    fn blob(bytes: &[u8]) -> CRYPT_INTEGER_BLOB {
        CRYPT_INTEGER_BLOB {
            #[allow(clippy::cast_possible_truncation)]
            cbData: bytes.len() as u32,
            pbData: bytes.as_ptr().cast_mut(),
        }
    }

    /// Copies the output blob and frees the system allocation.
    fn take(out: CRYPT_INTEGER_BLOB) -> Vec<u8> {
        if out.pbData.is_null() {
            return Vec::new();
        }
        // SAFETY: DPAPI returned `cbData` bytes at `pbData`, allocated with
        // `LocalAlloc`; we copy them and free the buffer exactly once.
        unsafe {
            let data = std::slice::from_raw_parts(out.pbData, out.cbData as usize).to_vec();
            if !LocalFree(Some(HLOCAL(out.pbData.cast()))).0.is_null() {
                let error = std::io::Error::last_os_error();
                tracing::debug!(error = %error, "LocalFree did not release the DPAPI output buffer");
            }
            data
        }
    }

    pub(super) fn protect(plain: &[u8]) -> SageResult<Vec<u8>> {
        let input = blob(plain);
        let mut out = CRYPT_INTEGER_BLOB::default();
        // SAFETY: `input` borrows `plain` for the call; `out` is a valid
        // out-pointer released by `take`.
        unsafe {
            CryptProtectData(
                &input,
                PCWSTR::null(),
                None,
                None,
                None,
                CRYPTPROTECT_LOCAL_MACHINE | CRYPTPROTECT_UI_FORBIDDEN,
                &mut out,
            )
        }
        .map_err(|e| SageError::Credential(format!("DPAPI protect failed: {}", e.message())))?;
        Ok(take(out))
    }

    pub(super) fn unprotect(sealed: &[u8]) -> SageResult<Vec<u8>> {
        let input = blob(sealed);
        let mut out = CRYPT_INTEGER_BLOB::default();
        // SAFETY: As in `protect`.
        unsafe {
            CryptUnprotectData(
                &input,
                None,
                None,
                None,
                None,
                CRYPTPROTECT_UI_FORBIDDEN,
                &mut out,
            )
        }
        .map_err(|e| SageError::Credential(format!("DPAPI unprotect failed: {}", e.message())))?;
        Ok(take(out))
    }
}

#[cfg(not(windows))]
pub use machine_key::MachineKeyProtector;

#[cfg(not(windows))]
mod machine_key {
    use super::{SecretProtector, open, seal};
    use crate::errors::{SageError, SageResult};
    use chacha20poly1305::aead::Aead;
    use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce};
    use rand::RngCore;
    use rand::rngs::OsRng;
    use sha2::{Digest, Sha256};

    const NONCE_LEN: usize = 12;

    const MACHINE_ID_SOURCES: [&str; 3] =
        ["/etc/machine-id", "/var/lib/dbus/machine-id", "/etc/hostname"];

    /// ChaCha20-Poly1305 keyed by a hash of the machine identity.
    ///
    /// Sealed layout: 12-byte random nonce followed by ciphertext and tag.
    pub struct MachineKeyProtector {
        cipher: ChaCha20Poly1305,
    }

    impl MachineKeyProtector {
        /// Keys the protector from the first readable machine identity.
        pub fn new() -> SageResult<Self> {
            let secret = MACHINE_ID_SOURCES
                .iter()
                .find_map(|source| {
                    std::fs::read_to_string(source)
                        .ok()
                        .map(|s| s.trim().to_owned())
                        .filter(|s| !s.is_empty())
                })
                .ok_or_else(|| SageError::Credential("no machine identity available".into()))?;
            Ok(Self::from_machine_secret(secret.as_bytes()))
        }

        pub fn from_machine_secret(secret: &[u8]) -> Self {
            let digest = Sha256::digest(secret);
            let key = Key::from_slice(digest.as_slice());
            Self {
                cipher: ChaCha20Poly1305::new(key),
            }
        }

        fn seal_bytes(&self, plain: &[u8]) -> SageResult<Vec<u8>> {
            let mut nonce = [0u8; NONCE_LEN];
            OsRng.fill_bytes(&mut nonce);
            let ciphertext = self
                .cipher
                .encrypt(Nonce::from_slice(&nonce), plain)
                .map_err(|_| SageError::Credential("encryption failed".into()))?;
            let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
            sealed.extend_from_slice(&nonce);
            sealed.extend_from_slice(&ciphertext);
            Ok(sealed)
        }

        fn open_bytes(&self, sealed: &[u8]) -> SageResult<Vec<u8>> {
            if sealed.len() <= NONCE_LEN {
                return Err(SageError::Credential("protected value is truncated".into()));
            }
            let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
            self.cipher
                .decrypt(Nonce::from_slice(nonce), ciphertext)
                .map_err(|_| {
                    SageError::Credential("value was not protected on this machine or is corrupt".into())
                })
        }
    }

    impl SecretProtector for MachineKeyProtector {
        fn encrypt(&self, plain: &str) -> SageResult<String> {
            seal(plain, |bytes| self.seal_bytes(bytes))
        }

        fn decrypt(&self, protected: &str) -> SageResult<String> {
            open(protected, |bytes| self.open_bytes(bytes))
        }
    }
}

/// The platform's machine-scoped protector.
#[cfg(windows)]
pub type MachineProtector = DpapiProtector;

/// The platform's machine-scoped protector.
#[cfg(not(windows))]
pub type MachineProtector = MachineKeyProtector;
