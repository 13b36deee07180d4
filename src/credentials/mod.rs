//! Sealed-credential access.
//!
//! The engine never provisions, rotates or persists its process secrets;
//! it consumes them through the narrow [`CredentialProvider`] interface.
//! Production deployments seal the pepper and the remote API key with
//! `systemd-creds`; [`SystemdCredsProvider`] unseals them on demand.
//! Embedders and tests can supply [`StaticCredentials`] instead.

use std::path::PathBuf;
use std::process::Command;

use zeroize::{Zeroize, Zeroizing};

use crate::errors::{CofferError, Result};

/// Length of the pepper in bytes.
pub const PEPPER_LEN: usize = 32;

/// The process-lifetime pepper secret, zeroized on drop.
///
/// Combined with the user password during key derivation; its absence
/// makes offline password guessing infeasible even with a stolen
/// container.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct Pepper {
    bytes: [u8; PEPPER_LEN],
}

impl Pepper {
    pub fn new(bytes: [u8; PEPPER_LEN]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; PEPPER_LEN] {
        &self.bytes
    }
}

impl std::fmt::Debug for Pepper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pepper")
            .field("bytes", &"*** REDACTED ***")
            .finish()
    }
}

/// Credentials for the remote object store, obtained opaquely from the
/// provider.  The engine never derives, stores or logs them.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct RemoteCredentials {
    pub key_id: String,
    pub key_name: String,
    pub secret: String,
}

impl std::fmt::Debug for RemoteCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCredentials")
            .field("key_id", &self.key_id)
            .field("key_name", &self.key_name)
            .field("secret", &"*** REDACTED ***")
            .finish()
    }
}

/// Source of unsealed process secrets.
///
/// Implementations must treat both secrets as opaque: no rotation, no
/// write-back, no logging.
pub trait CredentialProvider {
    /// The pepper combined with the user password at key derivation.
    fn pepper(&self) -> Result<Pepper>;

    /// Credentials for the remote object store.
    fn remote_credentials(&self) -> Result<RemoteCredentials>;
}

// ---------------------------------------------------------------------------
// systemd-creds backed provider
// ---------------------------------------------------------------------------

/// Unseals credentials with `systemd-creds decrypt --user`.
///
/// The sealed files are produced by external provisioning scripts; this
/// provider only reads them.  The pepper file decrypts to a hex-encoded
/// 32-byte value, the remote credential file to a JSON object with
/// `key_id`, `key_name` and `secret` fields.
pub struct SystemdCredsProvider {
    pepper_path: PathBuf,
    remote_path: PathBuf,
}

impl SystemdCredsProvider {
    pub fn new(pepper_path: PathBuf, remote_path: PathBuf) -> Self {
        Self {
            pepper_path,
            remote_path,
        }
    }

    /// Run `systemd-creds decrypt` for one sealed file and return the
    /// plaintext output.
    fn unseal(&self, name: &str, path: &PathBuf) -> Result<Zeroizing<Vec<u8>>> {
        let output = Command::new("systemd-creds")
            .args(["decrypt", "--user", &format!("--name={name}")])
            .arg(path)
            .arg("-")
            .output()
            .map_err(|e| CofferError::Credential(format!("systemd-creds failed to run: {e}")))?;
        if !output.status.success() {
            return Err(CofferError::Credential(format!(
                "systemd-creds decrypt failed for '{name}'"
            )));
        }
        Ok(Zeroizing::new(output.stdout))
    }
}

impl CredentialProvider for SystemdCredsProvider {
    fn pepper(&self) -> Result<Pepper> {
        let raw = self.unseal("pepper", &self.pepper_path)?;
        let text = std::str::from_utf8(&raw)
            .map_err(|_| CofferError::Credential("pepper is not valid UTF-8 hex".into()))?;

        let mut bytes = [0u8; PEPPER_LEN];
        hex::decode_to_slice(text.trim(), &mut bytes)
            .map_err(|_| CofferError::Credential("pepper is not 32 hex-encoded bytes".into()))?;

        let pepper = Pepper::new(bytes);
        bytes.zeroize();
        Ok(pepper)
    }

    fn remote_credentials(&self) -> Result<RemoteCredentials> {
        #[derive(serde::Deserialize)]
        struct Raw {
            key_id: String,
            key_name: String,
            secret: String,
        }

        let raw = self.unseal("remote", &self.remote_path)?;
        let parsed: Raw = serde_json::from_slice(&raw)
            .map_err(|_| CofferError::Credential("remote credential file is not valid".into()))?;

        Ok(RemoteCredentials {
            key_id: parsed.key_id,
            key_name: parsed.key_name,
            secret: parsed.secret,
        })
    }
}

// ---------------------------------------------------------------------------
// Static provider
// ---------------------------------------------------------------------------

/// Holds already-unsealed credentials in memory.
///
/// Used by tests and by embedders that manage sealing themselves.
pub struct StaticCredentials {
    pepper: [u8; PEPPER_LEN],
    remote: Option<RemoteCredentials>,
}

impl StaticCredentials {
    pub fn new(pepper: [u8; PEPPER_LEN]) -> Self {
        Self {
            pepper,
            remote: None,
        }
    }

    pub fn with_remote(mut self, remote: RemoteCredentials) -> Self {
        self.remote = Some(remote);
        self
    }
}

impl CredentialProvider for StaticCredentials {
    fn pepper(&self) -> Result<Pepper> {
        Ok(Pepper::new(self.pepper))
    }

    fn remote_credentials(&self) -> Result<RemoteCredentials> {
        self.remote
            .clone()
            .ok_or_else(|| CofferError::Credential("no remote credentials configured".into()))
    }
}

impl Drop for StaticCredentials {
    fn drop(&mut self) {
        self.pepper.zeroize();
    }
}
