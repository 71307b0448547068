// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Edge Agent Authors

//! Device key material: TPM detection, lockkey naming, and RSA unwrap/export.
//!
//! Crypto runs in-process (`openssl` for the software path, `tss-esapi` for
//! the TPM path — see `keystore::tpm`) rather than shelling out to an
//! external `openssl` binary.

pub mod tpm;

use std::path::{Path, PathBuf};

use openssl::pkey::Private;
use openssl::rsa::{Padding, Rsa};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Error, Result};

const TPM_MARKER: &str = "TPM2-BOUND-KEY-V1";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TpmKeyMarker {
    marker: String,
    key_material: Vec<u8>,
}

pub struct KeyStore {
    location: PathBuf,
    name_file: PathBuf,
}

enum KeyMaterial {
    Software(Rsa<Private>),
    Tpm(TpmKeyMarker),
}

impl KeyStore {
    pub fn new(cfg: &Config) -> Self {
        KeyStore {
            location: cfg.key.location.clone(),
            name_file: cfg.key.name_file.clone(),
        }
    }

    /// Queries the init system for the TPM resource-manager daemon's active
    /// status; an "inactive" result (or any query failure) means absent.
    pub fn has_tpm(&self) -> bool {
        tpm::is_tpm_active()
    }

    /// Reads the device's lockkey identifier, used to match `<name>.lockkey`
    /// entries inside an inbound package. A missing or unreadable name file
    /// is not an error: it just means this device has no lockkey name yet,
    /// so it can never match an encrypted package's lockkey entry.
    pub fn lockkey_name(&self) -> String {
        std::fs::read_to_string(&self.name_file)
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    }

    fn load_material(&self) -> Result<KeyMaterial> {
        let data = std::fs::read(&self.location).map_err(|_| Error::KeyAbsent)?;
        if let Ok(marker) = serde_json::from_slice::<TpmKeyMarker>(&data) {
            if marker.marker == TPM_MARKER {
                return Ok(KeyMaterial::Tpm(marker));
            }
        }
        let rsa = Rsa::private_key_from_pem(&data).map_err(|e| Error::RsaUnwrap(e.to_string()))?;
        Ok(KeyMaterial::Software(rsa))
    }

    /// Provisions a new key at the configured path, overwriting any existing
    /// key. Not idempotent by design: a second call rotates the key.
    pub fn provision(&self, name: &str) -> Result<()> {
        if let Some(dir) = self.location.parent() {
            std::fs::create_dir_all(dir)?;
            set_mode(dir, 0o744)?;
        }
        std::fs::write(&self.name_file, name)?;
        set_mode(&self.name_file, 0o644)?;

        if self.has_tpm() {
            let key_material = tpm::provision_primary()?;
            let marker = TpmKeyMarker {
                marker: TPM_MARKER.to_string(),
                key_material,
            };
            let data = serde_json::to_vec(&marker)?;
            std::fs::write(&self.location, data)?;
        } else {
            let rsa = Rsa::generate(2048).map_err(|e| Error::RsaUnwrap(e.to_string()))?;
            let pem = rsa
                .private_key_to_pem()
                .map_err(|e| Error::RsaUnwrap(e.to_string()))?;
            std::fs::write(&self.location, pem)?;
        }
        set_mode(&self.location, 0o600)?;
        Ok(())
    }

    pub fn has_key(&self) -> bool {
        self.location.exists()
    }

    /// Exports the public key as a PEM string.
    pub fn public_key_pem(&self) -> Result<String> {
        match self.load_material()? {
            KeyMaterial::Software(rsa) => {
                let pub_rsa = Rsa::from_public_components(
                    rsa.n().to_owned().unwrap(),
                    rsa.e().to_owned().unwrap(),
                )
                .map_err(|e| Error::RsaUnwrap(e.to_string()))?;
                let pem = pub_rsa
                    .public_key_to_pem()
                    .map_err(|e| Error::RsaUnwrap(e.to_string()))?;
                Ok(String::from_utf8_lossy(&pem).to_string())
            }
            KeyMaterial::Tpm(marker) => tpm::public_key_pem(&marker.key_material),
        }
    }

    /// RSA-decrypts a lockkey blob, routing through the TPM when the
    /// provisioned key is TPM-bound.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        match self.load_material()? {
            KeyMaterial::Software(rsa) => {
                let mut out = vec![0u8; rsa.size() as usize];
                let n = rsa
                    .private_decrypt(ciphertext, &mut out, Padding::PKCS1)
                    .map_err(|e| Error::RsaUnwrap(e.to_string()))?;
                out.truncate(n);
                Ok(out)
            }
            KeyMaterial::Tpm(marker) => tpm::rsa_decrypt(&marker.key_material, ciphertext),
        }
    }
}

#[allow(unused_variables)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &Path) -> Config {
        let json = format!(
            r#"{{
                "listen_address": "/tmp/x.sock",
                "data_volume": "{data}",
                "key": {{"location": "{loc}", "name_file": "{name}"}},
                "docker": {{"endpoint": "unix:///var/run/docker.sock"}}
            }}"#,
            data = dir.display(),
            loc = dir.join("key.pem").display(),
            name = dir.join("lockkey.name").display(),
        );
        std::fs::write(dir.join("ecs.json"), json).unwrap();
        Config::load(dir).unwrap()
    }

    #[test]
    fn test_has_key_false_before_provision() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let ks = KeyStore::new(&cfg);
        assert!(!ks.has_key());
    }

    #[test]
    fn test_public_key_export_fails_without_key() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let ks = KeyStore::new(&cfg);
        let err = ks.public_key_pem().unwrap_err();
        assert!(matches!(err, Error::KeyAbsent));
    }
}
