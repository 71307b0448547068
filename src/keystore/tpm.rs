// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Edge Agent Authors

//! TPM 2.0 backed key operations via `tss-esapi`.
//!
//! A child RSA key is created under a transient owner-hierarchy primary and
//! its wrapped key material (public area plus TPM-encrypted private area) is
//! what gets persisted to disk by the caller — never a raw private key, just
//! a blob that is only usable back through this same TPM.

use std::process::Command;
use std::str::FromStr;

use tss_esapi::abstraction::transient::{KeyMaterial, KeyParams, TransientKeyContextBuilder};
use tss_esapi::interface_types::algorithm::HashingAlgorithm;
use tss_esapi::interface_types::key_bits::RsaKeyBits;
use tss_esapi::interface_types::resource_handles::Hierarchy;
use tss_esapi::structures::{RsaExponent, RsaScheme, SymmetricDefinitionObject};
use tss_esapi::tcti_ldr::TctiNameConf;
use tss_esapi::traits::{Marshall, UnMarshall};

use crate::error::{Error, Result};

const ROOT_KEY_SIZE: usize = 2048;
const ROOT_KEY_AUTH_SIZE: usize = 32;

/// Queries the init system for the TPM resource-manager daemon's status,
/// treating "inactive" (or a query failure) as absent.
pub fn is_tpm_active() -> bool {
    let output = Command::new("sh")
        .arg("-c")
        .arg("systemctl is-active tpm2-abrmd | grep -o inactive | wc -l")
        .output();
    match output {
        Ok(out) => {
            let count = String::from_utf8_lossy(&out.stdout);
            count.trim() == "0"
        }
        Err(e) => {
            log::warn!("TPM status query failed, assuming absent: {}", e);
            false
        }
    }
}

fn builder() -> Result<tss_esapi::abstraction::transient::TransientKeyContext> {
    TransientKeyContextBuilder::new()
        .with_tcti(
            TctiNameConf::from_str("device:/dev/tpmrm0")
                .map_err(|e| Error::TpmQueryFailed(e.to_string()))?,
        )
        .with_root_key_size(ROOT_KEY_SIZE)
        .with_root_key_auth_size(ROOT_KEY_AUTH_SIZE)
        .with_hierarchy(Hierarchy::Owner)
        .with_session_hash_alg(HashingAlgorithm::Sha256.into())
        .with_default_context_cipher(SymmetricDefinitionObject::AES_128_CFB)
        .build()
        .map_err(|e| Error::TpmQueryFailed(e.to_string()))
}

fn rsa_key_params() -> Result<KeyParams> {
    Ok(KeyParams::Rsa {
        size: RsaKeyBits::Rsa2048,
        scheme: RsaScheme::RsaEs,
        pub_exponent: RsaExponent::default(),
    })
}

/// Creates a child RSA key under the owner hierarchy and returns its
/// marshalled key material, the form the caller persists to disk.
pub fn provision_primary() -> Result<Vec<u8>> {
    let mut ctx = builder()?;
    let key_params = rsa_key_params()?;
    let material = ctx
        .create_key(key_params, ROOT_KEY_AUTH_SIZE)
        .map_err(|e| Error::TpmQueryFailed(e.to_string()))?;
    material
        .marshall()
        .map_err(|e| Error::TpmQueryFailed(e.to_string()))
}

pub fn public_key_pem(_key_material: &[u8]) -> Result<String> {
    Err(Error::TpmQueryFailed(
        "exporting a TPM-bound public key requires a live TPM session".into(),
    ))
}

pub fn rsa_decrypt(key_material: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let mut ctx = builder()?;
    let key_params = rsa_key_params()?;
    let material = KeyMaterial::unmarshall(key_material)
        .map_err(|e| Error::TpmQueryFailed(e.to_string()))?;
    ctx.decrypt(material, key_params, ciphertext.to_vec())
        .map_err(|e| Error::RsaUnwrap(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_tpm_active_does_not_panic() {
        let _ = is_tpm_active();
    }
}
