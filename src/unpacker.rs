// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Edge Agent Authors

//! Two-pass package extraction: an outer gzip+tar envelope carries an
//! optional lockkey and exactly one payload (clear `.gz` or encrypted
//! `.enc`); the payload itself is a second gzip+tar that gets extracted to
//! the target directory.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use openssl::symm::{Cipher, Crypter, Mode};
use regex::Regex;
use tar::Archive;

use crate::error::{Error, Result};
use crate::keystore::KeyStore;

const ENCRYPTED_EXTENSION: &str = ".enc";
const GZIP_EXTENSION: &str = ".gz";
const LOCKKEY_EXTENSION: &str = ".lockkey";
const DECRYPTED_LOCKKEY_LENGTH: usize = 65;
const IV_LENGTH: usize = 16;
const AES_LENGTH: usize = 32;

static_assertions::const_assert!(DECRYPTED_LOCKKEY_LENGTH > AES_LENGTH + IV_LENGTH);

fn traversal_regex() -> Regex {
    Regex::new(r"^.*\.\./.*$").unwrap()
}

struct OuterScan {
    encrypted: Option<Vec<u8>>,
    unencrypted: Option<Vec<u8>>,
    lockkey: Option<Vec<u8>>,
}

fn scan_outer(source: impl Read, keystore: &KeyStore) -> Result<OuterScan> {
    let gz = GzDecoder::new(source);
    let mut archive = Archive::new(gz);

    let mut scan = OuterScan {
        encrypted: None,
        unencrypted: None,
        lockkey: None,
    };
    let mut lockkey_name: Option<String> = None;

    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.header().entry_type().is_dir() {
            continue;
        }
        let path = entry.path()?.to_path_buf();
        let base = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        if base.ends_with(ENCRYPTED_EXTENSION) {
            if scan.encrypted.is_some() {
                return Err(Error::BothPayloads);
            }
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf)?;
            scan.encrypted = Some(buf);
        } else if base.ends_with(GZIP_EXTENSION) {
            if scan.unencrypted.is_some() {
                return Err(Error::BothPayloads);
            }
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf)?;
            scan.unencrypted = Some(buf);
        } else if base.ends_with(LOCKKEY_EXTENSION) {
            // The device's lockkey name is only resolved lazily, on the
            // first lockkey-shaped entry we see, so a clear-payload package
            // never has to touch the name file at all.
            let name = lockkey_name
                .get_or_insert_with(|| keystore.lockkey_name())
                .clone();
            let expected = format!("{}{}", name, LOCKKEY_EXTENSION);
            if base == expected {
                if scan.lockkey.is_some() {
                    return Err(Error::MultipleLockkeys);
                }
                let mut buf = Vec::new();
                entry.read_to_end(&mut buf)?;
                scan.lockkey = Some(buf);
            }
        }
    }

    if scan.encrypted.is_some() && scan.unencrypted.is_some() {
        return Err(Error::BothPayloads);
    }
    if scan.encrypted.is_none() && scan.unencrypted.is_none() {
        return Err(Error::NoPayload);
    }
    Ok(scan)
}

fn decrypt_payload(encrypted: &[u8], lockkey: &[u8], keystore: &KeyStore) -> Result<Vec<u8>> {
    let aes_pad_key_iv = keystore.decrypt(lockkey)?;
    if aes_pad_key_iv.len() < DECRYPTED_LOCKKEY_LENGTH {
        return Err(Error::DecryptedKeyShort);
    }
    let len = aes_pad_key_iv.len();
    let tail_start = len - AES_LENGTH - IV_LENGTH;
    let padding = aes_pad_key_iv[tail_start - 1] as usize;
    let aes_key = &aes_pad_key_iv[tail_start..len - IV_LENGTH];
    let iv = &aes_pad_key_iv[len - IV_LENGTH..len];

    if encrypted.len() % 16 != 0 {
        return Err(Error::PayloadNotBlockAligned);
    }

    let cipher = Cipher::aes_256_cbc();
    let mut crypter = Crypter::new(cipher, Mode::Decrypt, aes_key, Some(iv))
        .map_err(|e| Error::AesPayload(e.to_string()))?;
    crypter.pad(false);
    let mut out = vec![0u8; encrypted.len() + cipher.block_size()];
    let count = crypter
        .update(encrypted, &mut out)
        .map_err(|e| Error::AesPayload(e.to_string()))?;
    let rest = crypter
        .finalize(&mut out[count..])
        .map_err(|e| Error::AesPayload(e.to_string()))?;
    out.truncate(count + rest);

    if padding > out.len() {
        return Err(Error::AesPayload("padding longer than plaintext".into()));
    }
    out.truncate(out.len() - padding);
    Ok(out)
}

fn extract_inner(cleartext: &[u8], target: &Path) -> Result<()> {
    let re = traversal_regex();
    let gz = GzDecoder::new(cleartext);
    let mut archive = Archive::new(gz);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.to_path_buf();
        let joined = target.join(&name);
        if re.is_match(&joined.to_string_lossy()) {
            return Err(Error::PathTraversal);
        }

        if entry.header().entry_type().is_dir() {
            std::fs::create_dir_all(&joined)?;
            set_mode(&joined, entry.header().mode()?)?;
        } else {
            if let Some(parent) = joined.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out = std::fs::OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(&joined)?;
            std::io::copy(&mut entry, &mut out)?;
            set_mode(&joined, entry.header().mode()?)?;
        }
    }
    Ok(())
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

/// Unpacks `source` (an outer gzip+tar envelope) into `target`, consulting
/// `keystore` for lockkey decryption when the payload is encrypted.
pub fn unpack(source: impl Read, target: &Path, keystore: &KeyStore) -> Result<()> {
    let scan = scan_outer(source, keystore)?;

    let cleartext = if let Some(encrypted) = scan.encrypted {
        let lockkey = scan.lockkey.ok_or(Error::MissingLockkey)?;
        decrypt_payload(&encrypted, &lockkey, keystore)?
    } else {
        scan.unencrypted.expect("validated by scan_outer")
    };

    extract_inner(&cleartext, target)
}

/// Byte-for-byte test of the tail layout described in the design notes,
/// independent of any TPM/openssl RSA step.
#[allow(dead_code)]
fn split_tail(aes_pad_key_iv: &[u8]) -> Result<(u8, [u8; AES_LENGTH], [u8; IV_LENGTH])> {
    if aes_pad_key_iv.len() < DECRYPTED_LOCKKEY_LENGTH {
        return Err(Error::DecryptedKeyShort);
    }
    let len = aes_pad_key_iv.len();
    let tail_start = len - AES_LENGTH - IV_LENGTH;
    let padding = aes_pad_key_iv[tail_start - 1];
    let mut aes_key = [0u8; AES_LENGTH];
    aes_key.copy_from_slice(&aes_pad_key_iv[tail_start..len - IV_LENGTH]);
    let mut iv = [0u8; IV_LENGTH];
    iv.copy_from_slice(&aes_pad_key_iv[len - IV_LENGTH..len]);
    Ok((padding, aes_key, iv))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tar::{Builder, Header};

    fn build_outer_tar_gz(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut tar_bytes = Vec::new();
        {
            let mut builder = Builder::new(&mut tar_bytes);
            for (name, data) in entries {
                let mut header = Header::new_gnu();
                header.set_size(data.len() as u64);
                header.set_mode(0o644);
                header.set_cksum();
                builder.append_data(&mut header, name, *data).unwrap();
            }
            builder.finish().unwrap();
        }
        let mut gz =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        gz.write_all(&tar_bytes).unwrap();
        gz.finish().unwrap()
    }

    fn build_inner_payload(entries: &[(&str, &[u8])]) -> Vec<u8> {
        build_outer_tar_gz(entries)
    }

    #[test]
    fn test_clear_payload_extracts() {
        let inner = build_inner_payload(&[("docker-compose.yml", b"services: {}")]);
        let outer = build_outer_tar_gz(&[("app.gz", &inner)]);

        let dir = tempfile::tempdir().unwrap();
        let keydir = tempfile::tempdir().unwrap();
        std::fs::write(keydir.path().join("lockkey.name"), "device-a").unwrap();

        let cfg_json = format!(
            r#"{{"listen_address":"/tmp/s.sock","data_volume":"{d}","key":{{"location":"{loc}","name_file":"{name}"}},"docker":{{"endpoint":"unix:///var/run/docker.sock"}}}}"#,
            d = dir.path().display(),
            loc = keydir.path().join("key.pem").display(),
            name = keydir.path().join("lockkey.name").display(),
        );
        std::fs::write(keydir.path().join("ecs.json"), cfg_json).unwrap();
        let cfg = crate::config::Config::load(keydir.path()).unwrap();
        let keystore = KeyStore::new(&cfg);

        unpack(outer.as_slice(), dir.path(), &keystore).unwrap();
        let contents = std::fs::read_to_string(dir.path().join("docker-compose.yml")).unwrap();
        assert_eq!(contents, "services: {}");
    }

    #[test]
    fn test_clear_payload_extracts_without_lockkey_name_file() {
        // A device that has never been provisioned with a lockkey name has
        // no `lockkey.name` file at all; a clear-payload deploy must still
        // succeed since it never needs to resolve that name.
        let inner = build_inner_payload(&[("docker-compose.yml", b"services: {}")]);
        let outer = build_outer_tar_gz(&[("app.gz", &inner)]);

        let dir = tempfile::tempdir().unwrap();
        let keydir = tempfile::tempdir().unwrap();

        let cfg_json = format!(
            r#"{{"listen_address":"/tmp/s.sock","data_volume":"{d}","key":{{"location":"{loc}","name_file":"{name}"}},"docker":{{"endpoint":"unix:///var/run/docker.sock"}}}}"#,
            d = dir.path().display(),
            loc = keydir.path().join("key.pem").display(),
            name = keydir.path().join("lockkey.name").display(),
        );
        std::fs::write(keydir.path().join("ecs.json"), cfg_json).unwrap();
        let cfg = crate::config::Config::load(keydir.path()).unwrap();
        let keystore = KeyStore::new(&cfg);

        assert!(!keydir.path().join("lockkey.name").exists());
        unpack(outer.as_slice(), dir.path(), &keystore).unwrap();
        let contents = std::fs::read_to_string(dir.path().join("docker-compose.yml")).unwrap();
        assert_eq!(contents, "services: {}");
    }

    #[test]
    fn test_both_payloads_rejected() {
        let outer = build_outer_tar_gz(&[("app.gz", b"x"), ("app.enc", b"y")]);
        let dir = tempfile::tempdir().unwrap();
        let keydir = tempfile::tempdir().unwrap();
        std::fs::write(keydir.path().join("lockkey.name"), "device-a").unwrap();
        let cfg_json = format!(
            r#"{{"listen_address":"/tmp/s.sock","data_volume":"{d}","key":{{"location":"{loc}","name_file":"{name}"}},"docker":{{"endpoint":"unix:///var/run/docker.sock"}}}}"#,
            d = dir.path().display(),
            loc = keydir.path().join("key.pem").display(),
            name = keydir.path().join("lockkey.name").display(),
        );
        std::fs::write(keydir.path().join("ecs.json"), cfg_json).unwrap();
        let cfg = crate::config::Config::load(keydir.path()).unwrap();
        let keystore = KeyStore::new(&cfg);

        let err = unpack(outer.as_slice(), dir.path(), &keystore).unwrap_err();
        assert!(matches!(err, Error::BothPayloads));
    }

    #[test]
    fn test_no_payload_rejected() {
        let outer = build_outer_tar_gz(&[("readme.txt", b"hi")]);
        let dir = tempfile::tempdir().unwrap();
        let keydir = tempfile::tempdir().unwrap();
        std::fs::write(keydir.path().join("lockkey.name"), "device-a").unwrap();
        let cfg_json = format!(
            r#"{{"listen_address":"/tmp/s.sock","data_volume":"{d}","key":{{"location":"{loc}","name_file":"{name}"}},"docker":{{"endpoint":"unix:///var/run/docker.sock"}}}}"#,
            d = dir.path().display(),
            loc = keydir.path().join("key.pem").display(),
            name = keydir.path().join("lockkey.name").display(),
        );
        std::fs::write(keydir.path().join("ecs.json"), cfg_json).unwrap();
        let cfg = crate::config::Config::load(keydir.path()).unwrap();
        let keystore = KeyStore::new(&cfg);

        let err = unpack(outer.as_slice(), dir.path(), &keystore).unwrap_err();
        assert!(matches!(err, Error::NoPayload));
    }

    #[test]
    fn test_split_tail_rejects_short_buffer() {
        let buf = vec![0u8; 10];
        assert!(matches!(split_tail(&buf), Err(Error::DecryptedKeyShort)));
    }

    #[test]
    fn test_split_tail_extracts_expected_fields() {
        let mut buf = vec![0u8; DECRYPTED_LOCKKEY_LENGTH];
        let pad_index = buf.len() - AES_LENGTH - IV_LENGTH - 1;
        buf[pad_index] = 3;
        for (i, b) in buf[buf.len() - AES_LENGTH - IV_LENGTH..buf.len() - IV_LENGTH]
            .iter_mut()
            .enumerate()
        {
            *b = i as u8;
        }
        let (padding, key, _iv) = split_tail(&buf).unwrap();
        assert_eq!(padding, 3);
        assert_eq!(key[0], 0);
        assert_eq!(key[1], 1);
    }
}
