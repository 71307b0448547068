// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Edge Agent Authors

//! Atomic JSON persistence for the registry: writes to a temp file in the
//! same directory and renames it over the target, so a crash mid-write
//! never leaves a truncated state file behind.

use std::path::Path;
use std::sync::Mutex;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;

static STATE_LOCK: Mutex<()> = Mutex::new(());

pub fn save<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let _guard = STATE_LOCK.lock().unwrap();
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&tmp, value)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

pub fn load<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let _guard = STATE_LOCK.lock().unwrap();
    let data = std::fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}

pub fn load_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    match load(path) {
        Ok(v) => Ok(v),
        Err(crate::error::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            Ok(T::default())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, Default, PartialEq, Debug)]
    struct Sample {
        n: u32,
        s: String,
    }

    #[test]
    fn test_save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let v = Sample {
            n: 7,
            s: "hi".into(),
        };
        save(&path, &v).unwrap();
        let loaded: Sample = load(&path).unwrap();
        assert_eq!(v, loaded);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let loaded: Sample = load_or_default(&path).unwrap();
        assert_eq!(loaded, Sample::default());
    }
}
