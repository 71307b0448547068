// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Edge Agent Authors

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

const CONFIG_FILE_NAME: &str = "ecs.json";

#[derive(Debug, Clone, Deserialize)]
pub struct DockerConfig {
    pub endpoint: String,
    #[serde(default = "default_port")]
    pub reserved_port: u16,
    #[serde(default = "default_ssl_port")]
    pub reserved_ssl_port: u16,
}

fn default_port() -> u16 {
    2375
}
fn default_ssl_port() -> u16 {
    2376
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeyConfig {
    pub location: PathBuf,
    pub name_file: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub listen_address: String,
    pub data_volume: PathBuf,
    #[serde(default = "default_timeout")]
    pub read_timeout: u64,
    #[serde(default = "default_timeout")]
    pub write_timeout: u64,
    pub key: KeyConfig,
    pub docker: DockerConfig,
}

fn default_timeout() -> u64 {
    15
}

impl Config {
    /// Loads `<dir>/ecs.json`. A missing or malformed file is a fatal
    /// startup error.
    pub fn load(dir: &Path) -> Result<Config> {
        let path = dir.join(CONFIG_FILE_NAME);
        let data = std::fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("reading {}: {}", path.display(), e)))?;
        let cfg: Config = serde_json::from_str(&data)
            .map_err(|e| Error::Config(format!("parsing {}: {}", path.display(), e)))?;
        Ok(cfg)
    }

    pub fn application_json(&self) -> PathBuf {
        self.data_volume.join("application.json")
    }

    pub fn persistent_images_dir(&self) -> PathBuf {
        self.data_volume.join("application_pimages")
    }

    pub fn app_dir(&self, uuid: &str) -> PathBuf {
        self.data_volume.join(uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_valid_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = std::fs::File::create(dir.path().join(CONFIG_FILE_NAME)).unwrap();
        write!(
            f,
            r#"{{
                "listen_address": "/run/capsd.sock",
                "data_volume": "/var/lib/capsd",
                "key": {{"location": "/etc/capsd/key.pem", "name_file": "/etc/capsd/lockkey.name"}},
                "docker": {{"endpoint": "unix:///var/run/docker.sock"}}
            }}"#
        )
        .unwrap();

        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.listen_address, "/run/capsd.sock");
        assert_eq!(cfg.read_timeout, 15);
        assert_eq!(cfg.docker.reserved_port, 2375);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(dir.path()).is_err());
    }

    #[test]
    fn test_load_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), b"not json").unwrap();
        assert!(Config::load(dir.path()).is_err());
    }
}
