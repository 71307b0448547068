// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Edge Agent Authors

use serde::{Deserialize, Serialize};

/// Wire-compatible `"yes"|"no"` boolean. Persisted files use the string form;
/// in-memory code reads/writes this as a plain `bool`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct YesNo(pub bool);

impl Serialize for YesNo {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(if self.0 { "yes" } else { "no" })
    }
}

impl<'de> Deserialize<'de> for YesNo {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Ok(YesNo(s.eq_ignore_ascii_case("yes")))
    }
}

impl From<bool> for YesNo {
    fn from(b: bool) -> Self {
        YesNo(b)
    }
}

impl From<YesNo> for bool {
    fn from(v: YesNo) -> Self {
        v.0
    }
}

/// Client-supplied deploy metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub monitor: YesNo,
    #[serde(default)]
    pub delay_start: YesNo,
}

/// Persisted, registry-visible view of a deployed application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct App {
    pub uuid: String,
    pub name: String,
    pub version: String,
    pub path: String,
    #[serde(default)]
    pub monitor: YesNo,
    #[serde(default)]
    pub active: YesNo,
}

#[derive(Debug, Clone, Serialize)]
pub struct Container {
    pub id: String,
    pub name: String,
    pub command: String,
    pub state: String,
    pub ports: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppDetails {
    pub uuid: String,
    pub name: String,
    pub version: String,
    pub containers: Vec<Container>,
    pub status: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Applications {
    pub applications: Vec<App>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PersistentApplications {
    #[serde(rename = "persistent-applications")]
    pub persistent_applications: Vec<Metadata>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BasicResponse {
    pub status: String,
    pub error: String,
}

impl BasicResponse {
    pub fn ok() -> Self {
        BasicResponse {
            status: STATUS_OK.to_string(),
            error: String::new(),
        }
    }

    pub fn fail(err: impl std::fmt::Display) -> Self {
        BasicResponse {
            status: STATUS_FAIL.to_string(),
            error: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeployResponse {
    pub uuid: String,
    pub name: String,
    pub version: String,
    pub status: &'static str,
    pub error: String,
}

pub const STATUS_OK: &str = "Ok";
pub const STATUS_FAIL: &str = "Fail";
pub const STATUS_RUNNING: &str = "Running";
pub const STATUS_STOPPED: &str = "Stopped";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yes_no_round_trip() {
        let v: YesNo = serde_json::from_str("\"yes\"").unwrap();
        assert!(v.0);
        let v: YesNo = serde_json::from_str("\"no\"").unwrap();
        assert!(!v.0);
        assert_eq!(serde_json::to_string(&YesNo(true)).unwrap(), "\"yes\"");
    }

    #[test]
    fn test_metadata_defaults_monitor_no() {
        let m: Metadata = serde_json::from_str(r#"{"name":"a","version":"1"}"#).unwrap();
        assert!(!m.monitor.0);
        assert!(!m.delay_start.0);
    }
}
