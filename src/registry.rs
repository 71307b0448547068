// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Edge Agent Authors

//! In-memory authoritative state: apps, persistent images, and per-app
//! health maps, behind one readers-writer lock (see concurrency notes in
//! `lifecycle` and `health`).

use std::collections::HashMap;
use std::sync::{Arc, RwLock as StdRwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::runtime::Project;
use crate::types::{App, Metadata};

/// `app` is a small, frequently re-read/written struct guarded by its own
/// lock so that its `active` flag can be flipped without upgrading the
/// registry's own read lock to a write lock (see `health.rs`).
pub struct ComposeApp {
    pub app: StdRwLock<App>,
    pub project: Box<dyn Project>,
    pub events: Mutex<tokio::sync::mpsc::Receiver<crate::runtime::ContainerEvent>>,
    pub health: Mutex<HashMap<String, bool>>,
}

impl ComposeApp {
    pub fn snapshot(&self) -> App {
        self.app.read().unwrap().clone()
    }

    pub fn uuid(&self) -> String {
        self.app.read().unwrap().uuid.clone()
    }

    pub fn set_active(&self, active: bool) {
        self.app.write().unwrap().active = active.into();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PersistedState {
    pub apps: Vec<App>,
    pub persistent: HashMap<String, Metadata>,
}

#[derive(Default)]
pub struct Registry {
    pub apps: HashMap<String, Arc<ComposeApp>>,
    pub persistent: HashMap<String, Metadata>,
}

impl Registry {
    pub fn snapshot_apps(&self) -> Vec<App> {
        self.apps.values().map(|c| c.snapshot()).collect()
    }

    pub fn snapshot_persistent(&self) -> Vec<Metadata> {
        self.persistent.values().cloned().collect()
    }

    pub fn to_persisted(&self) -> PersistedState {
        PersistedState {
            apps: self.snapshot_apps(),
            persistent: self.persistent.clone(),
        }
    }
}

pub type SharedRegistry = Arc<RwLock<Registry>>;

pub fn new_shared() -> SharedRegistry {
    Arc::new(RwLock::new(Registry::default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_registry_snapshots_are_empty() {
        let r = Registry::default();
        assert!(r.snapshot_apps().is_empty());
        assert!(r.snapshot_persistent().is_empty());
    }
}
