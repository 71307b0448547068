// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Edge Agent Authors

//! Deploy/undeploy/start/stop/restart/kill/purge orchestration, plus boot
//! recovery (`init`). Every mutating operation holds the registry's write
//! lock for its whole duration, including external runtime calls; see
//! `health.rs` for the read-side counterpart.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::keystore::KeyStore;
use crate::registry::{ComposeApp, PersistedState, Registry, SharedRegistry};
use crate::runtime::ProjectRuntime;
use crate::types::{App, AppDetails, Container, Metadata, STATUS_RUNNING, STATUS_STOPPED};
use crate::{state, unpacker};

pub struct LifecycleManager {
    config: Config,
    keystore: Arc<KeyStore>,
    runtime: Arc<dyn ProjectRuntime>,
    registry: SharedRegistry,
}

impl LifecycleManager {
    pub fn new(
        config: Config,
        keystore: Arc<KeyStore>,
        runtime: Arc<dyn ProjectRuntime>,
        registry: SharedRegistry,
    ) -> Self {
        LifecycleManager {
            config,
            keystore,
            runtime,
            registry,
        }
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    fn persist_locked(&self, reg: &Registry) -> Result<()> {
        state::save(&self.config.application_json(), &reg.to_persisted())
    }

    /// Boot recovery: reloads persisted apps, brings active ones back up
    /// (side-loading images on first failure), then redeploys any stray
    /// persistent images that aren't already live.
    pub async fn init(&self) -> Result<()> {
        let persisted: PersistedState =
            state::load_or_default(&self.config.application_json())?;

        let mut reg = self.registry.write().await;
        reg.persistent = persisted.persistent.clone();

        for app in persisted.apps {
            let compose_file = PathBuf::from(&app.path).join("docker-compose.yml");
            let project = match self.runtime.open(&compose_file, &app.uuid).await {
                Ok(p) => p,
                Err(e) => {
                    log::warn!("failed reopening project {}: {}", app.uuid, e);
                    continue;
                }
            };

            if app.active.0 {
                if let Err(e) = project.down().await {
                    log::warn!("down() during init for {} failed: {}", app.uuid, e);
                }
                let up_result = project.up().await;
                if up_result.is_err() {
                    self.sideload_images(&PathBuf::from(&app.path)).await.ok();
                    if let Err(e) = project.up().await {
                        log::warn!(
                            "app {} could not be brought up during init: {}",
                            app.uuid,
                            e
                        );
                    }
                }
            }

            let services = project.services().await.unwrap_or_default();
            let health = services.into_iter().map(|s| (s, true)).collect();
            let events = project.subscribe();

            reg.apps.insert(
                app.uuid.clone(),
                Arc::new(ComposeApp {
                    app: std::sync::RwLock::new(app),
                    project,
                    events: tokio::sync::Mutex::new(events),
                    health: tokio::sync::Mutex::new(health),
                }),
            );
        }

        let stray: Vec<(String, Metadata)> = reg
            .persistent
            .iter()
            .filter(|(name, _)| !reg.apps.values().any(|a| a.snapshot().name == **name))
            .map(|(n, m)| (n.clone(), m.clone()))
            .collect();
        self.persist_locked(&reg)?;
        drop(reg);

        for (name, metadata) in stray {
            let backup_path = self.config.persistent_images_dir().join(format!("{}.tar.gz", name));
            if let Ok(file) = std::fs::File::open(&backup_path) {
                if let Err(e) = self.deploy(metadata, file, false).await {
                    log::warn!("failed to redeploy persistent image {}: {}", name, e);
                }
            }
        }

        Ok(())
    }

    async fn sideload_images(&self, dir: &std::path::Path) -> Result<()> {
        let entries = std::fs::read_dir(dir)?;
        for entry in entries.flatten() {
            let path = entry.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if name.contains(".tar") {
                self.runtime.load_image(&path).await?;
            }
        }
        Ok(())
    }

    pub async fn deploy(
        &self,
        metadata: Metadata,
        mut package: impl std::io::Read,
        persistent: bool,
    ) -> Result<App> {
        let id = Uuid::new_v4().to_string();
        let app_dir = self.config.app_dir(&id);

        let mut package_bytes = Vec::new();
        package.read_to_end(&mut package_bytes)?;

        let backup_paths = if persistent {
            let dir = self.config.persistent_images_dir();
            std::fs::create_dir_all(&dir)?;
            let backup_tar = dir.join(format!("{}.tar.gz", metadata.name));
            let backup_json = dir.join(format!("{}.json", metadata.name));
            std::fs::write(&backup_tar, &package_bytes)?;
            let mut sidecar = metadata.clone();
            sidecar.delay_start = false.into();
            std::fs::write(&backup_json, serde_json::to_vec_pretty(&sidecar)?)?;
            Some((backup_tar, backup_json))
        } else {
            None
        };

        if let Err(e) = self.deploy_inner(&id, &app_dir, &metadata, &package_bytes).await {
            let _ = std::fs::remove_dir_all(&app_dir);
            if let Some((tar, json)) = &backup_paths {
                let _ = std::fs::remove_file(tar);
                let _ = std::fs::remove_file(json);
            }
            return Err(e);
        }

        if persistent {
            let mut reg = self.registry.write().await;
            let mut sidecar = metadata.clone();
            sidecar.delay_start = false.into();
            reg.persistent.insert(metadata.name.clone(), sidecar);
            self.persist_locked(&reg)?;
        }

        Ok(App {
            uuid: id,
            name: metadata.name,
            version: metadata.version,
            path: app_dir.to_string_lossy().to_string(),
            monitor: metadata.monitor,
            active: (!metadata.delay_start.0).into(),
        })
    }

    /// Holds the registry write lock for the whole of unpacking, sideloading,
    /// and the external runtime calls, not just the final map insert: two
    /// concurrent deploys must not interleave their runtime calls.
    async fn deploy_inner(
        &self,
        id: &str,
        app_dir: &std::path::Path,
        metadata: &Metadata,
        package_bytes: &[u8],
    ) -> Result<()> {
        let mut reg = self.registry.write().await;

        std::fs::create_dir_all(app_dir)?;
        unpacker::unpack(package_bytes, app_dir, &self.keystore)?;
        self.sideload_images(app_dir).await?;

        let compose_file = app_dir.join("docker-compose.yml");
        let project = self.runtime.open(&compose_file, id).await?;
        let services = project.services().await?;
        let health: HashMap<String, bool> = services.into_iter().map(|s| (s, true)).collect();

        let mut app = App {
            uuid: id.to_string(),
            name: metadata.name.clone(),
            version: metadata.version.clone(),
            path: app_dir.to_string_lossy().to_string(),
            monitor: metadata.monitor,
            active: false.into(),
        };

        if !metadata.delay_start.0 {
            if let Err(e) = project.up().await {
                let _ = project.down().await;
                let _ = project.delete().await;
                return Err(e);
            }
        }

        app.active = (!metadata.delay_start.0).into();
        let events = project.subscribe();
        reg.apps.insert(
            id.to_string(),
            Arc::new(ComposeApp {
                app: std::sync::RwLock::new(app),
                project,
                events: tokio::sync::Mutex::new(events),
                health: tokio::sync::Mutex::new(health),
            }),
        );
        self.persist_locked(&reg)?;
        Ok(())
    }

    /// Runtime teardown errors are logged, not propagated: once an app is
    /// removed from the registry it must also leave the persisted state and
    /// the filesystem, even if the underlying containers are already gone.
    pub async fn undeploy(&self, id: &str) -> Result<()> {
        let mut reg = self.registry.write().await;
        let app = reg
            .apps
            .remove(id)
            .ok_or_else(|| Error::InvalidId(id.to_string()))?;
        if let Err(e) = app.project.down().await {
            log::warn!("down() during undeploy of {} failed: {}", id, e);
        }
        if let Err(e) = app.project.delete().await {
            log::warn!("delete() during undeploy of {} failed: {}", id, e);
        }
        let _ = std::fs::remove_dir_all(&app.snapshot().path);
        self.persist_locked(&reg)?;
        Ok(())
    }

    pub async fn kill(&self, id: &str) -> Result<()> {
        let mut reg = self.registry.write().await;
        let app = reg
            .apps
            .remove(id)
            .ok_or_else(|| Error::InvalidId(id.to_string()))?;
        if let Err(e) = app.project.kill("SIGKILL").await {
            log::warn!("kill() during purge of {} failed: {}", id, e);
        }
        if let Err(e) = app.project.delete().await {
            log::warn!("delete() during purge of {} failed: {}", id, e);
        }
        let _ = std::fs::remove_dir_all(&app.snapshot().path);
        self.persist_locked(&reg)?;
        Ok(())
    }

    pub async fn purge_persistent(&self, name: &str) -> Result<()> {
        let mut reg = self.registry.write().await;
        if !reg.persistent.contains_key(name) {
            return Err(Error::InvalidName(name.to_string()));
        }
        reg.persistent.remove(name);
        let dir = self.config.persistent_images_dir();
        let _ = std::fs::remove_file(dir.join(format!("{}.tar.gz", name)));
        let _ = std::fs::remove_file(dir.join(format!("{}.json", name)));
        self.persist_locked(&reg)?;
        Ok(())
    }

    pub async fn start(&self, id: &str) -> Result<()> {
        let mut reg = self.registry.write().await;
        let app = reg
            .apps
            .get(id)
            .cloned()
            .ok_or_else(|| Error::InvalidId(id.to_string()))?;
        app.project.up().await?;
        app.set_active(true);
        self.persist_locked(&reg)?;
        Ok(())
    }

    pub async fn stop(&self, id: &str) -> Result<()> {
        let mut reg = self.registry.write().await;
        let app = reg
            .apps
            .get(id)
            .cloned()
            .ok_or_else(|| Error::InvalidId(id.to_string()))?;
        app.project.down().await?;
        app.set_active(false);
        self.persist_locked(&reg)?;
        Ok(())
    }

    /// Not crash-atomic: a crash between `down()` and `up()` is corrected by
    /// `init()` retrying `up()` on the next boot.
    pub async fn restart(&self, id: &str) -> Result<()> {
        let mut reg = self.registry.write().await;
        let app = reg
            .apps
            .get(id)
            .cloned()
            .ok_or_else(|| Error::InvalidId(id.to_string()))?;
        app.set_active(false);
        app.project.down().await?;
        app.project.up().await?;
        app.set_active(true);
        self.persist_locked(&reg)?;
        Ok(())
    }

    pub async fn get_application(&self, id: &str) -> Result<AppDetails> {
        let reg = self.registry.read().await;
        let app = reg
            .apps
            .get(id)
            .ok_or_else(|| Error::InvalidId(id.to_string()))?;
        let containers = app.project.ps().await?;
        let status = status_from_containers(&containers);
        let snapshot = app.snapshot();
        Ok(AppDetails {
            uuid: snapshot.uuid,
            name: snapshot.name,
            version: snapshot.version,
            containers,
            status: status.to_string(),
            error: String::new(),
        })
    }

    pub async fn list_applications(&self) -> Vec<App> {
        self.registry.read().await.snapshot_apps()
    }

    pub async fn list_persistent_applications(&self) -> Vec<Metadata> {
        self.registry.read().await.snapshot_persistent()
    }
}

pub fn status_from_containers(containers: &[Container]) -> &'static str {
    if !containers.is_empty() && containers.iter().all(|c| c.state.starts_with("Up")) {
        STATUS_RUNNING
    } else {
        STATUS_STOPPED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_containers_empty_is_stopped() {
        assert_eq!(status_from_containers(&[]), STATUS_STOPPED);
    }

    #[test]
    fn test_status_from_containers_all_up_is_running() {
        let c = vec![Container {
            id: "1".into(),
            name: "a".into(),
            command: "x".into(),
            state: "Up 5 minutes".into(),
            ports: String::new(),
        }];
        assert_eq!(status_from_containers(&c), STATUS_RUNNING);
    }

    #[test]
    fn test_status_from_containers_one_exited_is_stopped() {
        let c = vec![
            Container {
                id: "1".into(),
                name: "a".into(),
                command: "x".into(),
                state: "Up 5 minutes".into(),
                ports: String::new(),
            },
            Container {
                id: "2".into(),
                name: "b".into(),
                command: "x".into(),
                state: "Exited (0)".into(),
                ports: String::new(),
            },
        ];
        assert_eq!(status_from_containers(&c), STATUS_STOPPED);
    }
}
