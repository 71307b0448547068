// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Edge Agent Authors

//! A `ProjectRuntime` backed by an external compose-compatible CLI, reached
//! by shelling out rather than speaking a daemon wire protocol directly.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::types::Container;

use super::{ContainerEvent, Project, ProjectRuntime};

pub struct ComposeRuntime {
    endpoint: String,
}

impl ComposeRuntime {
    pub fn new(endpoint: impl Into<String>) -> Self {
        ComposeRuntime {
            endpoint: endpoint.into(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("docker");
        cmd.arg("compose");
        cmd.env("DOCKER_HOST", &self.endpoint);
        cmd
    }
}

#[async_trait]
impl ProjectRuntime for ComposeRuntime {
    async fn open(
        &self,
        compose_file: &Path,
        project_name: &str,
    ) -> Result<Box<dyn Project>> {
        Ok(Box::new(ComposeProject {
            endpoint: self.endpoint.clone(),
            compose_file: compose_file.to_path_buf(),
            project_name: project_name.to_string(),
        }))
    }

    async fn load_image(&self, tar_path: &Path) -> Result<()> {
        let status = Command::new("docker")
            .arg("load")
            .arg("-i")
            .arg(tar_path)
            .env("DOCKER_HOST", &self.endpoint)
            .status()
            .await?;
        if !status.success() {
            return Err(Error::Runtime(format!(
                "docker load -i {} exited with {}",
                tar_path.display(),
                status
            )));
        }
        Ok(())
    }
}

struct ComposeProject {
    endpoint: String,
    compose_file: PathBuf,
    project_name: String,
}

impl ComposeProject {
    fn command(&self) -> Command {
        let mut cmd = Command::new("docker");
        cmd.arg("compose")
            .arg("-f")
            .arg(&self.compose_file)
            .arg("-p")
            .arg(&self.project_name)
            .env("DOCKER_HOST", &self.endpoint);
        cmd
    }

    async fn run(&self, args: &[&str]) -> Result<()> {
        let mut cmd = self.command();
        cmd.args(args);
        let status = cmd.status().await?;
        if !status.success() {
            return Err(Error::Runtime(format!(
                "compose {:?} exited with {}",
                args, status
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ComposePsRow {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Command")]
    command: String,
    #[serde(rename = "State")]
    state: String,
    #[serde(rename = "Publishers", default)]
    ports: serde_json::Value,
}

fn format_ports(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|i| i.get("PublishedPort").and_then(|p| p.as_u64()))
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(","),
        _ => String::new(),
    }
}

#[async_trait]
impl Project for ComposeProject {
    async fn up(&self) -> Result<()> {
        self.run(&["up", "-d"]).await
    }

    async fn down(&self) -> Result<()> {
        self.run(&["down"]).await
    }

    async fn delete(&self) -> Result<()> {
        self.run(&["rm", "-f"]).await
    }

    async fn kill(&self, signal: &str) -> Result<()> {
        self.run(&["kill", "-s", signal]).await
    }

    async fn start(&self, service: &str) -> Result<()> {
        self.run(&["start", service]).await
    }

    async fn restart(&self, timeout_seconds: u32, service: &str) -> Result<()> {
        self.run(&["restart", "-t", &timeout_seconds.to_string(), service])
            .await
    }

    async fn ps(&self) -> Result<Vec<Container>> {
        let mut cmd = self.command();
        cmd.args(["ps", "--format", "json"]);
        let output = cmd.output().await?;
        if !output.status.success() {
            return Err(Error::Runtime(format!(
                "compose ps exited with {}",
                output.status
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut containers = Vec::new();
        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            let row: ComposePsRow = serde_json::from_str(line)?;
            containers.push(Container {
                id: row.id,
                name: row.name,
                command: row.command,
                state: row.state,
                ports: format_ports(&row.ports),
            });
        }
        Ok(containers)
    }

    async fn services(&self) -> Result<Vec<String>> {
        let mut cmd = self.command();
        cmd.arg("config").arg("--services");
        let output = cmd.output().await?;
        if !output.status.success() {
            return Err(Error::Runtime(format!(
                "compose config --services exited with {}",
                output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    fn subscribe(&self) -> mpsc::Receiver<ContainerEvent> {
        let (tx, rx) = mpsc::channel(64);
        let mut cmd = self.command();
        cmd.args(["events", "--format", "json"])
            .stdout(Stdio::piped());

        tokio::spawn(async move {
            let mut child = match cmd.spawn() {
                Ok(c) => c,
                Err(e) => {
                    log::warn!("failed to spawn compose events: {}", e);
                    return;
                }
            };
            let stdout = match child.stdout.take() {
                Some(s) => s,
                None => return,
            };
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Ok(v) = serde_json::from_str::<serde_json::Value>(&line) {
                    let event = v
                        .get("event")
                        .or_else(|| v.get("health_status"))
                        .and_then(|s| s.as_str())
                        .unwrap_or_default()
                        .to_string();
                    let service = v
                        .get("service")
                        .and_then(|s| s.as_str())
                        .unwrap_or_default()
                        .to_string();
                    if tx.send(ContainerEvent { event, service }).await.is_err() {
                        break;
                    }
                }
            }
        });

        rx
    }
}
