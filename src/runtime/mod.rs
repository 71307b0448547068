// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Edge Agent Authors

//! The container-runtime capability the lifecycle manager depends on.
//! Concrete implementation lives in `runtime::compose`.

pub mod compose;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::Container;

#[derive(Debug, Clone)]
pub struct ContainerEvent {
    pub event: String,
    pub service: String,
}

#[async_trait]
pub trait ProjectRuntime: Send + Sync {
    async fn open(&self, compose_file: &std::path::Path, project_name: &str)
        -> Result<Box<dyn Project>>;
    async fn load_image(&self, tar_path: &std::path::Path) -> Result<()>;
}

#[async_trait]
pub trait Project: Send + Sync {
    async fn up(&self) -> Result<()>;
    async fn down(&self) -> Result<()>;
    async fn delete(&self) -> Result<()>;
    async fn kill(&self, signal: &str) -> Result<()>;
    async fn start(&self, service: &str) -> Result<()>;
    async fn restart(&self, timeout_seconds: u32, service: &str) -> Result<()>;
    async fn ps(&self) -> Result<Vec<Container>>;
    async fn services(&self) -> Result<Vec<String>>;

    /// Returns a receiver the caller can poll non-blockingly for lifecycle
    /// events emitted by the underlying runtime.
    fn subscribe(&self) -> tokio::sync::mpsc::Receiver<ContainerEvent>;
}
