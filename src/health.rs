// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Edge Agent Authors

//! Background poller applying the health policy table: an `unhealthy` event
//! restarts its service, a `healthy` event just updates the health map, and
//! an unsolicited `stop` on a service last known healthy triggers a
//! self-heal `start`. Runs as one long-lived task per agent process.

use std::time::Duration;

use crate::registry::SharedRegistry;

const TICK: Duration = Duration::from_millis(1000);
const UNHEALTHY_RESTART_TIMEOUT: u32 = 5;

pub async fn run(registry: SharedRegistry) {
    let mut interval = tokio::time::interval(TICK);
    loop {
        interval.tick().await;
        tick(&registry).await;
    }
}

async fn tick(registry: &SharedRegistry) {
    // Held for the whole tick, including the restart/start calls below: a
    // deploy/undeploy must not observe (or race with) a half-applied health
    // decision. HealthMap writes are confined to this single task, so no
    // additional synchronization is needed for them.
    let reg = registry.read().await;
    let apps: Vec<_> = reg.apps.values().cloned().collect();

    for app in apps {
        let snapshot = app.snapshot();
        if !(snapshot.active.0 && snapshot.monitor.0) {
            continue;
        }

        let event = {
            let mut events = app.events.lock().await;
            events.try_recv().ok()
        };
        let event = match event {
            Some(e) => e,
            None => continue,
        };

        if let Some(service) = event.event.strip_prefix("health_status: unhealthy") {
            let _ = service;
            mark_health(&app, &event.service, false).await;
            if let Err(e) = app.project.restart(UNHEALTHY_RESTART_TIMEOUT, &event.service).await {
                log::warn!(
                    "restart of unhealthy service {} (app {}) failed: {}",
                    event.service,
                    snapshot.uuid,
                    e
                );
            }
        } else if event.event.starts_with("health_status: healthy") {
            mark_health(&app, &event.service, true).await;
        } else if event.event == "stop" {
            let was_healthy = {
                let health = app.health.lock().await;
                health.get(&event.service).copied().unwrap_or(false)
            };
            if was_healthy {
                if let Err(e) = app.project.start(&event.service).await {
                    log::warn!(
                        "self-heal start of {} (app {}) failed: {}",
                        event.service,
                        snapshot.uuid,
                        e
                    );
                }
            }
        }
    }
}

async fn mark_health(app: &crate::registry::ComposeApp, service: &str, healthy: bool) {
    let mut health = app.health.lock().await;
    health.insert(service.to_string(), healthy);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ContainerEvent;

    #[test]
    fn test_unhealthy_event_matching() {
        let event = ContainerEvent {
            event: "health_status: unhealthy".into(),
            service: "db".into(),
        };
        assert!(event.event.starts_with("health_status: unhealthy"));
    }

    #[test]
    fn test_healthy_event_matching() {
        let event = ContainerEvent {
            event: "health_status: healthy".into(),
            service: "db".into(),
        };
        assert!(event.event.starts_with("health_status: healthy"));
    }
}
