//! The child-process table.
//!
//! Children move `Absent → Starting → Alive ⇄ Dead → Starting`; the table
//! never reports `Starting` — a child counts as dead until its process is
//! alive. Before any (re)start the child's `ComponentReset` alert is
//! published, and only then is the process spawned: the store must purge
//! the child's slice before the child can produce new state.

use std::collections::{BTreeMap, HashMap};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{info, warn};

use lookout_bus::{exchanges, routing, BusClient, BusError};
use lookout_core::{now_ts, Alert};

/// How a child worker process is launched.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildSpec {
    /// Unique child name, used in heartbeats and reset alerts.
    pub name: String,
    /// Binary name; resolved next to the manager's own executable first,
    /// then on PATH.
    pub binary: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Chain the child's state belongs to; routes its reset alert.
    pub parent_id: String,
}

/// Publishes `ComponentReset` alerts; abstracted so the restart ordering
/// is testable without a broker.
#[async_trait]
pub trait ResetPublisher: Send + Sync {
    async fn publish_reset(&self, alert: &Alert) -> Result<(), BusError>;
}

#[async_trait]
impl ResetPublisher for BusClient {
    async fn publish_reset(&self, alert: &Alert) -> Result<(), BusError> {
        match self
            .publish_confirm(
                exchanges::ALERT,
                &routing::component_reset(&alert.parent_id),
                alert,
                true,
            )
            .await
        {
            Ok(()) => Ok(()),
            // Nobody bound a reset queue yet; there is no state to purge.
            Err(e @ BusError::NotDelivered { .. }) => {
                warn!(error = %e, "component reset not routed");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// The manager's table of child specs and live process handles.
#[derive(Default)]
pub struct Supervisor {
    specs: BTreeMap<String, ChildSpec>,
    children: HashMap<String, Child>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_spec(&mut self, spec: ChildSpec) {
        self.specs.insert(spec.name.clone(), spec);
    }

    pub fn spec(&self, name: &str) -> Option<&ChildSpec> {
        self.specs.get(name)
    }

    pub fn child_names(&self) -> Vec<String> {
        self.specs.keys().cloned().collect()
    }

    /// Drop a spec, terminating its child if one is running.
    pub async fn remove_spec(&mut self, name: &str) -> Option<ChildSpec> {
        if let Some(mut child) = self.children.remove(name) {
            terminate(name, &mut child).await;
        }
        self.specs.remove(name)
    }

    /// Split the table into running and dead child names, reaping exited
    /// processes on the way.
    pub fn partition(&mut self) -> (Vec<String>, Vec<String>) {
        let mut running = Vec::new();
        let mut dead = Vec::new();
        for name in self.specs.keys() {
            let alive = self
                .children
                .get_mut(name)
                .map(|child| child.try_wait().ok().flatten().is_none())
                .unwrap_or(false);
            if alive {
                running.push(name.clone());
            } else {
                dead.push(name.clone());
            }
        }
        (running, dead)
    }

    /// Create any missing or dead child. For each actual (re)start, its
    /// `ComponentReset` alert is published first.
    ///
    /// Idempotent: running children are untouched, so calling this twice
    /// in a row spawns each child exactly once.
    pub async fn start_children(
        &mut self,
        resets: &(impl ResetPublisher + ?Sized),
    ) -> Result<Vec<String>, BusError> {
        let (_, dead) = self.partition();
        let mut started = Vec::new();

        for name in dead {
            let Some(spec) = self.specs.get(&name).cloned() else {
                continue;
            };

            // Purge downstream state before the child can produce any.
            let reset = Alert::component_reset(&spec.name, &spec.parent_id, now_ts());
            resets.publish_reset(&reset).await?;

            match spawn(&spec) {
                Ok(child) => {
                    info!(child = %spec.name, binary = %spec.binary, "child started");
                    self.children.insert(name.clone(), child);
                    started.push(name);
                }
                Err(e) => {
                    warn!(child = %spec.name, error = %e, "failed to start child");
                    self.children.remove(&name);
                }
            }
        }
        Ok(started)
    }

    /// SIGTERM every child, wait briefly, then force-kill stragglers.
    pub async fn terminate_all(&mut self) {
        for (name, child) in self.children.iter_mut() {
            terminate(name, child).await;
        }
        self.children.clear();
    }
}

fn spawn(spec: &ChildSpec) -> std::io::Result<Child> {
    let mut command = Command::new(resolve_binary(&spec.binary));
    command
        .args(&spec.args)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
    for (key, value) in &spec.env {
        command.env(key, value);
    }
    command.spawn()
}

/// Prefer a sibling of the manager's own executable, fall back to PATH.
fn resolve_binary(binary: &str) -> std::path::PathBuf {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let sibling = dir.join(binary);
            if sibling.exists() {
                return sibling;
            }
        }
    }
    std::path::PathBuf::from(binary)
}

async fn terminate(name: &str, child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        let _ = std::process::Command::new("kill")
            .args(["-TERM", &pid.to_string()])
            .output();
        info!(child = %name, pid, "sent SIGTERM");
    }

    match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
        Ok(Ok(status)) => info!(child = %name, %status, "child exited"),
        Ok(Err(e)) => warn!(child = %name, error = %e, "error reaping child"),
        Err(_) => {
            warn!(child = %name, "graceful shutdown timed out, force killing");
            let _ = child.kill().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct MockResets {
        alerts: Mutex<Vec<Alert>>,
    }

    impl MockResets {
        fn new() -> Self {
            Self {
                alerts: Mutex::new(Vec::new()),
            }
        }

        fn count(&self) -> usize {
            self.alerts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ResetPublisher for MockResets {
        async fn publish_reset(&self, alert: &Alert) -> Result<(), BusError> {
            self.alerts.lock().unwrap().push(alert.clone());
            Ok(())
        }
    }

    fn sleeper(name: &str) -> ChildSpec {
        ChildSpec {
            name: name.to_string(),
            binary: "sleep".to_string(),
            args: vec!["60".to_string()],
            env: BTreeMap::new(),
            parent_id: "chain_A".to_string(),
        }
    }

    #[tokio::test]
    async fn start_children_is_idempotent() {
        let mut supervisor = Supervisor::new();
        supervisor.set_spec(sleeper("monitor-a"));
        let resets = MockResets::new();

        let started = supervisor.start_children(&resets).await.unwrap();
        assert_eq!(started, vec!["monitor-a".to_string()]);
        assert_eq!(resets.count(), 1);

        // Second invocation: the child is alive, nothing happens.
        let started = supervisor.start_children(&resets).await.unwrap();
        assert!(started.is_empty());
        assert_eq!(resets.count(), 1);

        let (running, dead) = supervisor.partition();
        assert_eq!(running, vec!["monitor-a".to_string()]);
        assert!(dead.is_empty());

        supervisor.terminate_all().await;
    }

    #[tokio::test]
    async fn dead_child_gets_reset_then_restart_and_reports_running() {
        let mut supervisor = Supervisor::new();
        // "true" exits immediately, simulating a crashed worker.
        supervisor.set_spec(ChildSpec {
            binary: "true".to_string(),
            args: Vec::new(),
            ..sleeper("flaky")
        });
        let resets = MockResets::new();

        supervisor.start_children(&resets).await.unwrap();
        assert_eq!(resets.count(), 1);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let (_, dead) = supervisor.partition();
        assert_eq!(dead, vec!["flaky".to_string()]);

        // Swap in a long-lived binary and restart, as the ping handler
        // does: reset first, then the spawn, then a heartbeat built from
        // a fresh partition.
        supervisor.set_spec(sleeper("flaky"));
        let started = supervisor.start_children(&resets).await.unwrap();
        assert_eq!(started, vec!["flaky".to_string()]);
        assert_eq!(resets.count(), 2);

        let (running, dead) = supervisor.partition();
        assert_eq!(running, vec!["flaky".to_string()]);
        assert!(dead.is_empty());

        supervisor.terminate_all().await;
    }

    #[tokio::test]
    async fn remove_spec_terminates_the_child() {
        let mut supervisor = Supervisor::new();
        supervisor.set_spec(sleeper("monitor-a"));
        let resets = MockResets::new();
        supervisor.start_children(&resets).await.unwrap();

        let removed = supervisor.remove_spec("monitor-a").await;
        assert!(removed.is_some());
        let (running, dead) = supervisor.partition();
        assert!(running.is_empty());
        assert!(dead.is_empty());
    }
}
