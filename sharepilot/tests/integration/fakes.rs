//! In-memory cluster used by the integration tests.
//!
//! The fake keeps the set of exports, the mount table of every client and
//! the orchestrator's service list. Failures are injected per share name.

use async_trait::async_trait;
use sharepilot::error::{RemoteError, RemoteErrorKind};
use sharepilot::failover::FailoverOps;
use sharepilot::lifecycle::{ShareOps, TeardownOps};
use sharepilot::share::{ClientRef, ShareSpec};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::Instant;

pub fn exit_error(host: &str, command: &str, message: &str) -> RemoteError {
    RemoteError::new(host, command, RemoteErrorKind::Exit(Some(32)), message)
}

pub fn clients(n: usize) -> Vec<ClientRef> {
    (0..n)
        .map(|i| ClientRef::new(format!("client-{}", i), format!("10.0.0.{}", i + 10)))
        .collect()
}

#[derive(Default)]
pub struct FakeCluster {
    exports: Mutex<BTreeSet<String>>,
    mounts: Mutex<BTreeSet<(String, String)>>,
    services: Mutex<Vec<String>>,
    calls: Mutex<Vec<String>>,

    /// Shares whose mount fails every time.
    pub broken_mounts: HashSet<String>,
    /// Shares whose unmount fails, lazy or not.
    pub stuck_unmounts: HashSet<String>,
    /// Shares whose clear fails this many times before succeeding.
    pub busy_clears: HashMap<String, u32>,

    pub mount_attempts: AtomicU32,
    pub clear_attempts: AtomicU32,
}

impl FakeCluster {
    pub fn with_service(cluster: &str) -> Self {
        let fake = Self::default();
        fake.services.lock().unwrap().push(format!("nfs.{}", cluster));
        fake
    }

    pub fn exports(&self) -> BTreeSet<String> {
        self.exports.lock().unwrap().clone()
    }

    pub fn mounts(&self) -> BTreeSet<(String, String)> {
        self.mounts.lock().unwrap().clone()
    }

    pub fn services(&self) -> Vec<String> {
        self.services.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ShareOps for FakeCluster {
    async fn create_share(&self, _: &ClientRef, share: &ShareSpec) -> Result<(), RemoteError> {
        self.record(format!("create {}", share.name));
        self.exports.lock().unwrap().insert(share.name.clone());
        Ok(())
    }

    async fn mount(&self, client: &ClientRef, share: &ShareSpec) -> Result<(), RemoteError> {
        self.mount_attempts.fetch_add(1, Ordering::SeqCst);
        self.record(format!("mount {}", share.name));
        if self.broken_mounts.contains(&share.name) {
            return Err(exit_error(
                &client.hostname,
                "mount",
                "mount.nfs: Connection timed out",
            ));
        }
        self.mounts
            .lock()
            .unwrap()
            .insert((client.hostname.clone(), share.mount_path.clone()));
        Ok(())
    }

    async fn is_mounted(&self, client: &ClientRef, share: &ShareSpec) -> Result<bool, RemoteError> {
        Ok(self
            .mounts
            .lock()
            .unwrap()
            .contains(&(client.hostname.clone(), share.mount_path.clone())))
    }
}

#[async_trait]
impl TeardownOps for FakeCluster {
    async fn clear_mount(&self, client: &ClientRef, share: &ShareSpec) -> Result<(), RemoteError> {
        self.clear_attempts.fetch_add(1, Ordering::SeqCst);
        self.record(format!("clear {}", share.name));
        let seen = self
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| **c == format!("clear {}", share.name))
            .count() as u32;
        match self.busy_clears.get(&share.name) {
            Some(fails) if seen <= *fails => Err(exit_error(
                &client.hostname,
                "rm -rf",
                "Directory not empty",
            )),
            _ => Ok(()),
        }
    }

    async fn unmount(
        &self,
        client: &ClientRef,
        share: &ShareSpec,
        lazy: bool,
    ) -> Result<(), RemoteError> {
        self.record(format!(
            "{} {}",
            if lazy { "umount -l" } else { "umount" },
            share.name
        ));
        if self.stuck_unmounts.contains(&share.name) {
            return Err(exit_error(
                &client.hostname,
                "umount",
                "target is busy",
            ));
        }
        let removed = self
            .mounts
            .lock()
            .unwrap()
            .remove(&(client.hostname.clone(), share.mount_path.clone()));
        if !removed {
            return Err(exit_error(
                &client.hostname,
                "umount",
                &format!("umount: {}: not mounted.", share.mount_path),
            ));
        }
        Ok(())
    }

    async fn remove_mount_dir(&self, _: &ClientRef, share: &ShareSpec) -> Result<(), RemoteError> {
        self.record(format!("rmdir {}", share.name));
        Ok(())
    }

    async fn delete_export(&self, _: &str, share: &ShareSpec) -> Result<(), RemoteError> {
        self.record(format!("delete {}", share.name));
        self.exports.lock().unwrap().remove(&share.name);
        Ok(())
    }

    async fn delete_cluster(&self, cluster: &str) -> Result<(), RemoteError> {
        self.record(format!("delete cluster {}", cluster));
        let name = self.service_name(cluster);
        self.services.lock().unwrap().retain(|s| *s != name);
        Ok(())
    }

    async fn list_services(&self) -> Result<Vec<String>, RemoteError> {
        Ok(self.services())
    }

    fn service_name(&self, cluster: &str) -> String {
        format!("nfs.{}", cluster)
    }
}

/// NFS nodes that pick up the float address at fixed offsets from `start`.
pub struct FloatingNodes {
    pub start: Instant,
    pub address: String,
    pub gains_at: HashMap<String, Duration>,
    pub reboot: Duration,
    pub disrupted: Mutex<Vec<String>>,
}

impl FloatingNodes {
    pub fn new(address: &str, gains_at: &[(&str, u64)], reboot: Duration) -> Self {
        Self {
            start: Instant::now(),
            address: address.to_string(),
            gains_at: gains_at
                .iter()
                .map(|(h, secs)| (h.to_string(), Duration::from_secs(*secs)))
                .collect(),
            reboot,
            disrupted: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl FailoverOps for FloatingNodes {
    async fn disrupt(&self, node: &ClientRef) -> Result<(), RemoteError> {
        self.disrupted.lock().unwrap().push(node.hostname.clone());
        tokio::time::sleep(self.reboot).await;
        Ok(())
    }

    async fn bound_addresses(&self, node: &ClientRef) -> Result<Vec<String>, RemoteError> {
        let mut bound = vec!["127.0.0.1".to_string(), node.address.clone()];
        if let Some(at) = self.gains_at.get(&node.hostname) {
            if self.start.elapsed() >= *at {
                bound.push(self.address.clone());
            }
        }
        Ok(bound)
    }
}
