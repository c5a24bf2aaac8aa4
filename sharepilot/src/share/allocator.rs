//! Deterministic partition of shares over clients.
//!
//! With `n` shares and `m` clients, the first `n % m` clients get
//! `n / m + 1` shares and the rest get `n / m`. Shares are numbered globally
//! and handed out in contiguous blocks, so client 0 owns `share_0..`, client 1
//! the next block, and so on. The same input always yields the same
//! [`Assignment`].

use super::{Assignment, ClientRef, ClientShares, NfsVersion, ProtocolOptions, ShareSpec};
use crate::error::{PilotError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Pins the next `count` clients (in input order) to an NFS version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VersionSlot {
    pub version: NfsVersion,
    pub count: usize,
}

/// Naming templates and options shared by every allocated share.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShareTemplate {
    /// Share name prefix, e.g. `nfs_share` → `nfs_share_0`
    pub name: String,
    /// Export pseudo path prefix, e.g. `/export` → `/export_0`
    pub export: String,
    /// Client mount directory prefix, e.g. `/mnt/nfs` → `/mnt/nfs_0`
    pub mount: String,
    #[serde(default)]
    pub options: ProtocolOptions,
    /// Per-client NFS versions; clients past the listed slots keep `options.version`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mount_versions: Vec<VersionSlot>,
}

impl ShareTemplate {
    pub fn new(
        name: impl Into<String>,
        export: impl Into<String>,
        mount: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            export: export.into(),
            mount: mount.into(),
            options: ProtocolOptions::default(),
            mount_versions: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: ProtocolOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_mount_versions(mut self, slots: Vec<VersionSlot>) -> Self {
        self.mount_versions = slots;
        self
    }

    fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("name", &self.name),
            ("export", &self.export),
            ("mount", &self.mount),
        ] {
            if value.trim().is_empty() {
                return Err(PilotError::invalid(format!(
                    "share template `{}` must not be empty",
                    field
                )));
            }
        }
        Ok(())
    }

    /// NFS version for each client position.
    fn versions_for(&self, client_count: usize) -> Result<Vec<NfsVersion>> {
        let pinned: usize = self.mount_versions.iter().map(|s| s.count).sum();
        if pinned > client_count {
            return Err(PilotError::invalid(format!(
                "mount versions pin {} clients but only {} were supplied",
                pinned, client_count
            )));
        }
        let mut versions: Vec<NfsVersion> = self
            .mount_versions
            .iter()
            .flat_map(|slot| std::iter::repeat(slot.version).take(slot.count))
            .collect();
        versions.resize(client_count, self.options.version);
        Ok(versions)
    }
}

/// Partitions `share_count` shares built from `template` over `clients`.
pub fn allocate(
    clients: &[ClientRef],
    share_count: usize,
    template: &ShareTemplate,
) -> Result<Assignment> {
    if clients.is_empty() {
        return Err(PilotError::invalid("at least one client is required"));
    }
    if share_count < 1 {
        return Err(PilotError::invalid("share count must be at least 1"));
    }
    template.validate()?;

    let mut seen = HashSet::with_capacity(clients.len());
    for client in clients {
        if !seen.insert(client) {
            return Err(PilotError::invalid(format!(
                "client {} is listed more than once",
                client
            )));
        }
    }

    let versions = template.versions_for(clients.len())?;
    let per_client = share_count / clients.len();
    let remainder = share_count % clients.len();

    let mut next = 0usize;
    let entries = clients
        .iter()
        .zip(versions)
        .enumerate()
        .map(|(position, (client, version))| {
            let len = if position < remainder {
                per_client + 1
            } else {
                per_client
            };
            let shares = (next..next + len)
                .map(|i| ShareSpec {
                    name: format!("{}_{}", template.name, i),
                    export_path: format!("{}_{}", template.export, i),
                    mount_path: format!("{}_{}", template.mount, i),
                    options: ProtocolOptions {
                        version,
                        ..template.options.clone()
                    },
                })
                .collect();
            next += len;
            ClientShares {
                client: client.clone(),
                shares,
            }
        })
        .collect();

    Ok(Assignment::from_entries(entries))
}
