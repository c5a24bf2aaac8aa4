//! Shares, the clients they are assigned to, and how they are mounted.

pub mod allocator;
pub mod qos;

pub use allocator::{allocate, ShareTemplate, VersionSlot};
pub use qos::{Bandwidth, BandwidthLimit, QosError, QosPolicy};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A remote machine commands are run on. Supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientRef {
    pub hostname: String,
    pub address: String,
}

impl ClientRef {
    pub fn new(hostname: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            address: address.into(),
        }
    }
}

impl fmt::Display for ClientRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hostname)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NfsVersion {
    #[serde(rename = "3")]
    V3,
    #[default]
    #[serde(rename = "4.0")]
    V4_0,
    #[serde(rename = "4.1")]
    V4_1,
    #[serde(rename = "4.2")]
    V4_2,
}

impl NfsVersion {
    /// Value for `mount -o vers=`.
    pub fn as_str(&self) -> &'static str {
        match self {
            NfsVersion::V3 => "3",
            NfsVersion::V4_0 => "4.0",
            NfsVersion::V4_1 => "4.1",
            NfsVersion::V4_2 => "4.2",
        }
    }
}

impl fmt::Display for NfsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a share is exported and mounted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProtocolOptions {
    #[serde(default)]
    pub version: NfsVersion,

    #[serde(default = "ProtocolOptions::default_port")]
    pub port: u16,

    /// Export bandwidth control applied right after the export is created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qos: Option<QosPolicy>,

    /// Extra `mount -o` options, passed through verbatim
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub mount_options: BTreeMap<String, String>,
}

impl ProtocolOptions {
    pub const DEFAULT_PORT: u16 = 2049;

    fn default_port() -> u16 {
        Self::DEFAULT_PORT
    }
}

impl Default for ProtocolOptions {
    fn default() -> Self {
        Self {
            version: NfsVersion::default(),
            port: Self::DEFAULT_PORT,
            qos: None,
            mount_options: BTreeMap::new(),
        }
    }
}

/// One export and the local directory it is mounted on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareSpec {
    pub name: String,
    pub export_path: String,
    pub mount_path: String,
    pub options: ProtocolOptions,
}

/// The shares one client is responsible for, in allocation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientShares {
    pub client: ClientRef,
    pub shares: Vec<ShareSpec>,
}

/// Partition of shares over clients, produced by [`allocate`].
///
/// Client order is the order the clients were passed in. Every share appears
/// under exactly one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assignment {
    entries: Vec<ClientShares>,
}

impl Assignment {
    pub(crate) fn from_entries(entries: Vec<ClientShares>) -> Self {
        Self { entries }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ClientShares> {
        self.entries.iter()
    }

    pub fn clients(&self) -> impl Iterator<Item = &ClientRef> {
        self.entries.iter().map(|e| &e.client)
    }

    pub fn shares_for(&self, client: &ClientRef) -> Option<&[ShareSpec]> {
        self.entries
            .iter()
            .find(|e| &e.client == client)
            .map(|e| e.shares.as_slice())
    }

    /// Every (client, share) pair, client by client.
    pub fn pairs(&self) -> impl Iterator<Item = (&ClientRef, &ShareSpec)> {
        self.entries
            .iter()
            .flat_map(|e| e.shares.iter().map(move |s| (&e.client, s)))
    }

    pub fn client_count(&self) -> usize {
        self.entries.len()
    }

    pub fn share_count(&self) -> usize {
        self.entries.iter().map(|e| e.shares.len()).sum()
    }
}

impl<'a> IntoIterator for &'a Assignment {
    type Item = &'a ClientShares;
    type IntoIter = std::slice::Iter<'a, ClientShares>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
