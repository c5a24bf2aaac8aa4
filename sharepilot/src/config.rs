use crate::failover;
use crate::lifecycle::{LifecyclePolicy, TeardownPolicy};
use crate::poll::ConvergencePoller;
use crate::remote::{IngressSpec, SshSettings};
use crate::retry::RetryPolicy;
use crate::share::{ClientRef, ShareTemplate};
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub ssh: SshConfig,
    pub cluster: ClusterConfig,
    pub clients: Vec<HostConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nfs_nodes: Vec<HostConfig>,
    pub shares: SharesConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failover: Option<FailoverConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct SshConfig {
    #[serde(deserialize_with = "deserialize_expandable_string")]
    pub user: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_optional_expandable_path"
    )]
    pub identity_file: Option<PathBuf>,
    #[serde(default = "SshConfig::default_port")]
    pub port: u16,
    #[serde(default = "SshConfig::default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "SshConfig::default_command_timeout")]
    pub command_timeout_secs: u64,
    #[serde(default = "SshConfig::default_long_running_timeout")]
    pub long_running_timeout_secs: u64,
    /// Extra `ssh -o` options
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl SshConfig {
    fn default_port() -> u16 {
        22
    }

    fn default_connect_timeout() -> u64 {
        10
    }

    fn default_command_timeout() -> u64 {
        600
    }

    fn default_long_running_timeout() -> u64 {
        3600
    }

    pub fn to_settings(&self) -> SshSettings {
        SshSettings {
            user: self.user.clone(),
            identity_file: self.identity_file.clone(),
            port: self.port,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            command_timeout: Duration::from_secs(self.command_timeout_secs),
            long_running_timeout: Duration::from_secs(self.long_running_timeout_secs),
            extra_options: self.options.clone(),
        }
    }
}

/// A remote host. Both fields support `${VAR}` expansion.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HostConfig {
    #[serde(deserialize_with = "deserialize_expandable_string")]
    pub hostname: String,
    #[serde(deserialize_with = "deserialize_expandable_string")]
    pub address: String,
}

impl HostConfig {
    pub fn to_client_ref(&self) -> ClientRef {
        ClientRef::new(&self.hostname, &self.address)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    /// NFS cluster name, e.g. `cephfs-nfs`
    pub name: String,
    /// Node the `ceph` commands run on
    pub admin: HostConfig,
    #[serde(default = "ClusterConfig::default_fs_name")]
    pub fs_name: String,
    #[serde(default = "ClusterConfig::default_subvolume_group")]
    pub subvolume_group: String,
    /// Create the NFS cluster before provisioning
    #[serde(default = "default_true")]
    pub create: bool,
    /// Delete the NFS cluster after teardown
    #[serde(default = "default_true")]
    pub delete: bool,
    /// Ingress VIP with prefix length; clients mount through it when set
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_optional_expandable_string"
    )]
    pub virtual_ip: Option<String>,
    /// Fail the run if NFS nodes wrote coredumps while it was running
    #[serde(default = "default_true")]
    pub check_coredumps: bool,
}

impl ClusterConfig {
    fn default_fs_name() -> String {
        "cephfs".to_string()
    }

    fn default_subvolume_group() -> String {
        "ganeshagroup".to_string()
    }

    pub fn ingress(&self) -> Option<IngressSpec> {
        self.virtual_ip.as_ref().map(|vip| IngressSpec {
            virtual_ip: vip.clone(),
        })
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct SharesConfig {
    pub count: usize,
    /// Pairs provisioned at once; 0 means all of them
    #[serde(default)]
    pub max_parallel: usize,
    pub template: ShareTemplate,
}

/// Retry and poll knobs, all in seconds.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct PolicyConfig {
    pub create_attempts: u32,
    pub create_delay_secs: u64,
    pub mount_attempts: u32,
    pub mount_base_delay_secs: u64,
    pub mount_multiplier: u32,
    pub verify_timeout_secs: u64,
    pub verify_interval_secs: u64,
    pub clear_attempts: u32,
    pub clear_delay_secs: u64,
    pub service_removal_timeout_secs: u64,
    pub service_removal_interval_secs: u64,
    pub cluster_ready_timeout_secs: u64,
    pub cluster_ready_interval_secs: u64,
    pub health_timeout_secs: u64,
    pub health_interval_secs: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            create_attempts: LifecyclePolicy::DEFAULT_CREATE_ATTEMPTS,
            create_delay_secs: LifecyclePolicy::DEFAULT_CREATE_DELAY.as_secs(),
            mount_attempts: LifecyclePolicy::DEFAULT_MOUNT_ATTEMPTS,
            mount_base_delay_secs: LifecyclePolicy::DEFAULT_MOUNT_BASE_DELAY.as_secs(),
            mount_multiplier: LifecyclePolicy::DEFAULT_MOUNT_MULTIPLIER,
            verify_timeout_secs: LifecyclePolicy::DEFAULT_VERIFY_TIMEOUT.as_secs(),
            verify_interval_secs: LifecyclePolicy::DEFAULT_VERIFY_INTERVAL.as_secs(),
            clear_attempts: TeardownPolicy::DEFAULT_CLEAR_ATTEMPTS,
            clear_delay_secs: TeardownPolicy::DEFAULT_CLEAR_DELAY.as_secs(),
            service_removal_timeout_secs: TeardownPolicy::DEFAULT_REMOVAL_TIMEOUT.as_secs(),
            service_removal_interval_secs: TeardownPolicy::DEFAULT_REMOVAL_INTERVAL.as_secs(),
            cluster_ready_timeout_secs: 300,
            cluster_ready_interval_secs: 10,
            health_timeout_secs: 300,
            health_interval_secs: 10,
        }
    }
}

impl PolicyConfig {
    pub fn lifecycle(&self) -> LifecyclePolicy {
        LifecyclePolicy {
            create: RetryPolicy::fixed(self.create_attempts, secs(self.create_delay_secs)),
            mount: RetryPolicy::exponential(
                self.mount_attempts,
                secs(self.mount_base_delay_secs),
                self.mount_multiplier,
            ),
            verify: ConvergencePoller::new(
                secs(self.verify_timeout_secs),
                secs(self.verify_interval_secs),
            ),
        }
    }

    pub fn teardown(&self, delete_cluster: bool) -> TeardownPolicy {
        TeardownPolicy {
            clear: RetryPolicy::fixed(self.clear_attempts, secs(self.clear_delay_secs)),
            service_removal: ConvergencePoller::new(
                secs(self.service_removal_timeout_secs),
                secs(self.service_removal_interval_secs),
            ),
            delete_cluster,
        }
    }

    pub fn cluster_ready(&self) -> ConvergencePoller {
        ConvergencePoller::new(
            secs(self.cluster_ready_timeout_secs),
            secs(self.cluster_ready_interval_secs),
        )
    }

    pub fn health(&self) -> ConvergencePoller {
        ConvergencePoller::new(
            secs(self.health_timeout_secs),
            secs(self.health_interval_secs),
        )
    }
}

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct FailoverConfig {
    /// Address expected to move, prefix length allowed
    #[serde(deserialize_with = "deserialize_expandable_string")]
    pub float_address: String,
    #[serde(default = "FailoverConfig::default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "FailoverConfig::default_interval")]
    pub interval_secs: u64,
}

impl FailoverConfig {
    fn default_timeout() -> u64 {
        failover::DEFAULT_TIMEOUT.as_secs()
    }

    fn default_interval() -> u64 {
        failover::DEFAULT_INTERVAL.as_secs()
    }
}

fn expand(s: &str) -> std::result::Result<String, String> {
    shellexpand::env(s)
        .map(|expanded| expanded.into_owned())
        .map_err(|e| format!("Failed to expand environment variable: {}", e))
}

fn deserialize_expandable_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    expand(&s).map_err(serde::de::Error::custom)
}

fn deserialize_optional_expandable_string<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    opt.map(|s| expand(&s).map_err(serde::de::Error::custom))
        .transpose()
}

fn deserialize_optional_expandable_path<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<PathBuf>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(deserialize_optional_expandable_string(deserializer)?.map(PathBuf::from))
}

impl Settings {
    pub fn from_file(config_path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = config_path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let settings: Settings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        settings
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.clients.is_empty() {
            bail!("at least one [[clients]] entry is required");
        }
        let mut seen = HashSet::new();
        for host in self.clients.iter().chain(&self.nfs_nodes) {
            if !seen.insert(&host.hostname) {
                bail!("host {} is listed more than once", host.hostname);
            }
        }
        if self.failover.is_some() && self.nfs_nodes.len() < 2 {
            bail!("[failover] needs at least two [[nfs_nodes]]");
        }
        Ok(())
    }

    pub fn clients(&self) -> Vec<ClientRef> {
        self.clients.iter().map(HostConfig::to_client_ref).collect()
    }

    pub fn nfs_nodes(&self) -> Vec<ClientRef> {
        self.nfs_nodes.iter().map(HostConfig::to_client_ref).collect()
    }

    pub fn generate_default() -> Self {
        Settings {
            ssh: SshConfig {
                user: "${SHAREPILOT_SSH_USER}".to_string(),
                identity_file: Some(PathBuf::from("${HOME}/.ssh/id_ed25519")),
                port: SshConfig::default_port(),
                connect_timeout_secs: SshConfig::default_connect_timeout(),
                command_timeout_secs: SshConfig::default_command_timeout(),
                long_running_timeout_secs: SshConfig::default_long_running_timeout(),
                options: Vec::new(),
            },
            cluster: ClusterConfig {
                name: "cephfs-nfs".to_string(),
                admin: HostConfig {
                    hostname: "ceph-admin".to_string(),
                    address: "192.168.122.10".to_string(),
                },
                fs_name: ClusterConfig::default_fs_name(),
                subvolume_group: ClusterConfig::default_subvolume_group(),
                create: true,
                delete: true,
                virtual_ip: None,
                check_coredumps: true,
            },
            clients: vec![
                HostConfig {
                    hostname: "client-1".to_string(),
                    address: "192.168.122.21".to_string(),
                },
                HostConfig {
                    hostname: "client-2".to_string(),
                    address: "192.168.122.22".to_string(),
                },
            ],
            nfs_nodes: vec![HostConfig {
                hostname: "nfs-1".to_string(),
                address: "192.168.122.11".to_string(),
            }],
            shares: SharesConfig {
                count: 4,
                max_parallel: 0,
                template: ShareTemplate::new("nfs_share", "/export", "/mnt/nfs"),
            },
            policy: PolicyConfig::default(),
            failover: None,
        }
    }

    pub fn write_default_config(path: impl AsRef<std::path::Path>) -> Result<()> {
        let default = Self::generate_default();
        let toml_string = toml::to_string_pretty(&default)?;

        let commented = format!(
            "# sharepilot configuration\n\
             # Generated by sharepilot v{}\n\
             #\n\
             # Environment variables are supported: ${{VAR}} or $VAR\n\
             #\n\
             # [policy] knobs are in seconds. Add a [failover] section with\n\
             # float_address = \"10.8.128.100/21\" to enable `sharepilot failover`.\n\
             \n{}",
            env!("CARGO_PKG_VERSION"),
            toml_string
        );

        fs::write(path, commented)?;
        Ok(())
    }
}
