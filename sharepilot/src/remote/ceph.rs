//! Cluster and client operations for a Ceph NFS-Ganesha deployment.
//!
//! Cluster-side commands (`ceph ...`) run on the admin node; mount commands run
//! on the client that owns the share. Exports are CephFS subvolumes in one
//! subvolume group, exported under their pseudo path.

use super::{CommandOutput, CommandRunner, RemoteCommand, shell_quote};
use crate::error::{RemoteError, RemoteErrorKind};
use crate::failover::FailoverOps;
use crate::health::HealthCheck;
use crate::lifecycle::{ShareOps, TeardownOps};
use crate::poll::{ConvergencePoller, ConvergenceResult};
use crate::share::{ClientRef, ShareSpec};
use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use std::net::IpAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

const COREDUMP_DIR: &str = "/var/lib/systemd/coredump";
const COREDUMP_CONF: &str = "/etc/systemd/coredump.conf";
const COREDUMP_SETTINGS: [&str; 2] = ["Storage=external", "DefaultLimitCORE=infinity"];

/// Virtual IP fronting the NFS daemons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressSpec {
    /// With prefix length, e.g. `10.8.128.100/21`.
    pub virtual_ip: String,
}

/// One entry of `ceph orch ls --format json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceStatus {
    pub service_name: String,
    #[serde(default)]
    pub service_type: String,
    #[serde(default)]
    pub status: ReplicaCount,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct ReplicaCount {
    #[serde(default)]
    pub running: u32,
    #[serde(default)]
    pub size: u32,
}

impl ServiceStatus {
    /// Every requested daemon is up.
    pub fn converged(&self) -> bool {
        self.status.size > 0 && self.status.running == self.status.size
    }
}

/// Coredump files found on one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coredump {
    pub node: ClientRef,
    pub files: Vec<String>,
}

pub struct CephNfs<R> {
    runner: R,
    admin: ClientRef,
    cluster: String,
    fs_name: String,
    subvolume_group: String,
    nfs_nodes: Vec<ClientRef>,
    mount_server: Option<String>,
    reboot_wait: ConvergencePoller,
}

impl<R: CommandRunner> CephNfs<R> {
    pub fn new(runner: R, admin: ClientRef, cluster: impl Into<String>) -> Self {
        Self {
            runner,
            admin,
            cluster: cluster.into(),
            fs_name: "cephfs".to_string(),
            subvolume_group: "ganeshagroup".to_string(),
            nfs_nodes: Vec::new(),
            mount_server: None,
            reboot_wait: ConvergencePoller::new(Duration::from_secs(300), Duration::from_secs(20)),
        }
    }

    pub fn with_fs_name(mut self, fs_name: impl Into<String>) -> Self {
        self.fs_name = fs_name.into();
        self
    }

    pub fn with_subvolume_group(mut self, group: impl Into<String>) -> Self {
        self.subvolume_group = group.into();
        self
    }

    pub fn with_nfs_nodes(mut self, nodes: Vec<ClientRef>) -> Self {
        self.nfs_nodes = nodes;
        self
    }

    /// Address clients mount from. Defaults to the first NFS node.
    pub fn with_mount_server(mut self, server: impl Into<String>) -> Self {
        let server = server.into();
        let bare = server.split('/').next().unwrap_or_default().to_string();
        self.mount_server = Some(bare);
        self
    }

    pub fn with_reboot_wait(mut self, poller: ConvergencePoller) -> Self {
        self.reboot_wait = poller;
        self
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn nfs_nodes(&self) -> &[ClientRef] {
        &self.nfs_nodes
    }

    fn server_address(&self) -> &str {
        self.mount_server
            .as_deref()
            .or_else(|| self.nfs_nodes.first().map(|n| n.address.as_str()))
            .unwrap_or(self.admin.address.as_str())
    }

    async fn admin_exec(&self, command: RemoteCommand) -> Result<CommandOutput, RemoteError> {
        self.runner.exec(&self.admin, &command).await
    }

    /// Runs an unchecked command and accepts a non-zero exit whose output
    /// contains one of `benign`.
    async fn admin_exec_tolerating(
        &self,
        line: String,
        benign: &[&str],
    ) -> Result<CommandOutput, RemoteError> {
        let out = self.admin_exec(RemoteCommand::sudo(&line).unchecked()).await?;
        if out.success() {
            return Ok(out);
        }
        let text = format!("{}{}", out.stdout, out.stderr).to_lowercase();
        if benign.iter().any(|b| text.contains(b)) {
            debug!(command = %line, "ignoring benign failure");
            return Ok(out);
        }
        Err(RemoteError::new(
            &self.admin.hostname,
            line,
            RemoteErrorKind::Exit(out.exit_code),
            out.stderr.trim(),
        ))
    }

    /// `ceph nfs cluster create`, then waits for every daemon to run.
    pub async fn create_cluster(
        &self,
        ingress: Option<&IngressSpec>,
        poller: &ConvergencePoller,
    ) -> crate::error::Result<ConvergenceResult<RemoteError>> {
        let hosts: Vec<&str> = self.nfs_nodes.iter().map(|n| n.hostname.as_str()).collect();
        let mut line = format!("ceph nfs cluster create {}", self.cluster);
        if !hosts.is_empty() {
            line.push_str(&format!(" \"{}\"", hosts.join(",")));
        }
        if let Some(ingress) = ingress {
            line.push_str(&format!(" --ingress --virtual_ip {}", ingress.virtual_ip));
        }
        self.admin_exec_tolerating(line, &["already exists"]).await?;
        info!(cluster = %self.cluster, nodes = hosts.len(), "nfs cluster created");

        let service = self.service_name(&self.cluster);
        self.wait_for_replicas(&service, poller).await
    }

    pub async fn services(&self) -> Result<Vec<ServiceStatus>, RemoteError> {
        let line = "ceph orch ls --format json";
        let out = self.admin_exec(RemoteCommand::sudo(line)).await?;
        parse_services(&out.stdout)
            .map_err(|e| RemoteError::new(&self.admin.hostname, line, RemoteErrorKind::Parse, e))
    }

    /// Waits until the orchestrator reports `running == size` for `service`.
    pub async fn wait_for_replicas(
        &self,
        service: &str,
        poller: &ConvergencePoller,
    ) -> crate::error::Result<ConvergenceResult<RemoteError>> {
        let result = poller
            .await_condition_with(
                || async move {
                    let services = self.services().await?;
                    let status = services.iter().find(|s| s.service_name == service);
                    if let Some(s) = status {
                        debug!(service, running = s.status.running, size = s.status.size, "replicas");
                    }
                    Ok::<_, RemoteError>(status.map(ServiceStatus::converged).unwrap_or(false))
                },
                RemoteError::is_fatal,
            )
            .await?;
        result.ok_or_timeout(format!("replicas of {}", service))
    }

    /// Makes systemd keep coredumps on every NFS node, so a crashing daemon
    /// leaves something for [`find_coredumps`](Self::find_coredumps) to see.
    pub async fn enable_coredumps(&self) -> Result<(), RemoteError> {
        let mut steps: Vec<String> = COREDUMP_SETTINGS
            .iter()
            .map(|setting| {
                format!(
                    "grep -qxF {s} {conf} || echo {s} >> {conf}",
                    s = setting,
                    conf = COREDUMP_CONF
                )
            })
            .collect();
        steps.push("systemctl daemon-reexec".to_string());
        let command = RemoteCommand::sudo(steps.join(" && "));
        let command = &command;

        let runs = self
            .nfs_nodes
            .iter()
            .map(|node| async move { (node, self.runner.exec(node, command).await) });
        for (node, result) in join_all(runs).await {
            result?;
            debug!(node = %node, "coredumps enabled");
        }
        info!(nodes = self.nfs_nodes.len(), "coredump collection enabled");
        Ok(())
    }

    /// Coredumps written on any NFS node after `since`.
    pub async fn find_coredumps(&self, since: SystemTime) -> Result<Vec<Coredump>, RemoteError> {
        let epoch = since
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let line = format!("find {} -type f -newermt @{}", COREDUMP_DIR, epoch);
        let checks = self.nfs_nodes.iter().map(|node| {
            let command = RemoteCommand::sudo(&line).unchecked();
            async move { (node, self.runner.exec(node, &command).await) }
        });

        let mut found = Vec::new();
        for (node, result) in join_all(checks).await {
            let out = result?;
            // find exits non-zero when the directory does not exist
            let files: Vec<String> = out
                .stdout
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect();
            if !files.is_empty() {
                warn!(node = %node, count = files.len(), "coredumps found");
                found.push(Coredump {
                    node: node.clone(),
                    files,
                });
            }
        }
        Ok(found)
    }
}

fn subvolume_name(share: &ShareSpec) -> String {
    share.export_path.replace('/', "")
}

fn mount_options(share: &ShareSpec) -> String {
    let opts = &share.options;
    let mut parts = vec![
        format!("vers={}", opts.version),
        format!("port={}", opts.port),
    ];
    for (key, value) in &opts.mount_options {
        if value.is_empty() {
            parts.push(key.clone());
        } else {
            parts.push(format!("{}={}", key, value));
        }
    }
    parts.join(",")
}

fn parse_services(json: &str) -> Result<Vec<ServiceStatus>, String> {
    let trimmed = json.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(trimmed).map_err(|e| format!("bad orchestrator listing: {}", e))
}

/// Whether `/proc/mounts` content has an NFS mount at `mount_path`.
fn mount_table_has(table: &str, mount_path: &str) -> bool {
    let wanted = mount_path.trim_end_matches('/');
    table.lines().any(|line| {
        let mut fields = line.split_whitespace();
        let _source = fields.next();
        matches!(
            (fields.next(), fields.next()),
            (Some(target), Some(fstype)) if target == wanted && fstype.starts_with("nfs")
        )
    })
}

/// Addresses from `ip -o addr` output, prefix length removed.
fn parse_addresses(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            fields.find(|f| *f == "inet" || *f == "inet6")?;
            let cidr = fields.next()?;
            let addr = cidr.split('/').next()?;
            addr.parse::<IpAddr>().ok().map(|ip| ip.to_string())
        })
        .collect()
}

#[async_trait]
impl<R: CommandRunner> ShareOps for CephNfs<R> {
    async fn create_share(&self, _client: &ClientRef, share: &ShareSpec) -> Result<(), RemoteError> {
        let subvol = subvolume_name(share);
        let group = &self.subvolume_group;
        self.admin_exec_tolerating(
            format!("ceph fs subvolumegroup create {} {}", self.fs_name, group),
            &["exist"],
        )
        .await?;
        self.admin_exec(RemoteCommand::sudo(format!(
            "ceph fs subvolume create {} {} --group_name {} --namespace-isolated",
            self.fs_name, subvol, group
        )))
        .await?;

        let getpath = format!(
            "ceph fs subvolume getpath {} {} --group_name {}",
            self.fs_name, subvol, group
        );
        let out = self.admin_exec(RemoteCommand::sudo(&getpath)).await?;
        let path = out.stdout.trim();
        if path.is_empty() {
            return Err(RemoteError::new(
                &self.admin.hostname,
                getpath,
                RemoteErrorKind::Parse,
                "empty subvolume path",
            ));
        }

        self.admin_exec_tolerating(
            format!(
                "ceph nfs export create cephfs {} {} {} --path={}",
                self.cluster, share.export_path, self.fs_name, path
            ),
            &["already exists"],
        )
        .await?;

        if let Some(qos) = &share.options.qos {
            self.admin_exec(RemoteCommand::sudo(format!(
                "ceph nfs export qos enable bandwidth_control {} {} {} {}",
                self.cluster,
                share.export_path,
                qos.kind(),
                qos.limit_args().join(" ")
            )))
            .await?;
        }
        Ok(())
    }

    /// A retry after an attempt that mounted but still reported an error
    /// finds the mount in place and succeeds.
    async fn mount(&self, client: &ClientRef, share: &ShareSpec) -> Result<(), RemoteError> {
        if self.is_mounted(client, share).await? {
            debug!(client = %client, share = %share.name, "already mounted");
            return Ok(());
        }
        let line = format!(
            "mkdir -p {mount} && mount -t nfs -o {opts} {source} {mount}",
            mount = shell_quote(&share.mount_path),
            opts = shell_quote(&mount_options(share)),
            source = shell_quote(&format!("{}:{}", self.server_address(), share.export_path)),
        );
        self.runner.exec(client, &RemoteCommand::sudo(line)).await?;
        Ok(())
    }

    async fn is_mounted(&self, client: &ClientRef, share: &ShareSpec) -> Result<bool, RemoteError> {
        let out = self
            .runner
            .exec(client, &RemoteCommand::new("cat /proc/mounts"))
            .await?;
        Ok(mount_table_has(&out.stdout, &share.mount_path))
    }
}

#[async_trait]
impl<R: CommandRunner> TeardownOps for CephNfs<R> {
    async fn clear_mount(&self, client: &ClientRef, share: &ShareSpec) -> Result<(), RemoteError> {
        let command = RemoteCommand::sudo(format!("rm -rf {}/*", shell_quote(&share.mount_path))).long_running();
        self.runner.exec(client, &command).await?;
        Ok(())
    }

    async fn unmount(&self, client: &ClientRef, share: &ShareSpec, lazy: bool) -> Result<(), RemoteError> {
        let flag = if lazy { "-l " } else { "" };
        let command = RemoteCommand::sudo(format!("umount {}{}", flag, shell_quote(&share.mount_path)));
        self.runner.exec(client, &command).await?;
        Ok(())
    }

    async fn remove_mount_dir(&self, client: &ClientRef, share: &ShareSpec) -> Result<(), RemoteError> {
        let command = RemoteCommand::sudo(format!("rm -rf {}", shell_quote(&share.mount_path)));
        self.runner.exec(client, &command).await?;
        Ok(())
    }

    async fn delete_export(&self, cluster: &str, share: &ShareSpec) -> Result<(), RemoteError> {
        const GONE: &[&str] = &["not found", "does not exist", "no such"];
        self.admin_exec_tolerating(
            format!("ceph nfs export rm {} {}", cluster, share.export_path),
            GONE,
        )
        .await?;
        self.admin_exec_tolerating(
            format!(
                "ceph fs subvolume rm {} {} --group_name {}",
                self.fs_name,
                subvolume_name(share),
                self.subvolume_group
            ),
            GONE,
        )
        .await?;
        Ok(())
    }

    async fn delete_cluster(&self, cluster: &str) -> Result<(), RemoteError> {
        self.admin_exec(RemoteCommand::sudo(format!("ceph nfs cluster rm {}", cluster)))
            .await?;
        Ok(())
    }

    async fn list_services(&self) -> Result<Vec<String>, RemoteError> {
        Ok(self
            .services()
            .await?
            .into_iter()
            .map(|s| s.service_name)
            .collect())
    }

    fn service_name(&self, cluster: &str) -> String {
        format!("nfs.{}", cluster)
    }
}

#[async_trait]
impl<R: CommandRunner> FailoverOps for CephNfs<R> {
    /// Reboots `node` and waits for ssh to answer again.
    async fn disrupt(&self, node: &ClientRef) -> Result<(), RemoteError> {
        let reboot = RemoteCommand::sudo("reboot")
            .unchecked()
            .with_timeout(Duration::from_secs(30));
        match self.runner.exec(node, &reboot).await {
            Ok(_) => {}
            // the connection usually drops before reboot returns
            Err(e) if e.is_timeout() => {}
            Err(e) => return Err(e),
        }
        info!(node = %node, "reboot issued, waiting for the node to come back");

        let ping = RemoteCommand::new("true").with_timeout(Duration::from_secs(15));
        let result = self
            .reboot_wait
            .await_condition_with(
                || {
                    let ping = &ping;
                    async move { self.runner.exec(node, ping).await.map(|_| true) }
                },
                RemoteError::is_fatal,
            )
            .await?;
        if result.satisfied {
            info!(node = %node, elapsed_ms = result.elapsed.as_millis() as u64, "node is back");
            Ok(())
        } else {
            Err(RemoteError::new(
                &node.hostname,
                "reboot",
                RemoteErrorKind::TimedOut,
                format!("node did not come back within {:?}", self.reboot_wait.timeout()),
            ))
        }
    }

    async fn bound_addresses(&self, node: &ClientRef) -> Result<Vec<String>, RemoteError> {
        let out = self
            .runner
            .exec(node, &RemoteCommand::sudo("ip -o addr"))
            .await?;
        Ok(parse_addresses(&out.stdout))
    }
}

#[async_trait]
impl<R: CommandRunner> HealthCheck for CephNfs<R> {
    async fn is_cluster_healthy(&self, client: &ClientRef) -> Result<bool, RemoteError> {
        let out = self
            .runner
            .exec(client, &RemoteCommand::sudo("ceph health"))
            .await?;
        Ok(out.stdout.trim_start().starts_with("HEALTH_OK"))
    }
}
