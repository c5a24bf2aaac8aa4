use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sharepilot::RunContext;
use sharepilot::config::Settings;
use sharepilot::remote::{CephNfs, SshRunner};
use sharepilot::share::{Assignment, allocate};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod failover;
pub mod health;
pub mod plan;
pub mod run;

#[derive(Parser)]
#[command(name = "sharepilot")]
#[command(author, version, about = "Provision, verify and tear down NFS exports for cluster tests", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a default configuration file
    Init {
        #[arg(default_value = "sharepilot.toml")]
        path: PathBuf,
    },
    /// Print which client gets which shares
    Plan {
        #[arg(short, long)]
        config: PathBuf,
        /// Print the assignment as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create the cluster, provision every share, then tear everything down
    ///
    /// Exits non-zero if any pair failed, teardown failed or an NFS node
    /// wrote a coredump during the run.
    Run {
        #[arg(short, long)]
        config: PathBuf,
        /// Leave exports mounted instead of tearing down
        #[arg(long)]
        keep: bool,
    },
    /// Tear down the configured shares and cluster
    Teardown {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Reboot an NFS node and wait for the float address to move
    Failover {
        #[arg(short, long)]
        config: PathBuf,
        /// Hostname of the NFS node to reboot
        #[arg(long)]
        node: String,
        /// Overrides [failover] timeout_secs
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Poll `ceph health` until HEALTH_OK
    WaitHealthy {
        #[arg(short, long)]
        config: PathBuf,
        /// Overrides [policy] health_timeout_secs
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or(EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Everything a subcommand needs to talk to the cluster.
pub struct Session {
    pub settings: Settings,
    pub ctx: Arc<RunContext>,
    pub ceph: Arc<CephNfs<SshRunner>>,
}

impl Session {
    pub fn open(config_path: &Path) -> Result<Self> {
        let settings = Settings::from_file(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

        let cluster = &settings.cluster;
        let runner = SshRunner::new(settings.ssh.to_settings());
        let mut ceph = CephNfs::new(runner, cluster.admin.to_client_ref(), &cluster.name)
            .with_fs_name(&cluster.fs_name)
            .with_subvolume_group(&cluster.subvolume_group)
            .with_nfs_nodes(settings.nfs_nodes());
        if let Some(vip) = &cluster.virtual_ip {
            ceph = ceph.with_mount_server(vip);
        }

        let ctx = Arc::new(RunContext::new(&cluster.name));
        Ok(Self {
            settings,
            ctx,
            ceph: Arc::new(ceph),
        })
    }

    pub fn assignment(&self) -> Result<Assignment> {
        allocate(
            &self.settings.clients(),
            self.settings.shares.count,
            &self.settings.shares.template,
        )
        .context("Failed to allocate shares")
    }
}
