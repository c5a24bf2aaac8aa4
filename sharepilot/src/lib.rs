//! Allocation and lifecycle convergence for NFS exports under test.
//!
//! Shares are partitioned over clients by [`share::allocate`], each
//! (client, share) pair is driven through create, mount and verify by a
//! [`lifecycle::ResourceStateMachine`], and [`lifecycle::TeardownCoordinator`]
//! unwinds whatever was reached. [`failover::FailoverWatcher`] checks that a
//! float address moves off a disrupted node. All remote work goes through the
//! traits in [`lifecycle`], [`failover`] and [`health`]; [`remote::CephNfs`]
//! implements them for a Ceph NFS-Ganesha cluster over ssh.

pub mod config;
pub mod context;
pub mod error;
pub mod failover;
pub mod health;
pub mod lifecycle;
pub mod poll;
pub mod remote;
pub mod retry;
pub mod share;
pub mod task;

pub use context::RunContext;
pub use error::{PilotError, RemoteError, Result};
